//! The `help` command.
//!
//! ```text
//! !help          → Available commands: help, ping, roll
//! !help ping     → ping: Answers with pong.
//! !help nope     → no...
//! ```

use crate::handler::HandlerCall;
use crate::parser::{Parser, ParserBuilder};
use crate::plugin::PluginModule;

/// Name of the module holding the built-in commands.
pub const MODULE_NAME: &str = "basic";

const NO: &str = "no...";

/// Builder for the `help` command.
pub fn help_parser() -> ParserBuilder {
    Parser::cmd("help", help)
        .doc("Returns some documentation for a given command.\n\nExamples:\n\n    !help help")
        .source(MODULE_NAME)
}

/// The `basic` module.
pub fn module() -> PluginModule {
    PluginModule::new(MODULE_NAME).with_handler(help_parser())
}

fn help(call: HandlerCall) -> String {
    match call.args() {
        [] => {
            let commands: Vec<&str> = call.docs.keys().map(String::as_str).collect();
            format!("Available commands: {}", commands.join(", "))
        }
        [cmd] => match call.docs.get(cmd) {
            Some(Some(doc)) => format!("{cmd}: {doc}"),
            _ => NO.to_string(),
        },
        _ => NO.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ember_core::Event;

    use crate::handler::CommandDocs;

    fn call(args: &[&str]) -> HandlerCall {
        let mut docs = CommandDocs::new();
        docs.insert("help".into(), Some("Returns some documentation for a given command.".into()));
        docs.insert("ping".into(), Some("Answers with pong.".into()));
        docs.insert("secret".into(), None);
        HandlerCall {
            event: Arc::new(Event::command("help", args.iter().copied()).unwrap()),
            groups: Vec::new(),
            docs: Arc::new(docs),
        }
    }

    #[test]
    fn test_lists_commands() {
        assert_eq!(help(call(&[])), "Available commands: help, ping, secret");
    }

    #[test]
    fn test_shows_first_doc_line() {
        assert_eq!(help(call(&["ping"])), "ping: Answers with pong.");
    }

    #[test]
    fn test_unknown_or_undocumented_or_too_many() {
        assert_eq!(help(call(&["nope"])), "no...");
        assert_eq!(help(call(&["secret"])), "no...");
        assert_eq!(help(call(&["ping", "help"])), "no...");
    }
}
