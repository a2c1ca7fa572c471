//! Handler descriptors and event matching.
//!
//! A [`Parser`] wraps one handler with its match criteria and execution
//! policy. Parsers are built explicitly through [`ParserBuilder`]:
//!
//! ```rust,ignore
//! // Responds to `!ping`; the trigger defaults to `^ping$`.
//! let ping = Parser::cmd("ping", |_call: HandlerCall| "pong").build()?;
//!
//! // Responds to any message starting with "hello".
//! let hello = Parser::on_match("hello", |_call: HandlerCall| "hi!")
//!     .regex("hello")
//!     .threaded(true)
//!     .build()?;
//!
//! // Sees every event.
//! let audit = Parser::always("audit", |call: HandlerCall| {
//!     tracing::info!(event = ?call.event.event_type(), "seen");
//! })
//! .build()?;
//! ```
//!
//! Patterns are anchored at the start of the text: `hello` matches
//! `"hello world"` but not `"oh hello"`.

use std::fmt;

use ember_core::{Event, EventType};
use regex::Regex;
use tracing::{error, warn};

use crate::error::{RegistrationError, RegistrationResult};
use crate::handler::{HandlerCall, HandlerFn, handler_fn};
use crate::reply::IntoReply;

/// The outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// Unconditional match; no pattern was evaluated.
    All,
    /// The trigger matched; the capture groups in pattern order.
    Captures(Vec<Option<String>>),
}

impl MatchResult {
    /// The capture groups forwarded to the handler.
    pub fn into_groups(self) -> Vec<Option<String>> {
        match self {
            Self::All => Vec::new(),
            Self::Captures(groups) => groups,
        }
    }
}

/// A compiled trigger pattern together with its source text.
#[derive(Debug, Clone)]
pub struct Trigger {
    pattern: String,
    regex: Regex,
}

impl Trigger {
    fn prefixed(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{pattern})"))?,
        })
    }

    fn exact(pattern: String) -> Result<Self, regex::Error> {
        let regex = Regex::new(&pattern)?;
        Ok(Self { pattern, regex })
    }

    /// The pattern as written.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn captures(&self, text: &str) -> Option<Vec<Option<String>>> {
        self.regex.captures(text).map(|caps| {
            caps.iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect()
        })
    }
}

/// One registered handler with its match criteria and execution policy.
#[derive(Clone)]
pub struct Parser {
    name: String,
    event_type: Option<EventType>,
    trigger: Option<Trigger>,
    command: Option<String>,
    threaded: bool,
    parse_bot_events: bool,
    source: String,
    doc: Option<String>,
    func: HandlerFn,
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("trigger", &self.trigger.as_ref().map(Trigger::pattern))
            .field("command", &self.command)
            .field("threaded", &self.threaded)
            .field("parse_bot_events", &self.parse_bot_events)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Parser {
    /// A command handler. Without `.command(..)` it answers to its own name.
    pub fn cmd<F, R>(name: impl Into<String>, f: F) -> ParserBuilder
    where
        F: Fn(HandlerCall) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        ParserBuilder::new(Some(EventType::Cmd), name.into(), handler_fn(f))
    }

    /// A message handler matched against the message body.
    pub fn on_match<F, R>(name: impl Into<String>, f: F) -> ParserBuilder
    where
        F: Fn(HandlerCall) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        ParserBuilder::new(Some(EventType::Message), name.into(), handler_fn(f))
    }

    /// A handler for every event of the given type.
    pub fn on_event<F, R>(event_type: EventType, name: impl Into<String>, f: F) -> ParserBuilder
    where
        F: Fn(HandlerCall) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        ParserBuilder::new(Some(event_type), name.into(), handler_fn(f))
    }

    /// A handler for every event, whatever its type.
    pub fn always<F, R>(name: impl Into<String>, f: F) -> ParserBuilder
    where
        F: Fn(HandlerCall) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        ParserBuilder::new(None, name.into(), handler_fn(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry key; `None` means "every event".
    pub fn event_type(&self) -> Option<&EventType> {
        self.event_type.as_ref()
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }

    /// The command name, for command parsers.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn threaded(&self) -> bool {
        self.threaded
    }

    pub fn parse_bot_events(&self) -> bool {
        self.parse_bot_events
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// First line of the documentation, as shown by `help`.
    pub fn doc_summary(&self) -> Option<String> {
        self.doc
            .as_deref()
            .and_then(|doc| doc.trim().lines().next())
            .map(|line| line.trim().to_string())
    }

    /// Diagnostic label used in logs: `source::name`.
    pub fn label(&self) -> String {
        format!("{}::{}", self.source, self.name)
    }

    pub(crate) fn func(&self) -> &HandlerFn {
        &self.func
    }

    /// Checks `event` against this parser.
    ///
    /// Failures to evaluate (missing command, missing body) are logged and
    /// treated as no match.
    pub fn matches(&self, event: &Event) -> Option<MatchResult> {
        let declared = match &self.event_type {
            None => return Some(MatchResult::All),
            Some(declared) => declared,
        };
        if declared != event.event_type() {
            return None;
        }

        let text = match declared {
            EventType::Cmd => match event.cmd() {
                Some(cmd) => cmd,
                None => {
                    error!(parser = %self.label(), "Command event without a command");
                    return None;
                }
            },
            EventType::Message => match event.body() {
                Some(body) => body,
                None => {
                    error!(parser = %self.label(), "Message event without a text body");
                    return None;
                }
            },
            EventType::Custom(_) => return Some(MatchResult::All),
        };

        let Some(trigger) = &self.trigger else {
            error!(parser = %self.label(), "Parser has no trigger");
            return None;
        };
        trigger.captures(text).map(MatchResult::Captures)
    }
}

/// Builder for [`Parser`].
#[derive(Clone)]
pub struct ParserBuilder {
    name: String,
    event_type: Option<EventType>,
    pattern: Option<String>,
    threaded: bool,
    parse_bot_events: bool,
    source: Option<String>,
    doc: Option<String>,
    func: HandlerFn,
}

impl ParserBuilder {
    fn new(event_type: Option<EventType>, name: String, func: HandlerFn) -> Self {
        Self {
            name,
            event_type,
            pattern: None,
            threaded: false,
            parse_bot_events: false,
            source: None,
            doc: None,
            func,
        }
    }

    /// The command word(s) to answer to, as a pattern.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.pattern = Some(command.into());
        self
    }

    /// The trigger pattern.
    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Run the handler on the worker pool.
    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    /// Also handle events the bot produced itself.
    pub fn parse_bot_events(mut self, enabled: bool) -> Self {
        self.parse_bot_events = enabled;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Label of the owning module or plugin.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the source label unless one was given explicitly.
    pub(crate) fn default_source(mut self, source: &str) -> Self {
        self.source.get_or_insert_with(|| source.to_string());
        self
    }

    /// Compiles the trigger and produces the parser.
    ///
    /// A pattern that fails to compile is logged and replaced with `^name$`;
    /// if that fails too the parser is rejected.
    pub fn build(self) -> RegistrationResult<Parser> {
        let source = self.source.unwrap_or_else(|| "ember".to_string());
        let needs_trigger = matches!(
            self.event_type,
            Some(EventType::Cmd) | Some(EventType::Message)
        );

        let mut trigger = None;
        let mut command = None;
        if needs_trigger {
            if let Some(pattern) = &self.pattern {
                match Trigger::prefixed(pattern) {
                    Ok(compiled) => {
                        command = Some(pattern.clone());
                        trigger = Some(compiled);
                    }
                    Err(e) => warn!(
                        parser = %self.name,
                        pattern = %pattern,
                        error = %e,
                        "Invalid pattern, falling back to handler name"
                    ),
                }
            }
            if trigger.is_none() {
                let fallback = Trigger::exact(format!("^{}$", self.name)).map_err(|e| {
                    error!(parser = %self.name, error = %e, "Handler name is not a usable pattern");
                    RegistrationError::InvalidPattern {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                command = Some(self.name.clone());
                trigger = Some(fallback);
            }
        }
        if self.event_type != Some(EventType::Cmd) {
            command = None;
        }

        Ok(Parser {
            name: self.name,
            event_type: self.event_type,
            trigger,
            command,
            threaded: self.threaded,
            parse_bot_events: self.parse_bot_events,
            source,
            doc: self.doc,
            func: self.func,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ember_core::BotIdentity;
    use serde_json::json;

    fn cmd_event(body: &str) -> Event {
        let bot = Arc::new(BotIdentity::new("ember"));
        Event::from_value(json!({ "type": "message", "meta": { "body": body } }), &bot).unwrap()
    }

    #[test]
    fn test_cmd_defaults_to_name() {
        let parser = Parser::cmd("ping", |_call: HandlerCall| "pong").build().unwrap();
        assert_eq!(parser.command(), Some("ping"));
        assert_eq!(parser.trigger().unwrap().pattern(), "^ping$");

        assert_eq!(parser.matches(&cmd_event("!ping")), Some(MatchResult::Captures(vec![])));
        assert_eq!(parser.matches(&cmd_event("!pingpong")), None);
        assert_eq!(parser.matches(&Event::message("ping")), None);
    }

    #[test]
    fn test_explicit_command_with_groups() {
        let parser = Parser::cmd("roll", |_call: HandlerCall| ())
            .command(r"roll(\d+)?")
            .build()
            .unwrap();
        assert_eq!(parser.command(), Some(r"roll(\d+)?"));
        assert_eq!(
            parser.matches(&cmd_event("!roll20")),
            Some(MatchResult::Captures(vec![Some("20".into())]))
        );
        assert_eq!(
            parser.matches(&cmd_event("!roll")),
            Some(MatchResult::Captures(vec![None]))
        );
    }

    #[test]
    fn test_invalid_pattern_falls_back_to_name() {
        let parser = Parser::cmd("echo", |_call: HandlerCall| ())
            .command("(unclosed")
            .build()
            .unwrap();
        assert_eq!(parser.command(), Some("echo"));
        assert!(parser.matches(&cmd_event("!echo")).is_some());
    }

    #[test]
    fn test_doubly_invalid_pattern_is_rejected() {
        let result = Parser::cmd("bad(", |_call: HandlerCall| ())
            .command("[also bad")
            .build();
        assert!(matches!(result, Err(RegistrationError::InvalidPattern { .. })));

        let result = Parser::on_match("bad(", |_call: HandlerCall| ()).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_message_trigger_is_prefix_anchored() {
        let parser = Parser::on_match("hello", |_call: HandlerCall| ())
            .regex("^hello")
            .build()
            .unwrap();
        assert_eq!(parser.command(), None);
        assert_eq!(
            parser.matches(&Event::message("hello world")),
            Some(MatchResult::Captures(vec![]))
        );
        assert_eq!(parser.matches(&Event::message("oh hello")), None);

        let unanchored = Parser::on_match("x", |_call: HandlerCall| ())
            .regex("world")
            .build()
            .unwrap();
        assert_eq!(unanchored.matches(&Event::message("hello world")), None);
    }

    #[test]
    fn test_message_without_body_does_not_match() {
        let parser = Parser::on_match("hello", |_call: HandlerCall| ()).build().unwrap();
        let bot = Arc::new(BotIdentity::new("ember"));
        let event = Event::from_value(json!({ "type": "message" }), &bot).unwrap();
        assert_eq!(event.event_type(), &EventType::Message);
        assert_eq!(parser.matches(&event), None);
    }

    #[test]
    fn test_custom_and_always_match_unconditionally() {
        let joins = Parser::on_event(EventType::Custom("join".into()), "joins", |_call: HandlerCall| ())
            .build()
            .unwrap();
        assert!(joins.trigger().is_none());
        assert_eq!(joins.matches(&Event::custom("join")), Some(MatchResult::All));
        assert_eq!(joins.matches(&Event::custom("part")), None);

        let always = Parser::always("audit", |_call: HandlerCall| ()).build().unwrap();
        assert_eq!(always.matches(&Event::message("anything")), Some(MatchResult::All));
        assert_eq!(always.matches(&Event::custom("part")), Some(MatchResult::All));
    }

    #[test]
    fn test_doc_summary_and_label() {
        let parser = Parser::cmd("help", |_call: HandlerCall| ())
            .doc("Returns some documentation.\n\nExamples:\n    !help help")
            .source("basic")
            .build()
            .unwrap();
        assert_eq!(parser.doc_summary().as_deref(), Some("Returns some documentation."));
        assert_eq!(parser.label(), "basic::help");
    }
}
