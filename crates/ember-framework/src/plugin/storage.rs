//! Persistent key-value storage for plugins.
//!
//! Each [`Store`] is one SQLite database holding a single string-keyed table
//! of JSON-encoded values:
//!
//! ```text
//! <data_dir>/<nick>.<plugin>.<name><suffix>
//! ```
//!
//! Stores are opened through
//! [`PluginRuntime::open_storage`](crate::plugin::PluginRuntime::open_storage),
//! which hands out one shared handle per name.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Where stores live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub suffix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            suffix: ".db".to_string(),
        }
    }
}

impl StorageConfig {
    /// Path of the store `name` for the given bot and plugin.
    ///
    /// Every component must be a plain, non-empty file name fragment; path
    /// separators and `..` are rejected so the store stays in `data_dir`.
    pub fn path_for(&self, nick: &str, plugin: &str, name: &str) -> StorageResult<PathBuf> {
        for part in [nick, plugin, name] {
            check_component(part)?;
        }
        Ok(self
            .data_dir
            .join(format!("{nick}.{plugin}.{name}{}", self.suffix)))
    }
}

fn check_component(part: &str) -> StorageResult<()> {
    if part.is_empty()
        || part.contains("..")
        || part.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidName(part.to_string()));
    }
    Ok(())
}

/// One open key-value store.
pub struct Store {
    name: String,
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Store {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        let name = name.into();
        debug!(store = %name, path = %path.display(), "Opened storage");
        Ok(Self {
            name,
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.name.clone()))?;
        f(conn)
    }

    /// Reads and decodes the value under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(Into::into)
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entries (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, encoded],
            )?;
            Ok(())
        })
    }

    /// Deletes `key`; returns whether it existed.
    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
            Ok(changed > 0)
        })
    }

    pub fn contains(&self, key: &str) -> StorageResult<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM entries WHERE key = ?1",
                    params![key],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// All keys, sorted.
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM entries ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Closes the underlying database. Later calls fail with
    /// [`StorageError::Closed`].
    pub fn close(&self) -> StorageResult<()> {
        let conn = self
            .conn
            .lock()
            .take()
            .ok_or_else(|| StorageError::Closed(self.name.clone()))?;
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        debug!(store = %self.name, "Closed storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quote {
        author: String,
        text: String,
    }

    #[test]
    fn test_path_layout() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/var/ember"),
            suffix: ".sqlite".into(),
        };
        assert_eq!(
            config.path_for("ember", "quotes", "main").unwrap(),
            PathBuf::from("/var/ember/ember.quotes.main.sqlite")
        );
    }

    #[test]
    fn test_path_rejects_escaping_names() {
        let config = StorageConfig::default();
        for (nick, plugin, name) in [
            ("ember", "quotes", "../x"),
            ("ember", "quotes", "a/b"),
            ("ember", "quotes", "a\\b"),
            ("ember", "quotes", ""),
            ("..", "quotes", "main"),
            ("ember", "q/../../etc", "main"),
        ] {
            assert!(
                matches!(
                    config.path_for(nick, plugin, name),
                    Err(StorageError::InvalidName(_))
                ),
                "{nick}/{plugin}/{name} accepted"
            );
        }
        assert!(config.path_for("ember", "quotes", "v1.2").is_ok());
    }

    #[test]
    fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("main", dir.path().join("bot.quotes.main.db")).unwrap();

        let quote = Quote {
            author: "alice".into(),
            text: "hello".into(),
        };
        store.set("q1", &quote).unwrap();
        store.set("count", &3).unwrap();

        assert_eq!(store.get::<Quote>("q1").unwrap(), Some(quote));
        assert_eq!(store.get::<u32>("count").unwrap(), Some(3));
        assert_eq!(store.get::<u32>("missing").unwrap(), None);
        assert_eq!(store.keys().unwrap(), ["count", "q1"]);
        assert_eq!(store.len().unwrap(), 2);

        store.set("count", &4).unwrap();
        assert_eq!(store.get::<u32>("count").unwrap(), Some(4));

        assert!(store.remove("count").unwrap());
        assert!(!store.remove("count").unwrap());
        assert!(!store.contains("count").unwrap());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot.p.x.db");

        let store = Store::open("x", &path).unwrap();
        store.set("greeting", "hi").unwrap();
        store.close().unwrap();

        let reopened = Store::open("x", &path).unwrap();
        assert_eq!(reopened.get::<String>("greeting").unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn test_closed_store_rejects_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("x", dir.path().join("x.db")).unwrap();
        store.close().unwrap();

        assert!(!store.is_open());
        assert!(matches!(store.get::<String>("k"), Err(StorageError::Closed(_))));
        assert!(matches!(store.close(), Err(StorageError::Closed(_))));
    }
}
