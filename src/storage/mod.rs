use crate::error::{ChatError, Result};
use crate::session::collaborators::ChatStore;
use crate::session::message::{Conversation, Message, Role, DEFAULT_CONVERSATION_TITLE};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub mod feed;
pub mod types;
pub use feed::InsertFeed;
pub use types::ConversationSummary;

/// Length of a full ULID id; shorter ids are treated as prefixes.
const FULL_ID_LEN: usize = 26;

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn storage_err(e: anyhow::Error) -> ChatError {
    ChatError::Storage(e.to_string())
}

/// SQLite-backed conversation and message store
///
/// Every committed message insert is also published on the attached
/// [`InsertFeed`].
pub struct SqliteStorage {
    db_path: PathBuf,
    feed: InsertFeed,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Uses `STREAMCHAT_DB` when set, otherwise `chat.db` in the user's data
    /// directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("STREAMCHAT_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "streamchat", "streamchat")
            .ok_or_else(|| ChatError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("chat.db"))
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use streamchat::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("chat.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(storage_err)?;
        }

        let storage = Self {
            db_path,
            feed: InsertFeed::default(),
        };
        storage.init()?;
        Ok(storage)
    }

    /// Open or create the store from a configured path, falling back to the
    /// default location.
    pub fn open(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Feed this store publishes committed inserts on.
    pub fn feed(&self) -> InsertFeed {
        self.feed.clone()
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(storage_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")
            .map_err(storage_err)?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);",
        )
        .context("Failed to create tables")
        .map_err(storage_err)?;

        Ok(())
    }

    /// Insert a new conversation titled "New Conversation"
    pub fn insert_conversation(&self) -> Result<Conversation> {
        let conn = self.connect()?;
        let id = ulid::Ulid::new().to_string();
        let now = now_timestamp();

        conn.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![id, DEFAULT_CONVERSATION_TITLE, now, now],
        )
        .context("Failed to insert conversation")
        .map_err(storage_err)?;

        Ok(Conversation {
            id,
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            updated_at: parse_timestamp(&now)
                .context("Failed to read back timestamp")
                .map_err(storage_err)?,
        })
    }

    /// All conversations, most recently updated first
    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, title, updated_at FROM conversations ORDER BY updated_at DESC, rowid DESC")
            .context("Failed to prepare statement")
            .map_err(storage_err)?;

        let rows = stmt
            .query_map([], |row| {
                let updated_at: String = row.get(2)?;
                Ok(Conversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            })
            .context("Failed to query conversations")
            .map_err(storage_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read conversations")
            .map_err(|e| storage_err(e).into())
    }

    /// One conversation by exact id
    pub fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, title, updated_at FROM conversations WHERE id = ?",
            params![id],
            |row| {
                let updated_at: String = row.get(2)?;
                Ok(Conversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            },
        )
        .optional()
        .context("Failed to query conversation")
        .map_err(|e| storage_err(e).into())
    }

    /// Resolve a full id or a unique id prefix to a conversation id
    ///
    /// Returns `None` when nothing matches or the prefix is ambiguous.
    pub fn resolve_conversation_id(&self, id_or_prefix: &str) -> Result<Option<String>> {
        if id_or_prefix.len() >= FULL_ID_LEN {
            return Ok(self.conversation(id_or_prefix)?.map(|c| c.id));
        }

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id FROM conversations WHERE id LIKE ? LIMIT 2")
            .context("Failed to prepare statement")
            .map_err(storage_err)?;
        let matches = stmt
            .query_map(params![format!("{}%", id_or_prefix)], |row| row.get::<_, String>(0))
            .context("Failed to query conversation ids")
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read conversation ids")
            .map_err(storage_err)?;

        match matches.as_slice() {
            [only] => Ok(Some(only.clone())),
            [] => Ok(None),
            _ => {
                tracing::warn!(prefix = %id_or_prefix, "Ambiguous conversation id prefix");
                Ok(None)
            }
        }
    }

    /// Set a conversation's title
    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn
            .execute(
                "UPDATE conversations SET title = ? WHERE id = ?",
                params![title, id],
            )
            .context("Failed to update conversation title")
            .map_err(storage_err)?;

        if updated == 0 {
            return Err(ChatError::ConversationNotFound(id.to_string()).into());
        }
        Ok(())
    }

    /// Persist a message, bump its conversation and publish the insert
    pub fn insert_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<Message> {
        let mut conn = self.connect()?;
        let id = ulid::Ulid::new().to_string();
        let now = now_timestamp();

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_err)?;

        let bumped = tx
            .execute(
                "UPDATE conversations SET updated_at = ? WHERE id = ?",
                params![now, conversation_id],
            )
            .context("Failed to update conversation")
            .map_err(storage_err)?;
        if bumped == 0 {
            return Err(ChatError::ConversationNotFound(conversation_id.to_string()).into());
        }

        tx.execute(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)",
            params![id, conversation_id, role.as_str(), content, now],
        )
        .context("Failed to insert message")
        .map_err(storage_err)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_err)?;

        let created_at = parse_timestamp(&now)
            .context("Failed to read back timestamp")
            .map_err(storage_err)?;
        let message = Message::persisted(id, created_at, role, conversation_id, content);
        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.display_id(),
            role = %role,
            "Message saved"
        );
        self.feed.publish(message.clone());

        Ok(message)
    }

    /// Messages of one conversation, oldest first
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, role, content, created_at, conversation_id
                FROM messages
                WHERE conversation_id = ?
                ORDER BY created_at ASC, rowid ASC",
            )
            .context("Failed to prepare statement")
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(params![conversation_id], |row| {
                let id: String = row.get(0)?;
                let role_str: String = row.get(1)?;
                let content: String = row.get(2)?;
                let created_at: String = row.get(3)?;
                let conversation_id: String = row.get(4)?;

                let role = Role::parse_str(&role_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("unknown role '{}'", role_str).into(),
                    )
                })?;

                Ok(Message::persisted(
                    id,
                    parse_timestamp(&created_at)?,
                    role,
                    conversation_id,
                    content,
                ))
            })
            .context("Failed to query messages")
            .map_err(storage_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read messages")
            .map_err(|e| storage_err(e).into())
    }

    /// Conversations with their message counts, most recently updated first
    pub fn conversation_summaries(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.title, c.created_at, c.updated_at, COUNT(m.id)
                FROM conversations c
                LEFT JOIN messages m ON m.conversation_id = c.id
                GROUP BY c.id
                ORDER BY c.updated_at DESC, c.rowid DESC",
            )
            .context("Failed to prepare statement")
            .map_err(storage_err)?;

        let rows = stmt
            .query_map([], |row| {
                let created_at: String = row.get(2)?;
                let updated_at: String = row.get(3)?;
                let count: i64 = row.get(4)?;
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    message_count: usize::try_from(count).unwrap_or(0),
                })
            })
            .context("Failed to query conversations")
            .map_err(storage_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read conversations")
            .map_err(|e| storage_err(e).into())
    }
}

#[async_trait::async_trait]
impl ChatStore for SqliteStorage {
    async fn create_conversation(&self) -> Result<Conversation> {
        self.insert_conversation()
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.conversations()
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.conversation(id)
    }

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<()> {
        self.set_title(id, title)
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        self.insert_message(conversation_id, role, content)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.messages(conversation_id)
    }
}
