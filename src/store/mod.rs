//! Durable conversation log keyed by contact.
//!
//! One JSON document holds every conversation. All access goes through a
//! single async mutex, and every mutating call flushes a fully-formed
//! replacement document before returning, so concurrent cycle tasks can
//! never interleave a read-modify-write of the persisted state.

pub mod flow;
pub mod model;

pub use flow::{FlowAnalysis, FlowPattern};
pub use model::{
    Conversation, ConversationStats, Direction, ExternalMessage, Message, MessageDraft,
    MessageKind, MessageOrigin, StoreDocument, TranscriptEntry,
};

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use model::{LegacyDocument, SCHEMA_VERSION, migrate_legacy, now_ms};

/// Bounded rich read used to build generation prompts.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub contact_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub messages: Vec<Message>,
    pub stats: ConversationStats,
    pub flow: FlowAnalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// File-backed store. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct ConversationStore {
    path: PathBuf,
    max_retained: usize,
    state: Mutex<StoreDocument>,
}

impl ConversationStore {
    /// Load the store from `path`, creating parent directories as needed.
    ///
    /// A missing file starts empty. A pre-versioned flat document is
    /// migrated in place and flushed back. Unreadable or corrupt content
    /// is logged and replaced with an empty store rather than failing.
    pub async fn open(path: impl Into<PathBuf>, max_retained: usize) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let (document, migrated) = match fs::read(&path).await {
            Ok(bytes) => Self::parse_document(&path, &bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no store file yet, starting empty");
                (StoreDocument::empty(), false)
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "store file unreadable, starting empty");
                (StoreDocument::empty(), false)
            }
        };

        let store = Self {
            path,
            max_retained,
            state: Mutex::new(document),
        };
        if migrated {
            let mut document = store.state.lock().await;
            store.flush(&mut document).await?;
            info!(path = %store.path.display(), "migrated legacy store document");
        }
        Ok(store)
    }

    fn parse_document(path: &Path, bytes: &[u8]) -> (StoreDocument, bool) {
        if let Ok(document) = serde_json::from_slice::<StoreDocument>(bytes) {
            if document.metadata.version > SCHEMA_VERSION {
                warn!(
                    path = %path.display(),
                    found = document.metadata.version,
                    supported = SCHEMA_VERSION,
                    "store document written by a newer build, loading best-effort"
                );
            }
            return (document, false);
        }
        if let Ok(legacy) = serde_json::from_slice::<LegacyDocument>(bytes) {
            return (migrate_legacy(legacy), true);
        }
        warn!(path = %path.display(), "store file corrupt, reinitializing empty");
        (StoreDocument::empty(), false)
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Normalize and insert one message. Returns `None` without touching
    /// state when the draft is a duplicate of a stored record.
    pub async fn add_message(
        &self,
        contact_key: &str,
        draft: MessageDraft,
    ) -> Result<Option<Message>, StoreError> {
        let mut document = self.state.lock().await;
        let inserted = Self::insert_draft(&mut document, contact_key, draft, self.max_retained);
        if inserted.is_some() {
            self.flush(&mut document).await?;
        }
        Ok(inserted)
    }

    /// Reconcile a batch fetched from the channel. Items are applied in
    /// timestamp order; duplicates are skipped. Returns how many records
    /// were newly inserted. One flush covers the whole batch.
    pub async fn merge_external_batch(
        &self,
        contact_key: &str,
        batch: &[ExternalMessage],
    ) -> Result<usize, StoreError> {
        let mut drafts: Vec<MessageDraft> = batch.iter().map(MessageDraft::from_external).collect();
        drafts.sort_by_key(|draft| draft.timestamp);

        let mut document = self.state.lock().await;
        let mut inserted = 0;
        for draft in drafts {
            if Self::insert_draft(&mut document, contact_key, draft, self.max_retained).is_some() {
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.flush(&mut document).await?;
        }
        debug!(contact = contact_key, fetched = batch.len(), inserted, "merged external batch");
        Ok(inserted)
    }

    /// Record a message our own send path just delivered.
    pub async fn mark_sent(
        &self,
        contact_key: &str,
        body: &str,
        kind: MessageKind,
    ) -> Result<Option<Message>, StoreError> {
        self.add_message(contact_key, MessageDraft::outgoing(body, kind))
            .await
    }

    /// Forget messages for one contact, or for everyone. Conversation
    /// entries themselves survive with zeroed stats.
    pub async fn clear(&self, contact_key: Option<&str>) -> Result<(), StoreError> {
        let mut document = self.state.lock().await;
        match contact_key {
            Some(key) => {
                if let Some(conversation) = document.conversations.get_mut(key) {
                    conversation.reset();
                }
            }
            None => {
                for conversation in document.conversations.values_mut() {
                    conversation.reset();
                }
            }
        }
        self.flush(&mut document).await
    }

    /// Attach a human-readable name shown in exports and prompts.
    pub async fn set_display_name(
        &self,
        contact_key: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        let mut document = self.state.lock().await;
        let conversation = document
            .conversations
            .entry(contact_key.to_string())
            .or_insert_with(|| Conversation::new(contact_key));
        if conversation.display_name.as_deref() == Some(display_name) {
            return Ok(());
        }
        conversation.display_name = Some(display_name.to_string());
        self.flush(&mut document).await
    }

    fn insert_draft(
        document: &mut StoreDocument,
        contact_key: &str,
        draft: MessageDraft,
        max_retained: usize,
    ) -> Option<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            external_id: draft.external_id,
            body: draft.body,
            direction: draft.direction,
            timestamp: draft.timestamp.unwrap_or_else(now_ms),
            kind: draft.kind,
            origin: draft.origin,
        };
        let conversation = document
            .conversations
            .entry(contact_key.to_string())
            .or_insert_with(|| Conversation::new(contact_key));
        if conversation.contains_duplicate(&message) {
            debug!(contact = contact_key, body = %message.body, "skipped duplicate message");
            return None;
        }
        conversation.insert_chronological(message.clone());
        let dropped = conversation.trim_to(max_retained);
        if dropped > 0 {
            debug!(contact = contact_key, dropped, "trimmed retained window");
        }
        Some(message)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// The most recent `limit` messages, oldest first, in the minimal
    /// transcript shape.
    pub async fn recent_messages(&self, contact_key: &str, limit: usize) -> Vec<TranscriptEntry> {
        let document = self.state.lock().await;
        match document.conversations.get(contact_key) {
            Some(conversation) => conversation.tail(limit).iter().map(Into::into).collect(),
            None => Vec::new(),
        }
    }

    /// Bounded window plus conversation stats and flow classification.
    pub async fn conversation_context(
        &self,
        contact_key: &str,
        limit: usize,
    ) -> ConversationContext {
        let document = self.state.lock().await;
        match document.conversations.get(contact_key) {
            Some(conversation) => {
                let window = conversation.tail(limit);
                ConversationContext {
                    contact_key: contact_key.to_string(),
                    display_name: conversation.display_name.clone(),
                    messages: window.to_vec(),
                    stats: conversation.stats.clone(),
                    flow: FlowAnalysis::from_window(window, now_ms()),
                }
            }
            None => ConversationContext {
                contact_key: contact_key.to_string(),
                display_name: None,
                messages: Vec::new(),
                stats: ConversationStats::default(),
                flow: FlowAnalysis::from_window(&[], now_ms()),
            },
        }
    }

    /// Serialize one conversation, or the whole document, for inspection.
    pub async fn export(
        &self,
        contact_key: Option<&str>,
        format: ExportFormat,
    ) -> Result<String, StoreError> {
        let document = self.state.lock().await;
        match (format, contact_key) {
            (ExportFormat::Json, Some(key)) => {
                let conversation = document.conversations.get(key);
                Ok(serde_json::to_string_pretty(&conversation)?)
            }
            (ExportFormat::Json, None) => Ok(serde_json::to_string_pretty(&*document)?),
            (ExportFormat::Text, Some(key)) => Ok(document
                .conversations
                .get(key)
                .map(render_transcript)
                .unwrap_or_default()),
            (ExportFormat::Text, None) => {
                let mut out = String::new();
                for conversation in document.conversations.values() {
                    out.push_str(&render_transcript(conversation));
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Write the full document to a sibling temp file and rename it over
    /// the store path. Callers hold the state lock, so flushes never race.
    async fn flush(&self, document: &mut StoreDocument) -> Result<(), StoreError> {
        document.metadata.version = SCHEMA_VERSION;
        document.metadata.updated_at = chrono::Utc::now();
        let serialized = serde_json::to_string_pretty(&*document)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)
            .await
            .map_err(|source| StoreError::Write {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }
}

fn render_transcript(conversation: &Conversation) -> String {
    let name = conversation
        .display_name
        .as_deref()
        .unwrap_or(&conversation.contact_key);
    let mut out = format!(
        "# {name} ({} messages)\n",
        conversation.stats.total_messages
    );
    for message in &conversation.messages {
        let when = message
            .sent_at()
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| message.timestamp.to_string());
        let who = match message.direction {
            Direction::Incoming => "them",
            Direction::Outgoing => "us",
        };
        let tag = if message.is_voice() { " [voice]" } else { "" };
        out.push_str(&format!("[{when}] {who}{tag}: {}\n", message.body));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn fresh_store(dir: &TempDir) -> ConversationStore {
        ConversationStore::open(dir.path().join("store.json"), 200)
            .await
            .unwrap()
    }

    fn external(id: &str, body: &str, from_me: bool, secs: i64) -> ExternalMessage {
        ExternalMessage {
            id: id.to_string(),
            body: body.to_string(),
            from_me,
            timestamp: secs,
            kind: "chat".to_string(),
        }
    }

    #[tokio::test]
    async fn add_message_persists_and_reports_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir).await;

        let draft = MessageDraft {
            external_id: Some("ext-1".to_string()),
            body: "hola".to_string(),
            direction: Direction::Incoming,
            kind: MessageKind::Text,
            timestamp: Some(1_000),
            origin: MessageOrigin::External,
        };
        let first = store.add_message("alice", draft.clone()).await.unwrap();
        assert!(first.is_some());
        let second = store.add_message("alice", draft).await.unwrap();
        assert!(second.is_none());

        let reopened = fresh_store(&dir).await;
        let context = reopened.conversation_context("alice", 10).await;
        assert_eq!(context.stats.total_messages, 1);
    }

    #[tokio::test]
    async fn merging_the_same_batch_twice_inserts_once() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir).await;

        let batch = vec![
            external("m2", "second", true, 2_000),
            external("m1", "first", false, 1_000),
        ];
        assert_eq!(store.merge_external_batch("alice", &batch).await.unwrap(), 2);
        assert_eq!(store.merge_external_batch("alice", &batch).await.unwrap(), 0);

        let context = store.conversation_context("alice", 10).await;
        assert_eq!(context.stats.total_messages, 2);
        assert_eq!(context.messages[0].body, "first");
        assert_eq!(context.messages[1].body, "second");
    }

    #[tokio::test]
    async fn stats_track_message_count_across_mutations() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::open(dir.path().join("store.json"), 5)
            .await
            .unwrap();

        for i in 0..9i64 {
            let batch = vec![external(&format!("m{i}"), &format!("body {i}"), false, 1_000 + i)];
            store.merge_external_batch("alice", &batch).await.unwrap();
        }
        store
            .mark_sent("alice", "nos vemos", MessageKind::Text)
            .await
            .unwrap();

        let context = store.conversation_context("alice", 50).await;
        assert_eq!(context.stats.total_messages, context.messages.len());
        assert_eq!(context.stats.total_messages, 5);
    }

    #[tokio::test]
    async fn trimming_advances_first_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::open(dir.path().join("store.json"), 3)
            .await
            .unwrap();

        for i in 0..5i64 {
            store
                .add_message(
                    "alice",
                    MessageDraft {
                        external_id: Some(format!("m{i}")),
                        body: format!("body {i}"),
                        direction: Direction::Incoming,
                        kind: MessageKind::Text,
                        timestamp: Some(i * 60_000),
                        origin: MessageOrigin::External,
                    },
                )
                .await
                .unwrap();
        }

        let context = store.conversation_context("alice", 10).await;
        assert_eq!(context.stats.total_messages, 3);
        assert_eq!(context.stats.first_timestamp, Some(2 * 60_000));
    }

    #[tokio::test]
    async fn recent_messages_returns_transcript_tail() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir).await;

        let batch = vec![
            external("m1", "one", false, 1_000),
            external("m2", "two", true, 2_000),
            external("m3", "three", false, 3_000),
        ];
        store.merge_external_batch("alice", &batch).await.unwrap();

        let recent = store.recent_messages("alice", 2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].body, "two");
        assert_eq!(recent[0].direction, Direction::Outgoing);
        assert_eq!(recent[1].body, "three");
        assert_eq!(recent[1].timestamp, 3_000_000);
    }

    #[tokio::test]
    async fn mark_sent_stamps_the_clock_and_counts_outgoing() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir).await;

        let before = model::now_ms();
        let sent = store
            .mark_sent("alice", "buenas noches", MessageKind::Voice)
            .await
            .unwrap()
            .unwrap();
        assert!(sent.timestamp >= before);
        assert_eq!(sent.direction, Direction::Outgoing);
        assert!(sent.is_voice());

        let context = store.conversation_context("alice", 10).await;
        assert_eq!(context.stats.outgoing, 1);
        assert_eq!(context.stats.voice, 1);
    }

    #[tokio::test]
    async fn clear_resets_one_or_all_conversations() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir).await;

        store
            .merge_external_batch("alice", &[external("a1", "hola", false, 1_000)])
            .await
            .unwrap();
        store
            .merge_external_batch("bob", &[external("b1", "hey", false, 1_000)])
            .await
            .unwrap();

        store.clear(Some("alice")).await.unwrap();
        assert_eq!(
            store.conversation_context("alice", 10).await.stats.total_messages,
            0
        );
        assert_eq!(
            store.conversation_context("bob", 10).await.stats.total_messages,
            1
        );

        store.clear(None).await.unwrap();
        assert_eq!(
            store.conversation_context("bob", 10).await.stats.total_messages,
            0
        );
    }

    #[tokio::test]
    async fn export_renders_json_and_text() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir).await;
        store.set_display_name("alice", "Alicia").await.unwrap();
        store
            .merge_external_batch("alice", &[external("a1", "hola", false, 1_000)])
            .await
            .unwrap();

        let json = store.export(Some("alice"), ExportFormat::Json).await.unwrap();
        assert!(json.contains("\"contact_key\": \"alice\""));

        let text = store.export(None, ExportFormat::Text).await.unwrap();
        assert!(text.contains("# Alicia (1 messages)"));
        assert!(text.contains("them: hola"));
    }

    #[tokio::test]
    async fn corrupt_store_file_reinitializes_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let store = ConversationStore::open(&path, 200).await.unwrap();
        let context = store.conversation_context("alice", 10).await;
        assert_eq!(context.stats.total_messages, 0);

        store
            .mark_sent("alice", "hola de nuevo", MessageKind::Text)
            .await
            .unwrap();
        let reopened = ConversationStore::open(&path, 200).await.unwrap();
        assert_eq!(
            reopened.conversation_context("alice", 10).await.stats.total_messages,
            1
        );
    }

    #[tokio::test]
    async fn legacy_flat_document_migrates_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let legacy = serde_json::json!({
            "alice": [
                { "id": "m1", "body": "hola", "fromMe": false, "timestamp": 1_000, "isVoice": false },
                { "id": "m2", "body": "hola!", "fromMe": true, "timestamp": 6_000, "isVoice": true }
            ]
        });
        tokio::fs::write(&path, serde_json::to_vec(&legacy).unwrap())
            .await
            .unwrap();

        let store = ConversationStore::open(&path, 200).await.unwrap();
        let context = store.conversation_context("alice", 10).await;
        assert_eq!(context.stats.total_messages, 2);
        assert_eq!(context.stats.voice, 1);

        // The migrated document is flushed back in the versioned shape.
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(document["metadata"]["version"], model::SCHEMA_VERSION);
    }
}
