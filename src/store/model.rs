//! Message and conversation types plus the persisted document shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted document schema version. Bumped whenever the on-disk shape
/// changes in a way `ConversationStore::open` has to migrate.
pub const SCHEMA_VERSION: u32 = 2;

/// Two records are the same logical message when body and direction match
/// and their timestamps differ by less than this many milliseconds.
pub const DEDUP_WINDOW_MS: i64 = 5_000;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ── Core records ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Voice,
}

/// Where a record entered the store: synced from the channel's history,
/// or produced by our own send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    External,
    System,
}

/// A stored message. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Channel-assigned identifier, when the channel provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub body: String,
    pub direction: Direction,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub kind: MessageKind,
    pub origin: MessageOrigin,
}

impl Message {
    pub fn is_voice(&self) -> bool {
        self.kind == MessageKind::Voice
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Input to [`crate::store::ConversationStore::add_message`] before the
/// store assigns an id and stamps missing timestamps.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub external_id: Option<String>,
    pub body: String,
    pub direction: Direction,
    pub kind: MessageKind,
    /// Milliseconds since the Unix epoch. External timestamps are
    /// authoritative; `None` is stamped with the clock at insertion.
    pub timestamp: Option<i64>,
    pub origin: MessageOrigin,
}

impl MessageDraft {
    /// Draft for a message our own send path produced.
    pub fn outgoing(body: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            external_id: None,
            body: body.into(),
            direction: Direction::Outgoing,
            kind,
            timestamp: None,
            origin: MessageOrigin::System,
        }
    }

    /// Draft for a record received over a channel history sync. Channel
    /// timestamps arrive in epoch seconds and are normalized here.
    pub fn from_external(raw: &ExternalMessage) -> Self {
        Self {
            external_id: (!raw.id.is_empty()).then(|| raw.id.clone()),
            body: raw.body.clone(),
            direction: if raw.from_me {
                Direction::Outgoing
            } else {
                Direction::Incoming
            },
            kind: if raw.is_voice_kind() {
                MessageKind::Voice
            } else {
                MessageKind::Text
            },
            timestamp: Some(raw.timestamp * 1_000),
            origin: MessageOrigin::External,
        }
    }
}

/// Raw record shape delivered by a channel's history endpoint. Field names
/// follow the JS bridge's camelCase wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMessage {
    #[serde(default)]
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub from_me: bool,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Channel-native type tag ("chat", "ptt", "audio", ...).
    #[serde(default = "default_external_kind")]
    pub kind: String,
}

fn default_external_kind() -> String {
    "chat".to_string()
}

impl ExternalMessage {
    pub fn is_voice_kind(&self) -> bool {
        matches!(self.kind.as_str(), "ptt" | "audio" | "voice")
    }
}

/// Minimal view for callers that only need who said what and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub direction: Direction,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            direction: message.direction,
            body: message.body.clone(),
            timestamp: message.timestamp,
        }
    }
}

// ── Conversations ───────────────────────────────────────────────────

/// Derived per-conversation accounting, kept consistent with `messages`
/// on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub incoming: usize,
    pub outgoing: usize,
    pub voice: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<i64>,
}

impl ConversationStats {
    /// Rebuild the totals from scratch over the live message sequence.
    pub fn recompute(messages: &[Message]) -> Self {
        let mut stats = Self::default();
        for message in messages {
            stats.record(message);
        }
        stats
    }

    /// Fold one inserted message into the running totals.
    pub(crate) fn record(&mut self, message: &Message) {
        self.total_messages += 1;
        match message.direction {
            Direction::Incoming => self.incoming += 1,
            Direction::Outgoing => self.outgoing += 1,
        }
        if message.is_voice() {
            self.voice += 1;
        }
        self.first_timestamp = Some(match self.first_timestamp {
            Some(first) => first.min(message.timestamp),
            None => message.timestamp,
        });
        self.last_timestamp = Some(match self.last_timestamp {
            Some(last) => last.max(message.timestamp),
            None => message.timestamp,
        });
    }
}

/// One contact's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub contact_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stats: ConversationStats,
}

impl Conversation {
    pub fn new(contact_key: impl Into<String>) -> Self {
        Self {
            contact_key: contact_key.into(),
            display_name: None,
            messages: Vec::new(),
            stats: ConversationStats::default(),
        }
    }

    /// True when `candidate` is a re-delivery of a message already stored:
    /// either its external id is known, or an existing record has the same
    /// body and direction within [`DEDUP_WINDOW_MS`].
    pub(crate) fn contains_duplicate(&self, candidate: &Message) -> bool {
        if let Some(external_id) = candidate.external_id.as_deref()
            && self
                .messages
                .iter()
                .any(|m| m.external_id.as_deref() == Some(external_id))
        {
            return true;
        }
        self.messages.iter().any(|m| {
            m.direction == candidate.direction
                && m.body == candidate.body
                && (m.timestamp - candidate.timestamp).abs() < DEDUP_WINDOW_MS
        })
    }

    /// Insert preserving chronological order. Equal timestamps keep
    /// insertion order.
    pub(crate) fn insert_chronological(&mut self, message: Message) {
        let index = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.stats.record(&message);
        self.messages.insert(index, message);
    }

    /// Drop the oldest entries beyond `max_retained`. Returns how many
    /// were dropped.
    pub(crate) fn trim_to(&mut self, max_retained: usize) -> usize {
        if self.messages.len() <= max_retained {
            return 0;
        }
        let excess = self.messages.len() - max_retained;
        self.messages.drain(..excess);
        self.stats = ConversationStats::recompute(&self.messages);
        excess
    }

    /// Forget every message but keep the conversation entry itself.
    pub(crate) fn reset(&mut self) {
        self.messages.clear();
        self.stats = ConversationStats::default();
    }

    /// The most recent `limit` messages in chronological order.
    pub(crate) fn tail(&self, limit: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }
}

// ── Persisted document ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single persisted document: metadata plus every conversation keyed
/// by contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    pub metadata: StoreMetadata,
    #[serde(default)]
    pub conversations: BTreeMap<String, Conversation>,
}

impl StoreDocument {
    pub(crate) fn empty() -> Self {
        let now = Utc::now();
        Self {
            metadata: StoreMetadata {
                version: SCHEMA_VERSION,
                created_at: now,
                updated_at: now,
            },
            conversations: BTreeMap::new(),
        }
    }
}

// ── Legacy migration ────────────────────────────────────────────────

/// Message record from the pre-versioned flat document, which stored a
/// bare `{ contact: [messages] }` map in the bridge's camelCase.
#[derive(Debug, Deserialize)]
pub(crate) struct LegacyMessage {
    #[serde(default)]
    pub(crate) id: Option<String>,
    pub(crate) body: String,
    #[serde(default)]
    pub(crate) direction: Option<String>,
    #[serde(default, alias = "fromMe")]
    pub(crate) from_me: Option<bool>,
    /// Milliseconds since the Unix epoch; the flat shape already stored
    /// normalized timestamps.
    pub(crate) timestamp: i64,
    #[serde(default, alias = "isVoice")]
    pub(crate) is_voice: bool,
}

pub(crate) type LegacyDocument = BTreeMap<String, Vec<LegacyMessage>>;

/// Upgrade the flat legacy map to the current versioned document. Records
/// are re-sorted and stats rebuilt; nothing is discarded.
pub(crate) fn migrate_legacy(legacy: LegacyDocument) -> StoreDocument {
    let mut document = StoreDocument::empty();
    for (contact_key, records) in legacy {
        let mut conversation = Conversation::new(contact_key.clone());
        for record in records {
            let direction = match record.direction.as_deref() {
                Some("outgoing") => Direction::Outgoing,
                Some("incoming") => Direction::Incoming,
                _ if record.from_me == Some(true) => Direction::Outgoing,
                _ => Direction::Incoming,
            };
            let message = Message {
                id: Uuid::new_v4(),
                external_id: record.id,
                body: record.body,
                direction,
                timestamp: record.timestamp,
                kind: if record.is_voice {
                    MessageKind::Voice
                } else {
                    MessageKind::Text
                },
                origin: match direction {
                    Direction::Outgoing => MessageOrigin::System,
                    Direction::Incoming => MessageOrigin::External,
                },
            };
            conversation.insert_chronological(message);
        }
        document.conversations.insert(contact_key, conversation);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str, direction: Direction, timestamp: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            external_id: None,
            body: body.to_string(),
            direction,
            timestamp,
            kind: MessageKind::Text,
            origin: MessageOrigin::System,
        }
    }

    #[test]
    fn stats_record_matches_recompute() {
        let messages = vec![
            message("a", Direction::Incoming, 10),
            message("b", Direction::Outgoing, 20),
            Message {
                kind: MessageKind::Voice,
                ..message("c", Direction::Outgoing, 30)
            },
        ];
        let mut running = ConversationStats::default();
        for m in &messages {
            running.record(m);
        }
        assert_eq!(running, ConversationStats::recompute(&messages));
        assert_eq!(running.total_messages, 3);
        assert_eq!(running.incoming, 1);
        assert_eq!(running.outgoing, 2);
        assert_eq!(running.voice, 1);
        assert_eq!(running.first_timestamp, Some(10));
        assert_eq!(running.last_timestamp, Some(30));
    }

    #[test]
    fn duplicate_by_external_id_wins_regardless_of_time() {
        let mut conversation = Conversation::new("alice");
        let mut original = message("hola", Direction::Incoming, 1_000);
        original.external_id = Some("ext-1".to_string());
        conversation.insert_chronological(original);

        let mut candidate = message("different body", Direction::Outgoing, 999_000);
        candidate.external_id = Some("ext-1".to_string());
        assert!(conversation.contains_duplicate(&candidate));
    }

    #[test]
    fn duplicate_window_is_exclusive_at_the_boundary() {
        let mut conversation = Conversation::new("alice");
        conversation.insert_chronological(message("hola", Direction::Incoming, 10_000));

        let inside = message("hola", Direction::Incoming, 14_999);
        assert!(conversation.contains_duplicate(&inside));

        let at_boundary = message("hola", Direction::Incoming, 15_000);
        assert!(!conversation.contains_duplicate(&at_boundary));

        let other_direction = message("hola", Direction::Outgoing, 14_999);
        assert!(!conversation.contains_duplicate(&other_direction));
    }

    #[test]
    fn insertion_keeps_chronological_order() {
        let mut conversation = Conversation::new("alice");
        conversation.insert_chronological(message("b", Direction::Incoming, 20));
        conversation.insert_chronological(message("a", Direction::Incoming, 10));
        conversation.insert_chronological(message("c", Direction::Incoming, 30));
        conversation.insert_chronological(message("b2", Direction::Incoming, 20));

        let bodies: Vec<&str> = conversation
            .messages
            .iter()
            .map(|m| m.body.as_str())
            .collect();
        assert_eq!(bodies, vec!["a", "b", "b2", "c"]);
    }

    #[test]
    fn trim_drops_oldest_and_rebuilds_stats() {
        let mut conversation = Conversation::new("alice");
        for i in 0..6 {
            conversation.insert_chronological(message(&format!("m{i}"), Direction::Incoming, i));
        }
        let dropped = conversation.trim_to(4);
        assert_eq!(dropped, 2);
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(conversation.stats.total_messages, 4);
        assert_eq!(conversation.stats.first_timestamp, Some(2));
    }

    #[test]
    fn external_draft_normalizes_seconds_and_voice_kinds() {
        let raw = ExternalMessage {
            id: "wa-77".to_string(),
            body: "hola".to_string(),
            from_me: true,
            timestamp: 1_700_000_000,
            kind: "ptt".to_string(),
        };
        let draft = MessageDraft::from_external(&raw);
        assert_eq!(draft.timestamp, Some(1_700_000_000_000));
        assert_eq!(draft.direction, Direction::Outgoing);
        assert_eq!(draft.kind, MessageKind::Voice);
        assert_eq!(draft.external_id.as_deref(), Some("wa-77"));

        let anonymous = ExternalMessage {
            id: String::new(),
            body: "hola".to_string(),
            from_me: false,
            timestamp: 1_700_000_000,
            kind: "chat".to_string(),
        };
        assert_eq!(MessageDraft::from_external(&anonymous).external_id, None);
    }

    #[test]
    fn legacy_document_migrates_with_order_and_stats() {
        let raw = serde_json::json!({
            "alice": [
                { "id": "m2", "body": "reply", "fromMe": true, "timestamp": 2_000, "isVoice": false },
                { "id": "m1", "body": "hola", "direction": "incoming", "timestamp": 1_000, "isVoice": true }
            ]
        });
        let legacy: LegacyDocument = serde_json::from_value(raw).unwrap();
        let document = migrate_legacy(legacy);

        let conversation = &document.conversations["alice"];
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].body, "hola");
        assert_eq!(conversation.messages[0].direction, Direction::Incoming);
        assert!(conversation.messages[0].is_voice());
        assert_eq!(conversation.messages[1].direction, Direction::Outgoing);
        assert_eq!(conversation.stats.incoming, 1);
        assert_eq!(conversation.stats.outgoing, 1);
        assert_eq!(document.metadata.version, SCHEMA_VERSION);
    }
}
