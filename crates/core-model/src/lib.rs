use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Placeholder phrases a half-rendered view shows before content arrives.
// Matched case-insensitively as substrings; additive per locale.
const LOADING_MARKERS: &[&str] = &[
    "loading",
    "cargando",
    "carregando",
    "chargement",
    "wird geladen",
];

pub fn is_loading_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    LOADING_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub title: String,
    pub time_label: String,
    pub snippet: String,
}

impl ConversationSummary {
    // Identity across scroll steps and discovery passes. A snippet that is
    // still a loading placeholder normalizes to empty so the same row seen
    // before and after its preview renders maps to one key.
    pub fn key(&self) -> String {
        deterministic_id(&[&self.title, &self.time_label, normalized(&self.snippet)])
    }

    // Label-independent identity: the same row before and after its time
    // label resolves maps to one pending key.
    pub fn pending_key(&self) -> String {
        deterministic_id(&[&self.title, normalized(&self.snippet)])
    }
}

fn normalized(text: &str) -> &str {
    if is_loading_text(text) { "" } else { text }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifiedChat {
    pub summary: ConversationSummary,
    pub last_active: DateTime<Utc>,
}

// `header` is the raw structured metadata string exactly as the view
// exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSample {
    pub header: String,
    pub timestamp: String,
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uid: String,
    pub timestamp: String,
    pub author: String,
    pub text: String,
}

impl Message {
    pub fn from_sample(sample: &MessageSample) -> Self {
        Message {
            uid: message_uid(sample),
            timestamp: sample.timestamp.clone(),
            author: sample.author.clone(),
            text: sample.text.clone(),
        }
    }

    pub fn transcript_line(&self) -> String {
        format!("[{}] {}: {}", self.timestamp, self.author, self.text)
    }
}

// Raw header plus a bounded text prefix. The same message re-observed on a
// later poll must map to the same uid.
pub fn message_uid(sample: &MessageSample) -> String {
    let prefix_end = sample
        .text
        .char_indices()
        .nth(64)
        .map(|(i, _)| i)
        .unwrap_or(sample.text.len());
    deterministic_id(&[&sample.header, &sample.text[..prefix_end]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WallState {
    Clear,
    PhoneRequired,
    GloballySyncing,
}

impl WallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WallState::Clear => "clear",
            WallState::PhoneRequired => "phone-required",
            WallState::GloballySyncing => "globally-syncing",
        }
    }
}

impl fmt::Display for WallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WallState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clear" => Ok(WallState::Clear),
            "phone-required" => Ok(WallState::PhoneRequired),
            "globally-syncing" => Ok(WallState::GloballySyncing),
            _ => anyhow::bail!("unknown wall state: {s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub title: String,
    pub message_count: usize,
    pub transcript: String,
    pub wall: Option<WallState>,
    pub anchor_text: Option<String>,
}

impl ExtractionOutcome {
    pub fn wall_encountered(&self) -> bool {
        self.wall.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncompleteReason {
    WallOnFirstPass,
    WallOnRetry,
    OpenFailed,
    MaxAttemptsReached,
    SyncWall,
    PhoneRequired,
    JumpFailed,
    PersistFailed,
}

impl IncompleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncompleteReason::WallOnFirstPass => "wall-on-first-pass",
            IncompleteReason::WallOnRetry => "wall-on-retry",
            IncompleteReason::OpenFailed => "open-failed",
            IncompleteReason::MaxAttemptsReached => "max-attempts-reached",
            IncompleteReason::SyncWall => "sync-wall",
            IncompleteReason::PhoneRequired => "phone-required",
            IncompleteReason::JumpFailed => "jump-failed",
            IncompleteReason::PersistFailed => "persist-failed",
        }
    }
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteRecord {
    pub key: String,
    pub title: String,
    pub reasons: BTreeSet<IncompleteReason>,
}

// Shared across all pipeline phases. Reasons for the same key merge into a
// growing set; they accumulate, never overwrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncompleteLog {
    records: BTreeMap<String, IncompleteRecord>,
}

impl IncompleteLog {
    pub fn flag(&mut self, summary: &ConversationSummary, reason: IncompleteReason) {
        let key = summary.key();
        self.records
            .entry(key.clone())
            .or_insert_with(|| IncompleteRecord {
                key,
                title: summary.title.clone(),
                reasons: BTreeSet::new(),
            })
            .reasons
            .insert(reason);
    }

    pub fn resolve(&mut self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&IncompleteRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &IncompleteRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<IncompleteRecord> {
        self.records.into_values().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub exported: Vec<ConversationSummary>,
    pub incomplete: Vec<IncompleteRecord>,
    pub unresolved: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub ordinal: usize,
    pub preview: String,
}

// The capability surface of an already-authenticated, interactive
// conversation view. The pipeline depends on nothing else about the UI.
pub trait ChatView {
    fn list_conversations(&mut self) -> anyhow::Result<Vec<ConversationSummary>>;
    // False means the list is exhausted.
    fn scroll_list(&mut self) -> anyhow::Result<bool>;
    fn reload_list(&mut self) -> anyhow::Result<()>;
    fn open_conversation(&mut self, title: &str) -> anyhow::Result<()>;
    fn conversation_ready(&mut self) -> anyhow::Result<bool>;
    // All currently rendered messages, oldest first.
    fn sample_messages(&mut self) -> anyhow::Result<Vec<MessageSample>>;
    fn reposition_to_oldest(&mut self) -> anyhow::Result<()>;
    fn sync_notices(&mut self) -> anyhow::Result<Vec<String>>;
    // A hint to poll sooner, never a substitute for sampling.
    fn take_mutation_hint(&mut self) -> bool {
        false
    }
    // Hits in conversation order, oldest first.
    fn search_in_conversation(&mut self, query: &str) -> anyhow::Result<Vec<SearchHit>>;
    fn jump_to(&mut self, hit: &SearchHit) -> anyhow::Result<()>;
}

// Where the pipeline waits. Real runs sleep; tests record.
pub trait Pacer {
    fn pause(&mut self, d: Duration);
}

pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}

pub struct NullPacer;

impl Pacer for NullPacer {
    fn pause(&mut self, _d: Duration) {}
}

pub trait TranscriptSink {
    fn persist(&mut self, title: &str, transcript: &str) -> anyhow::Result<()>;
}

pub fn deterministic_id(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(title: &str, label: &str, snippet: &str) -> ConversationSummary {
        ConversationSummary {
            title: title.to_string(),
            time_label: label.to_string(),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn deterministic_id_stable() {
        assert_eq!(deterministic_id(&["a", "b"]), deterministic_id(&["a", "b"]));
    }

    #[test]
    fn deterministic_id_order_matters() {
        assert_ne!(deterministic_id(&["a", "b"]), deterministic_id(&["b", "a"]));
    }

    #[test]
    fn summary_key_ignores_loading_snippet() {
        let loading = summary("Ana", "10:39", "loading messages…");
        let empty = summary("Ana", "10:39", "");
        assert_eq!(loading.key(), empty.key());
    }

    #[test]
    fn summary_key_distinguishes_real_snippets() {
        let a = summary("Ana", "10:39", "see you there");
        let b = summary("Ana", "10:39", "running late");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn pending_key_survives_label_resolution() {
        let loading = summary("Ana", "loading…", "see you there");
        let resolved = summary("Ana", "10:39", "see you there");
        assert_ne!(loading.key(), resolved.key());
        assert_eq!(loading.pending_key(), resolved.pending_key());
    }

    #[test]
    fn pending_key_distinguishes_titles() {
        let a = summary("Ana", "loading…", "hi");
        let b = summary("Ben", "loading…", "hi");
        assert_ne!(a.pending_key(), b.pending_key());
    }

    #[test]
    fn message_uid_stable_across_polls() {
        let sample = MessageSample {
            header: "[10:39, 12/05/2024] Ana:".to_string(),
            timestamp: "10:39".to_string(),
            author: "Ana".to_string(),
            text: "hello there".to_string(),
        };
        assert_eq!(message_uid(&sample), message_uid(&sample.clone()));
    }

    #[test]
    fn message_uid_uses_text_prefix() {
        let long = "x".repeat(200);
        let mut a = MessageSample {
            header: "h".to_string(),
            timestamp: "t".to_string(),
            author: "a".to_string(),
            text: long.clone(),
        };
        let b = a.clone();
        // Differ only past the 64-char prefix: same uid by contract.
        a.text = format!("{}tail-one", &long[..64]);
        let mut c = b.clone();
        c.text = format!("{}tail-two", &long[..64]);
        assert_eq!(message_uid(&a), message_uid(&c));
    }

    #[test]
    fn message_uid_multibyte_prefix_boundary() {
        let sample = MessageSample {
            header: "h".to_string(),
            timestamp: "t".to_string(),
            author: "a".to_string(),
            text: "é".repeat(100),
        };
        // Must not panic slicing inside a multibyte char.
        let _ = message_uid(&sample);
    }

    #[test]
    fn transcript_line_format() {
        let msg = Message {
            uid: "u".to_string(),
            timestamp: "10:39".to_string(),
            author: "Ana".to_string(),
            text: "on my way".to_string(),
        };
        assert_eq!(msg.transcript_line(), "[10:39] Ana: on my way");
    }

    #[test]
    fn incomplete_log_merges_reasons() {
        let mut log = IncompleteLog::default();
        let s = summary("Ana", "10:39", "hi");
        log.flag(&s, IncompleteReason::WallOnFirstPass);
        log.flag(&s, IncompleteReason::WallOnRetry);
        assert_eq!(log.len(), 1);
        let record = log.get(&s.key()).unwrap();
        assert!(record.reasons.contains(&IncompleteReason::WallOnFirstPass));
        assert!(record.reasons.contains(&IncompleteReason::WallOnRetry));
    }

    #[test]
    fn incomplete_log_duplicate_reason_is_noop() {
        let mut log = IncompleteLog::default();
        let s = summary("Ana", "10:39", "hi");
        log.flag(&s, IncompleteReason::SyncWall);
        log.flag(&s, IncompleteReason::SyncWall);
        assert_eq!(log.get(&s.key()).unwrap().reasons.len(), 1);
    }

    #[test]
    fn incomplete_log_resolve_removes() {
        let mut log = IncompleteLog::default();
        let s = summary("Ana", "10:39", "hi");
        log.flag(&s, IncompleteReason::OpenFailed);
        assert!(log.resolve(&s.key()));
        assert!(log.is_empty());
        assert!(!log.resolve(&s.key()));
    }

    #[test]
    fn wall_state_round_trip() {
        for state in [
            WallState::Clear,
            WallState::PhoneRequired,
            WallState::GloballySyncing,
        ] {
            assert_eq!(state.as_str().parse::<WallState>().unwrap(), state);
        }
        assert!("mystery".parse::<WallState>().is_err());
    }

    #[test]
    fn loading_text_multilingual() {
        assert!(is_loading_text("Loading messages…"));
        assert!(is_loading_text("cargando mensajes"));
        assert!(!is_loading_text("see you at 10"));
    }
}
