use std::collections::HashSet;
use std::time::Duration;

use core_model::{ChatView, ExtractionOutcome, Message, MessageSample, Pacer, WallState, message_uid};
use tracing::{debug, info};

mod wall;

pub use wall::WallClassifier;

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    // Wait after each reposition before sampling.
    pub settle: Duration,
    // Shorter wait used when the view reported an out-of-band mutation.
    pub hint_settle: Duration,
    // Delay before re-checking a detected wall to reject loading flicker.
    pub wall_recheck: Duration,
    // Consecutive rounds with zero new messages that end the loop. The sole
    // end-of-history signal; a premature stop is silent data loss.
    pub stagnation_limit: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            settle: Duration::from_millis(1200),
            hint_settle: Duration::from_millis(400),
            wall_recheck: Duration::from_millis(900),
            stagnation_limit: 3,
        }
    }
}

// Each round: classify the visible notices (a wall surviving one re-check
// stops the loop with the oldest visible message as anchor), reposition to
// the oldest edge, settle, sample, merge unseen messages. Terminates only on
// a confirmed wall or after `stagnation_limit` consecutive empty rounds,
// never on a timeout.
pub fn extract_conversation(
    view: &mut dyn ChatView,
    pacer: &mut dyn Pacer,
    classifier: &WallClassifier,
    cfg: &ExtractConfig,
    title: &str,
) -> anyhow::Result<ExtractionOutcome> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ordered: Vec<Message> = Vec::new();
    let mut stagnation = 0u32;
    let mut rounds = 0u32;
    let mut wall = None;
    let mut anchor = None;

    loop {
        let state = classifier.classify(&view.sync_notices()?);
        if state != WallState::Clear {
            pacer.pause(cfg.wall_recheck);
            let confirmed = classifier.classify(&view.sync_notices()?);
            if confirmed != WallState::Clear {
                // Do not keep scrolling against a wall; remember where the
                // reachable history ends so reconciliation can jump back.
                let snapshot = view.sample_messages()?;
                anchor = snapshot
                    .first()
                    .map(|s| s.text.clone())
                    .or_else(|| ordered.first().map(|m| m.text.clone()));
                wall = Some(confirmed);
                info!(title, rounds, state = %confirmed, "sync wall confirmed");
                break;
            }
            debug!(title, rounds, "wall notice did not survive re-check; treating as flicker");
        }

        view.reposition_to_oldest()?;
        let settle = if view.take_mutation_hint() {
            cfg.hint_settle
        } else {
            cfg.settle
        };
        pacer.pause(settle);

        let sample = view.sample_messages()?;
        let added = merge_sample(&mut ordered, &mut seen, &sample);
        rounds += 1;
        debug!(title, rounds, added, total = ordered.len(), "poll round");

        if added == 0 {
            stagnation += 1;
            if stagnation >= cfg.stagnation_limit {
                info!(title, rounds, messages = ordered.len(), "converged");
                break;
            }
        } else {
            stagnation = 0;
        }
    }

    let transcript = ordered
        .iter()
        .map(Message::transcript_line)
        .collect::<Vec<_>>()
        .join("\n");

    Ok(ExtractionOutcome {
        title: title.to_string(),
        message_count: ordered.len(),
        transcript,
        wall,
        anchor_text: anchor,
    })
}

// New messages rendered above the first already-known one are older history
// and go to the front; new messages after a known one arrived live and go
// to the back. Returns how many were new.
fn merge_sample(
    ordered: &mut Vec<Message>,
    seen: &mut HashSet<String>,
    sample: &[MessageSample],
) -> usize {
    let mut older: Vec<Message> = Vec::new();
    let mut any_known = false;
    let mut added = 0;
    for s in sample {
        let uid = message_uid(s);
        if seen.contains(&uid) {
            any_known = true;
            continue;
        }
        seen.insert(uid);
        added += 1;
        if any_known {
            ordered.push(Message::from_sample(s));
        } else {
            older.push(Message::from_sample(s));
        }
    }
    if !older.is_empty() {
        ordered.splice(0..0, older);
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{ConversationSummary, SearchHit};

    fn sample(author: &str, text: &str) -> MessageSample {
        MessageSample {
            header: format!("[10:00] {author}:"),
            timestamp: "10:00".to_string(),
            author: author.to_string(),
            text: text.to_string(),
        }
    }

    // Reveals one more batch of older messages per reposition; optionally
    // shows wall notices from a given round.
    struct FakeView {
        batches: Vec<Vec<MessageSample>>,
        revealed: usize,
        repositions: u32,
        notices_from_round: Option<u32>,
        notices: Vec<String>,
        flicker_only: bool,
        notice_queries: u32,
        hint_rounds: Vec<u32>,
        // Batches past this index sit behind the wall.
        reveal_cap: Option<usize>,
    }

    impl FakeView {
        fn new(batches: Vec<Vec<MessageSample>>) -> Self {
            FakeView {
                batches,
                revealed: 1,
                repositions: 0,
                notices_from_round: None,
                notices: Vec::new(),
                flicker_only: false,
                notice_queries: 0,
                hint_rounds: Vec::new(),
                reveal_cap: None,
            }
        }
    }

    impl ChatView for FakeView {
        fn list_conversations(&mut self) -> anyhow::Result<Vec<ConversationSummary>> {
            Ok(Vec::new())
        }
        fn scroll_list(&mut self) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn reload_list(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn open_conversation(&mut self, _title: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn conversation_ready(&mut self) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn sample_messages(&mut self) -> anyhow::Result<Vec<MessageSample>> {
            // batches[0] is the initial window; later batches are older and
            // render above it.
            let mut out = Vec::new();
            for batch in self.batches[..self.revealed.min(self.batches.len())]
                .iter()
                .rev()
            {
                out.extend(batch.iter().cloned());
            }
            Ok(out)
        }
        fn reposition_to_oldest(&mut self) -> anyhow::Result<()> {
            self.repositions += 1;
            let cap = self.reveal_cap.unwrap_or(self.batches.len());
            if self.revealed < self.batches.len().min(cap) {
                self.revealed += 1;
            }
            Ok(())
        }
        fn sync_notices(&mut self) -> anyhow::Result<Vec<String>> {
            let Some(from) = self.notices_from_round else {
                return Ok(Vec::new());
            };
            if self.repositions < from {
                return Ok(Vec::new());
            }
            self.notice_queries += 1;
            if self.flicker_only && self.notice_queries > 1 {
                return Ok(Vec::new());
            }
            Ok(self.notices.clone())
        }
        fn take_mutation_hint(&mut self) -> bool {
            self.hint_rounds.contains(&self.repositions)
        }
        fn search_in_conversation(&mut self, _query: &str) -> anyhow::Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
        fn jump_to(&mut self, _hit: &SearchHit) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPacer {
        pauses: Vec<Duration>,
    }

    impl Pacer for RecordingPacer {
        fn pause(&mut self, d: Duration) {
            self.pauses.push(d);
        }
    }

    fn run(view: &mut FakeView, cfg: &ExtractConfig) -> ExtractionOutcome {
        let mut pacer = RecordingPacer::default();
        extract_conversation(view, &mut pacer, &WallClassifier::default(), cfg, "chat").unwrap()
    }

    #[test]
    fn static_set_extracted_exactly_and_idempotent() {
        let batch = vec![sample("Ana", "first"), sample("Ben", "second")];
        let cfg = ExtractConfig::default();
        let mut view = FakeView::new(vec![batch.clone()]);
        let first = run(&mut view, &cfg);
        assert_eq!(first.message_count, 2);
        assert!(first.wall.is_none());
        assert_eq!(first.transcript, "[10:00] Ana: first\n[10:00] Ben: second");

        let mut view = FakeView::new(vec![batch]);
        let second = run(&mut view, &cfg);
        assert_eq!(second.transcript, first.transcript);
    }

    #[test]
    fn lazy_batches_converge_to_full_set() {
        let batches = vec![
            vec![sample("Ana", "newest window")],
            vec![sample("Ben", "middle"), sample("Ana", "middle two")],
            vec![sample("Ana", "oldest")],
        ];
        let cfg = ExtractConfig::default();
        let mut view = FakeView::new(batches);
        let outcome = run(&mut view, &cfg);
        assert_eq!(outcome.message_count, 4);
        // Older batches land above newer ones.
        let lines: Vec<&str> = outcome.transcript.lines().collect();
        assert_eq!(lines[0], "[10:00] Ana: oldest");
        assert_eq!(lines[3], "[10:00] Ana: newest window");
    }

    #[test]
    fn terminates_only_after_stagnation_limit() {
        let batches = vec![
            vec![sample("Ana", "one")],
            vec![sample("Ben", "two")],
            vec![sample("Ana", "three")],
        ];
        let cfg = ExtractConfig {
            stagnation_limit: 3,
            ..ExtractConfig::default()
        };
        let mut view = FakeView::new(batches);
        let outcome = run(&mut view, &cfg);
        assert_eq!(outcome.message_count, 3);
        // Round 1 merges batches 1+2 (initial + first reveal), round 2 merges
        // batch 3, then exactly stagnation_limit empty rounds.
        assert_eq!(view.repositions, 2 + 3);
    }

    #[test]
    fn new_message_resets_stagnation() {
        // Batch layout forcing an empty round in the middle: batch 2 and 3
        // identical, batch 4 new again.
        let one = vec![sample("Ana", "one")];
        let two = vec![sample("Ben", "two")];
        let mut view = FakeView::new(vec![one, two.clone(), vec![], vec![sample("Ana", "late")]]);
        let cfg = ExtractConfig {
            stagnation_limit: 2,
            ..ExtractConfig::default()
        };
        let outcome = run(&mut view, &cfg);
        assert_eq!(outcome.message_count, 3);
    }

    #[test]
    fn confirmed_wall_stops_with_anchor() {
        let batches = vec![
            vec![sample("Ana", "recent")],
            vec![sample("Ben", "older")],
            vec![sample("Ana", "unreachable")],
        ];
        let mut view = FakeView::new(batches);
        view.notices_from_round = Some(2);
        view.reveal_cap = Some(2);
        view.notices = vec!["Use your phone to see older messages".to_string()];
        let cfg = ExtractConfig::default();
        let outcome = run(&mut view, &cfg);
        assert_eq!(outcome.wall, Some(WallState::PhoneRequired));
        assert!(outcome.wall_encountered());
        // Oldest visible at the moment of confirmation.
        assert_eq!(outcome.anchor_text.as_deref(), Some("older"));
        assert_eq!(outcome.message_count, 2);
    }

    #[test]
    fn wall_flicker_is_rejected() {
        let batches = vec![vec![sample("Ana", "only")]];
        let mut view = FakeView::new(batches);
        view.notices_from_round = Some(0);
        view.flicker_only = true;
        view.notices = vec!["Syncing older messages".to_string()];
        let outcome = run(&mut view, &ExtractConfig::default());
        assert!(outcome.wall.is_none());
        assert_eq!(outcome.message_count, 1);
    }

    #[test]
    fn mutation_hint_shortens_settle() {
        let batches = vec![vec![sample("Ana", "one")], vec![sample("Ben", "two")]];
        let mut view = FakeView::new(batches);
        view.hint_rounds = vec![2];
        let cfg = ExtractConfig::default();
        let mut pacer = RecordingPacer::default();
        extract_conversation(
            &mut view,
            &mut pacer,
            &WallClassifier::default(),
            &cfg,
            "chat",
        )
        .unwrap();
        assert!(pacer.pauses.contains(&cfg.hint_settle));
        assert!(pacer.pauses.contains(&cfg.settle));
    }

    #[test]
    fn empty_conversation_converges_empty() {
        let mut view = FakeView::new(vec![vec![]]);
        let outcome = run(&mut view, &ExtractConfig::default());
        assert_eq!(outcome.message_count, 0);
        assert_eq!(outcome.transcript, "");
        assert!(outcome.wall.is_none());
    }

    #[test]
    fn live_arrival_appends_after_known() {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let first = vec![sample("Ana", "old"), sample("Ben", "newer")];
        merge_sample(&mut ordered, &mut seen, &first);
        // Next poll: same window plus one live arrival at the bottom and one
        // older message revealed at the top.
        let second = vec![
            sample("Ana", "oldest"),
            sample("Ana", "old"),
            sample("Ben", "newer"),
            sample("Cal", "live"),
        ];
        let added = merge_sample(&mut ordered, &mut seen, &second);
        assert_eq!(added, 2);
        let texts: Vec<&str> = ordered.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["oldest", "old", "newer", "live"]);
    }
}
