use std::time::Duration;

use chrono::{DateTime, Utc};
use core_model::{
    ChatView, ConversationSummary, IncompleteLog, IncompleteReason, Pacer, QualifiedChat,
    RunReport, TranscriptSink, WallState,
};
use discover::DiscoveryConfig;
use extract::{ExtractConfig, WallClassifier, extract_conversation};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub discovery: DiscoveryConfig,
    pub extract: ExtractConfig,
    // Attempts to open one conversation before giving up on it.
    pub open_attempts: u32,
    // Readiness polls per open attempt.
    pub ready_checks: u32,
    pub open_wait: Duration,
    // Settle window after a search jump.
    pub jump_settle: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            discovery: DiscoveryConfig::default(),
            extract: ExtractConfig::default(),
            open_attempts: 3,
            ready_checks: 5,
            open_wait: Duration::from_millis(600),
            jump_settle: Duration::from_millis(1500),
        }
    }
}

// A wall-blocked conversation queued for one reconciliation attempt.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub chat: QualifiedChat,
    pub anchor: Option<String>,
}

// Discovery, then sequential extraction, then one reconciliation pass over
// wall-blocked conversations. A single conversation's failure never aborts
// the run; only the inability to read the list at all propagates.
pub fn run_pipeline(
    view: &mut dyn ChatView,
    pacer: &mut dyn Pacer,
    sink: &mut dyn TranscriptSink,
    classifier: &WallClassifier,
    cfg: &PipelineConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<RunReport> {
    let discovered = discover::discover(view, pacer, &cfg.discovery, now)?;
    info!(
        qualifying = discovered.worklist.len(),
        unresolved = discovered.unresolved.len(),
        passes = discovered.passes,
        reloads = discovered.reloads,
        "discovery complete"
    );

    let mut log = IncompleteLog::default();
    let (mut exported, retries) =
        run_extraction(view, pacer, sink, classifier, cfg, &discovered.worklist, &mut log);
    let recovered = run_reconciliation(view, pacer, sink, classifier, cfg, &retries, &mut log);
    exported.extend(recovered);

    info!(
        exported = exported.len(),
        incomplete = log.len(),
        "pipeline run complete"
    );
    Ok(RunReport {
        exported,
        incomplete: log.into_records(),
        unresolved: discovered.unresolved,
    })
}

// Visits each worklist entry strictly sequentially: open, extract, persist
// immediately, queue wall-blocked conversations for reconciliation.
pub fn run_extraction(
    view: &mut dyn ChatView,
    pacer: &mut dyn Pacer,
    sink: &mut dyn TranscriptSink,
    classifier: &WallClassifier,
    cfg: &PipelineConfig,
    worklist: &[QualifiedChat],
    log: &mut IncompleteLog,
) -> (Vec<ConversationSummary>, Vec<RetryEntry>) {
    let mut exported = Vec::new();
    let mut retries = Vec::new();

    for chat in worklist {
        let summary = &chat.summary;
        let title = summary.title.as_str();
        info!(title, "extracting conversation");

        if !open_with_retry(view, pacer, cfg, title) {
            log.flag(summary, IncompleteReason::MaxAttemptsReached);
            continue;
        }
        let outcome = match extract_conversation(view, pacer, classifier, &cfg.extract, title) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(title, error = %err, "extraction failed; moving on");
                log.flag(summary, IncompleteReason::OpenFailed);
                continue;
            }
        };
        let persisted = persist_or_flag(sink, summary, &outcome.transcript, log);

        if outcome.wall.is_some() {
            log.flag(summary, IncompleteReason::WallOnFirstPass);
            log.flag(summary, IncompleteReason::SyncWall);
            retries.push(RetryEntry {
                chat: chat.clone(),
                anchor: outcome.anchor_text,
            });
        } else if persisted {
            exported.push(summary.clone());
        }
    }

    (exported, retries)
}

// One attempt per wall-blocked conversation: reopen, search-jump past the
// boundary using the recorded anchor, re-extract and persist. Chats still
// blocked afterward stay reported; they are never resubmitted.
pub fn run_reconciliation(
    view: &mut dyn ChatView,
    pacer: &mut dyn Pacer,
    sink: &mut dyn TranscriptSink,
    classifier: &WallClassifier,
    cfg: &PipelineConfig,
    retries: &[RetryEntry],
    log: &mut IncompleteLog,
) -> Vec<ConversationSummary> {
    let mut exported = Vec::new();

    for entry in retries {
        let summary = &entry.chat.summary;
        let title = summary.title.as_str();
        info!(title, "reconciling wall-blocked conversation");

        if !open_with_retry(view, pacer, cfg, title) {
            log.flag(summary, IncompleteReason::OpenFailed);
            continue;
        }

        match &entry.anchor {
            Some(anchor) => match view.search_in_conversation(anchor) {
                Ok(hits) => match hits.first() {
                    Some(oldest) => {
                        if let Err(err) = view.jump_to(oldest) {
                            warn!(title, error = %err, "jump failed");
                            log.flag(summary, IncompleteReason::JumpFailed);
                        } else {
                            pacer.pause(cfg.jump_settle);
                        }
                    }
                    None => {
                        warn!(title, "anchor search returned no results");
                        log.flag(summary, IncompleteReason::JumpFailed);
                    }
                },
                Err(err) => {
                    warn!(title, error = %err, "anchor search failed");
                    log.flag(summary, IncompleteReason::JumpFailed);
                }
            },
            None => {
                // No anchor means no handle to jump past a device-bound
                // boundary; still re-extract in case the sync self-resolved.
                log.flag(summary, IncompleteReason::PhoneRequired);
            }
        }

        let outcome = match extract_conversation(view, pacer, classifier, &cfg.extract, title) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(title, error = %err, "re-extraction failed");
                log.flag(summary, IncompleteReason::OpenFailed);
                continue;
            }
        };
        let persisted = persist_or_flag(sink, summary, &outcome.transcript, log);

        match outcome.wall {
            None => {
                // Wall-free re-extraction with a persisted transcript means
                // the conversation completed after all.
                if persisted {
                    log.resolve(&summary.key());
                    exported.push(summary.clone());
                }
            }
            Some(state) => {
                log.flag(summary, IncompleteReason::WallOnRetry);
                if state == WallState::PhoneRequired {
                    log.flag(summary, IncompleteReason::PhoneRequired);
                }
            }
        }
    }

    exported
}

fn persist_or_flag(
    sink: &mut dyn TranscriptSink,
    summary: &ConversationSummary,
    transcript: &str,
    log: &mut IncompleteLog,
) -> bool {
    match sink.persist(&summary.title, transcript) {
        Ok(()) => true,
        Err(err) => {
            warn!(title = %summary.title, error = %err, "failed to persist transcript");
            log.flag(summary, IncompleteReason::PersistFailed);
            false
        }
    }
}

// Up to `open_attempts` tries, each with `ready_checks` readiness polls,
// and a full view reload between later attempts.
fn open_with_retry(
    view: &mut dyn ChatView,
    pacer: &mut dyn Pacer,
    cfg: &PipelineConfig,
    title: &str,
) -> bool {
    for attempt in 1..=cfg.open_attempts.max(1) {
        if attempt > 1
            && let Err(err) = view.reload_list()
        {
            warn!(title, attempt, error = %err, "reload before retry failed");
            continue;
        }
        if let Err(err) = view.open_conversation(title) {
            warn!(title, attempt, error = %err, "open failed");
            continue;
        }
        for _ in 0..cfg.ready_checks.max(1) {
            if matches!(view.conversation_ready(), Ok(true)) {
                return true;
            }
            pacer.pause(cfg.open_wait);
        }
        warn!(title, attempt, "conversation surface did not load");
    }
    false
}
