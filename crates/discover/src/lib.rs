use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use core_model::{ChatView, ConversationSummary, Pacer, QualifiedChat};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub max_age: chrono::Duration,
    // Consecutive unresolved labels that abort a pass: the page is still
    // populating timestamps and scanning further is wasted work.
    pub unresolved_limit: u32,
    pub backoff_base: Duration,
    pub backoff_step: Duration,
    pub max_reloads: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            max_age: chrono::Duration::days(30),
            unresolved_limit: 8,
            backoff_base: Duration::from_secs(3),
            backoff_step: Duration::from_secs(2),
            max_reloads: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub accepted: Vec<QualifiedChat>,
    pub unresolved: Vec<ConversationSummary>,
    pub stopped_out_of_window: bool,
    pub hit_unresolved_limit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredChats {
    // Qualifying conversations, newest first, deduplicated by key.
    pub worklist: Vec<QualifiedChat>,
    // Conversations whose label never resolved; reported, not retried.
    pub unresolved: Vec<ConversationSummary>,
    pub passes: u32,
    pub reloads: u32,
}

// Escalating wait before reload attempt `attempt` (1-based):
// base + step * (attempt - 1).
pub fn reload_backoff(cfg: &DiscoveryConfig, attempt: u32) -> Duration {
    cfg.backoff_base + cfg.backoff_step * attempt.saturating_sub(1)
}

// One pass: scan visible rows, dedup across scroll steps, resolve each
// label once, stop at the first out-of-window conversation, at
// `unresolved_limit` consecutive unresolved labels, or at list exhaustion.
pub fn run_pass(
    view: &mut dyn ChatView,
    cfg: &DiscoveryConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<DiscoveryResult> {
    let mut result = DiscoveryResult::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut consecutive_unresolved = 0u32;

    'scan: loop {
        for row in view.list_conversations()? {
            if !seen.insert(row.key()) {
                continue;
            }

            match datelabel::parse(&row.time_label, now).resolved() {
                Some(last_active) => {
                    consecutive_unresolved = 0;
                    if now - last_active <= cfg.max_age {
                        result.accepted.push(QualifiedChat {
                            summary: row,
                            last_active,
                        });
                    } else {
                        debug!(title = %row.title, label = %row.time_label, "out of window; pass complete");
                        result.stopped_out_of_window = true;
                        break 'scan;
                    }
                }
                None => {
                    consecutive_unresolved += 1;
                    result.unresolved.push(row);
                    if consecutive_unresolved >= cfg.unresolved_limit {
                        result.hit_unresolved_limit = true;
                        break 'scan;
                    }
                }
            }
        }
        if !view.scroll_list()? {
            break;
        }
    }

    Ok(result)
}

// Runs passes until the window boundary is cleanly observed, escalating to a
// full reload with backoff when a pass aborted on unresolved timestamps.
// Accepted conversations union across passes by key: once accepted, a
// conversation stays accepted even if a later pass fails to re-observe it.
// Pending-unresolved rows are tracked under their label-independent pending
// key, so a row accepted on a later pass (with its label now resolved)
// subtracts the entry recorded while the label was still a placeholder.
pub fn discover(
    view: &mut dyn ChatView,
    pacer: &mut dyn Pacer,
    cfg: &DiscoveryConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<DiscoveredChats> {
    let mut accepted: HashMap<String, QualifiedChat> = HashMap::new();
    let mut accepted_pending: HashSet<String> = HashSet::new();
    let mut unresolved: HashMap<String, ConversationSummary> = HashMap::new();
    let mut passes = 0u32;
    let mut reloads = 0u32;

    loop {
        let pass = run_pass(view, cfg, now)?;
        passes += 1;
        for chat in pass.accepted {
            accepted_pending.insert(chat.summary.pending_key());
            accepted.entry(chat.summary.key()).or_insert(chat);
        }
        for row in pass.unresolved {
            unresolved.entry(row.pending_key()).or_insert(row);
        }
        unresolved.retain(|pending, _| !accepted_pending.contains(pending));

        info!(
            pass = passes,
            accepted = accepted.len(),
            pending_unresolved = unresolved.len(),
            "discovery pass complete"
        );

        if pass.stopped_out_of_window && unresolved.is_empty() {
            break;
        }
        if !pass.hit_unresolved_limit {
            // Partial discovery beats an indefinite loop.
            break;
        }
        if reloads >= cfg.max_reloads {
            warn!(
                pending_unresolved = unresolved.len(),
                "reload ceiling reached; reporting residual unresolved"
            );
            break;
        }
        reloads += 1;
        view.reload_list()?;
        pacer.pause(reload_backoff(cfg, reloads));
    }

    let mut worklist: Vec<QualifiedChat> = accepted.into_values().collect();
    worklist.sort_by(|a, b| {
        b.last_active
            .cmp(&a.last_active)
            .then_with(|| a.summary.key().cmp(&b.summary.key()))
    });
    let mut residual: Vec<ConversationSummary> = unresolved.into_values().collect();
    residual.sort_by(|a, b| a.title.cmp(&b.title));

    Ok(DiscoveredChats {
        worklist,
        unresolved: residual,
        passes,
        reloads,
    })
}
