use std::collections::BTreeMap;
use std::path::Path;

use core_model::{ChatView, ConversationSummary, MessageSample, SearchHit};
use serde::{Deserialize, Serialize};

// A recorded view scenario: deterministic stand-in for the browser
// automation layer. Replays list pages, per-conversation message batches,
// wall notices and search behavior through the `ChatView` seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    // One set of cumulative list pages per reload; the last set repeats.
    pub lists: Vec<Vec<Vec<ConversationSummary>>>,
    #[serde(default)]
    pub chats: BTreeMap<String, ChatScript>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatScript {
    // `batches[0]` is the initially rendered window; each later batch is an
    // older chunk revealed by one reposition. Batches are oldest-first
    // internally.
    pub batches: Vec<Vec<MessageSample>>,
    #[serde(default)]
    pub wall: Option<WallScript>,
    // Readiness checks denied before the conversation surface loads.
    #[serde(default)]
    pub open_failures: u32,
    // Reposition rounds after which the view reports an out-of-band
    // content mutation.
    #[serde(default)]
    pub hint_rounds: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallScript {
    pub notices: Vec<String>,
    // The wall becomes visible once this many batches are revealed; batches
    // beyond it are unreachable by scrolling.
    pub after_batch: usize,
    // A one-shot notice that disappears on the confirmation re-check.
    #[serde(default)]
    pub flicker: bool,
    #[serde(default)]
    pub unlocks_on_jump: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid scenario: {0}")]
    Invalid(String),
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let bytes = std::fs::read(path)?;
        let scenario: Scenario = serde_json::from_slice(&bytes)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.lists.is_empty() || self.lists.iter().any(|pages| pages.is_empty()) {
            return Err(ScenarioError::Invalid(
                "scenario needs at least one list variant with one page".to_string(),
            ));
        }
        for (title, script) in &self.chats {
            if let Some(wall) = &script.wall
                && wall.after_batch > script.batches.len()
            {
                return Err(ScenarioError::Invalid(format!(
                    "chat {title:?}: wall.after_batch exceeds batch count"
                )));
            }
        }
        Ok(())
    }
}

struct ChatState {
    revealed: usize,
    repositions: u32,
    notice_queries: u32,
    jumped: bool,
    ready_denials_left: u32,
}

pub struct ScriptedView {
    scenario: Scenario,
    variant: usize,
    loaded_pages: usize,
    open: Option<String>,
    states: BTreeMap<String, ChatState>,
}

impl ScriptedView {
    pub fn new(scenario: Scenario) -> Self {
        let states = scenario
            .chats
            .iter()
            .map(|(title, script)| {
                (
                    title.clone(),
                    ChatState {
                        revealed: script.batches.len().min(1),
                        repositions: 0,
                        notice_queries: 0,
                        jumped: false,
                        ready_denials_left: script.open_failures,
                    },
                )
            })
            .collect();
        ScriptedView {
            scenario,
            variant: 0,
            loaded_pages: 1,
            open: None,
            states,
        }
    }

    fn pages(&self) -> &Vec<Vec<ConversationSummary>> {
        let idx = self.variant.min(self.scenario.lists.len() - 1);
        &self.scenario.lists[idx]
    }

    fn open_parts(&mut self) -> anyhow::Result<(&ChatScript, &mut ChatState)> {
        let title = self
            .open
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no conversation open"))?;
        let script = self
            .scenario
            .chats
            .get(title)
            .ok_or_else(|| anyhow::anyhow!("no script for conversation {title:?}"))?;
        let state = self
            .states
            .get_mut(title)
            .ok_or_else(|| anyhow::anyhow!("no state for conversation {title:?}"))?;
        Ok((script, state))
    }

    fn wall_active(script: &ChatScript, state: &ChatState) -> bool {
        match &script.wall {
            Some(wall) => !state.jumped && state.revealed >= wall.after_batch,
            None => false,
        }
    }

    // Chronological order across all batches, oldest first.
    fn chronological(script: &ChatScript) -> Vec<&MessageSample> {
        script.batches.iter().rev().flatten().collect()
    }
}

impl ChatView for ScriptedView {
    fn list_conversations(&mut self) -> anyhow::Result<Vec<ConversationSummary>> {
        let pages = self.pages();
        let upto = self.loaded_pages.min(pages.len());
        Ok(pages[..upto].iter().flatten().cloned().collect())
    }

    fn scroll_list(&mut self) -> anyhow::Result<bool> {
        if self.loaded_pages < self.pages().len() {
            self.loaded_pages += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reload_list(&mut self) -> anyhow::Result<()> {
        if self.variant + 1 < self.scenario.lists.len() {
            self.variant += 1;
        }
        self.loaded_pages = 1;
        Ok(())
    }

    fn open_conversation(&mut self, title: &str) -> anyhow::Result<()> {
        if !self.scenario.chats.contains_key(title) {
            anyhow::bail!("conversation {title:?} not present in view");
        }
        self.open = Some(title.to_string());
        if let Some(state) = self.states.get_mut(title) {
            let batches = self.scenario.chats[title].batches.len();
            // Reopening lands back on the newest window; an earlier jump
            // keeps the synced history reachable.
            if !state.jumped {
                state.revealed = batches.min(1);
            }
            state.notice_queries = 0;
        }
        Ok(())
    }

    fn conversation_ready(&mut self) -> anyhow::Result<bool> {
        let (_, state) = self.open_parts()?;
        if state.ready_denials_left > 0 {
            state.ready_denials_left -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn sample_messages(&mut self) -> anyhow::Result<Vec<MessageSample>> {
        let (script, state) = self.open_parts()?;
        let upto = state.revealed.min(script.batches.len());
        let mut out = Vec::new();
        for batch in script.batches[..upto].iter().rev() {
            out.extend(batch.iter().cloned());
        }
        Ok(out)
    }

    fn reposition_to_oldest(&mut self) -> anyhow::Result<()> {
        let (script, state) = self.open_parts()?;
        state.repositions += 1;
        let cap = match (&script.wall, state.jumped) {
            (Some(wall), false) => wall.after_batch.min(script.batches.len()),
            _ => script.batches.len(),
        };
        if state.revealed < cap {
            state.revealed += 1;
        }
        Ok(())
    }

    fn sync_notices(&mut self) -> anyhow::Result<Vec<String>> {
        let (script, state) = self.open_parts()?;
        if !Self::wall_active(script, state) {
            return Ok(Vec::new());
        }
        let wall = script.wall.as_ref().ok_or_else(|| anyhow::anyhow!("wall state without script"))?;
        state.notice_queries += 1;
        if wall.flicker && state.notice_queries > 1 {
            return Ok(Vec::new());
        }
        Ok(wall.notices.clone())
    }

    fn take_mutation_hint(&mut self) -> bool {
        match self.open_parts() {
            Ok((script, state)) => script.hint_rounds.contains(&state.repositions),
            Err(_) => false,
        }
    }

    fn search_in_conversation(&mut self, query: &str) -> anyhow::Result<Vec<SearchHit>> {
        let (script, _) = self.open_parts()?;
        let hits = Self::chronological(script)
            .iter()
            .enumerate()
            .filter(|(_, m)| m.text.contains(query))
            .map(|(ordinal, m)| SearchHit {
                ordinal,
                preview: m.text.clone(),
            })
            .collect();
        Ok(hits)
    }

    fn jump_to(&mut self, _hit: &SearchHit) -> anyhow::Result<()> {
        let title = self
            .open
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no conversation open"))?;
        let script = &self.scenario.chats[&title];
        if let Some(wall) = &script.wall
            && wall.unlocks_on_jump
            && let Some(state) = self.states.get_mut(&title)
        {
            state.jumped = true;
            state.revealed = script.batches.len();
        }
        Ok(())
    }
}
