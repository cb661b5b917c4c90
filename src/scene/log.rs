//! Decision Log
//!
//! Bounded history of switch / skipped / veto events for diagnostics and
//! "recent activity" views. Trimming evicts the oldest entries first but
//! never the two most recent `switch` events, so a flood of skips cannot
//! erase the scene's actual switch history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::scanner::MatchKind;

pub const DEFAULT_LOG_CAPACITY: usize = 25;

/// Switch events that survive any flood
const RETAINED_SWITCHES: usize = 2;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Switch,
    Skipped,
    Veto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Winner is already the active character
    AlreadyActive,
    /// Too soon after the last switch
    Cooldown,
    /// Same winner already decided for this buffer
    RepeatSuppressed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyActive => "already-active",
            SkipReason::Cooldown => "cooldown",
            SkipReason::RepeatSuppressed => "repeat-suppressed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    /// Subject name; the veto phrase for veto events
    pub name: String,
    pub match_kind: Option<MatchKind>,
    pub char_index: Option<usize>,
    pub token_index: Option<usize>,
    pub timestamp: i64,
    pub reason: Option<SkipReason>,
}

impl DecisionEvent {
    pub fn switch(name: &str, match_kind: MatchKind, char_index: usize, timestamp: i64) -> Self {
        Self {
            kind: DecisionKind::Switch,
            name: name.to_string(),
            match_kind: Some(match_kind),
            char_index: Some(char_index),
            token_index: None,
            timestamp,
            reason: None,
        }
    }

    pub fn skipped(
        name: &str,
        match_kind: MatchKind,
        char_index: usize,
        timestamp: i64,
        reason: SkipReason,
    ) -> Self {
        Self {
            kind: DecisionKind::Skipped,
            reason: Some(reason),
            ..Self::switch(name, match_kind, char_index, timestamp)
        }
    }

    pub fn veto(phrase: &str, char_index: usize, timestamp: i64) -> Self {
        Self {
            kind: DecisionKind::Veto,
            name: phrase.to_string(),
            match_kind: Some(MatchKind::Veto),
            char_index: Some(char_index),
            token_index: None,
            timestamp,
            reason: None,
        }
    }

    pub fn with_token_index(mut self, token_index: Option<usize>) -> Self {
        self.token_index = token_index;
        self
    }

    pub fn is_switch(&self) -> bool {
        self.kind == DecisionKind::Switch
    }
}

// =============================================================================
// Log
// =============================================================================

#[derive(Debug, Clone)]
pub struct DecisionLog {
    capacity: usize,
    events: VecDeque<DecisionEvent>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(RETAINED_SWITCHES),
            events: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(RETAINED_SWITCHES);
        self.trim();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: DecisionEvent) {
        self.events.push_back(event);
        self.trim();
    }

    /// Oldest first
    pub fn events(&self) -> impl DoubleEndedIterator<Item = &DecisionEvent> {
        self.events.iter()
    }

    /// Newest first, at most `n`
    pub fn recent(&self, n: usize) -> Vec<&DecisionEvent> {
        self.events.iter().rev().take(n).collect()
    }

    pub fn last_switch(&self) -> Option<&DecisionEvent> {
        self.events.iter().rev().find(|e| e.is_switch())
    }

    pub fn switches(&self) -> impl Iterator<Item = &DecisionEvent> {
        self.events.iter().filter(|e| e.is_switch())
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn snapshot(&self) -> Vec<DecisionEvent> {
        self.events.iter().cloned().collect()
    }

    fn trim(&mut self) {
        while self.events.len() > self.capacity {
            let protected: Vec<usize> = self
                .events
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, e)| e.is_switch())
                .take(RETAINED_SWITCHES)
                .map(|(i, _)| i)
                .collect();
            let Some(oldest) = (0..self.events.len()).find(|i| !protected.contains(i)) else {
                break;
            };
            self.events.remove(oldest);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn skip(t: i64) -> DecisionEvent {
        DecisionEvent::skipped("Shido", MatchKind::Action, 0, t, SkipReason::Cooldown)
    }

    #[test]
    fn test_bounded() {
        let mut log = DecisionLog::new(5);
        for t in 0..12 {
            log.push(skip(t));
        }
        assert_eq!(log.len(), 5);
        assert_eq!(log.events().next().unwrap().timestamp, 7);
    }

    // -------------------------------------------------------------------------
    // Requirement: a skip flood keeps the two latest switches
    // -------------------------------------------------------------------------
    #[test]
    fn test_switches_survive_flood() {
        let mut log = DecisionLog::new(5);
        log.push(DecisionEvent::switch("Kotori", MatchKind::Speaker, 0, 1));
        log.push(DecisionEvent::switch("Tohka", MatchKind::Action, 10, 2));
        log.push(DecisionEvent::switch("Shido", MatchKind::Speaker, 20, 3));
        for t in 10..40 {
            log.push(skip(t));
        }

        assert_eq!(log.len(), 5);
        let names: Vec<_> = log.switches().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Tohka", "Shido"]);
        assert_eq!(log.last_switch().unwrap().name, "Shido");
        // The rest are the newest skips
        assert_eq!(log.recent(1)[0].timestamp, 39);
        assert_eq!(log.events().filter(|e| !e.is_switch()).count(), 3);
    }

    #[test]
    fn test_capacity_floor() {
        let mut log = DecisionLog::new(0);
        assert_eq!(log.capacity(), 2);
        log.push(DecisionEvent::switch("A", MatchKind::Speaker, 0, 1));
        log.push(DecisionEvent::switch("B", MatchKind::Speaker, 0, 2));
        log.push(DecisionEvent::switch("C", MatchKind::Speaker, 0, 3));
        let names: Vec<_> = log.events().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_event_serialization() {
        let event = skip(5).with_token_index(Some(3));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "skipped");
        assert_eq!(json["reason"], "cooldown");
        assert_eq!(json["matchKind"], "action");
        assert_eq!(json["tokenIndex"], 3);

        let veto = serde_json::to_value(DecisionEvent::veto("OOC:", 4, 9)).unwrap();
        assert_eq!(veto["type"], "veto");
        assert_eq!(veto["name"], "OOC:");
    }
}
