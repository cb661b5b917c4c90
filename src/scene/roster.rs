//! Scene Roster
//!
//! Who is "in scene", with turn-based expiry.
//!
//! # Member lifecycle
//! `unseen -> active -> active (turns decrementing) -> inactive`
//!
//! Members are deactivated, never deleted, by refreshes and TTL decay, so a
//! character who skips a turn comes back as the same identity and "left N
//! turns ago" stays answerable. Only `remove_member` and `reset` delete.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::scanner::MatchKind;
use crate::scoring::RosterView;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterMember {
    pub name: String,
    /// Normalized lookup key
    pub key: String,
    pub joined_at: i64,
    pub last_seen_at: i64,
    pub last_left_at: Option<i64>,
    pub active: bool,
    /// `None` = never expires
    pub turns_remaining: Option<u32>,
    /// Completed turns since the member went inactive
    pub turns_since_left: Option<u32>,
}

impl RosterMember {
    fn new(name: &str, key: String, now: i64, turns: Option<u32>) -> Self {
        let mut member = Self {
            name: name.to_string(),
            key,
            joined_at: now,
            last_seen_at: now,
            last_left_at: None,
            active: true,
            turns_remaining: turns,
            turns_since_left: None,
        };
        member.sync_active(now);
        member
    }

    fn refresh(&mut self, now: i64, turns: Option<u32>) {
        self.last_seen_at = now;
        self.turns_remaining = turns;
        self.sync_active(now);
    }

    fn deactivate(&mut self, now: i64) {
        if self.active {
            self.last_left_at = Some(now);
            self.turns_since_left = Some(0);
        }
        self.active = false;
        self.turns_remaining = Some(0);
    }

    /// Re-derive `active` from the turn counter
    fn sync_active(&mut self, now: i64) {
        let active = self.turns_remaining.map_or(true, |t| t > 0);
        if active {
            self.active = true;
            self.turns_since_left = None;
        } else {
            self.deactivate(now);
        }
    }
}

/// Most recent winning detection, as recorded by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMatch {
    pub name: String,
    pub kind: MatchKind,
    pub char_index: usize,
}

/// Replace-style refresh from the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RosterUpdate {
    /// Scene key (chat id); a different key starts a fresh scene
    pub key: Option<String>,
    /// Everyone currently in scene
    pub roster: Vec<String>,
    /// Display name per roster entry (keyed by the raw entry or its key)
    pub display_names: HashMap<String, String>,
    pub last_match: Option<LastMatch>,
    pub updated_at: i64,
    /// Explicit per-member turn budgets; beat the default TTL
    pub turns_remaining: HashMap<String, u32>,
}

/// What a refresh changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterChange {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl RosterChange {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSnapshot {
    pub key: Option<String>,
    pub members: Vec<RosterMember>,
    pub last_match: Option<LastMatch>,
    pub updated_at: Option<i64>,
    pub default_ttl: Option<u32>,
}

pub fn member_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// =============================================================================
// Roster
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct SceneRoster {
    key: Option<String>,
    members: BTreeMap<String, RosterMember>,
    default_ttl: Option<u32>,
    last_match: Option<LastMatch>,
    updated_at: Option<i64>,
}

impl SceneRoster {
    pub fn new(default_ttl: Option<u32>) -> Self {
        Self {
            default_ttl,
            ..Self::default()
        }
    }

    pub fn default_ttl(&self) -> Option<u32> {
        self.default_ttl
    }

    pub fn set_default_ttl(&mut self, ttl: Option<u32>) {
        self.default_ttl = ttl;
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn last_match(&self) -> Option<&LastMatch> {
        self.last_match.as_ref()
    }

    pub fn record_match(&mut self, last_match: LastMatch) {
        self.last_match = Some(last_match);
    }

    pub fn get(&self, name: &str) -> Option<&RosterMember> {
        self.members.get(&member_key(name))
    }

    /// Members in key order
    pub fn members(&self) -> impl Iterator<Item = &RosterMember> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.get(name).map_or(false, |m| m.active)
    }

    pub fn active_names(&self) -> Vec<String> {
        self.members
            .values()
            .filter(|m| m.active)
            .map(|m| m.name.clone())
            .collect()
    }

    /// Replace-style refresh: listed members become active with a fresh
    /// budget, everyone else goes inactive.
    pub fn update(&mut self, update: RosterUpdate) -> RosterChange {
        if update.key.is_some() && self.key.is_some() && update.key != self.key {
            tracing::debug!(from = ?self.key, to = ?update.key, "scene key changed, roster reset");
            self.reset();
        }
        if update.key.is_some() {
            self.key = update.key.clone();
        }

        let now = update.updated_at;
        let mut change = RosterChange::default();
        let mut present = Vec::new();

        for raw in &update.roster {
            let key = member_key(raw);
            if key.is_empty() || present.contains(&key) {
                continue;
            }
            let name = update
                .display_names
                .get(raw)
                .or_else(|| update.display_names.get(&key))
                .map(String::as_str)
                .unwrap_or_else(|| raw.trim());
            let turns = update
                .turns_remaining
                .get(raw)
                .or_else(|| update.turns_remaining.get(&key))
                .copied()
                .or(self.default_ttl);

            if self.upsert(name, key.clone(), now, turns) {
                change.joined.push(name.to_string());
            }
            present.push(key);
        }

        for member in self.members.values_mut() {
            if !present.contains(&member.key) && member.active {
                member.deactivate(now);
                change.left.push(member.name.clone());
            }
        }

        if update.last_match.is_some() {
            self.last_match = update.last_match;
        }
        self.updated_at = Some(now);
        change
    }

    /// End of one turn: mentioned members are refreshed, the rest lose one
    /// turn and deactivate at zero.
    pub fn end_turn<S: AsRef<str>>(&mut self, mentioned: &[S], now: i64) -> RosterChange {
        let mut change = RosterChange::default();
        let mut seen = Vec::new();

        for name in mentioned {
            let name = name.as_ref().trim();
            let key = member_key(name);
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            if self.upsert(name, key.clone(), now, self.default_ttl) {
                change.joined.push(name.to_string());
            }
            seen.push(key);
        }

        for member in self.members.values_mut() {
            if seen.contains(&member.key) {
                continue;
            }
            if !member.active {
                member.turns_since_left = Some(member.turns_since_left.map_or(1, |t| t + 1));
                continue;
            }
            if let Some(turns) = member.turns_remaining {
                member.turns_remaining = Some(turns.saturating_sub(1));
                member.sync_active(now);
                if !member.active {
                    change.left.push(member.name.clone());
                }
            }
        }

        self.updated_at = Some(now);
        if !change.is_empty() {
            tracing::debug!(joined = ?change.joined, left = ?change.left, "roster turn");
        }
        change
    }

    /// Set one member's budget explicitly; `None` never expires, `Some(0)`
    /// deactivates.
    pub fn set_member(&mut self, name: &str, turns: Option<u32>, now: i64) -> &RosterMember {
        let key = member_key(name);
        let member = self
            .members
            .entry(key.clone())
            .or_insert_with(|| RosterMember::new(name.trim(), key, now, turns));
        member.refresh(now, turns);
        member
    }

    /// Mark a freshly detected character present with the default budget.
    /// True when that made them (re)join.
    pub fn touch(&mut self, name: &str, now: i64) -> bool {
        let key = member_key(name);
        if key.is_empty() {
            return false;
        }
        self.upsert(name.trim(), key, now, self.default_ttl)
    }

    pub fn remove_member(&mut self, name: &str) -> Option<RosterMember> {
        self.members.remove(&member_key(name))
    }

    /// New conversation or scene: forget everyone
    pub fn reset(&mut self) {
        self.key = None;
        self.members.clear();
        self.last_match = None;
        self.updated_at = None;
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            key: self.key.clone(),
            members: self.members.values().cloned().collect(),
            last_match: self.last_match.clone(),
            updated_at: self.updated_at,
            default_ttl: self.default_ttl,
        }
    }

    pub fn restore(&mut self, snapshot: RosterSnapshot) {
        self.key = snapshot.key;
        self.members = snapshot
            .members
            .into_iter()
            .map(|mut m| {
                m.key = member_key(&m.name);
                m.active = m.turns_remaining.map_or(true, |t| t > 0);
                (m.key.clone(), m)
            })
            .collect();
        self.last_match = snapshot.last_match;
        self.updated_at = snapshot.updated_at;
        self.default_ttl = snapshot.default_ttl;
    }

    /// True when the member was newly created or came back from inactive
    fn upsert(&mut self, name: &str, key: String, now: i64, turns: Option<u32>) -> bool {
        match self.members.get_mut(&key) {
            Some(member) => {
                let was_active = member.active;
                member.refresh(now, turns);
                !was_active && member.active
            }
            None => {
                let member = RosterMember::new(name, key.clone(), now, turns);
                let active = member.active;
                self.members.insert(key, member);
                active
            }
        }
    }
}

impl RosterView for SceneRoster {
    fn is_active(&self, name: &str) -> bool {
        SceneRoster::is_active(self, name)
    }
}

// =============================================================================
// Tests
// =============================================================================
