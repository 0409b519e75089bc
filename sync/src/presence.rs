//! Presence — who is on the sketchpad and whether they are drawing.
//!
//! DESIGN
//! ======
//! Each client announces a [`PresenceRecord`] keyed by its user name and
//! re-announces whenever its drawing flag flips. Every sync delivers the full
//! state, which becomes a [`Roster`] (user → record). The tracker derives the
//! "peer" from the roster and raises a short pulse only on the edge from no
//! peer to a peer.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::identity::Identity;

// =============================================================================
// RECORD
// =============================================================================

/// One participant's presence state, as announced on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user: String,
    pub is_drawing: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub online_at: OffsetDateTime,
}

impl PresenceRecord {
    #[must_use]
    pub fn new(user: &Identity, is_drawing: bool, online_at: OffsetDateTime) -> Self {
        Self { user: user.as_str().to_owned(), is_drawing, online_at }
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// Present participants keyed by user name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: BTreeMap<String, PresenceRecord>,
}

impl Roster {
    /// Build from raw presence metas. Malformed entries are skipped; when a
    /// user appears more than once the latest `online_at` wins.
    #[must_use]
    pub fn from_metas(metas: &[Value]) -> Self {
        let mut entries: BTreeMap<String, PresenceRecord> = BTreeMap::new();
        for meta in metas {
            let record = match serde_json::from_value::<PresenceRecord>(meta.clone()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping malformed presence entry");
                    continue;
                }
            };
            match entries.get(&record.user) {
                Some(existing) if existing.online_at > record.online_at => {}
                _ => {
                    entries.insert(record.user.clone(), record);
                }
            }
        }
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, user: &str) -> Option<&PresenceRecord> {
        self.entries.get(user)
    }

    /// First participant other than `me`, in name order.
    #[must_use]
    pub fn peer(&self, me: &Identity) -> Option<&PresenceRecord> {
        self.entries.values().find(|record| record.user != me.as_str())
    }

    /// Every participant other than `me`, in name order.
    pub fn peers<'a>(&'a self, me: &'a Identity) -> impl Iterator<Item = &'a PresenceRecord> + 'a {
        self.entries
            .values()
            .filter(move |record| record.user != me.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TRACKER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// No peer before, one now. Starts the pulse.
    PeerJoined(PresenceRecord),
    PeerLeft(String),
    /// Same peer, different state (e.g. started drawing).
    PeerUpdated(PresenceRecord),
    Unchanged,
}

pub struct PresenceTracker {
    me: Identity,
    roster: Roster,
    peer: Option<PresenceRecord>,
    is_drawing: bool,
    pulse: Duration,
    pulse_until: Option<Instant>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(me: Identity, pulse: Duration) -> Self {
        Self { me, roster: Roster::default(), peer: None, is_drawing: false, pulse, pulse_until: None }
    }

    #[must_use]
    pub fn me(&self) -> &Identity {
        &self.me
    }

    /// Record to announce now, reflecting the current drawing flag.
    #[must_use]
    pub fn announcement(&self) -> PresenceRecord {
        PresenceRecord::new(&self.me, self.is_drawing, OffsetDateTime::now_utc())
    }

    /// Update the local drawing flag. Returns the record to re-announce when
    /// the flag actually changed.
    pub fn set_drawing(&mut self, is_drawing: bool) -> Option<PresenceRecord> {
        if self.is_drawing == is_drawing {
            return None;
        }
        self.is_drawing = is_drawing;
        Some(self.announcement())
    }

    /// Apply a full presence sync.
    pub fn on_sync(&mut self, metas: &[Value], now: Instant) -> PresenceChange {
        self.roster = Roster::from_metas(metas);
        let next = self.roster.peer(&self.me).cloned();

        let change = match (&self.peer, &next) {
            (None, Some(peer)) => {
                self.pulse_until = Some(now + self.pulse);
                PresenceChange::PeerJoined(peer.clone())
            }
            (Some(prev), None) => PresenceChange::PeerLeft(prev.user.clone()),
            (Some(prev), Some(peer)) if prev.user != peer.user || prev.is_drawing != peer.is_drawing => {
                PresenceChange::PeerUpdated(peer.clone())
            }
            _ => PresenceChange::Unchanged,
        };

        if change != PresenceChange::Unchanged {
            debug!(me = %self.me, roster = self.roster.len(), ?change, "presence changed");
        }
        self.peer = next;
        change
    }

    #[must_use]
    pub fn peer(&self) -> Option<&PresenceRecord> {
        self.peer.as_ref()
    }

    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    #[must_use]
    pub fn pulse_active(&self, now: Instant) -> bool {
        self.pulse_until.is_some_and(|until| now < until)
    }

    /// Earliest instant [`Self::poll`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pulse_until
    }

    /// Expire the pulse. Returns `true` when it ended at this call.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pulse_until {
            Some(until) if now >= until => {
                self.pulse_until = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
