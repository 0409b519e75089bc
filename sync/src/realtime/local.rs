//! In-process realtime hub.
//!
//! Routes broadcasts, presence, and row changes between subscriptions that
//! live in the same process. Semantics follow the hosted service closely
//! enough for end-to-end tests: the join is acknowledged immediately, the
//! sender is excluded from broadcasts unless `broadcast_self` is set, every
//! presence change pushes the full state to every member, and row changes
//! reach every subscriber whose filter matches (the writer included).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChannelConfig, ChannelError, ChannelEvent, Realtime, RealtimeChannel, Subscription};

// =============================================================================
// HUB
// =============================================================================

#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    next_member: u64,
    channels: HashMap<String, Vec<Member>>,
}

struct Member {
    id: u64,
    config: ChannelConfig,
    presence: Option<Value>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a row change to every matching subscriber on every channel.
    pub fn publish_row_change(&self, table: &str, record: &Value) {
        let state = self.state();
        for member in state.channels.values().flatten() {
            if member.config.row_changes.iter().any(|f| f.matches(table, record)) {
                deliver(member, ChannelEvent::RowChanged { table: table.to_owned(), record: record.clone() });
            }
        }
    }

    /// Number of live members on a channel.
    #[must_use]
    pub fn member_count(&self, name: &str) -> usize {
        self.state().channels.get(name).map_or(0, Vec::len)
    }

    fn broadcast_from(&self, name: &str, sender: u64, event: &str, payload: &Value) -> Result<(), ChannelError> {
        let state = self.state();
        let members = state.channels.get(name).ok_or(ChannelError::Closed)?;
        if !members.iter().any(|m| m.id == sender) {
            return Err(ChannelError::Closed);
        }
        for member in members {
            if member.id == sender && !member.config.broadcast_self {
                continue;
            }
            deliver(member, ChannelEvent::Broadcast { event: event.to_owned(), payload: payload.clone() });
        }
        Ok(())
    }

    fn track(&self, name: &str, member_id: u64, presence: Value) -> Result<(), ChannelError> {
        let mut state = self.state();
        let members = state.channels.get_mut(name).ok_or(ChannelError::Closed)?;
        let member = members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or(ChannelError::Closed)?;
        member.presence = Some(presence);
        sync_presence(members);
        Ok(())
    }

    fn remove(&self, name: &str, member_id: u64) {
        let mut state = self.state();
        let Some(members) = state.channels.get_mut(name) else {
            return;
        };
        let before = members.len();
        members.retain(|m| m.id != member_id);
        if members.len() == before {
            return;
        }
        debug!(channel = %name, member_id, remaining = members.len(), "local member left");
        sync_presence(members);
        if members.is_empty() {
            state.channels.remove(name);
        }
    }
}

#[async_trait]
impl Realtime for LocalHub {
    async fn subscribe(&self, name: &str, config: ChannelConfig) -> Result<Subscription, ChannelError> {
        let (tx, events) = mpsc::unbounded_channel();
        let member_id = {
            let mut state = self.state();
            state.next_member += 1;
            let id = state.next_member;
            let members = state.channels.entry(name.to_owned()).or_default();
            let member = Member { id, config, presence: None, tx };
            deliver(&member, ChannelEvent::Subscribed);
            if member.config.presence_key.is_some() {
                deliver(&member, ChannelEvent::PresenceSync(presence_of(members)));
            }
            members.push(member);
            debug!(channel = %name, member_id = id, members = members.len(), "local member joined");
            id
        };

        let channel = LocalChannel { hub: self.clone(), name: name.to_owned(), member_id };
        Ok(Subscription { channel: Arc::new(channel), events })
    }
}

fn deliver(member: &Member, event: ChannelEvent) {
    if member.tx.send(event).is_err() {
        debug!(member_id = member.id, "local subscriber gone, event discarded");
    }
}

fn presence_of(members: &[Member]) -> Vec<Value> {
    members.iter().filter_map(|m| m.presence.clone()).collect()
}

fn sync_presence(members: &[Member]) {
    let snapshot = presence_of(members);
    for member in members.iter().filter(|m| m.config.presence_key.is_some()) {
        deliver(member, ChannelEvent::PresenceSync(snapshot.clone()));
    }
}

// =============================================================================
// CHANNEL HANDLE
// =============================================================================

/// Membership in a [`LocalHub`] channel. Dropping the handle leaves.
pub struct LocalChannel {
    hub: LocalHub,
    name: String,
    member_id: u64,
}

#[async_trait]
impl RealtimeChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        self.hub
            .broadcast_from(&self.name, self.member_id, event, &payload)
    }

    async fn track(&self, state: Value) -> Result<(), ChannelError> {
        self.hub.track(&self.name, self.member_id, state)
    }

    async fn leave(&self) {
        self.hub.remove(&self.name, self.member_id);
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.hub.remove(&self.name, self.member_id);
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
