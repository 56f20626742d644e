//! In-memory transport — keeps spaces and messages in process.
//!
//! Used for local runs without platform credentials and as the recording
//! transport in tests. Helper methods let a caller simulate upstream
//! changes (a deleted message, a renamed or removed room, an outage).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::channels::{MessageHandle, OutgoingPrompt, SpaceIdentity, Transport};
use crate::error::TransportError;

const NAME: &str = "memory";

/// One observable transport call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SpaceCreated { space_id: String },
    SpaceDeleted { space_id: String },
    SpaceUnlocked { space_id: String, user_id: String },
    MessageSent { space_id: String, message_id: String },
    MessageEdited { space_id: String, message_id: String },
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    offline: bool,
    spaces: HashMap<String, SpaceIdentity>,
    unlocked: HashSet<(String, String)>,
    /// message_id → (space_id, prompt)
    messages: HashMap<String, (String, OutgoingPrompt)>,
    events: Vec<TransportEvent>,
}

impl MemoryState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline {
            return Err(TransportError::RequestFailed {
                transport: NAME.into(),
                reason: "transport offline".into(),
            });
        }
        Ok(())
    }
}

fn not_found(resource: &str, id: &str) -> TransportError {
    TransportError::NotFound {
        transport: NAME.into(),
        resource: resource.into(),
        id: id.into(),
    }
}

fn poisoned() -> TransportError {
    TransportError::RequestFailed {
        transport: NAME.into(),
        reason: "state lock poisoned".into(),
    }
}

/// Transport that keeps everything in a mutex-guarded map.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        f(&mut state)
    }

    fn read<T: Default>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        self.state.lock().map(|s| f(&s)).unwrap_or_default()
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Every call recorded so far.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.read(|s| s.events.clone())
    }

    /// Current content of a message, if it still exists.
    pub fn message(&self, handle: &MessageHandle) -> Option<OutgoingPrompt> {
        self.read(|s| {
            s.messages
                .get(&handle.message_id)
                .filter(|(space, _)| *space == handle.space_id)
                .map(|(_, p)| p.clone())
        })
    }

    /// Number of live messages in a space.
    pub fn message_count(&self, space_id: &str) -> usize {
        self.read(|s| s.messages.values().filter(|(sp, _)| sp == space_id).count())
    }

    pub fn space(&self, space_id: &str) -> Option<SpaceIdentity> {
        self.read(|s| s.spaces.get(space_id).cloned())
    }

    pub fn space_count(&self) -> usize {
        self.read(|s| s.spaces.len())
    }

    pub fn is_unlocked(&self, space_id: &str, user_id: &str) -> bool {
        self.read(|s| {
            s.unlocked
                .contains(&(space_id.to_string(), user_id.to_string()))
        })
    }

    // ── Upstream simulation ─────────────────────────────────────────

    /// Delete a message behind the core's back.
    pub fn drop_message(&self, message_id: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.messages.remove(message_id);
        }
    }

    /// Rename a space behind the core's back.
    pub fn rename_space(&self, space_id: &str, name: &str) {
        if let Ok(mut s) = self.state.lock() {
            if let Some(space) = s.spaces.get_mut(space_id) {
                space.name = name.to_string();
            }
        }
    }

    /// Delete a space behind the core's back.
    pub fn remove_space(&self, space_id: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.spaces.remove(space_id);
            s.messages.retain(|_, (sp, _)| sp != space_id);
        }
    }

    /// While offline every call fails with `RequestFailed`.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.offline = offline;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        NAME
    }

    async fn find_space(&self, user_id: &str) -> Result<Option<SpaceIdentity>, TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            let mut bound: Vec<&SpaceIdentity> =
                s.spaces.values().filter(|sp| sp.belongs_to(user_id)).collect();
            bound.sort_by(|a, b| a.space_id.cmp(&b.space_id));
            Ok(bound.first().map(|sp| (*sp).clone()))
        })
    }

    async fn create_space(&self, user_id: &str) -> Result<SpaceIdentity, TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            let space = SpaceIdentity {
                space_id: s.mint("space"),
                name: SpaceIdentity::room_name(user_id),
                topic: SpaceIdentity::room_topic(user_id),
            };
            s.spaces.insert(space.space_id.clone(), space.clone());
            s.events.push(TransportEvent::SpaceCreated {
                space_id: space.space_id.clone(),
            });
            debug!(user_id, space_id = %space.space_id, "Space created");
            Ok(space)
        })
    }

    async fn fetch_space(&self, space_id: &str) -> Result<Option<SpaceIdentity>, TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            Ok(s.spaces.get(space_id).cloned())
        })
    }

    async fn delete_space(&self, space_id: &str) -> Result<(), TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            if s.spaces.remove(space_id).is_none() {
                return Err(not_found("space", space_id));
            }
            s.messages.retain(|_, (sp, _)| sp != space_id);
            s.events.push(TransportEvent::SpaceDeleted {
                space_id: space_id.to_string(),
            });
            Ok(())
        })
    }

    async fn unlock_space(&self, space_id: &str, user_id: &str) -> Result<(), TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            if !s.spaces.contains_key(space_id) {
                return Err(not_found("space", space_id));
            }
            s.unlocked.insert((space_id.to_string(), user_id.to_string()));
            s.events.push(TransportEvent::SpaceUnlocked {
                space_id: space_id.to_string(),
                user_id: user_id.to_string(),
            });
            Ok(())
        })
    }

    async fn send_message(
        &self,
        space_id: &str,
        prompt: &OutgoingPrompt,
    ) -> Result<MessageHandle, TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            if !s.spaces.contains_key(space_id) {
                return Err(not_found("space", space_id));
            }
            let message_id = s.mint("msg");
            s.messages
                .insert(message_id.clone(), (space_id.to_string(), prompt.clone()));
            s.events.push(TransportEvent::MessageSent {
                space_id: space_id.to_string(),
                message_id: message_id.clone(),
            });
            debug!(space_id, message_id = %message_id, content = %prompt.content, "Message sent");
            Ok(MessageHandle {
                space_id: space_id.to_string(),
                message_id,
            })
        })
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        prompt: &OutgoingPrompt,
    ) -> Result<(), TransportError> {
        self.with_state(|s| {
            s.check_online()?;
            match s.messages.get_mut(&handle.message_id) {
                Some((space, stored)) if *space == handle.space_id => {
                    *stored = prompt.clone();
                }
                _ => return Err(not_found("message", &handle.message_id)),
            }
            s.events.push(TransportEvent::MessageEdited {
                space_id: handle.space_id.clone(),
                message_id: handle.message_id.clone(),
            });
            debug!(message_id = %handle.message_id, content = %prompt.content, "Message edited");
            Ok(())
        })
    }
}
