//! Transport trait — the outbound boundary to the chat platform.
//!
//! The core only ever asks the platform to find/create a user's private
//! space, publish or edit the single prompt message, and delete the space.
//! Every call must tolerate stale ids: absent resources come back as
//! `TransportError::NotFound` (or `None`), never as a crash.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;

/// Handle of the single live prompt message owned by a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub space_id: String,
    pub message_id: String,
}

/// A private space as it currently exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceIdentity {
    pub space_id: String,
    pub name: String,
    pub topic: String,
}

impl SpaceIdentity {
    /// Name every user room is created with.
    pub fn room_name(user_id: &str) -> String {
        format!("match-{user_id}")
    }

    /// Topic tag binding a room to its user.
    pub fn room_topic(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// Whether this space is still the room of `user_id`, by name and topic.
    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.name == Self::room_name(user_id) && self.topic == Self::room_topic(user_id)
    }
}

/// One answer button. `payload` round-trips back through the inbound side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

/// Content of the single outbound message: text plus optional controls.
///
/// An empty `buttons` list removes any controls from an edited message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingPrompt {
    pub content: String,
    pub buttons: Vec<Button>,
}

impl OutgoingPrompt {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Chat-platform operations required by the session core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g. "discord").
    fn name(&self) -> &str;

    /// Find an existing room for `user_id` by its name/topic binding.
    async fn find_space(&self, user_id: &str) -> Result<Option<SpaceIdentity>, TransportError>;

    /// Create a private room visible only to `user_id` (read-only for them).
    async fn create_space(&self, user_id: &str) -> Result<SpaceIdentity, TransportError>;

    /// Current identity of a space, or `None` if it no longer exists.
    async fn fetch_space(&self, space_id: &str) -> Result<Option<SpaceIdentity>, TransportError>;

    /// Delete a space. `NotFound` if it is already gone.
    async fn delete_space(&self, space_id: &str) -> Result<(), TransportError>;

    /// Let the user write in their room again once the questionnaire is done.
    async fn unlock_space(&self, space_id: &str, user_id: &str) -> Result<(), TransportError>;

    /// Post a new message into a space.
    async fn send_message(
        &self,
        space_id: &str,
        prompt: &OutgoingPrompt,
    ) -> Result<MessageHandle, TransportError>;

    /// Replace the content and controls of an existing message.
    /// `NotFound` if the message was deleted or expired upstream.
    async fn edit_message(
        &self,
        handle: &MessageHandle,
        prompt: &OutgoingPrompt,
    ) -> Result<(), TransportError>;

    /// Edit the tracked message in place, or create a new one when there is
    /// no handle, the handle points at another space, or the target is gone.
    ///
    /// Returns the handle that now carries `prompt`.
    async fn publish_or_edit(
        &self,
        space_id: &str,
        handle: Option<&MessageHandle>,
        prompt: &OutgoingPrompt,
    ) -> Result<MessageHandle, TransportError> {
        if let Some(handle) = handle.filter(|h| h.space_id == space_id) {
            match self.edit_message(handle, prompt).await {
                Ok(()) => return Ok(handle.clone()),
                Err(e) if e.is_not_found() => {
                    debug!(
                        space_id,
                        message_id = %handle.message_id,
                        "Tracked message gone, publishing a new one"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.send_message(space_id, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_binding_requires_name_and_topic() {
        let space = SpaceIdentity {
            space_id: "c1".into(),
            name: SpaceIdentity::room_name("42"),
            topic: SpaceIdentity::room_topic("42"),
        };
        assert!(space.belongs_to("42"));
        assert!(!space.belongs_to("43"));

        let renamed = SpaceIdentity {
            name: "general".into(),
            ..space.clone()
        };
        assert!(!renamed.belongs_to("42"));

        let retagged = SpaceIdentity {
            topic: "user:43".into(),
            ..space
        };
        assert!(!retagged.belongs_to("42"));
    }

    #[test]
    fn text_prompt_has_no_controls() {
        let prompt = OutgoingPrompt::text("done");
        assert!(prompt.buttons.is_empty());
        let prompt = prompt.with_buttons(vec![Button {
            label: "A".into(),
            payload: "answer:0:A".into(),
        }]);
        assert_eq!(prompt.buttons.len(), 1);
    }
}
