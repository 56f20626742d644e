//! Discord transport — REST v10 calls for rooms and the prompt message.
//!
//! Rooms are guild text channels named `match-{user_id}` with topic
//! `user:{user_id}`, hidden from everyone else and read-only for their user
//! until the questionnaire is complete.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::channels::{Button, MessageHandle, OutgoingPrompt, SpaceIdentity, Transport};
use crate::config::DiscordConfig;
use crate::error::TransportError;

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord allows at most five buttons per action row.
const BUTTONS_PER_ROW: usize = 5;

const VIEW_CHANNEL: u64 = 1 << 10;
const SEND_MESSAGES: u64 = 1 << 11;
const MANAGE_CHANNELS: u64 = 1 << 4;

/// Overwrite target kinds.
const OVERWRITE_ROLE: u8 = 0;
const OVERWRITE_MEMBER: u8 = 1;

/// Guild text channel type.
const GUILD_TEXT: i64 = 0;

pub struct DiscordTransport {
    token: SecretString,
    guild_id: u64,
    client: reqwest::Client,
    bot_user_id: OnceCell<String>,
}

impl DiscordTransport {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            token: config.token.clone(),
            guild_id: config.guild_id,
            client: reqwest::Client::new(),
            bot_user_id: OnceCell::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{API_BASE}{path}")
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token.expose_secret())
    }

    fn request_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::RequestFailed {
            transport: "discord".into(),
            reason: reason.to_string(),
        }
    }

    /// Send a request and decode the JSON body.
    ///
    /// 404 maps to `NotFound` for (`resource`, `id`); 429 to `RateLimited`.
    async fn call(
        &self,
        builder: reqwest::RequestBuilder,
        resource: &str,
        id: &str,
    ) -> Result<Value, TransportError> {
        let resp = builder
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound {
                transport: "discord".into(),
                resource: resource.to_string(),
                id: id.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let retry_after = body
                .get("retry_after")
                .and_then(Value::as_f64)
                .map(Duration::from_secs_f64);
            return Err(TransportError::RateLimited {
                transport: "discord".into(),
                retry_after,
            });
        }
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(self.request_failed(format!("{resource} {id}: {status} {err}")));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json().await.map_err(|e| TransportError::InvalidResponse {
            transport: "discord".into(),
            reason: e.to_string(),
        })
    }

    async fn bot_user_id(&self) -> Result<&str, TransportError> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let me = self
                    .call(self.client.get(self.api_url("/users/@me")), "user", "@me")
                    .await?;
                string_field(&me, "id").ok_or_else(|| TransportError::InvalidResponse {
                    transport: "discord".into(),
                    reason: "GET /users/@me returned no id".into(),
                })
            })
            .await?;
        Ok(id.as_str())
    }
}

// ── Transport trait implementation ──────────────────────────────────

#[async_trait]
impl Transport for DiscordTransport {
    fn name(&self) -> &str {
        "discord"
    }

    async fn find_space(&self, user_id: &str) -> Result<Option<SpaceIdentity>, TransportError> {
        let guild = self.guild_id.to_string();
        let channels = self
            .call(
                self.client
                    .get(self.api_url(&format!("/guilds/{guild}/channels"))),
                "guild",
                &guild,
            )
            .await?;

        Ok(channels
            .as_array()
            .into_iter()
            .flatten()
            .filter(|c| c.get("type").and_then(Value::as_i64) == Some(GUILD_TEXT))
            .filter_map(space_from_json)
            .find(|space| space.belongs_to(user_id)))
    }

    async fn create_space(&self, user_id: &str) -> Result<SpaceIdentity, TransportError> {
        let bot_id = self.bot_user_id().await?.to_string();
        let guild = self.guild_id.to_string();
        let body = json!({
            "name": SpaceIdentity::room_name(user_id),
            "type": GUILD_TEXT,
            "topic": SpaceIdentity::room_topic(user_id),
            "permission_overwrites": room_overwrites(&guild, user_id, &bot_id),
        });

        let created = self
            .call(
                self.client
                    .post(self.api_url(&format!("/guilds/{guild}/channels")))
                    .json(&body),
                "guild",
                &guild,
            )
            .await?;

        let space = space_from_json(&created).ok_or_else(|| TransportError::InvalidResponse {
            transport: "discord".into(),
            reason: "created channel is missing id/name".into(),
        })?;
        tracing::info!(user_id, space_id = %space.space_id, "Discord room created");
        Ok(space)
    }

    async fn fetch_space(&self, space_id: &str) -> Result<Option<SpaceIdentity>, TransportError> {
        match self
            .call(
                self.client.get(self.api_url(&format!("/channels/{space_id}"))),
                "channel",
                space_id,
            )
            .await
        {
            Ok(channel) => Ok(space_from_json(&channel)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_space(&self, space_id: &str) -> Result<(), TransportError> {
        self.call(
            self.client
                .delete(self.api_url(&format!("/channels/{space_id}"))),
            "channel",
            space_id,
        )
        .await?;
        tracing::info!(space_id, "Discord room deleted");
        Ok(())
    }

    async fn unlock_space(&self, space_id: &str, user_id: &str) -> Result<(), TransportError> {
        let body = json!({
            "type": OVERWRITE_MEMBER,
            "allow": (VIEW_CHANNEL | SEND_MESSAGES).to_string(),
            "deny": "0",
        });
        self.call(
            self.client
                .put(self.api_url(&format!("/channels/{space_id}/permissions/{user_id}")))
                .json(&body),
            "channel",
            space_id,
        )
        .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        space_id: &str,
        prompt: &OutgoingPrompt,
    ) -> Result<MessageHandle, TransportError> {
        let sent = self
            .call(
                self.client
                    .post(self.api_url(&format!("/channels/{space_id}/messages")))
                    .json(&message_body(prompt)),
                "channel",
                space_id,
            )
            .await?;

        let message_id = string_field(&sent, "id").ok_or_else(|| TransportError::InvalidResponse {
            transport: "discord".into(),
            reason: "created message has no id".into(),
        })?;
        Ok(MessageHandle {
            space_id: space_id.to_string(),
            message_id,
        })
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        prompt: &OutgoingPrompt,
    ) -> Result<(), TransportError> {
        let MessageHandle {
            space_id,
            message_id,
        } = handle;
        self.call(
            self.client
                .patch(self.api_url(&format!(
                    "/channels/{space_id}/messages/{message_id}"
                )))
                .json(&message_body(prompt)),
            "message",
            message_id,
        )
        .await?;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Parse a channel object. Channels without a topic get an empty one.
fn space_from_json(channel: &Value) -> Option<SpaceIdentity> {
    Some(SpaceIdentity {
        space_id: string_field(channel, "id")?,
        name: string_field(channel, "name")?,
        topic: string_field(channel, "topic").unwrap_or_default(),
    })
}

/// Hidden from @everyone (whose role id equals the guild id), visible but
/// read-only for the user, fully usable by the bot.
fn room_overwrites(guild_id: &str, user_id: &str, bot_id: &str) -> Value {
    json!([
        {
            "id": guild_id,
            "type": OVERWRITE_ROLE,
            "allow": "0",
            "deny": VIEW_CHANNEL.to_string(),
        },
        {
            "id": user_id,
            "type": OVERWRITE_MEMBER,
            "allow": VIEW_CHANNEL.to_string(),
            "deny": SEND_MESSAGES.to_string(),
        },
        {
            "id": bot_id,
            "type": OVERWRITE_MEMBER,
            "allow": (VIEW_CHANNEL | SEND_MESSAGES | MANAGE_CHANNELS).to_string(),
            "deny": "0",
        },
    ])
}

/// Message create/edit body. `components` is always sent so an edit with no
/// buttons strips the old ones.
fn message_body(prompt: &OutgoingPrompt) -> Value {
    json!({
        "content": prompt.content,
        "components": action_rows(&prompt.buttons),
    })
}

fn action_rows(buttons: &[Button]) -> Vec<Value> {
    buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            json!({
                "type": 1,
                "components": row
                    .iter()
                    .map(|b| json!({
                        "type": 2,
                        "style": 1,
                        "label": b.label,
                        "custom_id": b.payload,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> DiscordTransport {
        DiscordTransport::new(&DiscordConfig {
            token: SecretString::from("test-token"),
            guild_id: 1234,
        })
    }

    fn button(n: usize) -> Button {
        Button {
            label: format!("B{n}"),
            payload: format!("answer:0:{n}"),
        }
    }

    #[test]
    fn discord_transport_name() {
        assert_eq!(transport().name(), "discord");
    }

    #[test]
    fn discord_api_url() {
        assert_eq!(
            transport().api_url("/channels/9"),
            "https://discord.com/api/v10/channels/9"
        );
        assert_eq!(transport().auth_header(), "Bot test-token");
    }

    #[test]
    fn five_buttons_fit_one_row() {
        let buttons: Vec<Button> = (0..5).map(button).collect();
        let rows = action_rows(&buttons);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["components"].as_array().unwrap().len(), 5);
        assert_eq!(rows[0]["components"][2]["custom_id"], "answer:0:2");
    }

    #[test]
    fn extra_buttons_wrap_to_next_row() {
        let buttons: Vec<Button> = (0..7).map(button).collect();
        let rows = action_rows(&buttons);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["components"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn text_only_edit_clears_components() {
        let body = message_body(&OutgoingPrompt::text("done"));
        assert_eq!(body["content"], "done");
        assert_eq!(body["components"], json!([]));
    }

    #[test]
    fn space_from_channel_json() {
        let channel = json!({"id": "77", "name": "match-5", "topic": "user:5", "type": 0});
        let space = space_from_json(&channel).unwrap();
        assert_eq!(space.space_id, "77");
        assert!(space.belongs_to("5"));

        let no_topic = json!({"id": "78", "name": "general", "topic": null});
        assert_eq!(space_from_json(&no_topic).unwrap().topic, "");

        assert!(space_from_json(&json!({"name": "x"})).is_none());
    }

    #[test]
    fn overwrites_hide_room_from_everyone() {
        let overwrites = room_overwrites("1234", "5", "99");
        assert_eq!(overwrites[0]["id"], "1234");
        assert_eq!(overwrites[0]["deny"], "1024");
        assert_eq!(overwrites[1]["deny"], "2048");
        assert_eq!(overwrites[2]["id"], "99");
    }
}
