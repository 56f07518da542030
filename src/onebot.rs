use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::OneBotConfig;

/// Failure talking to the chat platform itself. Logged, never retried beyond
/// the client timeout, and surfaced to admin commands as plain text.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("onebot transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("onebot api refused {action}: retcode={retcode}")]
    Api { action: &'static str, retcode: i64 },

    #[error("onebot malformed response from {action}: {detail}")]
    Malformed {
        action: &'static str,
        detail: String,
    },
}

/// A group-join application as reported by the event stream. Resolved exactly
/// once via `set_group_add_request` with the opaque `flag`.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequestEvent {
    pub request_type: String,
    #[serde(default)]
    pub sub_type: String,
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub comment: String,
    pub flag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub message_type: String,
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub raw_message: String,
}

#[derive(Debug)]
pub enum Event {
    JoinRequest(JoinRequestEvent),
    Message(MessageEvent),
}

/// Classifies a raw webhook body. Everything that is not a request or message
/// event (heartbeats, notices) comes back as `None` and is dropped.
pub fn parse_event(body: &Value) -> Option<Event> {
    match body.get("post_type").and_then(Value::as_str)? {
        "request" => serde_json::from_value(body.clone()).ok().map(Event::JoinRequest),
        "message" => serde_json::from_value(body.clone()).ok().map(Event::Message),
        other => {
            debug!("ignoring event post_type={}", other);
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
}

/// One member row as the platform reports it. Optional platform fields
/// default to zero and render as the epoch placeholder on export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberRecord {
    #[serde(default)]
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub join_time: i64,
    #[serde(default)]
    pub last_sent_time: i64,
    #[serde(default)]
    pub title_expire_time: i64,
    #[serde(default)]
    pub shut_up_timestamp: i64,
}

/// One page of a member-list query, normalized from the two shapes the
/// platform emits: a bare array (no pagination) or `{data, next_token}`.
#[derive(Debug, Default)]
pub struct MemberListPage {
    pub items: Vec<MemberRecord>,
    pub next_token: Option<String>,
}

impl MemberListPage {
    pub fn from_data(data: Value) -> Result<MemberListPage, HostError> {
        if data.is_array() {
            let items = serde_json::from_value(data).map_err(|e| HostError::Malformed {
                action: "get_group_member_list",
                detail: e.to_string(),
            })?;
            return Ok(MemberListPage {
                items,
                next_token: None,
            });
        }
        if let Some(inner) = data.get("data") {
            let items =
                serde_json::from_value(inner.clone()).map_err(|e| HostError::Malformed {
                    action: "get_group_member_list",
                    detail: e.to_string(),
                })?;
            let next_token = data
                .get("next_token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            return Ok(MemberListPage { items, next_token });
        }
        Err(HostError::Malformed {
            action: "get_group_member_list",
            detail: format!("unexpected shape: {}", data),
        })
    }
}

/// Where a command reply or exported file should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    Group(i64),
    Private(i64),
}

impl MessageEvent {
    pub fn reply_target(&self) -> ReplyTarget {
        match self.group_id {
            Some(gid) if self.message_type == "group" => ReplyTarget::Group(gid),
            _ => ReplyTarget::Private(self.user_id),
        }
    }
}

/// The chat-platform surface the bot depends on.
#[async_trait]
pub trait GroupHost: Send + Sync {
    async fn set_group_add_request(
        &self,
        flag: &str,
        approve: bool,
        reason: Option<&str>,
    ) -> Result<(), HostError>;

    async fn get_group_member_page(
        &self,
        group_id: i64,
        next_token: Option<&str>,
    ) -> Result<MemberListPage, HostError>;

    /// Existence check: errors when `user_id` is not a member of `group_id`.
    async fn get_group_member_info(&self, group_id: i64, user_id: i64) -> Result<(), HostError>;

    async fn get_group_list(&self) -> Result<Vec<GroupInfo>, HostError>;

    async fn upload_file(
        &self,
        target: ReplyTarget,
        bytes: &[u8],
        name: &str,
    ) -> Result<(), HostError>;

    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<(), HostError>;

    async fn login_id(&self) -> Result<i64, HostError>;
}

#[derive(Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Value,
}

pub struct OneBotClient {
    client: reqwest::Client,
    api_base_url: String,
    access_token: Option<String>,
}

impl OneBotClient {
    pub fn new(cfg: &OneBotConfig) -> anyhow::Result<OneBotClient> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(OneBotClient {
            client,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
        })
    }

    async fn call(&self, action: &'static str, params: Value) -> Result<Value, HostError> {
        let mut req = self
            .client
            .post(format!("{}/{}", self.api_base_url, action))
            .json(&params);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        let envelope: ApiEnvelope = req.send().await?.json().await?;
        match envelope.status.as_str() {
            "ok" | "async" => Ok(envelope.data),
            _ => Err(HostError::Api {
                action,
                retcode: envelope.retcode,
            }),
        }
    }
}

#[async_trait]
impl GroupHost for OneBotClient {
    async fn set_group_add_request(
        &self,
        flag: &str,
        approve: bool,
        reason: Option<&str>,
    ) -> Result<(), HostError> {
        let mut params = json!({
            "flag": flag,
            "sub_type": "add",
            "approve": approve,
        });
        if let Some(reason) = reason {
            params["reason"] = json!(reason);
        }
        self.call("set_group_add_request", params).await?;
        Ok(())
    }

    async fn get_group_member_page(
        &self,
        group_id: i64,
        next_token: Option<&str>,
    ) -> Result<MemberListPage, HostError> {
        let mut params = json!({ "group_id": group_id, "no_cache": true });
        if let Some(token) = next_token {
            params["next_token"] = json!(token);
        }
        let data = self.call("get_group_member_list", params).await?;
        MemberListPage::from_data(data)
    }

    async fn get_group_member_info(&self, group_id: i64, user_id: i64) -> Result<(), HostError> {
        self.call(
            "get_group_member_info",
            json!({ "group_id": group_id, "user_id": user_id, "no_cache": true }),
        )
        .await?;
        Ok(())
    }

    async fn get_group_list(&self) -> Result<Vec<GroupInfo>, HostError> {
        let data = self.call("get_group_list", json!({ "no_cache": true })).await?;
        serde_json::from_value(data).map_err(|e| HostError::Malformed {
            action: "get_group_list",
            detail: e.to_string(),
        })
    }

    async fn upload_file(
        &self,
        target: ReplyTarget,
        bytes: &[u8],
        name: &str,
    ) -> Result<(), HostError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let file = format!("base64://{}", encoded);
        match target {
            ReplyTarget::Group(group_id) => {
                self.call(
                    "upload_group_file",
                    json!({ "group_id": group_id, "file": file, "name": name }),
                )
                .await?;
            }
            ReplyTarget::Private(user_id) => {
                self.call(
                    "upload_private_file",
                    json!({ "user_id": user_id, "file": file, "name": name }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn send_text(&self, target: ReplyTarget, text: &str) -> Result<(), HostError> {
        match target {
            ReplyTarget::Group(group_id) => {
                self.call(
                    "send_group_msg",
                    json!({ "group_id": group_id, "message": text }),
                )
                .await?;
            }
            ReplyTarget::Private(user_id) => {
                self.call(
                    "send_private_msg",
                    json!({ "user_id": user_id, "message": text }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn login_id(&self) -> Result<i64, HostError> {
        let data = self.call("get_login_info", json!({})).await?;
        data.get("user_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| HostError::Malformed {
                action: "get_login_info",
                detail: format!("no user_id in {}", data),
            })
    }
}
