use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::LicenseConfig;

/// Reject reasons surfaced to the applicant. The licensing service replies in
/// Chinese; we keep the exact wording it uses.
pub const REASON_CODE_USED: &str = "卡密已使用";
pub const REASON_CODE_INVALID: &str = "卡密错误";
pub const REASON_SERVICE_DOWN: &str = "卡密验证系统暂时不可用，请稍后再试";

/// Outcome of a `check_key` lookup. The remote service is the only authority
/// on code state; nothing here is cached or persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    AlreadyUsed,
    Invalid { message: String },
    /// Network failure, timeout, or a body that is not JSON.
    Unavailable,
}

/// The licensing-service operations the join-request handler needs. Split out
/// as a trait so the handler can be exercised against a scripted fake.
#[async_trait]
pub trait CodeAuthority: Send + Sync {
    /// Never fails: every transport problem folds into `Unavailable`.
    async fn check(&self, group_id: i64, code: &str) -> Validation;

    /// Best-effort; the result is logged and discarded.
    async fn mark_used(&self, group_id: i64, code: &str, used_by: i64);
}

/// The roster ingestion side of the licensing service, split out so batch
/// commands can run against a scripted fake.
#[async_trait]
pub trait MemberSink: Send + Sync {
    /// Err carries the human-readable failure text for the admin reply.
    async fn push_members(&self, bot_qq: i64, members: &[PushMember]) -> Result<(), String>;
}

#[derive(Serialize)]
struct PushBody<'a> {
    bot_qq: i64,
    members: &'a [PushMember],
}

/// The slice of a member record the ingestion endpoint accepts.
#[derive(Debug, Clone, Serialize)]
pub struct PushMember {
    pub group_id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub card: String,
}

pub struct LicenseClient {
    client: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl LicenseClient {
    pub fn new(cfg: &LicenseConfig) -> anyhow::Result<LicenseClient> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs()))
            .build()?;
        Ok(LicenseClient {
            client,
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            retries: cfg.retries(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// GET with bounded retries on transport errors and 5xx statuses,
    /// exponential backoff starting at one second. This is the only
    /// resilience mechanism in the system.
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt = 0u32;
        loop {
            let result = self.client.get(url).query(query).send().await;
            let retryable = match &result {
                Ok(resp) => is_retryable_status(resp.status()),
                Err(e) => !e.is_builder(),
            };
            if !retryable || attempt >= self.retries {
                return result;
            }
            let backoff = Duration::from_secs(1u64 << attempt.min(6));
            warn!(
                "license api transient failure ({}), retry {}/{} in {:?}",
                url, attempt + 1, self.retries, backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

#[async_trait]
impl MemberSink for LicenseClient {
    /// Success requires both an HTTP 2xx and `status == "success"` in the
    /// body; any other outcome comes back as the error text for the reply.
    async fn push_members(&self, bot_qq: i64, members: &[PushMember]) -> Result<(), String> {
        let resp = self
            .client
            .post(self.url("push_group_members.php"))
            .json(&PushBody { bot_qq, members })
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let resp = resp.error_for_status().map_err(|e| e.to_string())?;
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        if body.get("status").and_then(Value::as_str) == Some("success") {
            Ok(())
        } else {
            Err(body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("未知错误")
                .to_string())
        }
    }
}

/// Maps a well-formed `check_key` body to a validation outcome. A response is
/// valid only when the service explicitly says so on both fields; anything
/// else is a rejection with the service-supplied message.
pub fn parse_check_response(body: &Value) -> Validation {
    let status = body.get("status").and_then(Value::as_str);
    let usable = body.get("usable").and_then(Value::as_i64);
    if status == Some("success") && usable == Some(1) {
        return Validation::Valid;
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(REASON_CODE_INVALID);
    if message == REASON_CODE_USED {
        Validation::AlreadyUsed
    } else {
        Validation::Invalid {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl CodeAuthority for LicenseClient {
    async fn check(&self, group_id: i64, code: &str) -> Validation {
        let query = [
            ("group_id", group_id.to_string()),
            ("key", code.to_string()),
        ];
        let resp = match self.get_with_retry(&self.url("check_key.php"), &query).await {
            Ok(r) => r,
            Err(e) => {
                warn!("check_key request failed: group={} err={}", group_id, e);
                return Validation::Unavailable;
            }
        };
        match resp.json::<Value>().await {
            Ok(body) => {
                info!("check_key response: group={} body={}", group_id, body);
                parse_check_response(&body)
            }
            Err(e) => {
                warn!("check_key malformed response: group={} err={}", group_id, e);
                Validation::Unavailable
            }
        }
    }

    async fn mark_used(&self, group_id: i64, code: &str, used_by: i64) {
        let query = [
            ("group_id", group_id.to_string()),
            ("key", code.to_string()),
            ("used_by", used_by.to_string()),
        ];
        match self.get_with_retry(&self.url("mark_key.php"), &query).await {
            Ok(resp) => {
                let text = resp.text().await.unwrap_or_default();
                info!(
                    "mark_key response: group={} used_by={} body={}",
                    group_id, used_by, text
                );
            }
            Err(e) => {
                warn!(
                    "mark_key failed (approval already issued): group={} used_by={} err={}",
                    group_id, used_by, e
                );
            }
        }
    }
}
