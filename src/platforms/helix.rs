use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::platforms::AccountDirectory;

const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
/// Helix accepts at most this many logins per users lookup
const MAX_LOGINS_PER_REQUEST: usize = 100;

/// Credentials for the Twitch Helix API
#[derive(Debug, Clone)]
pub struct HelixConfig {
    pub client_id: String,
    /// Bearer token, without the IRC `oauth:` prefix
    pub access_token: String,
    /// One of Helix's block reasons: spam, harassment, other
    pub block_reason: String,
    pub base_url: String,
}

impl HelixConfig {
    /// Build from TWITCH_CLIENT_ID and the chat token. Returns None when no
    /// client id is set.
    pub fn from_env(oauth_token: &str, block_reason: &str) -> Option<Self> {
        let client_id = env::var("TWITCH_CLIENT_ID").ok()?;
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            access_token: bearer_token(oauth_token),
            block_reason: block_reason.to_string(),
            base_url: HELIX_BASE_URL.to_string(),
        })
    }
}

/// Strip the IRC `oauth:` prefix
pub fn bearer_token(oauth_token: &str) -> String {
    oauth_token
        .trim()
        .strip_prefix("oauth:")
        .unwrap_or(oauth_token.trim())
        .to_string()
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct HelixUsersResponse {
    data: Vec<HelixUser>,
}

impl HelixUsersResponse {
    fn into_id_map(self) -> HashMap<String, String> {
        self.data
            .into_iter()
            .map(|user| (user.login.to_lowercase(), user.id))
            .collect()
    }
}

/// Blocks accounts through the Helix users endpoints
pub struct HelixClient {
    config: HelixConfig,
    http_client: reqwest::Client,
}

impl HelixClient {
    pub fn new(config: HelixConfig) -> Self {
        info!("Helix account blocking enabled for client {}", config.client_id);
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Client-Id", &self.config.client_id)
            .bearer_auth(&self.config.access_token)
    }
}

#[async_trait]
impl AccountDirectory for HelixClient {
    async fn lookup_user_ids(&self, names: &[String]) -> Result<HashMap<String, String>> {
        let url = format!("{}/users", self.config.base_url);
        let mut ids = HashMap::new();

        for chunk in names.chunks(MAX_LOGINS_PER_REQUEST) {
            let query: Vec<(&str, &str)> = chunk.iter().map(|name| ("login", name.as_str())).collect();

            let response = self
                .authorized(self.http_client.get(&url))
                .query(&query)
                .send()
                .await
                .context("Failed to query Helix users")?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                return Err(anyhow::anyhow!("Helix users lookup failed {}: {}", status, error_text));
            }

            let users: HelixUsersResponse = response
                .json()
                .await
                .context("Failed to parse Helix users response")?;
            ids.extend(users.into_id_map());
        }

        debug!("Resolved {} of {} account ids", ids.len(), names.len());
        Ok(ids)
    }

    async fn block_user(&self, user_id: &str) -> Result<()> {
        let url = format!("{}/users/blocks", self.config.base_url);

        let response = self
            .authorized(self.http_client.put(&url))
            .query(&[
                ("target_user_id", user_id),
                ("source_context", "chat"),
                ("reason", self.config.block_reason.as_str()),
            ])
            .send()
            .await
            .context("Failed to call Helix block endpoint")?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            debug!("Blocked user id {}", user_id);
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            Err(anyhow::anyhow!("Helix block of {} failed {}: {}", user_id, status, error_text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_strips_irc_prefix() {
        assert_eq!(bearer_token("oauth:abc"), "abc");
        assert_eq!(bearer_token(" abc "), "abc");
    }

    #[test]
    fn test_users_response_maps_login_to_id() {
        let body = r#"{"data":[
            {"id":"141981764","login":"Bot_42","display_name":"Bot_42","type":""},
            {"id":"12826","login":"spammer1","display_name":"spammer1","type":""}
        ]}"#;
        let parsed: HelixUsersResponse = serde_json::from_str(body).unwrap();
        let ids = parsed.into_id_map();

        assert_eq!(ids.get("bot_42").map(String::as_str), Some("141981764"));
        assert_eq!(ids.get("spammer1").map(String::as_str), Some("12826"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_an_error() {
        let client = HelixClient::new(HelixConfig {
            client_id: "cid".to_string(),
            access_token: "token".to_string(),
            block_reason: "spam".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        });

        assert!(client.block_user("1").await.is_err());
        assert!(client.lookup_user_ids(&["a".to_string()]).await.is_err());
    }
}
