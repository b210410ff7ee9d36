//! Mattermost REST API client.
//!
//! Implements [`DirectoryClient`] over the Mattermost v4 API with session
//! token authentication obtained from `POST /api/v4/users/login`.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::MattermostConfig;
use crate::error::ChannelAdapterError;
use crate::traits::DirectoryClient;
use crate::types::{
    Channel, ChannelMember, ChannelSpec, OutboundPost, Post, ServerInfo, Team, User,
};

/// Page size used when listing a team's channels.
const CHANNEL_PAGE_SIZE: usize = 200;

/// Mattermost API client.
pub struct MattermostApiClient {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    channel_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    root_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct AddTeamMemberRequest<'a> {
    team_id: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AddChannelMemberRequest<'a> {
    channel_id: &'a str,
    user_id: &'a str,
    roles: &'a str,
}

#[derive(Debug, Serialize)]
struct PatchUserRequest<'a> {
    username: &'a str,
    first_name: &'a str,
    last_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default)]
    status: String,
    #[serde(default, rename = "Version")]
    version: Option<String>,
}

impl MattermostApiClient {
    pub fn new(config: &MattermostConfig) -> Result<Self, ChannelAdapterError> {
        let base_url = config.api_base_url()?;
        if config.request_timeout_secs == 0 {
            return Err(ChannelAdapterError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChannelAdapterError::Internal(format!("HTTP client init: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ChannelAdapterError> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| ChannelAdapterError::Connection(format!("{} failed: {}", what, e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(call = what, status, "Mattermost call rejected");
            return Err(ChannelAdapterError::from_status(status, &body));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, ChannelAdapterError> {
        let resp = self.send(req, what).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ChannelAdapterError::ParseError(format!("{} parse: {}", what, e)))
    }
}

#[async_trait]
impl DirectoryClient for MattermostApiClient {
    async fn ping(&self) -> Result<ServerInfo, ChannelAdapterError> {
        let resp = self
            .send(self.client.get(self.url("/system/ping")), "system/ping")
            .await?;

        let header_version = resp
            .headers()
            .get("X-Version-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: PingResponse = resp.json().await.map_err(|e| {
            ChannelAdapterError::ParseError(format!("system/ping parse: {}", e))
        })?;
        if !body.status.is_empty() && !body.status.eq_ignore_ascii_case("OK") {
            return Err(ChannelAdapterError::Connection(format!(
                "server reported status '{}'",
                body.status
            )));
        }

        Ok(ServerInfo {
            version: body.version.or(header_version),
            checked_at: chrono::Utc::now(),
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<User, ChannelAdapterError> {
        let body = LoginRequest {
            login_id: email,
            password,
        };
        let resp = self
            .client
            .post(self.url("/users/login"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelAdapterError::Connection(format!("users/login failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let failure = crate::error::ApiFailure::from_body(status, &body);
            return Err(match status {
                400 | 401 | 403 => ChannelAdapterError::Auth(failure),
                _ => ChannelAdapterError::from_status(status, &body),
            });
        }

        let token = resp
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ChannelAdapterError::ParseError("login response carried no Token header".into())
            })?;
        let user: User = resp
            .json()
            .await
            .map_err(|e| ChannelAdapterError::ParseError(format!("users/login parse: {}", e)))?;

        match self.token.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(_) => {
                return Err(ChannelAdapterError::Internal(
                    "session token lock poisoned".to_string(),
                ))
            }
        }

        tracing::debug!(user_id = %user.id, "Mattermost session established");
        Ok(user)
    }

    fn auth_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    async fn get_team_by_name(&self, name: &str) -> Result<Team, ChannelAdapterError> {
        let url = self.url(&format!("/teams/name/{}", name));
        self.send_json(self.client.get(url), "teams/name").await
    }

    async fn get_channel_by_name(
        &self,
        name: &str,
        team_id: &str,
    ) -> Result<Channel, ChannelAdapterError> {
        let url = self.url(&format!("/teams/{}/channels/name/{}", team_id, name));
        self.send_json(self.client.get(url), "channels/name").await
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<Channel, ChannelAdapterError> {
        let req = self.client.post(self.url("/channels")).json(spec);
        self.send_json(req, "channels/create").await
    }

    async fn create_post(&self, post: &OutboundPost) -> Result<Post, ChannelAdapterError> {
        let body = CreatePostRequest {
            channel_id: &post.channel_id,
            message: &post.message,
            root_id: post.root_id.as_deref(),
        };
        let req = self.client.post(self.url("/posts")).json(&body);
        self.send_json(req, "posts/create").await
    }

    async fn add_team_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<(), ChannelAdapterError> {
        let body = AddTeamMemberRequest { team_id, user_id };
        let req = self
            .client
            .post(self.url(&format!("/teams/{}/members", team_id)))
            .json(&body);
        self.send(req, "teams/members").await?;
        Ok(())
    }

    async fn add_channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
        role: &str,
    ) -> Result<ChannelMember, ChannelAdapterError> {
        let body = AddChannelMemberRequest {
            channel_id,
            user_id,
            roles: role,
        };
        let req = self
            .client
            .post(self.url(&format!("/channels/{}/members", channel_id)))
            .json(&body);
        self.send_json(req, "channels/members").await
    }

    async fn list_public_channels(
        &self,
        team_id: &str,
    ) -> Result<Vec<Channel>, ChannelAdapterError> {
        let mut channels = Vec::new();
        let mut page = 0usize;
        loop {
            let url = self.url(&format!(
                "/teams/{}/channels?page={}&per_page={}",
                team_id, page, CHANNEL_PAGE_SIZE
            ));
            let batch: Vec<Channel> = self.send_json(self.client.get(url), "teams/channels").await?;
            let last = batch.len() < CHANNEL_PAGE_SIZE;
            channels.extend(batch.into_iter().filter(Channel::is_public));
            if last {
                break;
            }
            page += 1;
        }
        Ok(channels)
    }

    async fn list_channels_for_user(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Vec<Channel>, ChannelAdapterError> {
        let url = self.url(&format!("/users/{}/teams/{}/channels", user_id, team_id));
        self.send_json(self.client.get(url), "users/teams/channels")
            .await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, ChannelAdapterError> {
        let url = self.url(&format!("/users/username/{}", username));
        self.send_json(self.client.get(url), "users/username").await
    }

    async fn update_user(&self, user: &User) -> Result<User, ChannelAdapterError> {
        let body = PatchUserRequest {
            username: &user.username,
            first_name: &user.first_name,
            last_name: &user.last_name,
        };
        let req = self
            .client
            .put(self.url(&format!("/users/{}/patch", user.id)))
            .json(&body);
        self.send_json(req, "users/patch").await
    }
}

/// Markdown line announcing a bot lifecycle transition.
pub fn format_lifecycle_notice(bot_name: &str, state: &str) -> String {
    format!("_{} has **{}** running_", bot_name, state)
}
