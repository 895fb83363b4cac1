//! Discord REST adapter
//!
//! Implements `MembershipProvider` and `RoleMutator` over the HTTP API only.
//! No gateway connection is opened. Requests are paced from the rate-limit
//! headers of earlier responses; a request that still gets a 429 is reported
//! as an error and left for the next tick rather than retried here.

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::pacing::RequestPacer;
use super::{
    Member, MemberCursor, MemberId, MemberPage, MemberProfile, MembershipProvider, RoleId,
    RoleMutator, Scope, ScopeId,
};
use crate::types::{Result, WardenError};

/// Largest page the guild member list endpoint accepts
pub const MEMBER_PAGE_LIMIT: usize = 1000;
const GUILD_PAGE_LIMIT: usize = 200;
const AUDIT_LOG_REASON: &str = "Server tag sync";

/// Connection settings for the Discord REST API
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Base URL including the API version
    pub api_url: String,
    /// Bot token (without the `Bot ` prefix)
    pub token: String,
    pub request_timeout: Duration,
    pub member_page_limit: usize,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_url: "https://discord.com/api/v10".to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(30),
            member_page_limit: MEMBER_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GuildDto {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RoleDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PrimaryGuildDto {
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: String,
    username: String,
    #[serde(default)]
    bot: bool,
    #[serde(default)]
    primary_guild: Option<PrimaryGuildDto>,
}

#[derive(Debug, Deserialize)]
struct GuildMemberDto {
    #[serde(default)]
    user: Option<UserDto>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Authenticated identity of the bot token
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: MemberId,
    pub username: String,
}

/// HTTP client for the subset of the Discord API the warden needs
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    config: DiscordConfig,
    pacer: Arc<RequestPacer>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(WardenError::Configuration(
                "Discord token is required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (https://github.com/ethosengine/tag-warden, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            pacer: Arc::new(RequestPacer::new()),
        })
    }

    /// Verify the token. Used by the host to open the readiness gate.
    pub async fn current_user(&self) -> Result<CurrentUser> {
        let user: UserDto = self.get_json("/users/@me", &[]).await?;
        Ok(CurrentUser {
            id: MemberId(parse_snowflake(&user.id)?),
            username: user.username,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Wait out any rate-limit pause, send, then record the new bucket state
    async fn send(&self, path: &str, builder: reqwest::RequestBuilder) -> reqwest::Result<Response> {
        self.pacer.wait().await;
        let response = builder
            .header(header::AUTHORIZATION, format!("Bot {}", self.config.token))
            .send()
            .await?;
        self.pacer
            .observe(path, response.status(), response.headers())
            .await;
        Ok(response)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let response = self
            .send(path, self.http.get(self.url(path)).query(query))
            .await?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = ensure_success(path, self.get(path, query).await?)?;
        Ok(response.json::<T>().await?)
    }

    async fn change_role(
        &self,
        method: reqwest::Method,
        scope: &Scope,
        member: MemberId,
        role: RoleId,
    ) -> Result<()> {
        let path = format!("/guilds/{}/members/{}/roles/{}", scope.id, member, role);
        let builder = self
            .http
            .request(method, self.url(&path))
            .header("X-Audit-Log-Reason", AUDIT_LOG_REASON);
        let response = self
            .send(&path, builder)
            .await
            .map_err(|e| WardenError::Mutation {
                member: member.to_string(),
                reason: e.to_string(),
            })?;

        ensure_success(&path, response)
            .map(|_| ())
            .map_err(|e| WardenError::Mutation {
                member: member.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MembershipProvider for DiscordClient {
    async fn list_scopes(&self) -> Result<Vec<Scope>> {
        let mut scopes = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("limit", GUILD_PAGE_LIMIT.to_string())];
            if let Some(ref after) = after {
                query.push(("after", after.clone()));
            }

            let guilds: Vec<GuildDto> = self.get_json("/users/@me/guilds", &query).await?;
            let count = guilds.len();
            after = guilds.last().map(|g| g.id.clone());

            for guild in guilds {
                scopes.push(Scope::new(ScopeId(parse_snowflake(&guild.id)?), guild.name));
            }

            if count < GUILD_PAGE_LIMIT {
                break;
            }
        }

        debug!(count = scopes.len(), "Listed guilds");
        Ok(scopes)
    }

    async fn scope_has_role(&self, scope: &Scope, role: RoleId) -> Result<bool> {
        let path = format!("/guilds/{}/roles", scope.id);
        let response = self.get(&path, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WardenError::ScopeNotFound(scope.id.to_string()));
        }

        let roles: Vec<RoleDto> = ensure_success(&path, response)?.json().await?;
        let wanted = role.to_string();
        Ok(roles.iter().any(|r| r.id == wanted))
    }

    async fn fetch_members_page(
        &self,
        scope: &Scope,
        cursor: Option<&MemberCursor>,
    ) -> Result<MemberPage> {
        let path = format!("/guilds/{}/members", scope.id);
        let limit = self.config.member_page_limit.clamp(1, MEMBER_PAGE_LIMIT);
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("after", cursor.0.clone()));
        }

        let response = self.get(&path, &query).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WardenError::ScopeNotFound(scope.id.to_string()));
        }

        let members: Vec<GuildMemberDto> = ensure_success(&path, response)?.json().await?;
        page_from_members(members, limit)
    }

    async fn fetch_member_profile(&self, member: MemberId) -> Result<MemberProfile> {
        let path = format!("/users/{}", member);
        let lookup_error = |reason: String| WardenError::MemberLookup {
            member: member.to_string(),
            reason,
        };

        let response = self
            .get(&path, &[])
            .await
            .map_err(|e| lookup_error(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WardenError::MemberNotFound(member.to_string()));
        }

        let user: UserDto = ensure_success(&path, response)
            .map_err(|e| lookup_error(e.to_string()))?
            .json()
            .await
            .map_err(|e| lookup_error(e.to_string()))?;

        Ok(profile_from_user(user))
    }
}

#[async_trait]
impl RoleMutator for DiscordClient {
    async fn grant_role(&self, scope: &Scope, member: MemberId, role: RoleId) -> Result<()> {
        self.change_role(reqwest::Method::PUT, scope, member, role).await
    }

    async fn revoke_role(&self, scope: &Scope, member: MemberId, role: RoleId) -> Result<()> {
        self.change_role(reqwest::Method::DELETE, scope, member, role)
            .await
    }
}

/// Turn non-2xx responses into `Http` errors, keeping any rate-limit hint
fn ensure_success(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        return Err(WardenError::Http(format!(
            "rate limited on {} (retry after {}s)",
            path, retry_after
        )));
    }

    Err(WardenError::Http(format!("{} returned {}", path, status)))
}

fn parse_snowflake(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| WardenError::Http(format!("Invalid snowflake id: {}", raw)))
}

fn member_from_dto(dto: GuildMemberDto) -> Result<Option<Member>> {
    let Some(user) = dto.user else {
        return Ok(None);
    };

    let mut member = Member::new(parse_snowflake(&user.id)?, user.username);
    member.is_bot = user.bot;
    for role in &dto.roles {
        member.roles.insert(RoleId(parse_snowflake(role)?));
    }
    Ok(Some(member))
}

/// A full page means there may be more; the cursor is the last user id
fn page_from_members(dtos: Vec<GuildMemberDto>, limit: usize) -> Result<MemberPage> {
    let full = dtos.len() >= limit;

    let mut members = Vec::with_capacity(dtos.len());
    for dto in dtos {
        if let Some(member) = member_from_dto(dto)? {
            members.push(member);
        }
    }

    let next = if full {
        members.last().map(|m| MemberCursor(m.id.to_string()))
    } else {
        None
    };

    Ok(MemberPage { members, next })
}

fn profile_from_user(user: UserDto) -> MemberProfile {
    MemberProfile {
        tag: user.primary_guild.and_then(|g| g.tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members_json(ids: &[u64]) -> Vec<GuildMemberDto> {
        let raw: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "user": { "id": id.to_string(), "username": format!("user{id}") },
                    "roles": ["42"],
                })
            })
            .collect();
        serde_json::from_value(serde_json::Value::Array(raw)).unwrap()
    }

    #[test]
    fn test_full_page_has_cursor() {
        let page = page_from_members(members_json(&[10, 11, 12]), 3).unwrap();
        assert_eq!(page.members.len(), 3);
        assert_eq!(page.next, Some(MemberCursor("12".to_string())));
        assert!(page.members[0].has_role(RoleId(42)));
    }

    #[test]
    fn test_short_page_is_last() {
        let page = page_from_members(members_json(&[10, 11]), 3).unwrap();
        assert!(page.next.is_none());
    }

    #[test]
    fn test_bot_flag_and_missing_user() {
        let dtos: Vec<GuildMemberDto> = serde_json::from_str(
            r#"[
                {"user": {"id": "5", "username": "helper", "bot": true}, "roles": []},
                {"roles": ["1"]}
            ]"#,
        )
        .unwrap();

        let page = page_from_members(dtos, 1000).unwrap();
        assert_eq!(page.members.len(), 1);
        assert!(page.members[0].is_bot);
    }

    #[test]
    fn test_profile_tag_extraction() {
        let tagged: UserDto = serde_json::from_str(
            r#"{"id": "1", "username": "a", "primary_guild": {"identity_enabled": true, "tag": "WARD"}}"#,
        )
        .unwrap();
        assert_eq!(profile_from_user(tagged).tag.as_deref(), Some("WARD"));

        let untagged: UserDto =
            serde_json::from_str(r#"{"id": "2", "username": "b", "primary_guild": null}"#).unwrap();
        assert_eq!(profile_from_user(untagged).tag, None);

        let absent: UserDto = serde_json::from_str(r#"{"id": "3", "username": "c"}"#).unwrap();
        assert_eq!(profile_from_user(absent), MemberProfile::default());
    }

    #[test]
    fn test_invalid_snowflake() {
        assert!(parse_snowflake("abc").is_err());
        assert_eq!(parse_snowflake("123").unwrap(), 123);
    }

    #[test]
    fn test_empty_token_rejected() {
        let result = DiscordClient::new(DiscordConfig::default());
        assert!(matches!(result, Err(WardenError::Configuration(_))));
    }
}
