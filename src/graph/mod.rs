pub mod auth;
pub mod claims;
pub mod exchange_online;

use crate::config::ValidatedConfig;
use crate::connector::ServiceConnector;
use crate::credentials::AuthStrategy;
use crate::error::{PreflightError, Result};
use crate::session::{ServiceKind, SessionInfo};
use async_trait::async_trait;
use auth::{GRAPH_SCOPE, TokenAuthority, bounded};
use claims::TokenClaims;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8000;
const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

/// Calculate backoff with jitter for exponential backoff
fn calculate_backoff_with_jitter(attempt: u32) -> Duration {
    let base_backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let capped_backoff = base_backoff.min(MAX_BACKOFF_MS);

    let jitter_range = (capped_backoff as f64 * JITTER_FACTOR) as u64;
    let jitter = if jitter_range > 0 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::time::SystemTime::now().hash(&mut hasher);
        (hasher.finish() % (jitter_range * 2)) as i64 - jitter_range as i64
    } else {
        0
    };

    let final_backoff = (capped_backoff as i64 + jitter).max(100) as u64;
    Duration::from_millis(final_backoff)
}

/// Build the shared HTTP client with the per-request timeout applied.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("m365-preflight/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Graph API client with retry support
pub struct GraphClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    pub fn new(client: Client, base_url: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// GET with retry on 429 and 5xx responses
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                        && attempt < MAX_RETRIES - 1
                    {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(1);

                        warn!(retry_after, attempt = attempt + 1, "Graph rate limited");
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }

                    if status.is_server_error() && attempt < MAX_RETRIES - 1 {
                        let wait_time = calculate_backoff_with_jitter(attempt);
                        warn!(
                            %status,
                            ?wait_time,
                            attempt = attempt + 1,
                            "Graph server error, retrying"
                        );
                        tokio::time::sleep(wait_time).await;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = resp.text().await.unwrap_or_default();
                        return Err(PreflightError::ApiError {
                            status: status.as_u16(),
                            message: crate::error::enhance_graph_error(&error_text),
                        });
                    }

                    return Ok(resp.json::<T>().await?);
                }
                Err(e) => {
                    if attempt < MAX_RETRIES - 1 && !e.is_timeout() {
                        let wait_time = calculate_backoff_with_jitter(attempt);
                        debug!(error = %e, ?wait_time, "connection error, retrying");
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_error.map(|e| e.into()).unwrap_or_else(|| {
            PreflightError::RemoteCallFailed(format!(
                "GET {} failed after {} retries",
                url, MAX_RETRIES
            ))
        }))
    }
}

#[derive(Debug, Deserialize)]
struct Organization {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganizationList {
    #[serde(default)]
    value: Vec<Organization>,
}

/// Directory service connector backed by Microsoft Graph.
pub struct GraphConnector {
    authority: TokenAuthority,
    base_url: String,
    http: Client,
}

impl GraphConnector {
    pub fn new(config: &ValidatedConfig) -> Result<Self> {
        Ok(Self {
            authority: TokenAuthority::new(config),
            base_url: config.endpoints.graph_base_url.clone(),
            http: http_client(config.timeout)?,
        })
    }
}

/// Session fields read from a token's claims.
pub(crate) struct SessionContext {
    pub tenant_id: String,
    pub client_id: Option<String>,
    pub granted_scopes: Option<Vec<String>>,
    pub warnings: Vec<String>,
}

/// "Get current session context": tenant, client and granted permissions.
pub(crate) fn session_context(
    service: ServiceKind,
    authority: &TokenAuthority,
    access_token: &str,
) -> SessionContext {
    match TokenClaims::decode(access_token) {
        Ok(claims) => {
            let mut warnings = Vec::new();
            let tenant_id = claims
                .tid
                .clone()
                .unwrap_or_else(|| authority.tenant_id().to_string());

            // Tenants configured by domain name cannot be compared to the GUID claim.
            let configured = authority.tenant_id();
            if !configured.contains('.') && !tenant_id.eq_ignore_ascii_case(configured) {
                warnings.push(format!(
                    "Token was issued by tenant {} but {} is configured",
                    tenant_id, configured
                ));
            }

            SessionContext {
                tenant_id,
                client_id: claims.client_id().map(str::to_string),
                granted_scopes: Some(claims.granted_scopes()),
                warnings,
            }
        }
        Err(e) => {
            warn!(%service, error = %e, "could not read token claims");
            SessionContext {
                tenant_id: authority.tenant_id().to_string(),
                client_id: Some(authority.client_id().to_string()),
                granted_scopes: None,
                warnings: vec![e.to_string()],
            }
        }
    }
}

#[async_trait]
impl ServiceConnector for GraphConnector {
    fn service(&self) -> ServiceKind {
        ServiceKind::Directory
    }

    async fn connect(&self, strategy: &AuthStrategy) -> Result<SessionInfo> {
        let service = self.service();
        let grant = self.authority.acquire(service, strategy, GRAPH_SCOPE).await?;
        let context = session_context(service, &self.authority, grant.token.secret());

        let mut session = SessionInfo {
            service,
            tenant_id: context.tenant_id,
            client_id: context.client_id,
            granted_scopes: context.granted_scopes,
            method: grant.method,
            expires_at: grant.expires_at,
            organization: None,
            display_name: None,
            warnings: context.warnings,
            access_token: grant.token,
        };

        let client = GraphClient::new(
            self.http.clone(),
            &self.base_url,
            session.access_token.secret(),
        );
        let lookup = client.get::<OrganizationList>("organization?$select=id,displayName");

        match bounded(service, self.authority.timeout(), lookup).await {
            Ok(list) => {
                session.display_name = list.value.into_iter().find_map(|o| o.display_name);
            }
            Err(PreflightError::ApiError {
                status: status @ (401 | 403),
                message,
            }) => {
                warn!(status, "organization lookup denied");
                session
                    .warnings
                    .push(format!("Organization lookup denied (HTTP {}): {}", status, message));
            }
            Err(e) => return Err(e),
        }

        info!(%service, method = %session.method, tenant = %session.tenant_id, "connected");
        Ok(session)
    }

    async fn disconnect(&self, session: SessionInfo) -> Result<()> {
        info!(service = %session.service, tenant = %session.tenant_id, "session closed");
        drop(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use claims::tests::fake_jwt;

    fn authority(tenant: &str) -> TokenAuthority {
        let config = serde_json::from_value::<RawConfig>(serde_json::json!({
            "tenantId": tenant,
            "clientId": "c1"
        }))
        .unwrap()
        .validate(std::path::Path::new("/cfg"))
        .unwrap();
        TokenAuthority::new(&config)
    }

    #[test]
    fn test_session_context_flags_foreign_tenant() {
        let token = fake_jwt(serde_json::json!({ "tid": "other", "roles": ["User.Read.All"] }));
        let context = session_context(ServiceKind::Directory, &authority("mine"), &token);

        assert_eq!(context.tenant_id, "other");
        assert_eq!(context.granted_scopes, Some(vec!["User.Read.All".to_string()]));
        assert_eq!(context.warnings.len(), 1);

        let context = session_context(ServiceKind::Directory, &authority("contoso.com"), &token);
        assert!(context.warnings.is_empty());
    }

    #[test]
    fn test_session_context_opaque_token() {
        let context = session_context(ServiceKind::MailAdmin, &authority("t1"), "opaque");
        assert_eq!(context.tenant_id, "t1");
        assert_eq!(context.client_id.as_deref(), Some("c1"));
        assert!(context.granted_scopes.is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 0..8 {
            let wait = calculate_backoff_with_jitter(attempt);
            assert!(wait >= Duration::from_millis(100));
            assert!(wait <= Duration::from_millis((MAX_BACKOFF_MS as f64 * 1.3) as u64));
        }
    }
}
