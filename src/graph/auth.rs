use crate::config::ValidatedConfig;
use crate::credentials::certificate::SigningCertificate;
use crate::credentials::{AuthStrategy, ServiceCredential};
use crate::error::{AuthRejection, PreflightError, Result};
use crate::session::{AuthMethod, ServiceKind};
use chrono::{DateTime, Utc};
use oauth2::{
    AccessToken, AuthType, AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl,
    ErrorResponseType, RequestTokenError, Scope, StandardDeviceAuthorizationResponse,
    StandardErrorResponse, TokenResponse, TokenUrl, basic::BasicClient,
    reqwest::async_http_client,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const EXCHANGE_SCOPE: &str = "https://outlook.office365.com/.default";

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// An access token and how it was obtained.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub token: AccessToken,
    pub expires_at: DateTime<Utc>,
    pub method: AuthMethod,
}

/// Acquires tokens from the Entra ID token endpoint for one tenant and app.
#[derive(Debug, Clone)]
pub struct TokenAuthority {
    authority_host: String,
    tenant_id: String,
    client_id: String,
    timeout: Duration,
    interactive_timeout: Duration,
}

impl TokenAuthority {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self {
            authority_host: config.endpoints.authority_host.clone(),
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            timeout: config.timeout,
            interactive_timeout: config.interactive_timeout,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.authority_host, self.tenant_id, leaf
        )
    }

    pub fn token_url(&self) -> String {
        self.endpoint("token")
    }

    fn client(&self, secret: Option<ClientSecret>) -> Result<BasicClient> {
        let auth_url = AuthUrl::new(self.endpoint("authorize"))
            .map_err(|e| PreflightError::ConfigError(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(self.token_url())
            .map_err(|e| PreflightError::ConfigError(format!("Invalid token URL: {}", e)))?;

        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            secret,
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody))
    }

    /// Acquire a token for `scope` using one strategy, bounded by the timeout.
    pub async fn acquire(
        &self,
        service: ServiceKind,
        strategy: &AuthStrategy,
        scope: &str,
    ) -> Result<AccessGrant> {
        debug!(%service, method = %strategy.method(), "requesting token");

        match strategy {
            AuthStrategy::Credential(ServiceCredential::ClientSecret { secret, .. }) => {
                let fut = self.client_secret(service, secret, scope);
                bounded(service, self.timeout, fut).await
            }
            AuthStrategy::Credential(ServiceCredential::CertificateThumbprint {
                thumbprint,
                store_path,
            }) => {
                let cert = SigningCertificate::find_in_store(store_path, thumbprint)?;
                let fut =
                    self.certificate(service, &cert, AuthMethod::CertificateThumbprint, scope);
                bounded(service, self.timeout, fut).await
            }
            AuthStrategy::Credential(ServiceCredential::CertificateFile { path, password }) => {
                let cert = SigningCertificate::load_file(path, password.as_deref())?;
                let fut = self.certificate(service, &cert, AuthMethod::CertificateFile, scope);
                bounded(service, self.timeout, fut).await
            }
            AuthStrategy::DeviceCode => {
                let fut = self.device_code(service, scope);
                bounded(service, self.interactive_timeout, fut).await
            }
        }
    }

    async fn client_secret(
        &self,
        service: ServiceKind,
        secret: &str,
        scope: &str,
    ) -> Result<AccessGrant> {
        let client = self.client(Some(ClientSecret::new(secret.to_string())))?;

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| token_error(service, e))?;

        Ok(grant(token.access_token(), token.expires_in(), AuthMethod::ClientSecret))
    }

    async fn certificate(
        &self,
        service: ServiceKind,
        cert: &SigningCertificate,
        method: AuthMethod,
        scope: &str,
    ) -> Result<AccessGrant> {
        let assertion = cert.client_assertion(&self.client_id, &self.token_url())?;
        let client = self.client(None)?;

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_string()))
            .add_extra_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
            .add_extra_param("client_assertion", assertion)
            .request_async(async_http_client)
            .await
            .map_err(|e| token_error(service, e))?;

        Ok(grant(token.access_token(), token.expires_in(), method))
    }

    async fn device_code(&self, service: ServiceKind, scope: &str) -> Result<AccessGrant> {
        let device_auth_url = DeviceAuthorizationUrl::new(self.endpoint("devicecode"))
            .map_err(|e| PreflightError::ConfigError(format!("Invalid device auth URL: {}", e)))?;
        let client = self.client(None)?.set_device_authorization_url(device_auth_url);

        let details: StandardDeviceAuthorizationResponse = client
            .exchange_device_code()
            .map_err(|e| PreflightError::ConfigError(format!("Device code setup failed: {}", e)))?
            .add_scope(Scope::new(scope.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| token_error(service, e))?;

        println!(
            "\nSign in for {}: visit {} and enter code {}\n",
            service,
            details.verification_uri().as_str(),
            details.user_code().secret()
        );

        let token = client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| token_error(service, e))?;

        info!(%service, "interactive sign-in completed");
        Ok(grant(token.access_token(), token.expires_in(), AuthMethod::DeviceCode))
    }
}

fn grant(token: &AccessToken, expires_in: Option<Duration>, method: AuthMethod) -> AccessGrant {
    let lifetime = expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
    let expires_at = Utc::now()
        + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::hours(1));

    AccessGrant {
        token: token.clone(),
        expires_at,
        method,
    }
}

/// Run `fut` with an upper bound, turning expiry into a `Timeout` error.
pub async fn bounded<T, F>(service: ServiceKind, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PreflightError::Timeout {
            service: service.display_name().to_string(),
            secs: limit.as_secs(),
        })?
}

/// Classify a failed token request.
fn token_error<RE, T>(
    service: ServiceKind,
    err: RequestTokenError<RE, StandardErrorResponse<T>>,
) -> PreflightError
where
    RE: std::error::Error + 'static,
    T: ErrorResponseType,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let code = serde_json::to_value(response.error())
                .ok()
                .and_then(|v| v.as_str().map(str::to_string));
            let description = response
                .error_description()
                .cloned()
                .unwrap_or_default();

            let kind = AuthRejection::classify(code.as_deref(), &description);
            let detail = match &code {
                Some(code) if description.is_empty() => code.clone(),
                Some(code) => format!("{}: {}", code, description),
                None => description,
            };

            PreflightError::AuthenticationRejected { kind, detail }
        }
        RequestTokenError::Request(e) => {
            PreflightError::RemoteCallFailed(format!("{} token request failed: {}", service, e))
        }
        RequestTokenError::Parse(e, _) => PreflightError::RemoteCallFailed(format!(
            "{} token response could not be parsed: {}",
            service, e
        )),
        RequestTokenError::Other(message) => PreflightError::RemoteCallFailed(message),
    }
}
