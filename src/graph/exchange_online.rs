//! Exchange Online admin API
//!
//! Cmdlets are invoked over REST through the `InvokeCommand` endpoint that
//! the Exchange Online management module uses. Authentication is app-only
//! against the `outlook.office365.com` resource, which requires the
//! `Exchange.ManageAsApp` role plus an Entra directory role for the app.

use super::auth::{EXCHANGE_SCOPE, TokenAuthority, bounded};
use super::{http_client, session_context};
use crate::config::{CmdletProbe, ValidatedConfig};
use crate::connector::ServiceConnector;
use crate::credentials::AuthStrategy;
use crate::error::{PreflightError, Result};
use crate::session::{ServiceKind, SessionInfo};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const ANCHOR_MAILBOX: &str = "SystemMailbox{bb558c35-97f1-4cb9-8ff7-d53741dc928c}";

/// Client for a single organization's admin API.
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    organization: String,
    access_token: String,
}

impl ExchangeClient {
    pub fn new(client: Client, base_url: &str, organization: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization: organization.to_string(),
            access_token: access_token.to_string(),
        }
    }

    pub fn invoke_url(&self) -> String {
        format!(
            "{}/adminapi/beta/{}/InvokeCommand",
            self.base_url, self.organization
        )
    }

    /// Run one cmdlet and return the rows it produced.
    pub async fn invoke(&self, probe: &CmdletProbe) -> Result<Vec<Value>> {
        let payload = json!({
            "CmdletInput": {
                "CmdletName": probe.cmdlet,
                "Parameters": probe.parameters,
            }
        });

        debug!(cmdlet = %probe.cmdlet, "invoking cmdlet");

        let response = self
            .client
            .post(self.invoke_url())
            .bearer_auth(&self.access_token)
            .header(
                "X-AnchorMailbox",
                format!("UPN:{}@{}", ANCHOR_MAILBOX, self.organization),
            )
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PreflightError::ApiError {
                status: status.as_u16(),
                message: crate::error::enhance_graph_error(&error_text),
            });
        }

        let body: Value = response.json().await?;
        Ok(match body.get("value") {
            Some(Value::Array(rows)) => rows.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        })
    }
}

/// Outcome of one administrative probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Passed { rows: usize },
    Failed { detail: String, diagnosis: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub cmdlet: String,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Passed { .. })
    }
}

/// Mail administration connector backed by the Exchange Online admin API.
pub struct ExchangeConnector {
    authority: TokenAuthority,
    base_url: String,
    organization: Option<String>,
    http: Client,
}

impl ExchangeConnector {
    pub fn new(config: &ValidatedConfig) -> Result<Self> {
        Ok(Self {
            authority: TokenAuthority::new(config),
            base_url: config.endpoints.exchange_base_url.clone(),
            organization: config.organization.clone(),
            http: http_client(config.timeout)?,
        })
    }

    fn organization(&self) -> Result<&str> {
        self.organization.as_deref().ok_or_else(|| {
            PreflightError::CredentialIncomplete(
                "organization (primary domain, e.g. contoso.onmicrosoft.com) is required for Exchange Online"
                    .into(),
            )
        })
    }

    fn client_for(&self, session: &SessionInfo) -> Result<ExchangeClient> {
        let organization = session
            .organization
            .as_deref()
            .map(Ok)
            .unwrap_or_else(|| self.organization())?;

        Ok(ExchangeClient::new(
            self.http.clone(),
            &self.base_url,
            organization,
            session.access_token.secret(),
        ))
    }

    /// Run each probe in order against a live session.
    ///
    /// A failing probe does not stop the remaining ones.
    pub async fn run_probes(
        &self,
        session: &SessionInfo,
        probes: &[CmdletProbe],
    ) -> Vec<ProbeResult> {
        let client = match self.client_for(session) {
            Ok(client) => client,
            Err(e) => {
                return probes
                    .iter()
                    .map(|probe| ProbeResult {
                        cmdlet: probe.cmdlet.clone(),
                        outcome: ProbeOutcome::Failed {
                            detail: e.to_string(),
                            diagnosis: e.diagnosis(),
                        },
                    })
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(probes.len());
        for probe in probes {
            let call = client.invoke(probe);
            let outcome = match bounded(self.service(), self.authority.timeout(), call).await {
                Ok(rows) => ProbeOutcome::Passed { rows: rows.len() },
                Err(e) => {
                    warn!(cmdlet = %probe.cmdlet, error = %e, "probe failed");
                    ProbeOutcome::Failed {
                        detail: e.to_string(),
                        diagnosis: e.diagnosis(),
                    }
                }
            };
            results.push(ProbeResult {
                cmdlet: probe.cmdlet.clone(),
                outcome,
            });
        }
        results
    }
}

#[async_trait]
impl ServiceConnector for ExchangeConnector {
    fn service(&self) -> ServiceKind {
        ServiceKind::MailAdmin
    }

    async fn connect(&self, strategy: &AuthStrategy) -> Result<SessionInfo> {
        let service = self.service();
        let organization = self.organization()?.to_string();

        let grant = self.authority.acquire(service, strategy, EXCHANGE_SCOPE).await?;
        let context = session_context(service, &self.authority, grant.token.secret());

        let mut session = SessionInfo {
            service,
            tenant_id: context.tenant_id,
            client_id: context.client_id,
            granted_scopes: context.granted_scopes,
            method: grant.method,
            expires_at: grant.expires_at,
            organization: Some(organization),
            display_name: None,
            warnings: context.warnings,
            access_token: grant.token,
        };

        let client = self.client_for(&session)?;
        let probe = CmdletProbe::new("Get-OrganizationConfig");

        match bounded(service, self.authority.timeout(), client.invoke(&probe)).await {
            Ok(rows) => {
                session.display_name = rows.iter().find_map(|row| {
                    row.get("DisplayName")
                        .or_else(|| row.get("Name"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            }
            Err(PreflightError::ApiError {
                status: status @ (401 | 403),
                message,
            }) => {
                warn!(status, "Get-OrganizationConfig denied");
                session.warnings.push(format!(
                    "Get-OrganizationConfig was denied (HTTP {}). Assign an Exchange administrator role to the app. {}",
                    status, message
                ));
            }
            Err(e) => return Err(e),
        }

        info!(%service, method = %session.method, tenant = %session.tenant_id, "connected");
        Ok(session)
    }

    async fn disconnect(&self, session: SessionInfo) -> Result<()> {
        info!(service = %session.service, organization = ?session.organization, "session closed");
        drop(session);
        Ok(())
    }
}
