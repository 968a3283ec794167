//! Access token claims.
//!
//! Entra ID access tokens are JWTs. App-only tokens list granted application
//! permissions in `roles`; delegated tokens list scopes in `scp`. The token
//! signature is not checked here; the resource server does that.

use crate::error::{PreflightError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub tid: Option<String>,

    #[serde(default)]
    pub appid: Option<String>,

    #[serde(default)]
    pub azp: Option<String>,

    #[serde(default)]
    pub roles: Option<Vec<String>>,

    #[serde(default)]
    pub scp: Option<String>,

    #[serde(default)]
    pub upn: Option<String>,

    #[serde(default)]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn decode(token: &str) -> Result<Self> {
        let payload = token.split('.').nth(1).ok_or_else(|| {
            PreflightError::PermissionQueryUnavailable("access token is not a JWT".into())
        })?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| {
                PreflightError::PermissionQueryUnavailable(format!(
                    "access token payload is not base64url: {}",
                    e
                ))
            })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            PreflightError::PermissionQueryUnavailable(format!(
                "access token payload is not JSON: {}",
                e
            ))
        })
    }

    /// Application roles and delegated scopes, in token order.
    pub fn granted_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.roles.clone().unwrap_or_default();
        if let Some(scp) = &self.scp {
            scopes.extend(scp.split_whitespace().map(str::to_string));
        }
        scopes
    }

    pub fn client_id(&self) -> Option<&str> {
        self.appid.as_deref().or(self.azp.as_deref())
    }
}
