//! Per-service connection state.
//!
//! Each remote service has exactly one [`ConnectionState`], owned by a
//! [`Sessions`] value that the caller passes around explicitly.

use crate::error::{AuthRejection, PreflightError};
use chrono::{DateTime, Utc};
use oauth2::AccessToken;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Microsoft Graph
    Directory,
    /// Exchange Online admin API
    MailAdmin,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Directory, ServiceKind::MailAdmin];

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceKind::Directory => "Microsoft Graph",
            ServiceKind::MailAdmin => "Exchange Online",
        }
    }

    /// Name of the API as it appears on the app registration's permission page.
    pub fn api_name(&self) -> &'static str {
        match self {
            ServiceKind::Directory => "Microsoft Graph",
            ServiceKind::MailAdmin => "Office 365 Exchange Online",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// How a session was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    CertificateThumbprint,
    CertificateFile,
    ClientSecret,
    DeviceCode,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthMethod::CertificateThumbprint => "certificate (thumbprint)",
            AuthMethod::CertificateFile => "certificate (file)",
            AuthMethod::ClientSecret => "client secret",
            AuthMethod::DeviceCode => "device code (interactive)",
        };
        f.write_str(label)
    }
}

/// A live session with one remote service.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub service: ServiceKind,
    pub tenant_id: String,
    pub client_id: Option<String>,
    /// `None` when the token did not expose its permissions.
    pub granted_scopes: Option<Vec<String>>,
    pub method: AuthMethod,
    pub expires_at: DateTime<Utc>,
    pub organization: Option<String>,
    pub display_name: Option<String>,
    /// Non-fatal problems noticed while verifying the session.
    pub warnings: Vec<String>,
    pub access_token: AccessToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    ConfigPlaceholder,
    CredentialIncomplete,
    AuthenticationRejected(AuthRejection),
    RemoteCallFailed,
    Timeout,
    PermissionQueryUnavailable,
    Certificate,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ConfigPlaceholder => f.write_str("placeholder configuration"),
            FailureKind::CredentialIncomplete => f.write_str("incomplete credentials"),
            FailureKind::AuthenticationRejected(kind) => {
                write!(f, "authentication rejected: {}", kind)
            }
            FailureKind::RemoteCallFailed => f.write_str("remote call failed"),
            FailureKind::Timeout => f.write_str("timed out"),
            FailureKind::PermissionQueryUnavailable => f.write_str("permissions unavailable"),
            FailureKind::Certificate => f.write_str("certificate problem"),
        }
    }
}

/// A single failed authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub method: AuthMethod,
    pub kind: FailureKind,
    pub detail: String,
}

/// Classified reason a connection ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
    pub diagnosis: String,
    pub attempts: Vec<AttemptFailure>,
}

impl FailureReason {
    pub fn from_error(error: &PreflightError) -> Self {
        Self {
            kind: failure_kind(error),
            detail: error.to_string(),
            diagnosis: error.diagnosis(),
            attempts: Vec::new(),
        }
    }
}

pub fn failure_kind(error: &PreflightError) -> FailureKind {
    match error {
        PreflightError::ConfigPlaceholder(_) => FailureKind::ConfigPlaceholder,
        PreflightError::CredentialIncomplete(_)
        | PreflightError::ConfigMissing(_)
        | PreflightError::ConfigError(_) => FailureKind::CredentialIncomplete,
        PreflightError::AuthenticationRejected { kind, .. } => {
            FailureKind::AuthenticationRejected(*kind)
        }
        PreflightError::Timeout { .. } => FailureKind::Timeout,
        PreflightError::PermissionQueryUnavailable(_) => FailureKind::PermissionQueryUnavailable,
        PreflightError::Certificate(_) => FailureKind::Certificate,
        _ => FailureKind::RemoteCallFailed,
    }
}

#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(SessionInfo),
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        match self {
            ConnectionState::Connected(session) => Some(session),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected(_) => "connected",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

/// Connection state for every remote service, owned by one validation run.
#[derive(Debug, Default)]
pub struct Sessions {
    directory: ConnectionState,
    mail_admin: ConnectionState,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, service: ServiceKind) -> &ConnectionState {
        match service {
            ServiceKind::Directory => &self.directory,
            ServiceKind::MailAdmin => &self.mail_admin,
        }
    }

    fn slot(&mut self, service: ServiceKind) -> &mut ConnectionState {
        match service {
            ServiceKind::Directory => &mut self.directory,
            ServiceKind::MailAdmin => &mut self.mail_admin,
        }
    }

    /// Move a service to `Connecting`.
    ///
    /// Returns the previous session if one was live; the caller must tear it
    /// down before the new attempt is made.
    pub fn begin_attempt(&mut self, service: ServiceKind) -> Option<SessionInfo> {
        let previous = std::mem::replace(self.slot(service), ConnectionState::Connecting);
        debug!(%service, "connection attempt started");
        match previous {
            ConnectionState::Connected(session) => Some(session),
            _ => None,
        }
    }

    pub fn complete(&mut self, service: ServiceKind, state: ConnectionState) {
        debug!(%service, state = state.label(), "connection attempt finished");
        *self.slot(service) = state;
    }

    /// Return a service to `Disconnected`, handing back any live session.
    pub fn disconnect(&mut self, service: ServiceKind) -> Option<SessionInfo> {
        match std::mem::take(self.slot(service)) {
            ConnectionState::Connected(session) => Some(session),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn session(service: ServiceKind, granted: &[&str]) -> SessionInfo {
        SessionInfo {
            service,
            tenant_id: "t1".into(),
            client_id: Some("c1".into()),
            granted_scopes: Some(granted.iter().map(|s| s.to_string()).collect()),
            method: AuthMethod::ClientSecret,
            expires_at: Utc::now(),
            organization: None,
            display_name: None,
            warnings: Vec::new(),
            access_token: AccessToken::new("token".into()),
        }
    }

    #[test]
    fn test_sessions_start_disconnected() {
        let sessions = Sessions::new();
        for service in ServiceKind::ALL {
            assert!(matches!(
                sessions.state(service),
                ConnectionState::Disconnected
            ));
        }
    }

    #[test]
    fn test_begin_attempt_hands_back_live_session() {
        let mut sessions = Sessions::new();
        assert!(sessions.begin_attempt(ServiceKind::Directory).is_none());
        sessions.complete(
            ServiceKind::Directory,
            ConnectionState::Connected(session(ServiceKind::Directory, &[])),
        );

        let previous = sessions.begin_attempt(ServiceKind::Directory);
        assert!(previous.is_some());
        assert!(matches!(
            sessions.state(ServiceKind::Directory),
            ConnectionState::Connecting
        ));
        assert!(matches!(
            sessions.state(ServiceKind::MailAdmin),
            ConnectionState::Disconnected
        ));
    }

    #[test]
    fn test_disconnect_resets_state() {
        let mut sessions = Sessions::new();
        sessions.complete(
            ServiceKind::MailAdmin,
            ConnectionState::Connected(session(ServiceKind::MailAdmin, &[])),
        );
        assert!(sessions.disconnect(ServiceKind::MailAdmin).is_some());
        assert!(matches!(
            sessions.state(ServiceKind::MailAdmin),
            ConnectionState::Disconnected
        ));
        assert!(sessions.disconnect(ServiceKind::MailAdmin).is_none());
    }

    #[test]
    fn test_failure_reason_classification() {
        let err = PreflightError::AuthenticationRejected {
            kind: AuthRejection::ExpiredSecret,
            detail: "AADSTS7000222".into(),
        };
        let reason = FailureReason::from_error(&err);
        assert_eq!(
            reason.kind,
            FailureKind::AuthenticationRejected(AuthRejection::ExpiredSecret)
        );
        assert!(reason.diagnosis.contains("expired"));

        let timeout = PreflightError::Timeout {
            service: "Microsoft Graph".into(),
            secs: 5,
        };
        assert_eq!(failure_kind(&timeout), FailureKind::Timeout);
    }
}
