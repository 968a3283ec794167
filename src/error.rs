use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("No configuration found in {0}")]
    ConfigMissing(PathBuf),

    #[error("Configuration field '{0}' still holds a placeholder value")]
    ConfigPlaceholder(String),

    #[error("Incomplete credentials: {0}")]
    CredentialIncomplete(String),

    #[error("Authentication rejected ({kind}): {detail}")]
    AuthenticationRejected { kind: AuthRejection, detail: String },

    #[error("Remote call failed: {0}")]
    RemoteCallFailed(String),

    #[error("HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("{service} did not respond within {secs}s")]
    Timeout { service: String, secs: u64 },

    #[error("Granted permissions could not be determined: {0}")]
    PermissionQueryUnavailable(String),

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PreflightError>;

/// Why the identity provider turned an authentication attempt down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    InvalidClient,
    InvalidTenant,
    ConsentRequired,
    ExpiredSecret,
    InvalidCertificate,
    Other,
}

impl AuthRejection {
    /// Map a numeric `AADSTS` code to a rejection kind.
    pub fn from_aadsts(code: u32) -> Option<Self> {
        match code {
            700016 | 7000215 | 700023 | 7000216 => Some(Self::InvalidClient),
            90002 | 900023 | 90023 | 50128 | 50059 => Some(Self::InvalidTenant),
            65001 | 65004 | 650051 | 500011 => Some(Self::ConsentRequired),
            7000222 => Some(Self::ExpiredSecret),
            700027 | 700024 | 50027 | 7000274 => Some(Self::InvalidCertificate),
            _ => None,
        }
    }

    /// Classify an OAuth error response.
    ///
    /// The `AADSTS` code embedded in the description is authoritative; the
    /// OAuth error code comes next and free-text matching is best effort only.
    pub fn classify(oauth_error: Option<&str>, description: &str) -> Self {
        if let Some(kind) = extract_aadsts_code(description).and_then(Self::from_aadsts) {
            return kind;
        }

        let lower = description.to_ascii_lowercase();
        if lower.contains("expired") && lower.contains("secret") {
            return Self::ExpiredSecret;
        }

        match oauth_error {
            Some("invalid_client") | Some("unauthorized_client") => return Self::InvalidClient,
            Some("consent_required") | Some("interaction_required") => {
                return Self::ConsentRequired;
            }
            _ => {}
        }

        if lower.contains("tenant") && (lower.contains("not found") || lower.contains("invalid")) {
            Self::InvalidTenant
        } else if lower.contains("consent") {
            Self::ConsentRequired
        } else if lower.contains("assertion") || lower.contains("certificate") {
            Self::InvalidCertificate
        } else if lower.contains("client secret") || lower.contains("application with identifier") {
            Self::InvalidClient
        } else {
            Self::Other
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::InvalidClient => {
                "Check the client ID and secret in your configuration match the app registration."
            }
            Self::InvalidTenant => {
                "The tenant ID was not recognised. Verify it on the Entra ID overview page."
            }
            Self::ConsentRequired => {
                "Admin consent is missing. Grant admin consent on the app registration's API permissions page."
            }
            Self::ExpiredSecret => {
                "The client secret has expired. Create a new secret under Certificates & secrets."
            }
            Self::InvalidCertificate => {
                "The certificate was not accepted. Upload its public key to the app registration and check the thumbprint."
            }
            Self::Other => "Review the raw error below for details.",
        }
    }
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidClient => "invalid client",
            Self::InvalidTenant => "invalid tenant",
            Self::ConsentRequired => "consent required",
            Self::ExpiredSecret => "expired secret",
            Self::InvalidCertificate => "invalid certificate",
            Self::Other => "unclassified",
        };
        f.write_str(label)
    }
}

/// Pull the numeric part of the first `AADSTSnnnn` marker out of a message.
pub fn extract_aadsts_code(message: &str) -> Option<u32> {
    let start = message.find("AADSTS")? + "AADSTS".len();
    let digits: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

impl PreflightError {
    /// One-line, human-readable diagnosis printed next to the raw error.
    pub fn diagnosis(&self) -> String {
        match self {
            Self::ConfigMissing(dir) => format!(
                "Create {}/config.json (or config.local.json) with tenantId and clientId.",
                dir.display()
            ),
            Self::ConfigPlaceholder(field) => {
                format!("Replace the placeholder in '{}' with a real value.", field)
            }
            Self::CredentialIncomplete(_) => {
                "Configure a certificate thumbprint, certificate file or client secret.".into()
            }
            Self::AuthenticationRejected { kind, .. } => kind.hint().to_string(),
            Self::Timeout { .. } => {
                "The service did not answer in time. Check network access or raise --timeout.".into()
            }
            Self::PermissionQueryUnavailable(_) => {
                "The access token did not expose its permissions; verify manually in the portal."
                    .into()
            }
            Self::NotConnected(_) => "Connect to the service before evaluating permissions.".into(),
            Self::Certificate(_) => {
                "Check the certificate file, password and that it contains a private key.".into()
            }
            Self::ApiError { status: 401 | 403, .. } => {
                "The service refused the call. Check the app's permissions and admin consent.".into()
            }
            Self::HttpError(_) | Self::RemoteCallFailed(_) | Self::ApiError { .. } => {
                "The remote call failed. Check connectivity and service health.".into()
            }
            _ => "See the error text for details.".into(),
        }
    }
}

/// Parse Graph API error response and provide helpful context
pub fn enhance_graph_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    "\nHint: the access token was rejected. Re-run the check to acquire a new one."
                }
                "Forbidden" | "Authorization_RequestDenied" | "InsufficientPrivileges" => {
                    "\nHint: the app registration lacks a permission for this call or admin consent is missing."
                }
                "TooManyRequests" => "\nHint: API rate limit exceeded. Wait a moment and try again.",
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_aadsts_code() {
        assert_eq!(
            extract_aadsts_code("AADSTS7000215: Invalid client secret provided."),
            Some(7000215)
        );
        assert_eq!(
            extract_aadsts_code("error: AADSTS90002: Tenant 'x' not found."),
            Some(90002)
        );
        assert_eq!(extract_aadsts_code("no code here"), None);
    }

    #[test]
    fn test_classify_prefers_aadsts_code() {
        let kind = AuthRejection::classify(
            Some("invalid_client"),
            "AADSTS7000222: The provided client secret keys are expired.",
        );
        assert_eq!(kind, AuthRejection::ExpiredSecret);

        let kind =
            AuthRejection::classify(Some("invalid_request"), "AADSTS90002: Tenant not found");
        assert_eq!(kind, AuthRejection::InvalidTenant);

        let kind = AuthRejection::classify(
            None,
            "AADSTS65001: The user or administrator has not consented",
        );
        assert_eq!(kind, AuthRejection::ConsentRequired);
    }

    #[test]
    fn test_classify_falls_back_to_text() {
        assert_eq!(
            AuthRejection::classify(Some("invalid_client"), "bad credentials"),
            AuthRejection::InvalidClient
        );
        assert_eq!(
            AuthRejection::classify(None, "Client assertion contains an invalid signature"),
            AuthRejection::InvalidCertificate
        );
        assert_eq!(AuthRejection::classify(None, "something odd"), AuthRejection::Other);
    }

    #[test]
    fn test_enhance_graph_error() {
        let body =
            r#"{"error":{"code":"Authorization_RequestDenied","message":"Insufficient privileges"}}"#;
        let enhanced = enhance_graph_error(body);
        assert!(enhanced.starts_with("Authorization_RequestDenied: Insufficient privileges"));
        assert!(enhanced.contains("admin consent"));

        assert_eq!(enhance_graph_error("plain text"), "plain text");
    }
}
