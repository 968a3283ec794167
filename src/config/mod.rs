use crate::error::{PreflightError, Result};
use crate::permissions::PermissionRequirement;
use crate::session::ServiceKind;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_EXCHANGE_BASE_URL: &str = "https://outlook.office365.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INTERACTIVE_TIMEOUT_SECS: u64 = 300;

const BASE_FILES: &[&str] = &["config.json", "config.toml"];
const LOCAL_FILES: &[&str] = &["config.local.json", "config.local.toml"];

/// True for values such as `YOUR-CLIENT-SECRET-HERE` left over from a template.
pub fn is_placeholder(value: &str) -> bool {
    value.contains("YOUR-") && value.contains("-HERE")
}

/// Trimmed value, or `None` when empty or a placeholder.
fn usable(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !is_placeholder(v))
        .map(str::to_string)
}

/// Configuration record as written on disk. Every field is optional so a
/// local file can override a base file field by field.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(default, alias = "TenantId")]
    pub tenant_id: Option<String>,

    #[serde(default, alias = "ClientId", alias = "AppId")]
    pub client_id: Option<String>,

    #[serde(default, alias = "Organization", alias = "OrganizationName")]
    pub organization: Option<String>,

    #[serde(
        default,
        alias = "CertificateThumbprint",
        alias = "CertThumbprint",
        alias = "certThumbprint"
    )]
    pub certificate_thumbprint: Option<String>,

    #[serde(default, alias = "CertificateStore")]
    pub certificate_store: Option<String>,

    #[serde(default, alias = "CertificatePath")]
    pub certificate_path: Option<String>,

    #[serde(default, alias = "CertificatePassword")]
    pub certificate_password: Option<String>,

    #[serde(default, alias = "ClientSecret")]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub authority_host: Option<String>,

    #[serde(default)]
    pub graph_base_url: Option<String>,

    #[serde(default)]
    pub exchange_base_url: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub interactive_timeout_secs: Option<u64>,

    #[serde(default)]
    pub interactive_fallback: Option<bool>,

    #[serde(default)]
    pub permissions: Option<PermissionSettings>,

    #[serde(default)]
    pub exchange_probes: Option<Vec<CmdletProbe>>,
}

/// Per-service permission overrides.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSettings {
    #[serde(default)]
    pub directory: Option<ServicePermissions>,

    #[serde(default)]
    pub mail_admin: Option<ServicePermissions>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePermissions {
    /// Replaces the built-in required list when present.
    #[serde(default)]
    pub required: Option<Vec<String>>,

    /// Extra permission → feature entries, merged into the built-in map.
    #[serde(default)]
    pub feature_impact: BTreeMap<String, Vec<String>>,
}

/// A read-only Exchange cmdlet run by `exchange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdletProbe {
    pub cmdlet: String,

    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl CmdletProbe {
    pub fn new(cmdlet: &str) -> Self {
        Self {
            cmdlet: cmdlet.to_string(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("Get-OrganizationConfig"),
            Self::new("Get-AcceptedDomain"),
            Self::new("Get-Mailbox").with_parameter("ResultSize", serde_json::json!(1)),
        ]
    }
}

impl RawConfig {
    /// Layer `local` over `self`: any field set in `local` wins.
    ///
    /// Blank or placeholder text in `local` counts as unset and keeps the
    /// base value.
    pub fn overlay(self, local: RawConfig) -> RawConfig {
        RawConfig {
            tenant_id: layered(local.tenant_id, self.tenant_id),
            client_id: layered(local.client_id, self.client_id),
            organization: layered(local.organization, self.organization),
            certificate_thumbprint: layered(
                local.certificate_thumbprint,
                self.certificate_thumbprint,
            ),
            certificate_store: layered(local.certificate_store, self.certificate_store),
            certificate_path: layered(local.certificate_path, self.certificate_path),
            certificate_password: layered(local.certificate_password, self.certificate_password),
            client_secret: layered(local.client_secret, self.client_secret),
            authority_host: layered(local.authority_host, self.authority_host),
            graph_base_url: layered(local.graph_base_url, self.graph_base_url),
            exchange_base_url: layered(local.exchange_base_url, self.exchange_base_url),
            timeout_secs: local.timeout_secs.or(self.timeout_secs),
            interactive_timeout_secs: local
                .interactive_timeout_secs
                .or(self.interactive_timeout_secs),
            interactive_fallback: local.interactive_fallback.or(self.interactive_fallback),
            permissions: match (self.permissions, local.permissions) {
                (Some(base), Some(local)) => Some(PermissionSettings {
                    directory: local.directory.or(base.directory),
                    mail_admin: local.mail_admin.or(base.mail_admin),
                }),
                (base, local) => local.or(base),
            },
            exchange_probes: local.exchange_probes.or(self.exchange_probes),
        }
    }

    /// Check the record once and turn it into a fixed schema.
    pub fn validate(self, config_dir: &Path) -> Result<ValidatedConfig> {
        let tenant_id = required_field(&self.tenant_id, "tenantId")?;
        let client_id = required_field(&self.client_id, "clientId")?;

        for (name, value) in [
            ("organization", &self.organization),
            ("certificateThumbprint", &self.certificate_thumbprint),
            ("certificatePath", &self.certificate_path),
            ("certificatePassword", &self.certificate_password),
            ("clientSecret", &self.client_secret),
        ] {
            if value.as_deref().is_some_and(is_placeholder) {
                warn!(field = name, "placeholder value ignored");
            }
        }

        let certificate_store = usable(&self.certificate_store)
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("certs"));

        let permissions = self.permissions.unwrap_or_default();
        let directory = build_requirement(ServiceKind::Directory, permissions.directory);
        let mail_admin = build_requirement(ServiceKind::MailAdmin, permissions.mail_admin);

        Ok(ValidatedConfig {
            tenant_id,
            client_id,
            organization: usable(&self.organization),
            certificate_thumbprint: usable(&self.certificate_thumbprint),
            certificate_store,
            certificate_path: usable(&self.certificate_path).map(PathBuf::from),
            certificate_password: usable(&self.certificate_password),
            client_secret: usable(&self.client_secret),
            endpoints: Endpoints {
                authority_host: trim_url(usable(&self.authority_host), DEFAULT_AUTHORITY_HOST),
                graph_base_url: trim_url(usable(&self.graph_base_url), DEFAULT_GRAPH_BASE_URL),
                exchange_base_url: trim_url(
                    usable(&self.exchange_base_url),
                    DEFAULT_EXCHANGE_BASE_URL,
                ),
            },
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1)),
            interactive_timeout: Duration::from_secs(
                self.interactive_timeout_secs
                    .unwrap_or(DEFAULT_INTERACTIVE_TIMEOUT_SECS)
                    .max(1),
            ),
            interactive_fallback: self.interactive_fallback.unwrap_or(true),
            directory_requirement: directory,
            mail_admin_requirement: mail_admin,
            exchange_probes: self.exchange_probes.unwrap_or_else(CmdletProbe::defaults),
        })
    }
}

fn layered(local: Option<String>, base: Option<String>) -> Option<String> {
    if usable(&local).is_some() {
        local
    } else {
        base
    }
}

fn required_field(value: &Option<String>, name: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if is_placeholder(v) => Err(PreflightError::ConfigPlaceholder(name.to_string())),
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PreflightError::CredentialIncomplete(format!(
            "'{}' is not set",
            name
        ))),
    }
}

fn trim_url(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn build_requirement(
    service: ServiceKind,
    settings: Option<ServicePermissions>,
) -> PermissionRequirement {
    let mut requirement = PermissionRequirement::defaults(service);
    let Some(settings) = settings else {
        return requirement;
    };

    if let Some(required) = settings.required {
        requirement = requirement.with_permissions(required);
    }
    for (permission, features) in settings.feature_impact {
        requirement = requirement.with_features(&permission, features);
    }
    requirement
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authority_host: String,
    pub graph_base_url: String,
    pub exchange_base_url: String,
}

/// Configuration after validation. Built once at startup.
#[derive(Clone)]
pub struct ValidatedConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub organization: Option<String>,
    pub certificate_thumbprint: Option<String>,
    pub certificate_store: PathBuf,
    pub certificate_path: Option<PathBuf>,
    pub certificate_password: Option<String>,
    pub client_secret: Option<String>,
    pub endpoints: Endpoints,
    pub timeout: Duration,
    pub interactive_timeout: Duration,
    pub interactive_fallback: bool,
    pub directory_requirement: PermissionRequirement,
    pub mail_admin_requirement: PermissionRequirement,
    pub exchange_probes: Vec<CmdletProbe>,
}

impl ValidatedConfig {
    pub fn requirement(&self, service: ServiceKind) -> &PermissionRequirement {
        match service {
            ServiceKind::Directory => &self.directory_requirement,
            ServiceKind::MailAdmin => &self.mail_admin_requirement,
        }
    }
}

impl std::fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("organization", &self.organization)
            .field("certificate_thumbprint", &self.certificate_thumbprint)
            .field("certificate_store", &self.certificate_store)
            .field("certificate_path", &self.certificate_path)
            .field("certificate_password", &self.certificate_password.as_ref().map(|_| "***"))
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .field("interactive_fallback", &self.interactive_fallback)
            .finish()
    }
}

/// Locates and loads configuration files
#[derive(Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("io", "m365-preflight", "m365-preflight").ok_or_else(|| {
                PreflightError::ConfigError("Failed to determine config directory".into())
            })?;

        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
        })
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn first_existing(&self, candidates: &[&str]) -> Option<PathBuf> {
        candidates
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|path| path.exists())
    }

    pub fn base_file(&self) -> Option<PathBuf> {
        self.first_existing(BASE_FILES)
    }

    pub fn local_file(&self) -> Option<PathBuf> {
        self.first_existing(LOCAL_FILES)
    }

    /// Load the base record with the local record layered on top.
    ///
    /// Missing both files is fatal; either one alone is enough.
    pub fn load_raw(&self) -> Result<RawConfig> {
        let base = self.base_file();
        let local = self.local_file();

        if base.is_none() && local.is_none() {
            return Err(PreflightError::ConfigMissing(self.config_dir.clone()));
        }

        let mut config = RawConfig::default();
        if let Some(path) = base {
            debug!(path = %path.display(), "loading base configuration");
            config = parse_file(&path)?;
        }
        if let Some(path) = local {
            debug!(path = %path.display(), "applying local configuration");
            config = config.overlay(parse_file(&path)?);
        }
        Ok(config)
    }

    pub fn load(&self) -> Result<ValidatedConfig> {
        self.load_raw()?.validate(&self.config_dir)
    }
}

fn parse_file(path: &Path) -> Result<RawConfig> {
    let contents = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        Ok(toml::from_str(&contents)?)
    } else {
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Show the first few characters of an identifier.
pub fn truncate_id(value: &str) -> String {
    let head: String = value.chars().take(8).collect();
    if value.chars().count() > 8 {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> RawConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder("YOUR-CLIENT-SECRET-HERE"));
        assert!(is_placeholder("YOUR-TENANT-ID-HERE"));
        assert!(!is_placeholder("YOUR-secret"));
        assert!(!is_placeholder("abc~123"));
    }

    #[test]
    fn test_placeholder_secret_is_treated_as_absent() {
        let config = raw(serde_json::json!({
            "tenantId": "t1",
            "clientId": "c1",
            "clientSecret": "YOUR-CLIENT-SECRET-HERE"
        }))
        .validate(Path::new("/tmp"))
        .unwrap();
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn test_placeholder_tenant_is_rejected() {
        let err = raw(serde_json::json!({
            "tenantId": "YOUR-TENANT-ID-HERE",
            "clientId": "c1"
        }))
        .validate(Path::new("/tmp"))
        .unwrap_err();
        assert!(matches!(err, PreflightError::ConfigPlaceholder(field) if field == "tenantId"));
    }

    #[test]
    fn test_missing_client_id_is_incomplete() {
        let err = raw(serde_json::json!({ "tenantId": "t1" }))
            .validate(Path::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, PreflightError::CredentialIncomplete(_)));
    }

    #[test]
    fn test_pascal_case_aliases() {
        let config = raw(serde_json::json!({
            "TenantId": "t1",
            "ClientId": "c1",
            "Organization": "contoso.onmicrosoft.com",
            "CertificateThumbprint": "ABCD"
        }))
        .validate(Path::new("/cfg"))
        .unwrap();
        assert_eq!(config.tenant_id, "t1");
        assert_eq!(config.organization.as_deref(), Some("contoso.onmicrosoft.com"));
        assert_eq!(config.certificate_thumbprint.as_deref(), Some("ABCD"));
        assert_eq!(config.certificate_store, PathBuf::from("/cfg/certs"));
    }

    #[test]
    fn test_overlay_prefers_local_fields() {
        let base = raw(serde_json::json!({
            "tenantId": "base-tenant",
            "clientId": "base-client",
            "clientSecret": "YOUR-CLIENT-SECRET-HERE"
        }));
        let local = raw(serde_json::json!({ "clientSecret": "real-secret" }));

        let merged = base.overlay(local);
        assert_eq!(merged.tenant_id.as_deref(), Some("base-tenant"));
        assert_eq!(merged.client_secret.as_deref(), Some("real-secret"));
    }

    #[test]
    fn test_defaults_applied() {
        let config = raw(serde_json::json!({ "tenantId": "t1", "clientId": "c1" }))
            .validate(Path::new("/tmp"))
            .unwrap();
        assert_eq!(config.endpoints.authority_host, DEFAULT_AUTHORITY_HOST);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(config.interactive_fallback);
        assert_eq!(config.exchange_probes, CmdletProbe::defaults());
        assert_eq!(
            config.directory_requirement,
            PermissionRequirement::defaults(ServiceKind::Directory)
        );
    }

    #[test]
    fn test_permission_overrides() {
        let config = raw(serde_json::json!({
            "tenantId": "t1",
            "clientId": "c1",
            "permissions": {
                "directory": {
                    "required": ["User.Read.All", "Mail.ReadWrite"],
                    "featureImpact": { "Mail.ReadWrite": ["Mailbox export"] }
                }
            }
        }))
        .validate(Path::new("/tmp"))
        .unwrap();

        let requirement = config.requirement(ServiceKind::Directory);
        assert_eq!(requirement.permissions(), &["User.Read.All", "Mail.ReadWrite"]);
        assert_eq!(requirement.features_for("Mail.ReadWrite"), &["Mailbox export"]);
        assert!(!requirement.features_for("User.Read.All").is_empty());
        assert_eq!(
            config.requirement(ServiceKind::MailAdmin),
            &PermissionRequirement::defaults(ServiceKind::MailAdmin)
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = raw(serde_json::json!({
            "tenantId": "t1",
            "clientId": "c1",
            "clientSecret": "super-secret-value"
        }))
        .validate(Path::new("/tmp"))
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-value"));
    }

    #[test]
    fn test_truncate_id() {
        assert_eq!(truncate_id("12345678-aaaa"), "12345678...");
        assert_eq!(truncate_id("abc"), "abc");
    }
}
