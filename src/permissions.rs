//! Required permissions and the gap engine.
//!
//! A required permission `P` is satisfied when the granted set contains `P`
//! itself or its ReadWrite counterpart. Granted scopes are compared as an
//! unordered, ASCII case-insensitive set; results keep requirement order.

use crate::error::{PreflightError, Result};
use crate::session::{ConnectionState, ServiceKind};
use std::collections::{BTreeMap, HashSet};

/// Default Graph application permissions and what stops working without them.
const DIRECTORY_DEFAULTS: &[(&str, &[&str])] = &[
    (
        "User.Read.All",
        &["User inventory report", "License assignment overview"],
    ),
    (
        "Group.Read.All",
        &["Group membership report", "Teams inventory"],
    ),
    (
        "Directory.Read.All",
        &["Directory role report", "Guest account review"],
    ),
    (
        "Organization.Read.All",
        &["Tenant overview", "Subscribed SKU report"],
    ),
    (
        "Reports.Read.All",
        &["Mailbox usage report", "Active user report"],
    ),
    ("AuditLog.Read.All", &["Sign-in activity report"]),
    ("MailboxSettings.Read", &["Mailbox settings report"]),
];

const MAIL_ADMIN_DEFAULTS: &[(&str, &[&str])] = &[(
    "Exchange.ManageAsApp",
    &[
        "Exchange Online cmdlets (Get-Mailbox, Get-OrganizationConfig)",
        "Mailbox permission report",
    ],
)];

/// Ordered permissions a service must grant, with their feature impact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionRequirement {
    permissions: Vec<String>,
    feature_impact: BTreeMap<String, Vec<String>>,
}

impl PermissionRequirement {
    pub fn new<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let permissions = permissions
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| seen.insert(p.to_ascii_lowercase()))
            .collect();

        Self {
            permissions,
            feature_impact: BTreeMap::new(),
        }
    }

    /// Built-in requirement for a service.
    pub fn defaults(service: ServiceKind) -> Self {
        let table = match service {
            ServiceKind::Directory => DIRECTORY_DEFAULTS,
            ServiceKind::MailAdmin => MAIL_ADMIN_DEFAULTS,
        };

        let mut requirement = Self::new(table.iter().map(|(p, _)| *p));
        for (permission, features) in table {
            requirement = requirement.with_features(*permission, features.iter().copied());
        }
        requirement
    }

    pub fn with_features<I, S>(mut self, permission: &str, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self
            .feature_impact
            .entry(permission.to_ascii_lowercase())
            .or_default();
        for feature in features {
            let feature = feature.into();
            if !entry.contains(&feature) {
                entry.push(feature);
            }
        }
        self
    }

    /// Replace the required list, keeping known feature impact.
    pub fn with_permissions<I, S>(self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            feature_impact: self.feature_impact,
            ..Self::new(permissions)
        }
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn features_for(&self, permission: &str) -> &[String] {
        self.feature_impact
            .get(&permission.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// The ReadWrite counterpart of a Read permission, if it has one.
///
/// `Directory.Read.All` → `Directory.ReadWrite.All`, `User.Read` →
/// `User.ReadWrite`. Permissions without a `Read` segment after the resource
/// have no counterpart.
pub fn read_write_form(permission: &str) -> Option<String> {
    let mut segments: Vec<&str> = permission.split('.').collect();
    let index = segments
        .iter()
        .skip(1)
        .position(|s| s.eq_ignore_ascii_case("Read"))?
        + 1;
    segments[index] = "ReadWrite";
    Some(segments.join("."))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted,
    /// Satisfied by the named ReadWrite permission.
    GrantedVia(String),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionVerdict {
    pub permission: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPermission {
    pub permission: String,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGapReport {
    pub service: ServiceKind,
    pub verdicts: Vec<PermissionVerdict>,
    pub missing: Vec<MissingPermission>,
}

impl PermissionGapReport {
    /// Compute the gap report for a connected service.
    ///
    /// Errors with `NotConnected` for any other state and with
    /// `PermissionQueryUnavailable` when the session could not report its
    /// granted scopes.
    pub fn compute(
        service: ServiceKind,
        state: &ConnectionState,
        requirement: &PermissionRequirement,
    ) -> Result<Self> {
        let session = state
            .session()
            .ok_or_else(|| PreflightError::NotConnected(service.display_name().to_string()))?;

        let granted = session.granted_scopes.as_ref().ok_or_else(|| {
            PreflightError::PermissionQueryUnavailable(format!(
                "{} access token carries no permission claims",
                service
            ))
        })?;

        Ok(Self::from_granted(service, granted, requirement))
    }

    pub fn from_granted(
        service: ServiceKind,
        granted: &[String],
        requirement: &PermissionRequirement,
    ) -> Self {
        let granted: HashSet<String> = granted.iter().map(|g| g.to_ascii_lowercase()).collect();

        let verdicts: Vec<PermissionVerdict> = requirement
            .permissions()
            .iter()
            .map(|permission| PermissionVerdict {
                permission: permission.clone(),
                verdict: judge(permission, &granted),
            })
            .collect();

        let missing = verdicts
            .iter()
            .filter(|v| v.verdict == Verdict::Missing)
            .map(|v| MissingPermission {
                permission: v.permission.clone(),
                features: requirement.features_for(&v.permission).to_vec(),
            })
            .collect();

        Self {
            service,
            verdicts,
            missing,
        }
    }

    pub fn missing_permissions(&self) -> Vec<&str> {
        self.missing.iter().map(|m| m.permission.as_str()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

fn judge(permission: &str, granted: &HashSet<String>) -> Verdict {
    if granted.contains(&permission.to_ascii_lowercase()) {
        return Verdict::Granted;
    }
    match read_write_form(permission) {
        Some(rw) if granted.contains(&rw.to_ascii_lowercase()) => Verdict::GrantedVia(rw),
        _ => Verdict::Missing,
    }
}
