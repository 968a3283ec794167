//! Credential selection.
//!
//! Turns the validated configuration into an ordered attempt plan:
//! certificate by thumbprint, certificate file, client secret, then the
//! interactive device code flow.

pub mod certificate;
pub mod resolver;

use crate::config::ValidatedConfig;
use crate::session::AuthMethod;
use std::fmt;
use std::path::PathBuf;

pub use resolver::CredentialResolver;

/// One non-interactive credential. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub enum ServiceCredential {
    CertificateThumbprint {
        thumbprint: String,
        store_path: PathBuf,
    },
    CertificateFile {
        path: PathBuf,
        password: Option<String>,
    },
    ClientSecret {
        client_id: String,
        secret: String,
    },
}

impl ServiceCredential {
    pub fn method(&self) -> AuthMethod {
        match self {
            ServiceCredential::CertificateThumbprint { .. } => AuthMethod::CertificateThumbprint,
            ServiceCredential::CertificateFile { .. } => AuthMethod::CertificateFile,
            ServiceCredential::ClientSecret { .. } => AuthMethod::ClientSecret,
        }
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCredential::CertificateThumbprint {
                thumbprint,
                store_path,
            } => f
                .debug_struct("CertificateThumbprint")
                .field("thumbprint", thumbprint)
                .field("store_path", store_path)
                .finish(),
            ServiceCredential::CertificateFile { path, password } => f
                .debug_struct("CertificateFile")
                .field("path", path)
                .field("password", &password.as_ref().map(|_| "***"))
                .finish(),
            ServiceCredential::ClientSecret { client_id, .. } => f
                .debug_struct("ClientSecret")
                .field("client_id", client_id)
                .field("secret", &"***")
                .finish(),
        }
    }
}

/// A single entry in the attempt plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    Credential(ServiceCredential),
    DeviceCode,
}

impl AuthStrategy {
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthStrategy::Credential(credential) => credential.method(),
            AuthStrategy::DeviceCode => AuthMethod::DeviceCode,
        }
    }
}

/// Build the attempt plan in priority order.
///
/// A credential is only planned when all of its fields are set; placeholder
/// values were already dropped during validation.
pub fn plan_strategies(config: &ValidatedConfig, interactive: bool) -> Vec<AuthStrategy> {
    let mut plan = Vec::new();

    if let Some(thumbprint) = &config.certificate_thumbprint {
        plan.push(AuthStrategy::Credential(
            ServiceCredential::CertificateThumbprint {
                thumbprint: thumbprint.clone(),
                store_path: config.certificate_store.clone(),
            },
        ));
    }

    if let Some(path) = &config.certificate_path {
        plan.push(AuthStrategy::Credential(ServiceCredential::CertificateFile {
            path: path.clone(),
            password: config.certificate_password.clone(),
        }));
    }

    if let Some(secret) = &config.client_secret {
        plan.push(AuthStrategy::Credential(ServiceCredential::ClientSecret {
            client_id: config.client_id.clone(),
            secret: secret.clone(),
        }));
    }

    if interactive && config.interactive_fallback {
        plan.push(AuthStrategy::DeviceCode);
    }

    plan
}
