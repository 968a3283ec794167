//! Certificate loading and JWT client assertions.
//!
//! Entra ID accepts an RS256-signed JWT in place of a client secret. The
//! `x5t` header carries the base64url SHA-1 thumbprint of the certificate so
//! the service can find the matching public key on the app registration.

use crate::error::{PreflightError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use rustls_pemfile::Item;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Assertion lifetime accepted by the token endpoint.
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Uppercase hex without separators, the way Windows shows thumbprints.
pub fn normalize_thumbprint(thumbprint: &str) -> String {
    thumbprint
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn thumbprint_of(cert_der: &[u8]) -> String {
    digest(&SHA1_FOR_LEGACY_USE_ONLY, cert_der)
        .as_ref()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect()
}

/// A certificate together with the RSA key that signs assertions for it.
pub struct SigningCertificate {
    cert_der: Vec<u8>,
    key: RsaKeyPair,
}

impl std::fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}

/// Certificate and key material found in one PEM file.
struct PemContents {
    certs: Vec<Vec<u8>>,
    key: Option<RsaKeyPair>,
}

fn read_pem(bytes: &[u8]) -> Result<PemContents> {
    let mut certs = Vec::new();
    let mut key = None;

    for item in rustls_pemfile::read_all(&mut &bytes[..]) {
        match item? {
            Item::X509Certificate(cert) => certs.push(cert.as_ref().to_vec()),
            Item::Pkcs8Key(k) if key.is_none() => {
                key = Some(RsaKeyPair::from_pkcs8(k.secret_pkcs8_der()).map_err(|e| {
                    PreflightError::Certificate(format!("unusable PKCS#8 key: {}", e))
                })?);
            }
            Item::Pkcs1Key(k) if key.is_none() => {
                key = Some(RsaKeyPair::from_der(k.secret_pkcs1_der()).map_err(|e| {
                    PreflightError::Certificate(format!("unusable RSA key: {}", e))
                })?);
            }
            _ => {}
        }
    }

    Ok(PemContents { certs, key })
}

impl SigningCertificate {
    /// Parse a PEM bundle holding the certificate and its RSA private key.
    pub fn from_pem(bytes: &[u8]) -> Result<Self> {
        let pem = read_pem(bytes)?;
        let cert_der = pem
            .certs
            .into_iter()
            .next()
            .ok_or_else(|| PreflightError::Certificate("no certificate in PEM data".into()))?;
        let key = pem
            .key
            .ok_or_else(|| PreflightError::Certificate("no RSA private key in PEM data".into()))?;
        Ok(Self { cert_der, key })
    }

    /// Parse a PKCS#12 archive.
    pub fn from_pkcs12(bytes: &[u8], password: &str) -> Result<Self> {
        let pfx = p12::PFX::parse(bytes)
            .map_err(|e| PreflightError::Certificate(format!("invalid PKCS#12 file: {:?}", e)))?;

        if !pfx.verify_mac(password) {
            return Err(PreflightError::Certificate(
                "PKCS#12 password is incorrect".into(),
            ));
        }

        let cert_der = pfx
            .cert_x509_bags(password)
            .map_err(|e| {
                PreflightError::Certificate(format!("cannot decrypt certificate: {:?}", e))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| PreflightError::Certificate("no certificate in PKCS#12 file".into()))?;

        let key_der = pfx
            .key_bags(password)
            .map_err(|e| {
                PreflightError::Certificate(format!("cannot decrypt private key: {:?}", e))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| PreflightError::Certificate("no private key in PKCS#12 file".into()))?;

        let key = RsaKeyPair::from_pkcs8(&key_der)
            .map_err(|e| PreflightError::Certificate(format!("unusable private key: {}", e)))?;

        Ok(Self { cert_der, key })
    }

    /// Load a `.pfx`/`.p12` archive or a PEM bundle from disk.
    pub fn load_file(path: &Path, password: Option<&str>) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            PreflightError::Certificate(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_pkcs12 = path.extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("pfx") || ext.eq_ignore_ascii_case("p12")
        });

        if is_pkcs12 {
            Self::from_pkcs12(&bytes, password.unwrap_or_default())
        } else {
            Self::from_pem(&bytes)
        }
    }

    /// Find the certificate with `thumbprint` in a store directory.
    pub fn find_in_store(store: &Path, thumbprint: &str) -> Result<Self> {
        let wanted = normalize_thumbprint(thumbprint);
        let entries = list_store(store)?;

        let entry = entries
            .into_iter()
            .find(|e| e.thumbprint == wanted)
            .ok_or_else(|| {
                PreflightError::Certificate(format!(
                    "no certificate with thumbprint {} in {}",
                    wanted,
                    store.display()
                ))
            })?;

        if !entry.has_private_key {
            return Err(PreflightError::Certificate(format!(
                "certificate {} in {} has no private key",
                wanted,
                entry.path.display()
            )));
        }

        debug!(path = %entry.path.display(), "certificate found in store");
        Self::from_pem(&fs::read(&entry.path)?)
    }

    pub fn thumbprint(&self) -> String {
        thumbprint_of(&self.cert_der)
    }

    /// Base64url SHA-1 thumbprint for the JWT `x5t` header.
    pub fn x5t(&self) -> String {
        URL_SAFE_NO_PAD.encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, &self.cert_der).as_ref())
    }

    /// Build a signed client assertion for `audience` (the token endpoint).
    pub fn client_assertion(&self, client_id: &str, audience: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp();

        let header = json!({
            "alg": "RS256",
            "typ": "JWT",
            "x5t": self.x5t(),
        });
        let claims = json!({
            "aud": audience,
            "iss": client_id,
            "sub": client_id,
            "jti": uuid::Uuid::new_v4().to_string(),
            "nbf": now,
            "iat": now,
            "exp": now + ASSERTION_LIFETIME_SECS,
        });

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );

        let mut signature = vec![0u8; self.key.public().modulus_len()];
        self.key
            .sign(
                &RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|_| {
                PreflightError::Certificate("signing the client assertion failed".into())
            })?;

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

/// A certificate file in the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub path: PathBuf,
    pub thumbprint: String,
    pub has_private_key: bool,
}

/// List certificates in a store directory (`*.pem`, `*.crt`, `*.cer`).
///
/// Unreadable files are skipped with a debug log.
pub fn list_store(store: &Path) -> Result<Vec<StoreEntry>> {
    if !store.is_dir() {
        return Err(PreflightError::Certificate(format!(
            "certificate store {} does not exist",
            store.display()
        )));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(store)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| {
                ["pem", "crt", "cer"]
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
        })
        .collect();
    paths.sort();

    let mut entries = Vec::new();
    for path in paths {
        let read = fs::read(&path)
            .map_err(PreflightError::from)
            .and_then(|b| read_pem(&b));
        let contents = match read {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping store entry");
                continue;
            }
        };

        let has_private_key = contents.key.is_some();
        for cert in contents.certs {
            entries.push(StoreEntry {
                path: path.clone(),
                thumbprint: thumbprint_of(&cert),
                has_private_key,
            });
        }
    }

    Ok(entries)
}
