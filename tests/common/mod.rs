//! Shared helpers for integration tests

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use m365_preflight::config::{ConfigManager, ValidatedConfig};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use wiremock::MockServer;

pub const TENANT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const CLIENT_ID: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
pub const ORGANIZATION: &str = "contoso.onmicrosoft.com";

/// Unsigned JWT carrying `claims`
pub fn fake_jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("{}.{}.sig", header, payload)
}

/// App-only token for the test tenant with the given roles
pub fn app_token(roles: &[&str]) -> String {
    fake_jwt(json!({
        "tid": TENANT_ID,
        "appid": CLIENT_ID,
        "roles": roles,
    }))
}

pub fn token_response(access_token: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "access_token": access_token,
    })
}

pub fn token_path() -> String {
    format!("/{}/oauth2/v2.0/token", TENANT_ID)
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Base configuration pointing every endpoint at `server`, with `extra`
/// fields merged on top.
pub fn config_json(server: &MockServer, extra: Value) -> Value {
    let mut config = json!({
        "tenantId": TENANT_ID,
        "clientId": CLIENT_ID,
        "organization": ORGANIZATION,
        "authorityHost": server.uri(),
        "graphBaseUrl": format!("{}/v1.0", server.uri()),
        "exchangeBaseUrl": server.uri(),
        "timeoutSecs": 5,
        "interactiveFallback": false,
    });

    if let (Some(base), Value::Object(extra)) = (config.as_object_mut(), extra) {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }
    config
}

pub fn write_json(dir: &Path, name: &str, value: &Value) {
    std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Write `config.json` into a fresh directory and load it.
pub fn load_config(dir: &Path, value: Value) -> ValidatedConfig {
    write_json(dir, "config.json", &value);
    ConfigManager::with_dir(dir).load().unwrap()
}
