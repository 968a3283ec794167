//! End-to-end connection tests against a mocked identity provider,
//! Microsoft Graph and the Exchange Online admin API.

mod common;

use common::*;
use m365_preflight::credentials::CredentialResolver;
use m365_preflight::error::AuthRejection;
use m365_preflight::graph::GraphConnector;
use m365_preflight::graph::exchange_online::{ExchangeConnector, ProbeOutcome};
use m365_preflight::permissions::Verdict;
use m365_preflight::report;
use m365_preflight::session::{
    AuthMethod, ConnectionState, FailureKind, ServiceKind, Sessions,
};
use m365_preflight::validator::Validator;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_graph_token(server: &MockServer, roles: &[&str]) {
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("graph.microsoft.com"))
        .and(body_string_contains("client_secret="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&app_token(roles))))
        .mount(server)
        .await;
}

async fn mount_exchange_token(server: &MockServer, roles: &[&str]) {
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("outlook.office365.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&app_token(roles))))
        .mount(server)
        .await;
}

async fn mount_organization(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1.0/organization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": TENANT_ID, "displayName": "Contoso Ltd" }]
        })))
        .mount(server)
        .await;
}

fn invoke_path() -> String {
    format!("/adminapi/beta/{}/InvokeCommand", ORGANIZATION)
}

#[tokio::test]
async fn test_client_secret_connects_to_graph() {
    let server = MockServer::start().await;
    mount_graph_token(&server, &["User.Read.All", "Directory.ReadWrite.All"]).await;
    mount_organization(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), config_json(&server, json!({ "clientSecret": "s3cret" })));

    let resolver = CredentialResolver::from_config(&config, false);
    let connector = GraphConnector::new(&config).unwrap();
    let mut sessions = Sessions::new();
    resolver.connect(&mut sessions, &connector).await;

    let session = sessions
        .state(ServiceKind::Directory)
        .session()
        .expect("graph should be connected");
    assert_eq!(session.method, AuthMethod::ClientSecret);
    assert_eq!(session.tenant_id, TENANT_ID);
    assert_eq!(session.display_name.as_deref(), Some("Contoso Ltd"));
    assert!(session.warnings.is_empty());
    assert_eq!(
        session.granted_scopes.as_deref(),
        Some(&["User.Read.All".to_string(), "Directory.ReadWrite.All".to_string()][..])
    );
}

#[tokio::test]
async fn test_invalid_secret_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided. Ensure the secret being sent in the request is the client secret value."
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), config_json(&server, json!({ "clientSecret": "wrong" })));

    let state = CredentialResolver::from_config(&config, false)
        .establish(&GraphConnector::new(&config).unwrap())
        .await;

    match state {
        ConnectionState::Failed(reason) => {
            assert_eq!(
                reason.kind,
                FailureKind::AuthenticationRejected(AuthRejection::InvalidClient)
            );
            assert!(reason.detail.contains("AADSTS7000215"));
            assert_eq!(reason.attempts.len(), 1);
            assert!(reason.diagnosis.contains("client ID and secret"));
        }
        other => panic!("expected failure, got {}", other.label()),
    }
}

#[tokio::test]
async fn test_rejected_certificate_falls_back_to_secret() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("client_assertion="))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS700027: Client assertion contains an invalid signature."
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_graph_token(&server, &["User.Read.All"]).await;
    mount_organization(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(
        dir.path(),
        config_json(
            &server,
            json!({
                "certificatePath": fixture("app-cert.pem"),
                "clientSecret": "s3cret"
            }),
        ),
    );

    let resolver = CredentialResolver::from_config(&config, false);
    assert_eq!(resolver.strategies().len(), 2);

    let state = resolver.establish(&GraphConnector::new(&config).unwrap()).await;
    let session = state.session().expect("secret should have connected");
    assert_eq!(session.method, AuthMethod::ClientSecret);
}

#[tokio::test]
async fn test_slow_token_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&app_token(&[])))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(
        dir.path(),
        config_json(&server, json!({ "clientSecret": "s3cret", "timeoutSecs": 1 })),
    );

    let state = CredentialResolver::from_config(&config, false)
        .establish(&GraphConnector::new(&config).unwrap())
        .await;

    match state {
        ConnectionState::Failed(reason) => assert_eq!(reason.kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {}", other.label()),
    }
}

#[tokio::test]
async fn test_graph_denied_organization_lookup_is_a_warning() {
    let server = MockServer::start().await;
    mount_graph_token(&server, &[]).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/organization"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": "Authorization_RequestDenied", "message": "Insufficient privileges" }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), config_json(&server, json!({ "clientSecret": "s3cret" })));

    let state = CredentialResolver::from_config(&config, false)
        .establish(&GraphConnector::new(&config).unwrap())
        .await;

    let session = state.session().expect("403 on verification should not fail the session");
    assert_eq!(session.warnings.len(), 1);
    assert!(session.warnings[0].contains("403"));
}

#[tokio::test]
async fn test_exchange_requires_organization() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut value = config_json(&server, json!({ "clientSecret": "s3cret" }));
    value.as_object_mut().unwrap().remove("organization");
    let config = load_config(dir.path(), value);

    let state = CredentialResolver::from_config(&config, false)
        .establish(&ExchangeConnector::new(&config).unwrap())
        .await;

    match state {
        ConnectionState::Failed(reason) => {
            assert_eq!(reason.kind, FailureKind::CredentialIncomplete);
            assert!(reason.detail.contains("organization"));
        }
        other => panic!("expected failure, got {}", other.label()),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exchange_probes_report_each_cmdlet() {
    let server = MockServer::start().await;
    mount_exchange_token(&server, &["Exchange.ManageAsApp"]).await;

    Mock::given(method("POST"))
        .and(path(invoke_path()))
        .and(header(
            "X-AnchorMailbox",
            format!(
                "UPN:SystemMailbox{{bb558c35-97f1-4cb9-8ff7-d53741dc928c}}@{}",
                ORGANIZATION
            )
            .as_str(),
        ))
        .and(body_string_contains("Get-OrganizationConfig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "DisplayName": "Contoso", "Name": "contoso.onmicrosoft.com" }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(invoke_path()))
        .and(body_string_contains("Get-Mailbox"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Access denied"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(
        dir.path(),
        config_json(
            &server,
            json!({
                "clientSecret": "s3cret",
                "exchangeProbes": [
                    { "cmdlet": "Get-OrganizationConfig" },
                    { "cmdlet": "Get-Mailbox", "parameters": { "ResultSize": 1 } }
                ]
            }),
        ),
    );

    let connector = ExchangeConnector::new(&config).unwrap();
    let state = CredentialResolver::from_config(&config, false)
        .establish(&connector)
        .await;
    let session = state.session().expect("exchange should be connected");
    assert_eq!(session.display_name.as_deref(), Some("Contoso"));
    assert_eq!(session.organization.as_deref(), Some(ORGANIZATION));

    let results = connector.run_probes(session, &config.exchange_probes).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].outcome, ProbeOutcome::Passed { rows: 1 });
    assert!(matches!(
        results[1].outcome,
        ProbeOutcome::Failed { ref detail, .. } if detail.contains("403")
    ));
}

#[tokio::test]
async fn test_full_check_reports_gaps() {
    let server = MockServer::start().await;
    mount_graph_token(&server, &["User.Read.All"]).await;
    mount_organization(&server).await;
    mount_exchange_token(&server, &["Exchange.ManageAsApp"]).await;
    Mock::given(method("POST"))
        .and(path(invoke_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = load_config(
        dir.path(),
        config_json(
            &server,
            json!({
                "clientSecret": "s3cret",
                "permissions": {
                    "directory": {
                        "required": ["User.Read.All", "Mail.ReadWrite"],
                        "featureImpact": { "Mail.ReadWrite": ["Mailbox export"] }
                    }
                }
            }),
        ),
    );

    let validator = Validator::new(config, false).unwrap();
    let mut sessions = Sessions::new();
    validator.connect(&mut sessions, &ServiceKind::ALL).await;

    assert!(sessions.state(ServiceKind::Directory).is_connected());
    assert!(sessions.state(ServiceKind::MailAdmin).is_connected());

    let assessments = validator.assess(&sessions, &ServiceKind::ALL);
    let directory = assessments[0].gaps.as_ref().unwrap();
    assert_eq!(directory.missing_permissions(), vec!["Mail.ReadWrite"]);
    assert_eq!(directory.verdicts[0].verdict, Verdict::Granted);
    assert!(assessments[1].gaps.as_ref().unwrap().is_complete());

    let text = report::render(&sessions, &assessments);
    assert!(text.contains("Mailbox export"));
    assert!(text.contains("Remediation"));
    assert!(!text.contains(report::ALL_GRANTED));

    validator.close(&mut sessions).await;
    for service in ServiceKind::ALL {
        assert!(matches!(sessions.state(service), ConnectionState::Disconnected));
    }
}
