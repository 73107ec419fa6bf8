//! Authentication negotiation against a mock endpoint.

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use terrace_client::{ConnectorBuilder, Error, JsonFileStorage, Services};

fn settings_body() -> serde_json::Value {
    json!({
        "effortTracking": false,
        "storyTrackingLevel": "Off",
        "defectTrackingLevel": "Off"
    })
}

fn no_secrets() -> JsonFileStorage {
    JsonFileStorage::new("/nonexistent/client_secrets.json")
}

#[tokio::test]
async fn basic_credential_answers_challenge() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .and(header("Authorization", "Basic YWRtaW46YWRtaW4="))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Basic realm=\"terrace\""),
        )
        .mount(&server)
        .await;

    let connector = ConnectorBuilder::new(server.uri())
        .credentials("admin", "admin")
        .secret_storage(no_secrets())
        .build()
        .unwrap();
    let services = Services::new(connector);

    let config = services.server_config().await.unwrap();
    assert!(!config.effort_tracking);
}

#[tokio::test]
async fn bearer_credential_fetches_access_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-123",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Bearer"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("client_secrets.json");
    std::fs::write(
        &secrets_path,
        json!({
            "client_id": "terrace-sdk",
            "client_secret": "s3cr3t",
            "token_url": format!("{}/token", server.uri())
        })
        .to_string(),
    )
    .unwrap();

    let connector = ConnectorBuilder::new(server.uri())
        .secret_storage(JsonFileStorage::new(&secrets_path))
        .integrated_auth(false)
        .build()
        .unwrap();
    let services = Services::new(connector);

    services.server_config().await.unwrap();
}

#[tokio::test]
async fn revoked_bearer_token_is_refreshed_during_negotiation() {
    let server = MockServer::start().await;

    // First grant hands out a token the server no longer accepts; the
    // second grant mints a good one.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-revoked",
            "expires_in": 3600
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-fresh",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .and(header("Authorization", "Bearer tok-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Bearer"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("client_secrets.json");
    std::fs::write(
        &secrets_path,
        json!({
            "client_id": "terrace-sdk",
            "client_secret": "s3cr3t",
            "token_url": format!("{}/token", server.uri())
        })
        .to_string(),
    )
    .unwrap();

    let connector = ConnectorBuilder::new(server.uri())
        .secret_storage(JsonFileStorage::new(&secrets_path))
        .integrated_auth(false)
        .build()
        .unwrap();
    let services = Services::new(connector);

    // The revoked token 401s once; the cache is dropped and the request
    // succeeds with the reissued token inside the same negotiation.
    services.server_config().await.unwrap();
}

#[tokio::test]
async fn integrated_without_source_falls_through_to_basic() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .and(header("Authorization", "Basic YWRtaW46YWRtaW4="))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Negotiate, NTLM, Basic realm=\"terrace\""),
        )
        .mount(&server)
        .await;

    // Integrated schemes are registered but no token source is plugged
    // in, so Negotiate and NTLM decline and Basic answers.
    let connector = ConnectorBuilder::new(server.uri())
        .credentials("admin", "admin")
        .integrated_auth(true)
        .secret_storage(no_secrets())
        .build()
        .unwrap();
    let services = Services::new(connector);

    services.server_config().await.unwrap();
}

#[tokio::test]
async fn exhausted_challenges_fail_with_authentication_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Basic realm=\"terrace\""),
        )
        .mount(&server)
        .await;

    // No username, so only integrated schemes are registered, and the
    // server only challenges Basic.
    let connector = ConnectorBuilder::new(server.uri())
        .secret_storage(no_secrets())
        .build()
        .unwrap();
    let services = Services::new(connector);

    let err = services.server_config().await.unwrap_err();
    match err {
        Error::Authentication { challenged, .. } => assert_eq!(challenged, "Basic"),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn established_header_is_reused() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .and(header("Authorization", "Basic YWRtaW46YWRtaW4="))
        .respond_with(ResponseTemplate::new(200).set_body_json(settings_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/config/settings"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Basic realm=\"terrace\""),
        )
        .expect(1)
        .mount(&server)
        .await;

    let connector = ConnectorBuilder::new(server.uri())
        .credentials("admin", "admin")
        .secret_storage(no_secrets())
        .build()
        .unwrap();
    let services = Services::new(connector);

    // First call negotiates; the second goes straight through with the
    // established header, so the 401 mock fires exactly once.
    services.server_config().await.unwrap();
    services.server_config().await.unwrap();
}
