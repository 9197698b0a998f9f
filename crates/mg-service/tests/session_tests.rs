//! Session lifecycle tests over the HTTP surface.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use mg_test_utils::TestGateway;

#[tokio::test]
async fn test_session_creation_returns_token_and_expiry() -> Result<(), anyhow::Error> {
    let gateway = TestGateway::builder().spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/session", gateway.url()))
        .header("user-agent", "mg-tests/1.0")
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await?;
    let token = body["token"].as_str().unwrap();
    assert_eq!(token.split('.').count(), 3, "token should be a signed JWT");
    assert!(body["expiresAt"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn test_protected_route_rejects_missing_token() -> Result<(), anyhow::Error> {
    let gateway = TestGateway::builder().spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/medical/drug-interactions", gateway.url()))
        .json(&serde_json::json!({"medications": ["aspirin"]}))
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["code"], "NO_SESSION_TOKEN");
    assert!(body["timestamp"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn test_protected_route_rejects_garbage_token() -> Result<(), anyhow::Error> {
    let gateway = TestGateway::builder().spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/medical/tools", gateway.url()))
        .bearer_auth("not-a-real-token")
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["code"], "INVALID_SESSION");
    Ok(())
}

#[tokio::test]
async fn test_token_works_until_session_is_gone() -> Result<(), anyhow::Error> {
    let gateway = TestGateway::builder().spawn().await?;
    let token = gateway.session_token().await?;
    let client = reqwest::Client::new();

    // Valid twice in a row: validation touches, never consumes
    for _ in 0..2 {
        let response = client
            .get(format!("{}/api/medical/tools", gateway.url()))
            .bearer_auth(&token)
            .send()
            .await?;
        assert_eq!(response.status(), 200);
    }
    Ok(())
}

#[tokio::test]
async fn test_token_from_another_deployment_is_unknown() -> Result<(), anyhow::Error> {
    // Two gateways share signing material (same test secret) but not the
    // session map, so a foreign token must be rejected as invalid.
    let first = TestGateway::builder().spawn().await?;
    let second = TestGateway::builder().spawn().await?;

    let foreign_token = first.session_token().await?;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/api/medical/tools", second.url()))
        .bearer_auth(&foreign_token)
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["code"], "INVALID_SESSION");
    Ok(())
}

#[tokio::test]
async fn test_session_issuance_rate_limit() -> Result<(), anyhow::Error> {
    let gateway = TestGateway::builder().session_rate_cap(3).spawn().await?;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let response = client
            .post(format!("{}/api/session", gateway.url()))
            .send()
            .await?;
        assert_eq!(response.status(), 200);
    }

    let response = client
        .post(format!("{}/api/session", gateway.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 429);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["code"], "RATE_LIMITED");
    Ok(())
}

#[tokio::test]
async fn test_session_creation_is_audited() -> Result<(), anyhow::Error> {
    let gateway = TestGateway::builder().spawn().await?;
    gateway.session_token().await?;

    let log = gateway.audit_stream("audit.log").await;
    assert!(
        log.contains(r#""resource":"session""#) && log.contains(r#""action":"create""#),
        "expected a session/create access record, got: {log}"
    );
    Ok(())
}
