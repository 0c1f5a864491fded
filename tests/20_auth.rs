mod common;

use anyhow::Result;
use handover_api::auth::{encode_with_secret, Claims};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

async fn assert_unauthorized(res: reqwest::Response) -> Result<()> {
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn missing_token_is_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    assert_unauthorized(client.get(server.url("/api/clients")).send().await?).await?;
    assert_unauthorized(
        client
            .post(server.url("/functions/v1/process-document"))
            .json(&json!({ "protocolId": Uuid::new_v4() }))
            .send()
            .await?,
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn malformed_and_forged_tokens_are_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/api/auth/me")).header("Authorization", "Basic dXNlcjpwYXNz").send().await?;
    assert_unauthorized(res).await?;

    let res = client.get(server.url("/api/auth/me")).bearer_auth("not.a.jwt").send().await?;
    assert_unauthorized(res).await?;

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: Uuid::new_v4(),
        email: None,
        aud: common::JWT_AUDIENCE.to_string(),
        role: None,
        exp: now + 600,
        iat: now,
    };
    let forged = encode_with_secret(&claims, "some-other-secret")?;
    let res = client.get(server.url("/api/auth/me")).bearer_auth(forged).send().await?;
    assert_unauthorized(res).await?;

    let expired = Claims { exp: now - 3600, iat: now - 7200, ..claims };
    let token = encode_with_secret(&expired, common::JWT_SECRET)?;
    let res = client.get(server.url("/api/auth/me")).bearer_auth(token).send().await?;
    assert_unauthorized(res).await?;
    Ok(())
}

#[tokio::test]
async fn wrong_audience_is_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: Uuid::new_v4(),
        email: None,
        aud: "anon".to_string(),
        role: None,
        exp: now + 600,
        iat: now,
    };
    let token = encode_with_secret(&claims, common::JWT_SECRET)?;
    let res = reqwest::Client::new().get(server.url("/api/auth/me")).bearer_auth(token).send().await?;
    assert_unauthorized(res).await
}

#[tokio::test]
async fn valid_token_without_database_is_unavailable() -> Result<()> {
    let server = common::ensure_server().await?;
    if server.has_database() {
        return Ok(());
    }

    let token = common::token_for(Uuid::new_v4(), "worker@example.com");
    let res = reqwest::Client::new().get(server.url("/api/clients")).bearer_auth(token).send().await?;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    Ok(())
}
