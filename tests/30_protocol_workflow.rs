//! End-to-end protocol lifecycle. Needs HANDOVER_TEST_DATABASE_URL.

mod common;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

struct Caller {
    id: Uuid,
    token: String,
}

impl Caller {
    fn new(email: &str) -> Self {
        let id = Uuid::new_v4();
        Self { id, token: common::token_for(id, email) }
    }
}

async fn call(
    client: &Client,
    caller: &Caller,
    method: reqwest::Method,
    url: String,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut request = client.request(method, url).bearer_auth(&caller.token);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let res = request.send().await?;
    let status = res.status();
    Ok((status, res.json().await?))
}

#[tokio::test]
async fn protocol_lifecycle_from_draft_to_completed() -> Result<()> {
    let server = common::ensure_server().await?;
    if !server.has_database() {
        return Ok(());
    }
    let http = Client::new();
    let worker = Caller::new("worker@example.com");
    let manager = Caller::new("manager@example.com");

    // first request creates the profiles with the default role
    let (status, me) = call(&http, &worker, reqwest::Method::GET, server.url("/api/auth/me"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["role"], "worker");
    call(&http, &manager, reqwest::Method::GET, server.url("/api/auth/me"), None).await?;
    common::cli(server, &["role", "set", &manager.id.to_string(), "manager"])?;

    let (status, created) = call(
        &http,
        &worker,
        reqwest::Method::POST,
        server.url("/api/clients"),
        Some(json!({ "name": "Jan Kowalski", "email": "jan.kowalski@example.com", "company_name": "Kowalski Sp. z o.o." })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let client_id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, protocol) = call(
        &http,
        &worker,
        reqwest::Method::POST,
        server.url("/api/protocols"),
        Some(json!({
            "client_id": client_id,
            "content": { "items": [
                { "description": "Laptop", "quantity": 1, "unit": "szt." },
                { "description": "Stacja dokująca", "quantity": 1, "unit": "szt." }
            ]}
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(protocol["data"]["status"], "draft");
    assert_eq!(protocol["data"]["content"]["client_name"], "Jan Kowalski");
    let id = protocol["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, reordered) = call(
        &http,
        &worker,
        reqwest::Method::PUT,
        server.url(&format!("/api/protocols/{}/items/order", id)),
        Some(json!({ "from": 1, "to": 0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reordered["data"]["content"]["items"][0]["description"], "Stacja dokująca");

    let send_body = json!({ "emailSubject": "Protokół odbioru", "emailBody": "W załączeniu protokół." });
    let send_url = server.url(&format!("/api/protocols/{}/send", id));

    let (status, _) = call(&http, &worker, reqwest::Method::POST, send_url.clone(), Some(send_body.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, sent) = call(&http, &manager, reqwest::Method::POST, send_url.clone(), Some(send_body.clone())).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["data"]["recipient"], "jan.kowalski@example.com");
    assert_eq!(sent["data"]["replayed"], false);

    let (status, replay) = call(&http, &manager, reqwest::Method::POST, send_url, Some(send_body)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["data"]["replayed"], true);
    assert_eq!(replay["data"]["message_id"], sent["data"]["message_id"]);

    // the uploaded document is served from local storage
    let document_url = sent["data"]["document_url"].as_str().unwrap_or_default();
    let document = http.get(document_url).send().await?;
    assert_eq!(document.status(), StatusCode::OK);
    assert!(document.bytes().await?.starts_with(b"%PDF"));

    let complete_url = server.url(&format!("/api/protocols/{}/complete", id));
    let (status, _) = call(&http, &worker, reqwest::Method::POST, complete_url.clone(), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, completed) = call(&http, &manager, reqwest::Method::POST, complete_url, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["data"]["status"], "completed");

    let (status, body) = call(
        &http,
        &manager,
        reqwest::Method::PUT,
        server.url(&format!("/api/protocols/{}", id)),
        Some(json!({ "content": { "items": [] } })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (status, _) =
        call(&http, &manager, reqwest::Method::DELETE, server.url(&format!("/api/protocols/{}", id)), None).await?;
    assert_eq!(status, StatusCode::CONFLICT, "completed protocols are only deletable by admins");
    Ok(())
}

#[tokio::test]
async fn process_document_renders_pdf() -> Result<()> {
    let server = common::ensure_server().await?;
    if !server.has_database() {
        return Ok(());
    }
    let http = Client::new();
    let worker = Caller::new("docs@example.com");

    let (_, created) = call(
        &http,
        &worker,
        reqwest::Method::POST,
        server.url("/api/clients"),
        Some(json!({ "name": "Anna Nowak" })),
    )
    .await?;
    let (_, protocol) = call(
        &http,
        &worker,
        reqwest::Method::POST,
        server.url("/api/protocols"),
        Some(json!({ "client_id": created["data"]["id"] })),
    )
    .await?;

    let res = http
        .post(server.url("/functions/v1/process-document"))
        .bearer_auth(&worker.token)
        .header("x-user-id", worker.id.to_string())
        .json(&json!({ "protocolId": protocol["data"]["id"], "format": "pdf" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/pdf");
    assert!(res.bytes().await?.starts_with(b"%PDF"));

    // x-user-id must name the token subject
    let res = http
        .post(server.url("/functions/v1/process-and-send-protocol"))
        .bearer_auth(&worker.token)
        .header("x-user-id", Uuid::new_v4().to_string())
        .json(&json!({ "protocolId": protocol["data"]["id"], "emailSubject": "s", "emailBody": "b" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}
