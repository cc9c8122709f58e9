//! Farmer API routing and JSON envelopes, driven without a socket.

mod common;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Method, StatusCode};

use audit_node::HttpServer;
use common::{address, node};

const PREFIX: &str = "/api/downstream/v1";

async fn call(
    server: &HttpServer,
    method: Method,
    path: &str,
    body: &str,
) -> (StatusCode, serde_json::Value) {
    let resp = server
        .route(method, path, Bytes::from(body.to_string()), "10.4.0.1".to_string())
        .await;
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_token_and_chunk_routes() {
    let node = node(1024, 1024, 2 * 1024).await;
    node.maintainer.reconcile_once().await.unwrap();
    let server = HttpServer::new(node.services.clone(), "127.0.0.1:0".parse().unwrap(), PREFIX);

    let (status, body) = call(&server, Method::GET, &format!("{}/", PREFIX), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "ok");

    let (status, body) = call(
        &server,
        Method::POST,
        &format!("{}/new/{}", PREFIX, address(0)),
        r#"{"message": "i own this", "signature": "sig"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "digest-sha256");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = call(&server, Method::GET, &format!("{}/chunk/{}/1024", PREFIX, token), "").await;
    assert_eq!(status, StatusCode::OK);
    let chunks = body["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["size"], 1024);
    assert_eq!(chunks[0]["interval"], 300);
    let file_hash = chunks[0]["file_hash"].as_str().unwrap().to_string();

    let (status, body) = call(
        &server,
        Method::GET,
        &format!("{}/challenge/{}/{}", PREFIX, token, file_hash),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["challenges"][0]["status"], "ok");
    assert_eq!(body["challenges"][0]["file_hash"], file_hash.as_str());
    assert_eq!(body["challenges"][0]["challenge"], chunks[0]["challenge"]);

    let (status, body) = call(&server, Method::GET, &format!("{}/chunk/{}/lots", PREFIX, token), "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, body) = call(&server, Method::DELETE, &format!("{}/token/{}", PREFIX, token), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&server, Method::GET, &format!("{}/heartbeat/{}", PREFIX, token), "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Nonexistent token.");
}

#[tokio::test]
async fn test_error_envelopes() {
    let node = node(1024, 1024, 1024).await;
    let server = HttpServer::new(node.services.clone(), "127.0.0.1:0".parse().unwrap(), PREFIX);

    let (status, body) = call(&server, Method::GET, &format!("{}/new/not-base58", PREFIX), "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid address given: address is not a valid address.");

    let (status, body) = call(&server, Method::GET, &format!("{}/new/{}", PREFIX, address(9)), "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid address given: address must be in whitelist.");

    let (status, _) = call(&server, Method::GET, &format!("{}/status/list/by/karma", PREFIX), "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&server, Method::GET, &format!("{}/status/list/by/d/uptime/10/0", PREFIX), "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = call(&server, Method::GET, "/elsewhere", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&server, Method::GET, "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunks"], 0);
}

#[tokio::test]
async fn test_unparseable_answer_body_yields_empty_report() {
    let node = node(1024, 1024, 1024).await;
    let server = HttpServer::new(node.services.clone(), "127.0.0.1:0".parse().unwrap(), PREFIX);

    let (_, body) = call(&server, Method::GET, &format!("{}/new/{}", PREFIX, address(1)), "").await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = call(&server, Method::POST, &format!("{}/answer/{}", PREFIX, token), "{not json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"], serde_json::json!([]));
}
