//! HTTP API for farmers
//!
//! All routes below are mounted under `api_prefix` (default
//! `/api/downstream/v1`). Every response is JSON.
//!
//! ## Tokens
//! - `GET|POST /new/{address}` - Create a token (optional body `{message, signature}`)
//! - `DELETE /token/{token}` - Delete a token and its contracts
//! - `GET /heartbeat/{token}` - Verifier kind and public parameters
//!
//! ## Contracts
//! - `GET /chunk/{token}[/{size}]` - Request chunks up to `size` bytes
//! - `GET /challenge/{token}[/{file_hash}]` - Current challenges
//! - `POST /answer/{token}` - Batch proofs `{"proofs": [{file_hash, proof}]}`
//! - `POST /answer/{token}/{file_hash}` - One proof `{"proof": ...}`
//!
//! ## Status
//! - `GET /status/list[/online][/by[/d]/{sort}][/{limit}[/{page}]]`
//! - `GET /status/show/{farmer_id}`
//!
//! `GET /health` is served outside the prefix.
//!
//! ## Example Usage
//!
//! ```bash
//! # Create a token
//! curl http://localhost:5000/api/downstream/v1/new/1BoatSLRHtKNngkdXEeobR76b53LETtpyT
//!
//! # Ask for 64 KiB of chunks
//! curl http://localhost:5000/api/downstream/v1/chunk/$TOKEN/65536
//!
//! # Farmers sorted by uptime, best first, 20 per page
//! curl http://localhost:5000/api/downstream/v1/status/list/by/d/uptime/20/0
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::services::contract_service::ChallengeReport;
use crate::services::{
    error_response, from_result, method_not_allowed, not_found, ok, HandlerResult, Services,
    StatusQuery,
};
use crate::verifier::Proof;

/// Optional ownership proof sent with a token request
#[derive(Debug, Default, Deserialize)]
struct NewTokenRequest {
    message: Option<String>,
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SingleProof {
    proof: String,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    api_prefix: String,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr, api_prefix: impl Into<String>) -> Self {
        let api_prefix = api_prefix.into().trim_end_matches('/').to_string();
        Self {
            services,
            bind_addr,
            api_prefix,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, prefix = %self.api_prefix, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let body = req.into_body().collect().await?.to_bytes();

        Ok(self.route(method, &path, body, remote_addr.ip().to_string()).await)
    }

    /// Dispatch one request. `ip` is the farmer's observed address.
    pub async fn route(&self, method: Method, path: &str, body: Bytes, ip: String) -> Response<Full<Bytes>> {
        debug!(method = %method, path = %path, ip = %ip, "Incoming request");

        if path == "/health" {
            return match method {
                Method::GET => from_result(self.handle_health().await),
                _ => method_not_allowed(),
            };
        }

        let Some(rest) = path.strip_prefix(self.api_prefix.as_str()) else {
            return not_found("Not Found");
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        let result = match (method, segments.as_slice()) {
            (Method::GET, []) => Ok(ok(&serde_json::json!({ "msg": "ok" }))),

            // Tokens
            (Method::GET | Method::POST, ["new", address]) => {
                self.handle_new_token(address, ip, &body).await
            }
            (Method::DELETE, ["token", token]) => self.handle_delete_token(token).await,
            (Method::GET, ["heartbeat", token]) => self.handle_heartbeat(token).await,

            // Contracts
            (Method::GET, ["chunk", token]) => self.handle_chunk(token, None, ip).await,
            (Method::GET, ["chunk", token, size]) => match size.parse::<u64>() {
                Ok(size) => self.handle_chunk(token, Some(size), ip).await,
                Err(_) => Err(NodeError::InvalidParameter("Invalid size.".to_string())),
            },
            (Method::GET, ["challenge", token]) => self.handle_challenges(token, ip).await,
            (Method::GET, ["challenge", token, file_hash]) => {
                self.handle_challenge(token, file_hash, ip).await
            }
            (Method::POST, ["answer", token]) => self.handle_answers(token, ip, &body).await,
            (Method::POST, ["answer", token, file_hash]) => {
                self.handle_answer(token, file_hash, ip, &body).await
            }

            // Status
            (Method::GET, ["status", "show", farmer_id]) => self.handle_status_show(farmer_id).await,
            (Method::GET, ["status", "list", rest @ ..]) => match parse_status_query(rest) {
                Ok(query) => self.handle_status_list(query).await,
                Err(e) => Err(e),
            },

            _ => return not_found("Not Found"),
        };

        result.unwrap_or_else(error_response)
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Result<serde_json::Value, NodeError> {
        let db = self.services.db.clone();
        let stats = blocking(move || db.stats()).await?;
        Ok(serde_json::json!({
            "status": "ok",
            "addresses": stats.addresses,
            "tokens": stats.tokens,
            "files": stats.files,
            "chunks": stats.chunks,
            "contracts": stats.contracts,
        }))
    }

    /// GET|POST /new/{address}
    async fn handle_new_token(&self, address: &str, ip: String, body: &Bytes) -> HandlerResult {
        let request: NewTokenRequest = if body.is_empty() {
            NewTokenRequest::default()
        } else {
            serde_json::from_slice(body)?
        };

        let tokens = self.services.tokens.clone();
        let address = address.to_string();
        let issued = blocking(move || {
            tokens.create_token(
                &address,
                &ip,
                request.message.as_deref(),
                request.signature.as_deref(),
            )
        })
        .await?;
        Ok(ok(&issued))
    }

    /// DELETE /token/{token}
    async fn handle_delete_token(&self, token: &str) -> HandlerResult {
        let tokens = self.services.tokens.clone();
        let token = token.to_string();
        blocking(move || tokens.delete_token(&token)).await?;
        Ok(ok(&serde_json::json!({ "status": "ok" })))
    }

    /// GET /heartbeat/{token}
    async fn handle_heartbeat(&self, token: &str) -> HandlerResult {
        let tokens = self.services.tokens.clone();
        let token = token.to_string();
        let heartbeat = blocking(move || tokens.heartbeat(&token)).await?;
        Ok(ok(&heartbeat))
    }

    /// GET /chunk/{token}[/{size}]
    async fn handle_chunk(&self, token: &str, size: Option<u64>, ip: String) -> HandlerResult {
        let grants = self
            .services
            .contracts
            .grant_chunks(token.to_string(), ip, size)
            .await?;
        Ok(ok(&serde_json::json!({ "chunks": grants })))
    }

    /// GET /challenge/{token}
    async fn handle_challenges(&self, token: &str, ip: String) -> HandlerResult {
        let contracts = self.services.contracts.clone();
        let token = token.to_string();
        let reports = blocking(move || contracts.challenge_all(&token, &ip)).await?;
        Ok(ok(&serde_json::json!({ "challenges": reports })))
    }

    /// GET /challenge/{token}/{file_hash}
    async fn handle_challenge(&self, token: &str, file_hash: &str, ip: String) -> HandlerResult {
        let contracts = self.services.contracts.clone();
        let token = token.to_string();
        let hash = file_hash.to_string();
        let info = blocking(move || contracts.challenge_one(&token, &ip, &hash)).await?;

        let report = ChallengeReport {
            file_hash: file_hash.to_string(),
            status: Some("ok"),
            info: Some(info),
            error: None,
        };
        Ok(ok(&serde_json::json!({ "challenges": [report] })))
    }

    /// POST /answer/{token}
    ///
    /// A body that is not JSON yields an empty report.
    async fn handle_answers(&self, token: &str, ip: String, body: &Bytes) -> HandlerResult {
        let items = match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => value
                .get("proofs")
                .and_then(|p| p.as_array())
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "Unparseable proof batch");
                Vec::new()
            }
        };

        let report = self
            .services
            .contracts
            .answer_batch(token.to_string(), ip, items)
            .await?;
        Ok(ok(&serde_json::json!({ "report": report })))
    }

    /// POST /answer/{token}/{file_hash}
    async fn handle_answer(&self, token: &str, file_hash: &str, ip: String, body: &Bytes) -> HandlerResult {
        let submission: SingleProof = serde_json::from_slice(body)?;
        let proof = Proof::from_base64(&submission.proof)?;

        let contracts = self.services.contracts.clone();
        let token = token.to_string();
        let hash = file_hash.to_string();
        blocking(move || contracts.answer_one(&token, &ip, &hash, &proof)).await?;
        Ok(ok(&serde_json::json!({ "status": "ok" })))
    }

    /// GET /status/list/...
    async fn handle_status_list(&self, query: StatusQuery) -> HandlerResult {
        let status = self.services.status.clone();
        let farmers = blocking(move || status.list(&query)).await?;
        Ok(ok(&farmers))
    }

    /// GET /status/show/{farmer_id}
    async fn handle_status_show(&self, farmer_id: &str) -> HandlerResult {
        let status = self.services.status.clone();
        let farmer_id = farmer_id.to_string();
        let farmer = blocking(move || status.show(&farmer_id)).await?;
        Ok(ok(&farmer))
    }
}

/// Run a synchronous service call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, NodeError>
where
    F: FnOnce() -> Result<T, NodeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| NodeError::Internal(format!("Blocking task failed: {}", e)))?
}

/// Parse `[online][/by[/d]/{sort}][/{limit}[/{page}]]`
fn parse_status_query(mut rest: &[&str]) -> Result<StatusQuery, NodeError> {
    let mut query = StatusQuery::default();

    if let ["online", tail @ ..] = rest {
        query.online_only = true;
        rest = tail;
    }

    if let ["by", tail @ ..] = rest {
        rest = tail;
        if let ["d", tail @ ..] = rest {
            query.descending = true;
            rest = tail;
        }
        let [sort, tail @ ..] = rest else {
            return Err(NodeError::InvalidParameter("Invalid sort.".to_string()));
        };
        query.sort = Some(sort.to_string());
        rest = tail;
    }

    match rest {
        [] => {}
        [limit] => query.limit = Some(parse_number(limit, "limit")?),
        [limit, page] => {
            query.limit = Some(parse_number(limit, "limit")?);
            query.page = parse_number(page, "page")?;
        }
        _ => return Err(NodeError::NotFound("Not Found".to_string())),
    }
    Ok(query)
}

fn parse_number(value: &str, what: &str) -> Result<usize, NodeError> {
    value
        .parse()
        .map_err(|_| NodeError::InvalidParameter(format!("Invalid {}.", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_query() {
        let q = parse_status_query(&[]).unwrap();
        assert!(!q.online_only && q.sort.is_none() && q.limit.is_none());

        let q = parse_status_query(&["online", "by", "d", "uptime", "20", "3"]).unwrap();
        assert!(q.online_only);
        assert!(q.descending);
        assert_eq!(q.sort.as_deref(), Some("uptime"));
        assert_eq!(q.limit, Some(20));
        assert_eq!(q.page, 3);

        let q = parse_status_query(&["by", "size", "5"]).unwrap();
        assert!(!q.descending);
        assert_eq!(q.sort.as_deref(), Some("size"));
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.page, 0);
    }

    #[test]
    fn test_parse_status_query_errors() {
        assert!(matches!(
            parse_status_query(&["by"]),
            Err(NodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_status_query(&["ten"]),
            Err(NodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_status_query(&["1", "2", "3"]),
            Err(NodeError::NotFound(_))
        ));
    }
}
