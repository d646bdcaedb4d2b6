//! HTTP boundary
//!
//! Minimal HTTP/1.1 handling on a tokio listener: one request per
//! connection, JSON in and out, permissive CORS.

use crate::catalog::schema_map;
use crate::error::{Nl2SqlError, Result};
use crate::pipeline::Nl2SqlService;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const MAX_REQUEST_BYTES: usize = 1_000_000;

#[derive(Debug, Deserialize)]
struct NlRequest {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    sql: String,
}

#[derive(Clone)]
pub struct ApiServer {
    service: Arc<Nl2SqlService>,
}

impl ApiServer {
    pub fn new(service: Arc<Nl2SqlService>) -> Self {
        Self { service }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!("Server listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("New connection from: {}", addr);
            let server = self.clone();
            tokio::spawn(async move { server.handle_connection(stream).await });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        let mut buffer = Vec::new();
        let mut temp_buf = [0; 8192];

        let read_result = timeout(Duration::from_secs(5), async {
            loop {
                match stream.read(&mut temp_buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buffer.extend_from_slice(&temp_buf[..n]);
                        if let Some(headers_end) = find_headers_end(&buffer) {
                            let head = String::from_utf8_lossy(&buffer[..headers_end]);
                            let content_length = extract_content_length(&head).unwrap_or(0);
                            if buffer.len() >= headers_end + content_length {
                                break;
                            }
                        }
                        if buffer.len() > MAX_REQUEST_BYTES {
                            break;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
        .await;

        match read_result {
            Err(_) => {
                warn!("Request read timeout");
                return;
            }
            Ok(Err(e)) => {
                warn!("Failed to read from stream: {}", e);
                return;
            }
            Ok(Ok(())) => {}
        }
        if buffer.is_empty() {
            return;
        }

        let response = match String::from_utf8(buffer) {
            Ok(request) => self.handle_request(&request).await,
            Err(_) => error_response(&Nl2SqlError::Input("Request is not valid UTF-8".to_string())),
        };
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            warn!("Failed to write response: {}", e);
        }
    }

    /// Route one raw HTTP request and render the full response.
    pub async fn handle_request(&self, request: &str) -> String {
        let Some(request_line) = request.lines().next() else {
            return create_response(400, "{}");
        };
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 {
            return create_response(400, "{}");
        }

        let method = parts[0].to_string();
        let (path, query_string) = match parts[1].split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (parts[1], None),
        };
        let path = match path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        let body = request
            .find("\r\n\r\n")
            .map(|i| request[i + 4..].trim())
            .unwrap_or("");

        let span = info_span!("request", id = %Uuid::new_v4(), method = %method, path = %path);
        async move {
            let started = std::time::Instant::now();
            let response = self.route(&method, &path, query_string, body).await;
            info!("Handled in {:?}", started.elapsed());
            response
        }
        .instrument(span)
        .await
    }

    async fn route(&self, method: &str, path: &str, query_string: Option<&str>, body: &str) -> String {
        let result = match (method, path) {
            ("OPTIONS", _) => return create_response(204, ""),
            ("GET", "/") => Ok(json!({"message": "DataInsight AI backend is running!"})),
            ("POST", "/nl2sql") => self.nl2sql(body).await,
            ("POST", "/ask") => self.ask(body).await,
            ("POST", "/query") => self.query(body).await,
            ("GET", "/schema") => self.schema().await,
            ("GET", "/rag/search") => self.rag_search(query_string).await,
            ("GET", "/rag/tables") => self.rag_tables().await,
            ("POST", "/rag/rebuild") => self.rag_rebuild().await,
            _ => {
                return create_response(
                    404,
                    &json!({"detail": "Not Found", "stage": "input"}).to_string(),
                )
            }
        };

        match result {
            Ok(value) => create_response(200, &value.to_string()),
            Err(e) => error_response(&e),
        }
    }

    async fn nl2sql(&self, body: &str) -> Result<serde_json::Value> {
        let req: NlRequest = parse_body(body)?;
        let generated = self.service.generate(&req.text).await?;
        Ok(serde_json::to_value(generated)?)
    }

    async fn ask(&self, body: &str) -> Result<serde_json::Value> {
        let req: NlRequest = parse_body(body)?;
        let answer = self.service.ask(&req.text).await?;
        Ok(serde_json::to_value(answer)?)
    }

    async fn query(&self, body: &str) -> Result<serde_json::Value> {
        let req: QueryRequest = parse_body(body)?;
        info!("Query SQL: {}", req.sql);
        let result = self.service.run_query(&req.sql).await?;
        Ok(serde_json::Value::Array(
            result.rows.into_iter().map(serde_json::Value::Object).collect(),
        ))
    }

    async fn schema(&self) -> Result<serde_json::Value> {
        let tables = self.service.full_schema().await?;
        Ok(json!({ "schema": schema_map(&tables) }))
    }

    async fn rag_search(&self, query_string: Option<&str>) -> Result<serde_json::Value> {
        let query = query_param(query_string, "query")
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| Nl2SqlError::Input("Query parameter 'query' is required".to_string()))?;
        let top_k = match query_param(query_string, "top_k") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| Nl2SqlError::Input(format!("top_k must be a non-negative integer, got '{}'", raw)))?,
            None => self.service.options().top_k,
        };
        let search = self.service.search_schema(&query, top_k).await?;
        Ok(serde_json::to_value(search)?)
    }

    async fn rag_tables(&self) -> Result<serde_json::Value> {
        let tables = self.service.full_schema().await?;
        Ok(json!({ "total": tables.len(), "tables": tables }))
    }

    async fn rag_rebuild(&self) -> Result<serde_json::Value> {
        let version = self.service.rebuild_index().await?;
        let tables = self.service.index().current().map(|s| s.len()).unwrap_or(0);
        Ok(json!({ "version": version, "tables": tables }))
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    if body.is_empty() {
        return Err(Nl2SqlError::Input("JSON body required".to_string()));
    }
    serde_json::from_str(body).map_err(|e| Nl2SqlError::Input(format!("Invalid JSON body: {}", e)))
}

fn error_response(e: &Nl2SqlError) -> String {
    let status = e.status_code();
    if status >= 500 {
        error!("[{}] {}", e.stage(), e);
    } else {
        warn!("[{}] {}", e.stage(), e);
    }

    let mut body = json!({ "detail": e.to_string(), "stage": e.stage() });
    match e {
        Nl2SqlError::Extraction { raw_output } => {
            body["raw_output"] = json!(raw_output);
        }
        Nl2SqlError::Rejected { sql, reason } => {
            body["sql"] = json!(sql);
            body["reason"] = json!(reason);
        }
        _ => {}
    }
    create_response(status, &body.to_string())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

fn create_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text(status),
        body.len(),
        body
    )
}

fn find_headers_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

fn query_param(query_string: Option<&str>, key: &str) -> Option<String> {
    form_urlencoded::parse(query_string?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
