mod common;

use common::{build_service, create_store, ScriptedGateway, BEIJING_COUNT_REPLY};
use datainsight::server::ApiServer;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn get(path: &str) -> String {
    format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path)
}

fn post(path: &str, body: &str) -> String {
    format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        path,
        body.len(),
        body
    )
}

/// Status code and parsed JSON body of a raw response.
fn parse(response: &str) -> (u16, Value) {
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let body = &response[response.find("\r\n\r\n").unwrap() + 4..];
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap()
    };
    (status, value)
}

async fn server_with(reply: Arc<ScriptedGateway>) -> (tempfile::TempDir, ApiServer) {
    let dir = tempfile::tempdir().unwrap();
    let url = create_store(dir.path()).await.unwrap();
    let service = build_service(&url, reply).await;
    (dir, ApiServer::new(Arc::new(service)))
}

#[tokio::test]
async fn test_health_preflight_and_unknown_route() {
    let (_dir, server) = server_with(ScriptedGateway::replying(BEIJING_COUNT_REPLY)).await;

    let (status, body) = parse(&server.handle_request(&get("/")).await);
    assert_eq!(status, 200);
    assert_eq!(body["message"], "DataInsight AI backend is running!");

    let response = server
        .handle_request("OPTIONS /nl2sql HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    assert!(response.starts_with("HTTP/1.1 204"));
    assert!(response.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));

    let (status, body) = parse(&server.handle_request(&get("/nope")).await);
    assert_eq!(status, 404);
    assert_eq!(body["detail"], "Not Found");
}

#[tokio::test]
async fn test_nl2sql_route() {
    let gateway = ScriptedGateway::replying(BEIJING_COUNT_REPLY);
    let (_dir, server) = server_with(gateway.clone()).await;

    let (status, body) = parse(&server.handle_request(&post("/nl2sql/", r#"{"text":"  "}"#)).await);
    assert_eq!(status, 400);
    assert_eq!(body["stage"], "input");
    assert_eq!(gateway.prompt_count(), 0);

    let (status, body) = parse(
        &server
            .handle_request(&post("/nl2sql", r#"{"text":"count users in Beijing"}"#))
            .await,
    );
    assert_eq!(status, 200);
    assert_eq!(body["sql"], "SELECT COUNT(*) FROM users WHERE city='Beijing';");
    assert_eq!(body["raw_output"], BEIJING_COUNT_REPLY);
    assert_eq!(body["used_schema"][0]["table_name"], "users");
    assert_eq!(body["used_schema"][0]["columns"][2]["name"], "city");
}

#[tokio::test]
async fn test_nl2sql_failures_map_to_stage_statuses() {
    let (_dir, server) = server_with(ScriptedGateway::failing("timed out")).await;
    let (status, body) = parse(&server.handle_request(&post("/nl2sql", r#"{"text":"users"}"#)).await);
    assert_eq!(status, 502);
    assert_eq!(body["stage"], "generation");

    let (_dir, server) = server_with(ScriptedGateway::replying("Sorry, I can't help.")).await;
    let (status, body) = parse(&server.handle_request(&post("/nl2sql", r#"{"text":"users"}"#)).await);
    assert_eq!(status, 500);
    assert_eq!(body["stage"], "extraction");
    assert_eq!(body["raw_output"], "Sorry, I can't help.");

    let (_dir, server) = server_with(ScriptedGateway::replying("DELETE FROM users")).await;
    let (status, body) = parse(&server.handle_request(&post("/nl2sql", r#"{"text":"users"}"#)).await);
    assert_eq!(status, 422);
    assert_eq!(body["sql"], "DELETE FROM users");

    let (status, _) = parse(&server.handle_request(&post("/nl2sql", "not json")).await);
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_query_route() {
    let (_dir, server) = server_with(ScriptedGateway::replying(BEIJING_COUNT_REPLY)).await;

    let (status, body) = parse(
        &server
            .handle_request(&post(
                "/query",
                r#"{"sql":"SELECT name, city FROM users WHERE city = 'Beijing' ORDER BY id"}"#,
            ))
            .await,
    );
    assert_eq!(status, 200);
    assert_eq!(
        body,
        serde_json::json!([
            {"name": "Alice", "city": "Beijing"},
            {"name": "Eva", "city": "Beijing"}
        ])
    );

    let (status, _) = parse(&server.handle_request(&post("/query", r#"{"sql":""}"#)).await);
    assert_eq!(status, 400);

    let (status, body) = parse(&server.handle_request(&post("/query", r#"{"sql":"DELETE FROM users"}"#)).await);
    assert_eq!(status, 422);
    assert_eq!(body["stage"], "validation");

    let (status, body) = parse(&server.handle_request(&post("/query", r#"{"sql":"SELECT * FROM nowhere"}"#)).await);
    assert_eq!(status, 500);
    assert_eq!(body["stage"], "execution");
}

#[tokio::test]
async fn test_ask_route() {
    let (_dir, server) = server_with(ScriptedGateway::replying(BEIJING_COUNT_REPLY)).await;

    let (status, body) = parse(
        &server
            .handle_request(&post("/ask", r#"{"text":"count users in Beijing"}"#))
            .await,
    );
    assert_eq!(status, 200);
    assert_eq!(body["result"]["rows"][0]["COUNT(*)"], 2);
    assert_eq!(body["result"]["columns"][0], "COUNT(*)");
}

#[tokio::test]
async fn test_schema_and_rag_routes() {
    let (_dir, server) = server_with(ScriptedGateway::replying(BEIJING_COUNT_REPLY)).await;

    let (status, body) = parse(&server.handle_request(&get("/schema")).await);
    assert_eq!(status, 200);
    let schema = body["schema"].as_object().unwrap();
    let tables: Vec<&String> = schema.keys().collect();
    assert_eq!(tables, vec!["orders", "products", "users"]);
    assert_eq!(schema["users"][0]["name"], "id");
    assert_eq!(schema["users"][0]["type"], "INTEGER");

    let (status, body) = parse(&server.handle_request(&get("/rag/tables")).await);
    assert_eq!(status, 200);
    assert_eq!(body["total"], 3);

    let (status, body) = parse(
        &server
            .handle_request(&get("/rag/search?query=count+users%20in+Beijing&top_k=1"))
            .await,
    );
    assert_eq!(status, 200);
    assert_eq!(body["query"], "count users in Beijing");
    assert_eq!(body["matched_tables"].as_array().unwrap().len(), 1);
    assert_eq!(body["matched_tables"][0]["table_name"], "users");
    assert!(body["formatted_schema"].as_str().unwrap().starts_with("table users:"));

    let (status, _) = parse(&server.handle_request(&get("/rag/search?top_k=2")).await);
    assert_eq!(status, 400);
    let (status, _) = parse(&server.handle_request(&get("/rag/search?query=users&top_k=x")).await);
    assert_eq!(status, 400);

    let (status, first) = parse(&server.handle_request(&post("/rag/rebuild", "")).await);
    assert_eq!(status, 200);
    let (_, second) = parse(&server.handle_request(&post("/rag/rebuild", "")).await);
    assert_eq!(second["tables"], 3);
    assert_eq!(
        second["version"].as_u64().unwrap(),
        first["version"].as_u64().unwrap() + 1
    );
}

#[tokio::test]
async fn test_serves_over_tcp() {
    let (_dir, server) = server_with(ScriptedGateway::replying(BEIJING_COUNT_REPLY)).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(post("/query", r#"{"sql":"SELECT COUNT(*) AS n FROM orders"}"#).as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let (status, body) = parse(&response);
    assert_eq!(status, 200);
    assert_eq!(body[0]["n"], 4);
}
