//! Shared fixtures for the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use datainsight::catalog::StoreCatalog;
use datainsight::db::{init_pool, init_read_only_pool};
use datainsight::error::GenerationError;
use datainsight::llm::GenerationGateway;
use datainsight::pipeline::{Nl2SqlService, PipelineOptions};
use datainsight::query_runner::{QueryRunner, RetryPolicy};
use datainsight::schema_rag::{HashingEmbedder, Retriever, SchemaIndex};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BEIJING_COUNT_REPLY: &str =
    "Here is the query:\n```sql\nSELECT COUNT(*) FROM users WHERE city='Beijing';\n```";

/// Create a small store: 5 users (2 in Beijing), 3 products, 4 orders.
pub async fn create_store(dir: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let url = format!("sqlite://{}", dir.join("store.db").display());
    let pool = init_pool(&url).await?;
    for sql in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR, city VARCHAR)",
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, amount DOUBLE, date DATE)",
        "CREATE TABLE products (id INTEGER PRIMARY KEY, name VARCHAR, price DOUBLE)",
        "INSERT INTO users VALUES (1, 'Alice', 'Beijing'), (2, 'Bob', 'Shanghai'), \
         (3, 'Charlie', 'Guangzhou'), (4, 'David', 'Shenzhen'), (5, 'Eva', 'Beijing')",
        "INSERT INTO products VALUES (1, 'iPhone', 6999), (2, 'Laptop', 8999), (3, 'Tablet', 3999)",
        "INSERT INTO orders VALUES (1, 1, 120.5, '2024-03-01'), (2, 1, 80, '2024-03-02'), \
         (3, 2, 300, '2024-03-02'), (4, 5, 42.25, '2024-03-03')",
    ] {
        sqlx::query(sql).execute(&pool).await?;
    }
    pool.close().await;
    Ok(url)
}

/// Gateway that answers every prompt with a fixed reply and records prompts.
pub struct ScriptedGateway {
    reply: Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn complete(&self, prompt: &str, _max_output_tokens: u32) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(GenerationError::Network)
    }
}

/// Production wiring over the store at `url`, with a scripted gateway.
pub async fn build_service(url: &str, gateway: Arc<ScriptedGateway>) -> Nl2SqlService {
    let pool = init_read_only_pool(url, 4, Duration::from_secs(5)).await.unwrap();
    let index = Arc::new(SchemaIndex::new(
        Arc::new(StoreCatalog::new(pool.clone())),
        Arc::new(HashingEmbedder::default()),
    ));
    Nl2SqlService::new(
        Retriever::new(index),
        gateway,
        QueryRunner::new(pool, RetryPolicy::default()),
        PipelineOptions::default(),
    )
}
