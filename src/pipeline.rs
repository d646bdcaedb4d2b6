//! NL2SQL pipeline
//!
//! One request runs strictly in order: retrieval, prompt composition,
//! generation, extraction, validation and (for `ask`) execution. Only an
//! empty retrieval degrades in place; every other failure is returned with
//! its stage.

use crate::catalog::{CatalogAnnotations, ColumnDescriptor, StoreCatalog, TableDescriptor};
use crate::config::{AppConfig, EmbeddingProviderKind};
use crate::db::init_read_only_pool;
use crate::error::{GenerationError, Nl2SqlError, Result};
use crate::llm::{GenerationGateway, LlmClient};
use crate::prompt::{build_generation_prompt, format_tables_for_prompt, format_tables_within_budget};
use crate::query_runner::{ExecutionResult, QueryRunner};
use crate::safety::{SafetyValidator, Verdict};
use crate::schema_rag::{Embedder, HashingEmbedder, OpenAiEmbedder, RetrievalResult, Retriever, SchemaIndex};
use crate::sql_extractor::{extract_sql_detailed, ExtractionSource};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub top_k: usize,
    pub schema_char_budget: usize,
    pub max_output_tokens: u32,
    pub generation_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            schema_char_budget: 6000,
            max_output_tokens: 256,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

/// A table that grounded a prompt, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct UsedTable {
    pub table_name: String,
    pub score: f32,
    pub columns: Vec<ColumnDescriptor>,
}

impl From<&RetrievalResult> for UsedTable {
    fn from(result: &RetrievalResult) -> Self {
        Self {
            table_name: result.table.name.clone(),
            score: result.score,
            columns: result.table.columns.clone(),
        }
    }
}

/// Model output together with what was made of it.
#[derive(Debug, Clone)]
pub struct CandidateStatement {
    pub raw_output: String,
    pub sql: String,
    pub source: ExtractionSource,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub raw_output: String,
    pub used_schema: Vec<UsedTable>,
    /// Index version the schema came from; absent when retrieval was empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    #[serde(flatten)]
    pub generated: GeneratedSql,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSearch {
    pub query: String,
    pub matched_tables: Vec<UsedTable>,
    pub formatted_schema: String,
}

pub struct Nl2SqlService {
    retriever: Retriever,
    gateway: Arc<dyn GenerationGateway>,
    validator: SafetyValidator,
    runner: QueryRunner,
    options: PipelineOptions,
}

impl Nl2SqlService {
    pub fn new(
        retriever: Retriever,
        gateway: Arc<dyn GenerationGateway>,
        runner: QueryRunner,
        options: PipelineOptions,
    ) -> Self {
        Self {
            retriever,
            gateway,
            validator: SafetyValidator::new(),
            runner,
            options,
        }
    }

    /// Wire the production collaborators described by `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = init_read_only_pool(
            &config.database_url,
            config.db_max_connections,
            config.db_acquire_timeout,
        )
        .await?;

        let mut catalog = StoreCatalog::new(pool.clone());
        if let Some(path) = &config.schema_annotations_path {
            catalog = catalog.with_annotations(CatalogAnnotations::load(path)?);
        }

        let embedder: Arc<dyn Embedder> = match config.embedding.provider {
            EmbeddingProviderKind::Hashing => Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
            EmbeddingProviderKind::OpenAi => {
                let api_key = config.embedding.api_key.clone().ok_or_else(|| {
                    Nl2SqlError::Config("EMBEDDING_PROVIDER=openai requires EMBEDDING_API_KEY or OPENAI_API_KEY".to_string())
                })?;
                Arc::new(OpenAiEmbedder::new(
                    api_key,
                    config.embedding.base_url.clone(),
                    config.embedding.model.clone(),
                    config.embedding.dimensions,
                )?)
            }
        };
        info!("Embedding model: {}", embedder.model_name());

        if config.llm.api_key.is_none() {
            warn!("No LLM API key found; generation requests will fail until one is configured");
        }
        let gateway = LlmClient::new(
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.base_url.clone(),
            config.llm.timeout,
        )?;

        let index = Arc::new(SchemaIndex::new(Arc::new(catalog), embedder));
        Ok(Self::new(
            Retriever::new(index),
            Arc::new(gateway),
            QueryRunner::new(pool, config.retry.clone()),
            PipelineOptions {
                top_k: config.top_k,
                schema_char_budget: config.prompt_schema_char_budget,
                max_output_tokens: config.llm.max_tokens,
                generation_timeout: config.llm.timeout,
            },
        ))
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        self.retriever.index()
    }

    /// Question to validated SQL, without executing it.
    pub async fn generate(&self, question: &str) -> Result<GeneratedSql> {
        if question.trim().is_empty() {
            return Err(Nl2SqlError::Input("text must not be empty".to_string()));
        }
        info!("NL2SQL request: {:?}", question);

        let retrieved = self
            .retriever
            .get_relevant_tables(question, self.options.top_k)
            .await?;
        if retrieved.is_empty() {
            warn!("[RAG] Retrieval returned no tables; prompting without schema");
        }
        let schema_text = format_tables_within_budget(&retrieved, self.options.schema_char_budget);
        let prompt = build_generation_prompt(question, &schema_text);

        let candidate = self.candidate_from(&prompt).await?;
        if candidate.sql.is_empty() {
            return Err(Nl2SqlError::Extraction {
                raw_output: candidate.raw_output,
            });
        }
        if let Verdict::Rejected { reason } = candidate.verdict {
            warn!("Generated SQL rejected ({}): {}", reason, candidate.sql);
            return Err(Nl2SqlError::Rejected {
                sql: candidate.sql,
                reason,
            });
        }

        Ok(GeneratedSql {
            sql: candidate.sql,
            raw_output: candidate.raw_output,
            snapshot_version: retrieved.first().map(|r| r.snapshot_version),
            used_schema: retrieved.iter().map(UsedTable::from).collect(),
        })
    }

    /// Generate, validate and execute in one call.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let generated = self.generate(question).await?;
        let result = self.runner.run_sql(&generated.sql).await?;
        Ok(Answer { generated, result })
    }

    /// Validate then execute caller-supplied SQL.
    pub async fn run_query(&self, sql: &str) -> Result<ExecutionResult> {
        if sql.trim().is_empty() {
            return Err(Nl2SqlError::Input("sql must not be empty".to_string()));
        }
        self.validator.ensure_read_only(sql)?;
        self.runner.run_sql(sql).await
    }

    pub async fn search_schema(&self, query: &str, top_k: usize) -> Result<SchemaSearch> {
        let retrieved = self.retriever.get_relevant_tables(query, top_k).await?;
        Ok(SchemaSearch {
            query: query.to_string(),
            formatted_schema: format_tables_for_prompt(&retrieved),
            matched_tables: retrieved.iter().map(UsedTable::from).collect(),
        })
    }

    pub async fn full_schema(&self) -> Result<Vec<TableDescriptor>> {
        self.index().catalog().full_schema().await
    }

    /// Rebuild the index and report the version now published.
    pub async fn rebuild_index(&self) -> Result<Option<u64>> {
        Ok(self.index().force_rebuild().await?.map(|snapshot| snapshot.version()))
    }

    async fn candidate_from(&self, prompt: &str) -> Result<CandidateStatement> {
        let started = Instant::now();
        let raw_output = tokio::time::timeout(
            self.options.generation_timeout,
            self.gateway.complete(prompt, self.options.max_output_tokens),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.options.generation_timeout))??;
        info!("Generation finished in {:?}", started.elapsed());

        let extraction = extract_sql_detailed(&raw_output);
        info!("Extraction path: {:?}", extraction.source);
        let verdict = if extraction.sql.is_empty() {
            Verdict::Rejected {
                reason: "no statement extracted".to_string(),
            }
        } else {
            self.validator.validate(&extraction.sql)
        };

        Ok(CandidateStatement {
            raw_output,
            sql: extraction.sql,
            source: extraction.source,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::db::init_pool;
    use crate::query_runner::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedGateway {
        reply: std::result::Result<String, ()>,
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl CannedGateway {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl GenerationGateway for CannedGateway {
        async fn complete(&self, prompt: &str, _max: u32) -> std::result::Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            self.reply
                .clone()
                .map_err(|_| GenerationError::Network("connection refused".to_string()))
        }
    }

    fn users_table() -> TableDescriptor {
        TableDescriptor {
            name: "users".to_string(),
            comment: None,
            columns: vec![
                ColumnDescriptor::new("id", "INTEGER", 0).primary_key(),
                ColumnDescriptor::new("name", "VARCHAR", 1),
                ColumnDescriptor::new("city", "VARCHAR", 2),
            ],
        }
    }

    async fn service(gateway: Arc<CannedGateway>, tables: Vec<TableDescriptor>) -> (tempfile::TempDir, Nl2SqlService) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("p.db").display());
        let pool = init_pool(&url).await.unwrap();
        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR, city VARCHAR)",
            "INSERT INTO users VALUES (1, 'Alice', 'Beijing'), (2, 'Bob', 'Shanghai'), (3, 'Eva', 'Beijing')",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        let index = Arc::new(SchemaIndex::new(
            Arc::new(StaticCatalog::new(tables)),
            Arc::new(HashingEmbedder::new(256)),
        ));
        let service = Nl2SqlService::new(
            Retriever::new(index),
            gateway,
            QueryRunner::new(pool, RetryPolicy::default()),
            PipelineOptions {
                generation_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        (dir, service)
    }

    #[tokio::test]
    async fn test_ask_executes_generated_sql() {
        let gateway = Arc::new(CannedGateway::replying(
            "```sql\nSELECT COUNT(*) AS n FROM users WHERE city='Beijing';\n```",
        ));
        let (_dir, service) = service(gateway.clone(), vec![users_table()]).await;

        let answer = service.ask("How many users are in Beijing?").await.unwrap();
        assert_eq!(answer.generated.sql, "SELECT COUNT(*) AS n FROM users WHERE city='Beijing';");
        assert_eq!(answer.generated.used_schema[0].table_name, "users");
        assert_eq!(answer.result.rows[0]["n"], serde_json::json!(2));

        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts[0].contains("table users:"));
    }

    #[tokio::test]
    async fn test_blank_question_never_calls_gateway() {
        let gateway = Arc::new(CannedGateway::replying("SELECT 1"));
        let (_dir, service) = service(gateway.clone(), vec![users_table()]).await;

        assert!(matches!(service.generate("   ").await, Err(Nl2SqlError::Input(_))));
        assert!(gateway.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_catalog_uses_fallback_prompt() {
        let gateway = Arc::new(CannedGateway::replying("SELECT 1"));
        let (_dir, service) = service(gateway.clone(), Vec::new()).await;

        let generated = service.generate("anything").await.unwrap();
        assert!(generated.used_schema.is_empty());
        assert!(generated.snapshot_version.is_none());
        assert!(gateway.prompts.lock().unwrap()[0].contains(crate::prompt::NO_SCHEMA_FALLBACK));
    }

    #[tokio::test]
    async fn test_no_sql_in_output_keeps_raw_output() {
        let gateway = Arc::new(CannedGateway::replying("I am not sure what you mean."));
        let (_dir, service) = service(gateway, vec![users_table()]).await;

        match service.generate("users?").await {
            Err(Nl2SqlError::Extraction { raw_output }) => {
                assert_eq!(raw_output, "I am not sure what you mean.")
            }
            other => panic!("unexpected: {:?}", other.map(|g| g.sql)),
        }
    }

    #[tokio::test]
    async fn test_generated_mutation_is_rejected_and_not_run() {
        let gateway = Arc::new(CannedGateway::replying("```sql\nDELETE FROM users;\n```"));
        let (_dir, service) = service(gateway, vec![users_table()]).await;

        assert!(matches!(
            service.ask("remove everyone").await,
            Err(Nl2SqlError::Rejected { .. })
        ));
        let rows = service.run_query("SELECT COUNT(*) AS n FROM users").await.unwrap();
        assert_eq!(rows.rows[0]["n"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn test_generation_failure_and_timeout() {
        let failing = Arc::new(CannedGateway {
            reply: Err(()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        });
        let (_dir, service) = service(failing, vec![users_table()]).await;
        assert!(matches!(
            service.generate("users").await,
            Err(Nl2SqlError::Generation(GenerationError::Network(_)))
        ));

        let slow = Arc::new(CannedGateway {
            reply: Ok("SELECT 1".to_string()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::from_secs(5),
        });
        let (_dir, service) = self::service(slow, vec![users_table()]).await;
        assert!(matches!(
            service.generate("users").await,
            Err(Nl2SqlError::Generation(GenerationError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_query_validates_first() {
        let gateway = Arc::new(CannedGateway::replying("SELECT 1"));
        let (_dir, service) = service(gateway, vec![users_table()]).await;

        assert!(matches!(service.run_query("").await, Err(Nl2SqlError::Input(_))));
        assert!(matches!(
            service.run_query("DROP TABLE users").await,
            Err(Nl2SqlError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_and_rebuild() {
        let gateway = Arc::new(CannedGateway::replying("SELECT 1"));
        let (_dir, service) = service(gateway, vec![users_table()]).await;

        let search = service.search_schema("users in Beijing", 3).await.unwrap();
        assert_eq!(search.matched_tables.len(), 1);
        assert!(search.formatted_schema.starts_with("table users:"));

        let first = service.index().current().unwrap().version();
        let rebuilt = service.rebuild_index().await.unwrap().unwrap();
        assert!(rebuilt > first);
    }
}
