//! Schema Catalog
//!
//! Structural description of the analytical store: tables, ordered columns,
//! optional comments and primary-key flags.

use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub ordinal: u32,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
}

impl ColumnDescriptor {
    pub fn new(name: &str, data_type: &str, ordinal: u32) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            comment: None,
            ordinal,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

impl TableDescriptor {
    /// Text embedded for similarity search:
    /// `table <name> (<comment>): <col> <type> (<comment>), <col> <type>, ...`
    pub fn describe(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| match non_blank(&c.comment) {
                Some(comment) => format!("{} {} ({})", c.name, c.data_type, comment),
                None => format!("{} {}", c.name, c.data_type),
            })
            .collect();

        match non_blank(&self.comment) {
            Some(comment) => format!("table {} ({}): {}", self.name, comment, columns.join(", ")),
            None => format!("table {}: {}", self.name, columns.join(", ")),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Source of the full catalog, in a stable enumeration order.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn full_schema(&self) -> Result<Vec<TableDescriptor>>;
}

/// Catalog fixed at construction time.
pub struct StaticCatalog {
    tables: Vec<TableDescriptor>,
}

impl StaticCatalog {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl SchemaCatalog for StaticCatalog {
    async fn full_schema(&self) -> Result<Vec<TableDescriptor>> {
        Ok(self.tables.clone())
    }
}

/// Table and column comments kept next to the database, since SQLite has
/// no native comment storage.
///
/// ```json
/// { "users": { "comment": "registered users", "columns": { "city": "home city" } } }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogAnnotations(HashMap<String, TableAnnotation>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableAnnotation {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub columns: HashMap<String, String>,
}

impl CatalogAnnotations {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let annotations: Self = serde_json::from_str(&raw)?;
        info!("Loaded schema annotations for {} tables from {}", annotations.0.len(), path.display());
        Ok(annotations)
    }

    fn apply(&self, table: &mut TableDescriptor) {
        let Some(annotation) = self.0.get(&table.name) else {
            return;
        };
        if annotation.comment.is_some() {
            table.comment = annotation.comment.clone();
        }
        for column in &mut table.columns {
            if let Some(comment) = annotation.columns.get(&column.name) {
                column.comment = Some(comment.clone());
            }
        }
    }
}

/// Catalog read from the store's own system tables.
pub struct StoreCatalog {
    pool: SqlitePool,
    annotations: CatalogAnnotations,
}

impl StoreCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            annotations: CatalogAnnotations::default(),
        }
    }

    pub fn with_annotations(mut self, annotations: CatalogAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Nl2SqlError::Catalog(format!("Failed to list tables: {}", e)))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT cid, name, type, pk FROM pragma_table_info(?1) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Nl2SqlError::Catalog(format!("Failed to read columns of {}: {}", table, e)))?;

        Ok(rows
            .into_iter()
            .map(|(cid, name, data_type, pk)| ColumnDescriptor {
                name,
                data_type,
                comment: None,
                ordinal: cid as u32,
                primary_key: pk > 0,
            })
            .collect())
    }
}

#[async_trait]
impl SchemaCatalog for StoreCatalog {
    async fn full_schema(&self) -> Result<Vec<TableDescriptor>> {
        let mut tables = Vec::new();
        for name in self.table_names().await? {
            let columns = self.table_columns(&name).await?;
            let mut table = TableDescriptor {
                name,
                comment: None,
                columns,
            };
            self.annotations.apply(&mut table);
            tables.push(table);
        }
        debug!("Catalog holds {} tables", tables.len());
        Ok(tables)
    }
}

/// `{table: [columns...]}` in catalog order, as served by `GET /schema`.
pub fn schema_map(tables: &[TableDescriptor]) -> serde_json::Map<String, serde_json::Value> {
    tables
        .iter()
        .map(|t| {
            (
                t.name.clone(),
                serde_json::to_value(&t.columns).unwrap_or(serde_json::Value::Null),
            )
        })
        .collect()
}
