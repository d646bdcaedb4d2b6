//! SQL Extractor
//!
//! Isolates one candidate statement from free-form model output. The search
//! order is fixed: the first ```` ```sql ```` fenced block, then the first
//! leading SQL keyword anywhere in the text. Only the first match counts.
//! Keywords inside `--` and `/* */` comments are never a starting point.

use crate::logging::preview;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use tracing::{info, warn};

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?is)```[ \t]*sql\b(.*?)```").unwrap();
    static ref LEADING_KEYWORD: Regex =
        Regex::new(r"(?i)\b(?:SELECT|WITH|INSERT|UPDATE|DELETE)\b").unwrap();
    static ref SQL_COMMENT: Regex = Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    FencedBlock,
    KeywordScan,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub sql: String,
    pub source: ExtractionSource,
}

/// Extract the candidate statement, or an empty string when nothing
/// statement-like is present.
pub fn extract_sql(raw_text: &str) -> String {
    extract_sql_detailed(raw_text).sql
}

pub fn extract_sql_detailed(raw_text: &str) -> Extraction {
    if raw_text.trim().is_empty() {
        warn!("Model output is empty; nothing to extract");
        return not_found();
    }

    if let Some(block) = SQL_FENCE.captures(raw_text).and_then(|c| c.get(1)) {
        // The block body is used from its first keyword outside a comment so
        // that a leading comment does not survive into a second pass.
        let sql = from_first_keyword(block.as_str()).unwrap_or_default();
        info!("Extracted SQL from fenced block: {:?}", preview(&sql, 80));
        return Extraction {
            source: if sql.is_empty() {
                ExtractionSource::NotFound
            } else {
                ExtractionSource::FencedBlock
            },
            sql,
        };
    }

    if let Some(sql) = from_first_keyword(raw_text) {
        info!("Extracted SQL from plain text: {:?}", preview(&sql, 80));
        return Extraction {
            sql,
            source: ExtractionSource::KeywordScan,
        };
    }

    warn!("No SQL found in model output");
    not_found()
}

fn from_first_keyword(text: &str) -> Option<String> {
    let comments: Vec<Range<usize>> = SQL_COMMENT.find_iter(text).map(|m| m.range()).collect();
    LEADING_KEYWORD
        .find_iter(text)
        .find(|m| !comments.iter().any(|c| c.contains(&m.start())))
        .map(|m| text[m.start()..].trim().to_string())
}

fn not_found() -> Extraction {
    Extraction {
        sql: String::new(),
        source: ExtractionSource::NotFound,
    }
}
