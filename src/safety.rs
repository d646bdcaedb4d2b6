//! Safety Validator
//!
//! Decides whether an extracted statement may reach the store. Two checks
//! must both pass:
//!
//! 1. No forbidden keyword appears as a whole word anywhere in the text,
//!    string literals and comments included.
//! 2. The text parses as exactly one read-only query (`SELECT`, `WITH ...
//!    SELECT`, set operations over those). `SELECT ... INTO` and anything
//!    that fails to parse are rejected.

use crate::error::{Nl2SqlError, Result};
use crate::logging::preview;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

/// Keywords that reject a statement wherever they appear.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DELETE", "DROP", "UPDATE", "ALTER", "INSERT", "CREATE", "TRUNCATE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "GRANT", "REVOKE", "MERGE",
];

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected { reason: String },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Verdict::Rejected {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyValidator {
    forbidden: Vec<String>,
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self {
            forbidden: FORBIDDEN_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, sql: &str) -> Verdict {
        let sql = sql.trim();
        if sql.is_empty() {
            return Verdict::rejected("empty statement");
        }

        if let Some(keyword) = self.first_forbidden_word(sql) {
            return Verdict::rejected(format!("forbidden keyword {}", keyword));
        }

        let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) => return Verdict::rejected(format!("statement could not be parsed: {}", e)),
        };

        match statements.as_slice() {
            [Statement::Query(query)] => match check_query(query) {
                Ok(()) => Verdict::Accepted,
                Err(reason) => Verdict::rejected(reason),
            },
            [_] => Verdict::rejected(format!(
                "only SELECT queries are allowed, got {}",
                leading_word(sql)
            )),
            [] => Verdict::rejected("empty statement"),
            many => Verdict::rejected(format!(
                "expected exactly one statement, found {}",
                many.len()
            )),
        }
    }

    /// [`validate`](Self::validate) as a pipeline step.
    pub fn ensure_read_only(&self, sql: &str) -> Result<()> {
        match self.validate(sql) {
            Verdict::Accepted => {
                debug!("SQL accepted: {:?}", preview(sql, 80));
                Ok(())
            }
            Verdict::Rejected { reason } => {
                warn!("SQL rejected ({}): {:?}", reason, preview(sql, 80));
                Err(Nl2SqlError::Rejected {
                    sql: sql.to_string(),
                    reason,
                })
            }
        }
    }

    fn first_forbidden_word<'a>(&self, sql: &'a str) -> Option<&'a str> {
        WORD.find_iter(sql)
            .map(|m| m.as_str())
            .find(|word| self.forbidden.iter().any(|k| k.eq_ignore_ascii_case(word)))
    }
}

fn check_query(query: &Query) -> std::result::Result<(), String> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(expr: &SetExpr) -> std::result::Result<(), String> {
    match expr {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                Err("SELECT INTO is not allowed".to_string())
            } else {
                Ok(())
            }
        }
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        _ => Err("data-modifying statement is not allowed".to_string()),
    }
}

fn leading_word(sql: &str) -> String {
    WORD.find(sql)
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_else(|| "unknown statement".to_string())
}
