use std::time::Duration;
use thiserror::Error;

/// Failures of the generation collaborator.
///
/// A successful but empty completion is not an error; it surfaces later as
/// an extraction failure.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Authentication rejected by generation service: {0}")]
    Auth(String),

    #[error("Generation service unreachable: {0}")]
    Network(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed generation response: {0}")]
    Malformed(String),

    #[error("Generation was filtered by content policy")]
    ContentFiltered,
}

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("No SQL statement found in generated output")]
    Extraction { raw_output: String },

    #[error("Statement rejected: {reason}")]
    Rejected { sql: String, reason: String },

    #[error("Store busy after {attempts} attempts: {message}")]
    TransientExecution { attempts: u32, message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Nl2SqlError {
    /// Pipeline stage that produced the error, reported to callers so the
    /// failing stage can be told apart.
    pub fn stage(&self) -> &'static str {
        match self {
            Nl2SqlError::Input(_) => "input",
            Nl2SqlError::Config(_) => "config",
            Nl2SqlError::Catalog(_) => "catalog",
            Nl2SqlError::Embedding(_) | Nl2SqlError::Index(_) => "retrieval",
            Nl2SqlError::Generation(_) => "generation",
            Nl2SqlError::Extraction { .. } => "extraction",
            Nl2SqlError::Rejected { .. } => "validation",
            Nl2SqlError::TransientExecution { .. } | Nl2SqlError::Execution(_) => "execution",
            Nl2SqlError::Io(_) | Nl2SqlError::Json(_) => "internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Nl2SqlError::Input(_) => 400,
            Nl2SqlError::Rejected { .. } => 422,
            Nl2SqlError::Generation(_) | Nl2SqlError::Embedding(_) => 502,
            _ => 500,
        }
    }
}

impl From<sqlx::Error> for Nl2SqlError {
    fn from(e: sqlx::Error) -> Self {
        Nl2SqlError::Execution(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_per_stage() {
        assert_eq!(Nl2SqlError::Input("blank".into()).status_code(), 400);
        assert_eq!(
            Nl2SqlError::Generation(GenerationError::Timeout(Duration::from_secs(1))).status_code(),
            502
        );
        assert_eq!(
            Nl2SqlError::Extraction { raw_output: "hi".into() }.status_code(),
            500
        );
        assert_eq!(
            Nl2SqlError::Rejected { sql: "DROP TABLE t".into(), reason: "DROP".into() }.stage(),
            "validation"
        );
    }

    #[test]
    fn test_exhausted_retries_are_an_execution_failure() {
        let err = Nl2SqlError::TransientExecution {
            attempts: 3,
            message: "database is locked".into(),
        };
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.stage(), "execution");
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
