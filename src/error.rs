use thiserror::Error;

/// Failures a summary run can hit.
///
/// Loader and aggregator errors (`SourceUnavailable`, `SchemaMismatch`,
/// `Parse`, `Config`) end the run. `Persistence` and `Notify` are caught by
/// the pipeline, logged, and reported in the `RunReport` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Schema mismatch in {source_name}: missing column(s) {missing:?}")]
    SchemaMismatch {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("Parse error in row {row}: {reason}")]
    Parse { row: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(row: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            row: row.into(),
            reason: reason.into(),
        }
    }

    /// True for the failures the pipeline swallows instead of aborting on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Notify(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
