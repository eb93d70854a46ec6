use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed bijection, non-contiguous partition, missing column or bad argument.
    #[error("Domain error: {0}")]
    Domain(String),

    /// A join or remap changed row counts or per-key group sizes.
    #[error("Cardinality mismatch in {context}: expected {expected}, found {actual}")]
    Cardinality {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Rows reference keys that do not exist in the referenced table.
    #[error("Integrity violation: {missing} rows of {table}.{column} reference missing keys")]
    Integrity {
        table: String,
        column: String,
        missing: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl Error {
    pub fn domain(msg: impl Into<String>) -> Self {
        Error::Domain(msg.into())
    }

    pub fn cardinality(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Error::Cardinality {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Csv(_) => -2,
            Error::Json(_) => -3,
            Error::Domain(_) => -4,
            Error::Cardinality { .. } => -5,
            Error::Integrity { .. } => -6,
            Error::Config(_) => -7,
            Error::WorkerPool(_) => -8,
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::WorkerPool(err.to_string())
    }
}
