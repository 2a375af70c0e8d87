use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("Pharmacy store error: {0}")]
    Store(#[from] farmacias_data::StoreError),
    #[error("Data error: {0}")]
    Data(#[from] farmacias_data::DataError),
    #[error("Search error: {0}")]
    Search(#[from] crate::search::SearchError),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Init Logging error: {0}")]
    InitLoggingError(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FinderError>;
