use thiserror::Error;

pub type TcseedResult<T> = Result<T, TcseedError>;

#[derive(Debug, Error)]
pub enum TcseedError {
    #[error("config error: {0}")]
    Config(String),

    #[error("chunk index error: {0}")]
    Index(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
