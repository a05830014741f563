use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    #[error("news source unavailable: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GameError {
    pub fn validation(message: impl Into<String>) -> Self {
        GameError::Validation(message.into())
    }
}

impl From<reqwest::Error> for GameError {
    fn from(e: reqwest::Error) -> Self {
        GameError::Upstream(e.to_string())
    }
}

impl From<serde_json::Error> for GameError {
    fn from(e: serde_json::Error) -> Self {
        GameError::Upstream(format!("malformed article payload: {e}"))
    }
}

pub type GameResult<T> = Result<T, GameError>;
