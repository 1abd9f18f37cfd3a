use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,
}

pub type Result<T> = std::result::Result<T, Error>;
