use std::sync::Arc;

use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Failure produced once by a cache loader and handed to every waiter.
    #[error(transparent)]
    Shared(#[from] Arc<AppError>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        AppError::Validation(msg.into())
    }

    /// True for a cancellation, including one that travelled through a shared loader result.
    pub fn is_cancelled(&self) -> bool {
        match self {
            AppError::Cancelled => true,
            AppError::Shared(inner) => inner.is_cancelled(),
            AppError::Other(err) => err
                .downcast_ref::<AppError>()
                .map(AppError::is_cancelled)
                .unwrap_or(false),
            _ => false,
        }
    }
}
