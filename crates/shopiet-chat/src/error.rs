use shopiet_types::RoomNameError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Rejected input; nothing was written.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The caller is authenticated but not a participant.
    #[error("{0}")]
    Forbidden(String),

    /// The message database or the blocking pool failed.
    #[error("store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

impl ChatError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden(detail.into())
    }
}

impl From<RoomNameError> for ChatError {
    fn from(e: RoomNameError) -> Self {
        Self::Validation(e.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
