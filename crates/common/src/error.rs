use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An operation referenced a background command id that is not
    /// present in the registry. Surfaced to the caller as a rejected
    /// call, never silently ignored.
    #[error("invalid background command id: {0}")]
    InvalidHandle(u64),

    /// The container runtime rejected or failed a request.
    #[error("container runtime: {0}")]
    Container(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn container(message: impl Into<String>) -> Self {
        Self::Container(message.into())
    }

    /// True when this error means "no such background command".
    #[must_use]
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Self::InvalidHandle(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_is_distinct() {
        let err = Error::InvalidHandle(7);
        assert!(err.is_invalid_handle());
        assert_eq!(err.to_string(), "invalid background command id: 7");

        let err = Error::message("boom");
        assert!(!err.is_invalid_handle());
    }
}
