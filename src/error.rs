use thiserror::Error;

/// Errors raised outside the reconstruction engine: fetching the feed, decoding its
/// body, reading configuration and querying a dataset.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("code: fetch_error, description: {0}")]
    Fetch(String),

    #[error("code: timeout, description: no response after {0} ms")]
    Timeout(u64),

    #[error("code: invalid_format, description: {0}")]
    InvalidFormat(String),

    #[error("code: invalid_config, description: {0}")]
    InvalidConfig(String),

    #[error("code: invalid_range, description: {0}")]
    InvalidRange(String),

    #[error("code: no_data, description: feed returned no records")]
    NoData,
}

impl Error {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::Fetch(_) => "fetch_error",
            Self::Timeout(_) => "timeout",
            Self::InvalidFormat(_) => "invalid_format",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidRange(_) => "invalid_range",
            Self::NoData => "no_data",
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        if let Some(inner) = err.downcast_ref::<Self>() {
            return inner.clone();
        }
        let stack = err.chain().fold(String::new(), |cause, e| format!("{cause} -> {e}"));
        Self::Fetch(stack.trim_start_matches(" -> ").to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidFormat(err.to_string())
        } else {
            Self::Fetch(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
