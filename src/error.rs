use thiserror::Error;

/// Everything that can go wrong while ingesting one quiz.
///
/// None of these are fatal to the process: the orchestrator drops the current
/// candidate and moves on to the next one. `Config` only comes from startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected markup: {0}")]
    Parse(String),

    #[error("bad payload: {0}")]
    Decode(String),

    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Short label for log fields.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Network(_) | Error::Status { .. } => "network",
            Error::Parse(_) => "parse",
            Error::Decode(_) => "decode",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(Error::parse("x").class(), "parse");
        assert_eq!(Error::decode("x").class(), "decode");
        let status = Error::Status { url: "https://a/b".into(), status: 503 };
        assert_eq!(status.class(), "network");
        assert_eq!(status.to_string(), "GET https://a/b returned HTTP 503");
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.class(), "io");
    }

    #[test]
    fn json_errors_are_decode() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err().into();
        assert_eq!(err.class(), "decode");
    }
}
