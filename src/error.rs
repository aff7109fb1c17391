use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("credential rejected: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("asset {asset} still not active after {attempts} polls")]
    Timeout { asset: String, attempts: u32 },

    #[error("activation failed for asset {0}")]
    ActivationFailed(String),

    #[error("unexpected response: {0}")]
    Schema(String),

    #[error("retrieval handle expired for {0}")]
    Expired(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("response status {status}: {url}")]
    Http { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map a non-success HTTP status onto the error kinds callers act on.
    pub fn from_status(status: StatusCode, url: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Auth(format!("{} for {}", status, url))
            }
            StatusCode::NOT_FOUND => Error::NotFound(url.to_string()),
            StatusCode::TOO_MANY_REQUESTS => Error::Transient(format!("{} for {}", status, url)),
            s if s.is_server_error() => Error::Transient(format!("{} for {}", s, url)),
            s => Error::Http {
                status: s.as_u16(),
                url: url.to_string(),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.as_str()).unwrap_or_default();
            return Error::from_status(status, url);
        }
        if err.is_decode() {
            return Error::Schema(err.to_string());
        }
        Error::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Schema(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Schema(format!("invalid url: {}", err))
    }
}
