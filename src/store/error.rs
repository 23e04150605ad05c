#[derive(Debug)]
pub enum StoreError {
    InvalidUrl(String),
    Transport(String),
    Timeout,
    Status { status: u16, body: String },
    Decode(String),
    NotFound(String),
    LimitExceeded(&'static str),
    Unavailable(String),
}

impl StoreError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::InvalidUrl(_) => "invalid_url",
            StoreError::Transport(_) => "transport",
            StoreError::Timeout => "timeout",
            StoreError::Status { .. } => "status",
            StoreError::Decode(_) => "decode",
            StoreError::NotFound(_) => "not_found",
            StoreError::LimitExceeded(_) => "limit",
            StoreError::Unavailable(_) => "unavailable",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidUrl(url) => write!(f, "invalid store url: {url}"),
            StoreError::Transport(e) => write!(f, "transport error: {e}"),
            StoreError::Timeout => write!(f, "request to reservation store timed out"),
            StoreError::Status { status, body } if body.is_empty() => {
                write!(f, "reservation store answered HTTP {status}")
            }
            StoreError::Status { status, body } => {
                write!(f, "reservation store answered HTTP {status}: {body}")
            }
            StoreError::Decode(e) => write!(f, "undecodable response: {e}"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "reservation store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
