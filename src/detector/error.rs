use crate::model::ModelError;

#[derive(Debug)]
pub enum DetectorError {
    /// No session credential was supplied; nothing was fetched.
    MissingCredential,
    InvalidCandidate(ModelError),
    /// A newer check for the same key began before this one finished.
    Superseded { generation: u64 },
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::MissingCredential => {
                write!(f, "authentication missing: a session credential is required to check conflicts")
            }
            DetectorError::InvalidCandidate(e) => write!(f, "invalid reservation candidate: {e}"),
            DetectorError::Superseded { generation } => {
                write!(f, "check {generation} superseded by a newer check")
            }
        }
    }
}

impl std::error::Error for DetectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetectorError::InvalidCandidate(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ModelError> for DetectorError {
    fn from(e: ModelError) -> Self {
        DetectorError::InvalidCandidate(e)
    }
}
