use thiserror::Error;

/// Fatal outcomes of a pre-signature session
///
/// Recoverable problems never surface here; they are logged and recorded as
/// [`crate::Degradation`] values on the session instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresignError {
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Document is password protected and no valid password was supplied")]
    PasswordProtected,

    #[error("Document is certified and does not allow further signatures")]
    CertifiedDocumentRejected,

    #[error("Operation cancelled by the user: {0}")]
    UserCancelled(String),

    #[error("Signature needs {needed} bytes but only {reserved} were reserved")]
    ReservationOverflow { needed: usize, reserved: usize },
}

impl PresignError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PresignError::InvalidDocument(msg.into())
    }
}

impl From<lopdf::Error> for PresignError {
    fn from(err: lopdf::Error) -> Self {
        PresignError::InvalidDocument(err.to_string())
    }
}

impl From<shared_crypto::CertError> for PresignError {
    fn from(err: shared_crypto::CertError) -> Self {
        PresignError::InvalidDocument(format!("Signer certificate: {}", err))
    }
}
