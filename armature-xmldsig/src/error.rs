// Error types for XML signature handling

use thiserror::Error;

/// Errors raised while loading keys or producing signatures.
///
/// Verification never returns these: a signature that cannot be checked is
/// simply reported as not valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlDsigError {
    #[error("XML error: {0}")]
    Xml(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl From<roxmltree::Error> for XmlDsigError {
    fn from(err: roxmltree::Error) -> Self {
        XmlDsigError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, XmlDsigError>;
