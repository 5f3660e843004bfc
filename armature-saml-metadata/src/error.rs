//! Metadata error types.

use thiserror::Error;

/// Result type for metadata operations.
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Metadata loading errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// Locator scheme is neither file nor http(s).
    #[error("Unsupported metadata locator: {0}")]
    UnsupportedLocator(String),

    /// The document could not be fetched or parsed.
    #[error("Failed to load metadata from {locator}: {cause}")]
    Load {
        /// Where the metadata was loaded from.
        locator: String,
        /// What went wrong.
        cause: String,
    },

    /// The document is not valid SAML2 metadata.
    #[error("Invalid metadata: {0}")]
    Parse(String),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<roxmltree::Error> for MetadataError {
    fn from(err: roxmltree::Error) -> Self {
        MetadataError::Parse(err.to_string())
    }
}

impl From<armature_xmldsig::XmlDsigError> for MetadataError {
    fn from(err: armature_xmldsig::XmlDsigError) -> Self {
        MetadataError::Parse(err.to_string())
    }
}
