// Error types for the SAML2 service provider

use thiserror::Error;

/// Errors raised by the SAML2 engine.
///
/// Signature and `InResponseTo` failures are not errors: validation reports
/// them as `false`. Errors are `Clone` so a failed claims extraction can be
/// returned again, unchanged, on every later call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamlError {
    #[error("{0}")]
    Configuration(String),

    #[error("Metadata load error: {0}")]
    MetadataLoad(#[from] armature_saml_metadata::MetadataError),

    #[error("Bad format: {0}")]
    BadFormat(String),

    #[error("{0}")]
    Parse(String),

    #[error("The Saml2Response must be validated first.")]
    NotValidated,

    #[error("The Saml2Response didn't pass validation")]
    ValidationFailed,

    #[error("The Saml2Response must have status success to extract claims.")]
    StatusNotSuccess,

    #[error("Replayed assertion detected: {0}")]
    Replay(String),

    #[error("Assertion {0} has expired")]
    Expired(String),

    #[error("Assertion {0} is not yet valid")]
    NotYetValid(String),

    #[error("Audience restriction of assertion {0} does not include this service provider")]
    AudienceMismatch(String),

    #[error("No Idp with entity id \"{0}\" found.")]
    UnknownIdentityProvider(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl From<armature_xmldsig::XmlDsigError> for SamlError {
    fn from(err: armature_xmldsig::XmlDsigError) -> Self {
        SamlError::Signing(err.to_string())
    }
}

impl From<roxmltree::Error> for SamlError {
    fn from(err: roxmltree::Error) -> Self {
        SamlError::BadFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SamlError>;
