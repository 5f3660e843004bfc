//! Core SAML2 value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SAML2 protocol namespace.
pub const SAML2P_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

/// SAML2 assertion namespace.
pub const SAML2_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// Identity of an SP or IdP. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a SAML2 message or assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Saml2Id(String);

impl Saml2Id {
    /// A fresh random id. XML ids must not start with a digit, hence the
    /// `id` prefix.
    pub fn generate() -> Self {
        Self(format!("id{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Saml2Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SAML2 bindings an IdP endpoint can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Binding {
    HttpRedirect,
    HttpPost,
    Artifact,
}

impl Binding {
    pub const HTTP_REDIRECT_URI: &'static str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
    pub const HTTP_POST_URI: &'static str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
    pub const ARTIFACT_URI: &'static str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact";

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            Self::HTTP_REDIRECT_URI => Some(Self::HttpRedirect),
            Self::HTTP_POST_URI => Some(Self::HttpPost),
            Self::ARTIFACT_URI => Some(Self::Artifact),
            _ => None,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::HttpRedirect => Self::HTTP_REDIRECT_URI,
            Self::HttpPost => Self::HTTP_POST_URI,
            Self::Artifact => Self::ARTIFACT_URI,
        }
    }

    /// Whether an AuthnRequest can be sent over this binding. Artifact only
    /// carries responses back to the SP.
    pub fn supports_authn_requests(&self) -> bool {
        matches!(self, Self::HttpRedirect | Self::HttpPost)
    }
}

/// Top-level SAML2 status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Requester,
    Responder,
    VersionMismatch,
    Other(String),
}

impl StatusCode {
    const PREFIX: &'static str = "urn:oasis:names:tc:SAML:2.0:status:";

    pub fn from_uri(uri: &str) -> Self {
        match uri.strip_prefix(Self::PREFIX) {
            Some("Success") => Self::Success,
            Some("Requester") => Self::Requester,
            Some("Responder") => Self::Responder,
            Some("VersionMismatch") => Self::VersionMismatch,
            _ => Self::Other(uri.to_owned()),
        }
    }

    pub fn uri(&self) -> String {
        match self {
            Self::Success => format!("{}Success", Self::PREFIX),
            Self::Requester => format!("{}Requester", Self::PREFIX),
            Self::Responder => format!("{}Responder", Self::PREFIX),
            Self::VersionMismatch => format!("{}VersionMismatch", Self::PREFIX),
            Self::Other(uri) => uri.clone(),
        }
    }
}

/// Name identifier formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NameIdFormat {
    #[default]
    Unspecified,
    EmailAddress,
    Persistent,
    Transient,
    EntityIdentifier,
}

impl NameIdFormat {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Unspecified => "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified",
            Self::EmailAddress => "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress",
            Self::Persistent => "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent",
            Self::Transient => "urn:oasis:names:tc:SAML:2.0:nameid-format:transient",
            Self::EntityIdentifier => "urn:oasis:names:tc:SAML:2.0:nameid-format:entity",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::Unspecified,
            Self::EmailAddress,
            Self::Persistent,
            Self::Transient,
            Self::EntityIdentifier,
        ]
        .into_iter()
        .find(|f| f.uri() == uri)
    }
}

/// `NameIDPolicy` of an AuthnRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NameIdPolicy {
    #[serde(default)]
    pub allow_create: Option<bool>,
    #[serde(default)]
    pub format: NameIdFormat,
}

impl NameIdPolicy {
    pub fn new(allow_create: Option<bool>, format: NameIdFormat) -> Self {
        Self { allow_create, format }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_value_equality() {
        let a = EntityId::new(String::from("https://idp.example.com"));
        let b = EntityId::from("https://idp.example.com");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "https://idp.example.com");
    }

    #[test]
    fn test_generated_ids_are_unique_ncnames() {
        let a = Saml2Id::generate();
        let b = Saml2Id::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("id"));
        assert_eq!(a.as_str().len(), 34);
    }

    #[test]
    fn test_binding_uris() {
        for binding in [Binding::HttpRedirect, Binding::HttpPost, Binding::Artifact] {
            assert_eq!(Binding::from_uri(binding.uri()), Some(binding));
        }
        assert_eq!(Binding::from_uri("urn:oasis:names:tc:SAML:2.0:bindings:SOAP"), None);
        assert!(!Binding::Artifact.supports_authn_requests());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StatusCode::from_uri("urn:oasis:names:tc:SAML:2.0:status:Success"),
            StatusCode::Success
        );
        assert_eq!(
            StatusCode::from_uri("urn:custom"),
            StatusCode::Other("urn:custom".into())
        );
        assert_eq!(StatusCode::Requester.uri(), "urn:oasis:names:tc:SAML:2.0:status:Requester");
    }

    #[test]
    fn test_name_id_formats() {
        assert_eq!(
            NameIdFormat::from_uri("urn:oasis:names:tc:SAML:2.0:nameid-format:transient"),
            Some(NameIdFormat::Transient)
        );
        assert_eq!(NameIdFormat::from_uri("urn:unknown"), None);
    }
}
