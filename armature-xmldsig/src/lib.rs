//! XML digital signatures for Armature's SAML support.
//!
//! Pure Rust enveloped signatures: exclusive canonicalization, RSA
//! PKCS#1 v1.5 with SHA-1 or SHA-256, and a verifier hardened against
//! signature wrapping and transform injection.
//!
//! ```no_run
//! use armature_xmldsig::{SignatureValidator, VerificationKey, XmlSignatureVerifier};
//!
//! # fn check(xml: &str, cert_pem: &str) -> armature_xmldsig::Result<bool> {
//! let key = VerificationKey::parse(cert_pem)?;
//! let valid = XmlSignatureVerifier::new().verify(xml, &[key]);
//! # Ok(valid)
//! # }
//! ```

pub mod algorithm;
pub mod c14n;
pub mod error;
pub mod key;
pub mod sign;
pub mod verify;
pub mod xml;

pub use algorithm::{CanonicalizationMethod, DigestMethod, SignatureMethod};
pub use c14n::canonicalize;
pub use error::{Result, XmlDsigError};
pub use key::{SigningCredentials, VerificationKey};
pub use sign::XmlSigner;
pub use verify::{SignatureValidator, XmlSignatureVerifier};
pub use xml::{outer_xml, outer_xml_filtered};
