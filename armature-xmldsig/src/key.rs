//! RSA key material: trusted verification keys and signing credentials.

use crate::algorithm::SignatureMethod;
use crate::error::{Result, XmlDsigError};
use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem, Encode};

/// A trusted RSA public key used to check signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationKey {
    public_key: RsaPublicKey,
}

impl VerificationKey {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self { public_key }
    }

    /// Extracts the subject public key from a DER encoded X.509 certificate.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self> {
        let cert = Certificate::from_der(der)
            .map_err(|e| XmlDsigError::Certificate(format!("failed to parse X.509 certificate: {e}")))?;
        Self::from_certificate(&cert)
    }

    pub fn from_certificate_pem(pem: &str) -> Result<Self> {
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| XmlDsigError::Certificate(format!("failed to parse PEM certificate: {e}")))?;
        Self::from_certificate(&cert)
    }

    /// Decodes base64 certificate content as found in `X509Certificate`
    /// elements. Embedded whitespace is ignored.
    pub fn from_certificate_base64(data: &str) -> Result<Self> {
        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(compact)
            .map_err(|e| XmlDsigError::Certificate(format!("invalid base64 certificate: {e}")))?;
        Self::from_certificate_der(&der)
    }

    /// Parses an SPKI `PUBLIC KEY` PEM block.
    pub fn from_public_key_pem(pem: &str) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| XmlDsigError::Key(format!("failed to parse RSA public key: {e}")))?;
        Ok(Self::new(public_key))
    }

    /// Accepts a PEM certificate, a PEM public key, or bare base64 certificate
    /// content.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.contains("-----BEGIN CERTIFICATE-----") {
            Self::from_certificate_pem(text)
        } else if text.contains("-----BEGIN PUBLIC KEY-----") {
            Self::from_public_key_pem(text)
        } else {
            Self::from_certificate_base64(text)
        }
    }

    fn from_certificate(cert: &Certificate) -> Result<Self> {
        let spki = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| XmlDsigError::Certificate(format!("failed to encode SPKI: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| XmlDsigError::Key(format!("certificate does not carry an RSA key: {e}")))?;
        Ok(Self::new(public_key))
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Checks a PKCS#1 v1.5 signature over `data`.
    pub fn verify(&self, method: SignatureMethod, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = pkcs1v15::Signature::try_from(signature) else {
            return false;
        };
        let key = self.public_key.clone();
        match method {
            SignatureMethod::RsaSha1 => pkcs1v15::VerifyingKey::<sha1::Sha1>::new(key)
                .verify(data, &signature)
                .is_ok(),
            SignatureMethod::RsaSha256 => pkcs1v15::VerifyingKey::<sha2::Sha256>::new(key)
                .verify(data, &signature)
                .is_ok(),
        }
    }
}

/// A private key, and optionally its certificate, used to sign documents.
#[derive(Clone)]
pub struct SigningCredentials {
    private_key: RsaPrivateKey,
    certificate_der: Option<Vec<u8>>,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("private_key", &"<redacted>")
            .field("has_certificate", &self.certificate_der.is_some())
            .finish()
    }
}

impl SigningCredentials {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self {
            private_key,
            certificate_der: None,
        }
    }

    /// Loads a PKCS#8 or PKCS#1 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::new(key));
        }
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| XmlDsigError::Key(format!("failed to parse RSA private key PEM: {e}")))?;
        Ok(Self::new(key))
    }

    /// Attaches the PEM certificate published in `KeyInfo`.
    pub fn with_certificate_pem(mut self, pem: &str) -> Result<Self> {
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| XmlDsigError::Certificate(format!("failed to parse PEM certificate: {e}")))?;
        let der = cert
            .to_der()
            .map_err(|e| XmlDsigError::Certificate(format!("failed to encode certificate: {e}")))?;
        self.certificate_der = Some(der);
        Ok(self)
    }

    /// Base64 DER of the attached certificate.
    pub fn certificate_base64(&self) -> Option<String> {
        self.certificate_der.as_ref().map(|der| STANDARD.encode(der))
    }

    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::new(self.private_key.to_public_key())
    }

    pub fn sign(&self, method: SignatureMethod, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.private_key.clone();
        let signature = match method {
            SignatureMethod::RsaSha1 => pkcs1v15::SigningKey::<sha1::Sha1>::new(key)
                .try_sign(data)
                .map(|s| s.to_vec()),
            SignatureMethod::RsaSha256 => pkcs1v15::SigningKey::<sha2::Sha256>::new(key)
                .try_sign(data)
                .map(|s| s.to_vec()),
        };
        signature.map_err(|e| XmlDsigError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDP_KEY: &str = include_str!("../../testdata/idp-key.pem");
    const IDP_CERT: &str = include_str!("../../testdata/idp-cert.pem");
    const ATTACKER_CERT: &str = include_str!("../../testdata/attacker-cert.pem");

    #[test]
    fn test_certificate_matches_private_key() {
        let credentials = SigningCredentials::from_pem(IDP_KEY).unwrap();
        let key = VerificationKey::from_certificate_pem(IDP_CERT).unwrap();
        assert_eq!(credentials.verification_key(), key);
        assert_ne!(VerificationKey::parse(ATTACKER_CERT).unwrap(), key);
    }

    #[test]
    fn test_parse_base64_certificate() {
        let body: String = IDP_CERT
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("\n");
        let key = VerificationKey::parse(&body).unwrap();
        assert_eq!(key, VerificationKey::parse(IDP_CERT).unwrap());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            VerificationKey::parse("not a certificate"),
            Err(XmlDsigError::Certificate(_))
        ));
        assert!(SigningCredentials::from_pem("nope").is_err());
    }

    #[test]
    fn test_sign_and_verify_bytes() {
        let credentials = SigningCredentials::from_pem(IDP_KEY)
            .unwrap()
            .with_certificate_pem(IDP_CERT)
            .unwrap();
        assert!(credentials.certificate_base64().is_some());
        for method in [SignatureMethod::RsaSha1, SignatureMethod::RsaSha256] {
            let sig = credentials.sign(method, b"payload").unwrap();
            let key = credentials.verification_key();
            assert!(key.verify(method, b"payload", &sig));
            assert!(!key.verify(method, b"tampered", &sig));
        }
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let credentials = SigningCredentials::from_pem(IDP_KEY).unwrap();
        assert!(format!("{credentials:?}").contains("<redacted>"));
    }
}
