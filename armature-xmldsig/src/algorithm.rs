//! Namespace and algorithm identifiers used by enveloped signatures.

/// XML digital signature namespace.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Namespace bound to the `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Exclusive canonicalization namespace (for `InclusiveNamespaces`).
pub const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Transforms a reference may declare. Anything else (XPath, XSLT,
/// inclusive canonicalization) is rejected before any cryptography runs.
pub const ALLOWED_TRANSFORMS: [&str; 3] = [
    TRANSFORM_ENVELOPED_SIGNATURE,
    EXC_C14N,
    EXC_C14N_WITH_COMMENTS,
];

/// Returns true if `uri` names an allowed reference transform.
pub fn is_allowed_transform(uri: &str) -> bool {
    ALLOWED_TRANSFORMS.contains(&uri)
}

/// Canonicalization modes this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalizationMethod {
    Exclusive,
    ExclusiveWithComments,
}

impl CanonicalizationMethod {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            EXC_C14N => Some(Self::Exclusive),
            EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Exclusive => EXC_C14N,
            Self::ExclusiveWithComments => EXC_C14N_WITH_COMMENTS,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::ExclusiveWithComments)
    }
}

/// Digest algorithms accepted in references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMethod {
    Sha1,
    Sha256,
}

impl DigestMethod {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            DIGEST_SHA1 => Some(Self::Sha1),
            DIGEST_SHA256 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => DIGEST_SHA1,
            Self::Sha256 => DIGEST_SHA256,
        }
    }

    /// Hashes `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        use sha2::Digest;
        match self {
            Self::Sha1 => sha1::Sha1::digest(data).to_vec(),
            Self::Sha256 => sha2::Sha256::digest(data).to_vec(),
        }
    }
}

/// Signature algorithms accepted in `SignedInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    RsaSha1,
    RsaSha256,
}

impl SignatureMethod {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            RSA_SHA1 => Some(Self::RsaSha1),
            RSA_SHA256 => Some(Self::RsaSha256),
            _ => None,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => RSA_SHA1,
            Self::RsaSha256 => RSA_SHA256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_allow_list() {
        assert!(is_allowed_transform(TRANSFORM_ENVELOPED_SIGNATURE));
        assert!(is_allowed_transform(EXC_C14N));
        assert!(is_allowed_transform(EXC_C14N_WITH_COMMENTS));
        assert!(!is_allowed_transform("http://www.w3.org/TR/1999/REC-xslt-19991116"));
        assert!(!is_allowed_transform("http://www.w3.org/TR/2001/REC-xml-c14n-20010315"));
    }

    #[test]
    fn test_method_uris() {
        assert_eq!(
            SignatureMethod::from_uri(RSA_SHA256),
            Some(SignatureMethod::RsaSha256)
        );
        assert_eq!(DigestMethod::from_uri(DIGEST_SHA1), Some(DigestMethod::Sha1));
        assert!(DigestMethod::from_uri("urn:md5").is_none());
        assert!(CanonicalizationMethod::ExclusiveWithComments.with_comments());
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(DigestMethod::Sha1.digest(b"abc").len(), 20);
        assert_eq!(DigestMethod::Sha256.digest(b"abc").len(), 32);
    }
}
