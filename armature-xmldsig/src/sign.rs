//! Enveloped signature creation.

use crate::algorithm::{
    CanonicalizationMethod, DSIG_NS, DigestMethod, EXC_C14N, SignatureMethod,
    TRANSFORM_ENVELOPED_SIGNATURE,
};
use crate::c14n::canonicalize;
use crate::error::{Result, XmlDsigError};
use crate::key::SigningCredentials;
use crate::xml::{escape_attr, parse};
use base64::{Engine, engine::general_purpose::STANDARD};

/// Signs the root element of a document with an enveloped signature.
///
/// The `ds:Signature` is placed right after the element's `Issuer` child, where
/// the SAML schemas expect it, or as the first child when there is no issuer.
#[derive(Debug, Clone)]
pub struct XmlSigner {
    credentials: SigningCredentials,
    signature_method: SignatureMethod,
    digest_method: DigestMethod,
    include_key_info: bool,
}

impl XmlSigner {
    /// RSA-SHA256 signer that publishes the certificate if it has one.
    pub fn new(credentials: SigningCredentials) -> Self {
        Self {
            credentials,
            signature_method: SignatureMethod::RsaSha256,
            digest_method: DigestMethod::Sha256,
            include_key_info: true,
        }
    }

    pub fn with_signature_method(mut self, method: SignatureMethod) -> Self {
        self.signature_method = method;
        self
    }

    pub fn with_digest_method(mut self, method: DigestMethod) -> Self {
        self.digest_method = method;
        self
    }

    pub fn with_key_info(mut self, include: bool) -> Self {
        self.include_key_info = include;
        self
    }

    /// Returns `xml` with an enveloped signature over its root element.
    pub fn sign(&self, xml: &str) -> Result<String> {
        self.sign_with_transforms(xml, &[])
    }

    /// Like [`sign`](Self::sign), but also lists `extra_transforms` on the
    /// reference. The digest is still computed with the standard transforms,
    /// so verifiers that honour the extra transforms will disagree with it.
    pub fn sign_with_transforms(&self, xml: &str, extra_transforms: &[&str]) -> Result<String> {
        let doc = parse(xml)?;
        let root = doc.root_element();
        let id = root
            .attribute("ID")
            .ok_or_else(|| XmlDsigError::Signing("element to sign has no ID attribute".into()))?;

        let insert_at = match root
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == "Issuer")
        {
            Some(issuer) => issuer.range().end,
            None => root
                .first_child()
                .map(|c| c.range().start)
                .ok_or_else(|| XmlDsigError::Signing("element to sign has no content".into()))?,
        };

        let content = canonicalize(root, CanonicalizationMethod::Exclusive, None, &[]);
        let digest = STANDARD.encode(self.digest_method.digest(content.as_bytes()));

        let mut transforms = format!(
            r#"<ds:Transform Algorithm="{TRANSFORM_ENVELOPED_SIGNATURE}"/><ds:Transform Algorithm="{EXC_C14N}"/>"#
        );
        for uri in extra_transforms {
            transforms.push_str(&format!(r#"<ds:Transform Algorithm="{}"/>"#, escape_attr(uri)));
        }
        let signed_info_body = format!(
            concat!(
                r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
                r#"<ds:SignatureMethod Algorithm="{method}"/>"#,
                r##"<ds:Reference URI="#{id}"><ds:Transforms>{transforms}</ds:Transforms>"##,
                r#"<ds:DigestMethod Algorithm="{digest_method}"/>"#,
                r#"<ds:DigestValue>{digest}</ds:DigestValue></ds:Reference>"#,
            ),
            c14n = EXC_C14N,
            method = self.signature_method.uri(),
            id = escape_attr(id),
            transforms = transforms,
            digest_method = self.digest_method.uri(),
            digest = digest,
        );

        // Exclusive canonicalization makes SignedInfo independent of where it
        // ends up, so it can be canonicalized standalone.
        let standalone = format!(r#"<ds:SignedInfo xmlns:ds="{DSIG_NS}">{signed_info_body}</ds:SignedInfo>"#);
        let signed_info_doc = parse(&standalone)?;
        let canonical_signed_info = canonicalize(
            signed_info_doc.root_element(),
            CanonicalizationMethod::Exclusive,
            None,
            &[],
        );
        let signature_value = STANDARD.encode(
            self.credentials
                .sign(self.signature_method, canonical_signed_info.as_bytes())?,
        );

        let key_info = match self.credentials.certificate_base64() {
            Some(cert) if self.include_key_info => format!(
                "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"
            ),
            _ => String::new(),
        };
        let signature = format!(
            r#"<ds:Signature xmlns:ds="{DSIG_NS}"><ds:SignedInfo>{signed_info_body}</ds:SignedInfo><ds:SignatureValue>{signature_value}</ds:SignatureValue>{key_info}</ds:Signature>"#
        );

        let mut out = String::with_capacity(xml.len() + signature.len());
        out.push_str(&xml[..insert_at]);
        out.push_str(&signature);
        out.push_str(&xml[insert_at..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::{SignatureValidator, XmlSignatureVerifier};
    use crate::xml::child_element;

    const IDP_KEY: &str = include_str!("../../testdata/idp-key.pem");
    const IDP_CERT: &str = include_str!("../../testdata/idp-cert.pem");

    fn signer() -> XmlSigner {
        let credentials = SigningCredentials::from_pem(IDP_KEY)
            .unwrap()
            .with_certificate_pem(IDP_CERT)
            .unwrap();
        XmlSigner::new(credentials)
    }

    #[test]
    fn test_signature_placed_after_issuer() {
        let xml = r#"<r xmlns:i="urn:i" ID="x1"><i:Issuer>me</i:Issuer><body/></r>"#;
        let signed = signer().sign(xml).unwrap();
        let doc = parse(&signed).unwrap();
        let children: Vec<_> = doc
            .root_element()
            .children()
            .filter(|c| c.is_element())
            .map(|c| c.tag_name().name().to_owned())
            .collect();
        assert_eq!(children, ["Issuer", "Signature", "body"]);
        let signature = child_element(doc.root_element(), DSIG_NS, "Signature").unwrap();
        assert!(signature.descendants().any(|n| n.has_tag_name("X509Certificate")));
    }

    #[test]
    fn test_signature_first_without_issuer() {
        let signed = signer().with_key_info(false).sign(r#"<r ID="x1"><body/></r>"#).unwrap();
        assert!(signed.starts_with(r#"<r ID="x1"><ds:Signature"#));
        assert!(!signed.contains("KeyInfo"));
    }

    #[test]
    fn test_sha1_signatures_verify() {
        let signer = signer()
            .with_signature_method(SignatureMethod::RsaSha1)
            .with_digest_method(DigestMethod::Sha1);
        let signed = signer.sign(r#"<r ID="x1"><body>text</body></r>"#).unwrap();
        let key = SigningCredentials::from_pem(IDP_KEY).unwrap().verification_key();
        assert!(XmlSignatureVerifier::new().verify(&signed, &[key]));
    }

    #[test]
    fn test_missing_id_fails() {
        assert!(matches!(
            signer().sign("<r><body/></r>"),
            Err(XmlDsigError::Signing(_))
        ));
    }
}
