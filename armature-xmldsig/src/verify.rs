//! Enveloped signature verification with signature-wrapping defenses.
//!
//! The element under test is reparsed on its own, so nothing outside it can
//! take part in verification. Its signature must be an immediate child, must
//! carry exactly one reference, that reference must point at the element's own
//! `ID`, and every transform on it must be on a fixed allow-list. Only then is
//! any digest or RSA work done.

use crate::algorithm::{
    CanonicalizationMethod, DSIG_NS, DigestMethod, EXC_C14N_NS, SignatureMethod,
    TRANSFORM_ENVELOPED_SIGNATURE, is_allowed_transform,
};
use crate::c14n::canonicalize;
use crate::key::VerificationKey;
use crate::xml::{child_element, child_elements, outer_xml, parse};
use base64::{Engine, engine::general_purpose::STANDARD};
use roxmltree::Node;
use tracing::debug;

/// Checks that an element carries a valid enveloped signature.
pub trait SignatureValidator: Send + Sync {
    /// Returns true if the root element of `signed_element_xml` has an
    /// immediate enveloped signature that covers it and verifies against one
    /// of `keys`. Malformed or missing signatures yield false.
    fn verify(&self, signed_element_xml: &str, keys: &[VerificationKey]) -> bool;

    /// Serializes `element` standalone and verifies it.
    fn verify_node(&self, element: Node<'_, '_>, keys: &[VerificationKey]) -> bool {
        self.verify(&outer_xml(element, None), keys)
    }
}

/// The production [`SignatureValidator`].
#[derive(Debug, Clone, Default)]
pub struct XmlSignatureVerifier {
    skip_transform_check: bool,
}

impl XmlSignatureVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier that ignores unknown transforms, used to show that the
    /// allow-list alone rejects otherwise valid signatures.
    #[cfg(test)]
    pub(crate) fn without_transform_check() -> Self {
        Self {
            skip_transform_check: true,
        }
    }

    fn check(&self, xml: &str, keys: &[VerificationKey]) -> Result<(), &'static str> {
        let doc = parse(xml).map_err(|_| "element is not well-formed XML")?;
        let element = doc.root_element();
        let id = element.attribute("ID").ok_or("signed element has no ID")?;

        let mut signatures = child_elements(element, DSIG_NS, "Signature");
        let signature = signatures.next().ok_or("no signature on element")?;
        if signatures.next().is_some() {
            return Err("more than one signature on element");
        }

        let signed_info = child_element(signature, DSIG_NS, "SignedInfo").ok_or("missing SignedInfo")?;
        let c14n_node = child_element(signed_info, DSIG_NS, "CanonicalizationMethod")
            .ok_or("missing CanonicalizationMethod")?;
        let c14n_method = algorithm_of(c14n_node)
            .and_then(CanonicalizationMethod::from_uri)
            .ok_or("unsupported canonicalization method")?;
        let signature_method = child_element(signed_info, DSIG_NS, "SignatureMethod")
            .and_then(algorithm_of)
            .and_then(SignatureMethod::from_uri)
            .ok_or("unsupported signature method")?;

        let mut references = child_elements(signed_info, DSIG_NS, "Reference");
        let reference = references.next().ok_or("no reference in SignedInfo")?;
        if references.next().is_some() {
            return Err("more than one reference in SignedInfo");
        }
        let expected_uri = format!("#{id}");
        if reference.attribute("URI") != Some(expected_uri.as_str()) {
            return Err("reference does not point at the signed element");
        }

        let transforms: Vec<Node> = child_element(reference, DSIG_NS, "Transforms")
            .map(|t| child_elements(t, DSIG_NS, "Transform").collect())
            .unwrap_or_default();
        let mut enveloped = false;
        let mut content_c14n = None;
        let mut content_prefixes = Vec::new();
        for transform in &transforms {
            let uri = algorithm_of(*transform).ok_or("transform without algorithm")?;
            if !is_allowed_transform(uri) && !self.skip_transform_check {
                return Err("transform not on the allow-list");
            }
            if uri == TRANSFORM_ENVELOPED_SIGNATURE {
                enveloped = true;
            } else if let Some(method) = CanonicalizationMethod::from_uri(uri) {
                content_c14n = Some(method);
                content_prefixes = inclusive_prefixes(*transform);
            }
        }
        // A same-document reference is dereferenced with comments removed,
        // even under a WithComments transform.
        let content_c14n = match content_c14n.ok_or("reference has no canonicalization transform")? {
            CanonicalizationMethod::ExclusiveWithComments => CanonicalizationMethod::Exclusive,
            method => method,
        };

        let digest_method = child_element(reference, DSIG_NS, "DigestMethod")
            .and_then(algorithm_of)
            .and_then(DigestMethod::from_uri)
            .ok_or("unsupported digest method")?;
        let digest_value = child_element(reference, DSIG_NS, "DigestValue")
            .and_then(|n| decode_base64(n.text()?))
            .ok_or("missing or invalid DigestValue")?;
        let signature_value = child_element(signature, DSIG_NS, "SignatureValue")
            .and_then(|n| decode_base64(n.text()?))
            .ok_or("missing or invalid SignatureValue")?;

        let exclude = enveloped.then(|| signature.id());
        let content = canonicalize(element, content_c14n, exclude, &content_prefixes);
        if digest_method.digest(content.as_bytes()) != digest_value {
            return Err("digest mismatch");
        }

        let canonical_signed_info =
            canonicalize(signed_info, c14n_method, None, &inclusive_prefixes(c14n_node));
        let verified = keys.iter().any(|key| {
            key.verify(signature_method, canonical_signed_info.as_bytes(), &signature_value)
        });
        if verified {
            Ok(())
        } else {
            Err("signature value does not verify with any trusted key")
        }
    }
}

impl SignatureValidator for XmlSignatureVerifier {
    fn verify(&self, signed_element_xml: &str, keys: &[VerificationKey]) -> bool {
        match self.check(signed_element_xml, keys) {
            Ok(()) => true,
            Err(reason) => {
                debug!(reason, "XML signature rejected");
                false
            }
        }
    }
}

fn algorithm_of<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute("Algorithm")
}

fn inclusive_prefixes(node: Node<'_, '_>) -> Vec<String> {
    child_element(node, EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|n| n.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact).ok()
}
