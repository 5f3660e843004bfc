//! Fixtures shared by the unit tests.

use armature_saml_metadata::{Metadata, MetadataError, MetadataLocator, MetadataSource, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const IDP_KEY: &str = include_str!("../../testdata/idp-key.pem");
pub const IDP_CERT: &str = include_str!("../../testdata/idp-cert.pem");
pub const ATTACKER_KEY: &str = include_str!("../../testdata/attacker-key.pem");
pub const ATTACKER_CERT: &str = include_str!("../../testdata/attacker-cert.pem");
pub const SP_KEY: &str = include_str!("../../testdata/sp-key.pem");
pub const SP_CERT: &str = include_str!("../../testdata/sp-cert.pem");

pub const REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const ARTIFACT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact";

/// Base64 body of a PEM certificate.
pub fn cert_base64(pem: &str) -> String {
    pem.lines().filter(|l| !l.starts_with("-----")).collect()
}

/// An `EntityDescriptor` for an identity provider.
pub fn idp_entity(entity_id: &str, sso: &[(&str, &str)], cert_pem: &str, attributes: &str) -> String {
    let services: String = sso
        .iter()
        .map(|(binding, location)| {
            format!(r#"<md:SingleSignOnService Binding="{binding}" Location="{location}"/>"#)
        })
        .collect();
    format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}" {attributes}>
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing"><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>
    <md:ArtifactResolutionService index="4" Binding="urn:oasis:names:tc:SAML:2.0:bindings:SOAP" Location="https://idp.example.com/ars"/>
    {services}
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        cert = cert_base64(cert_pem),
    )
}

/// An `EntitiesDescriptor` wrapping `entities`.
pub fn entities_document(entities: &[String]) -> String {
    format!(
        r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" cacheDuration="PT1H">{}</md:EntitiesDescriptor>"#,
        entities.concat()
    )
}

/// In-memory metadata keyed by locator text.
#[derive(Default)]
pub struct StaticSource {
    documents: Mutex<HashMap<String, String>>,
    loads: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, location: &str, xml: impl Into<String>) -> Self {
        self.set(location, xml);
        self
    }

    pub fn set(&self, location: &str, xml: impl Into<String>) {
        self.documents.lock().insert(location.to_owned(), xml.into());
    }

    pub fn remove(&self, location: &str) {
        self.documents.lock().remove(location);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for StaticSource {
    async fn load(&self, locator: &MetadataLocator) -> Result<Metadata> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let xml = self.documents.lock().get(&locator.to_string()).cloned();
        match xml {
            Some(xml) => Metadata::parse(&xml),
            None => Err(MetadataError::Load {
                locator: locator.to_string(),
                cause: "not found".into(),
            }),
        }
    }
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}

/// Counts verifications passed through to the real verifier.
#[derive(Default)]
pub struct CountingVerifier {
    inner: armature_xmldsig::XmlSignatureVerifier,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl armature_xmldsig::SignatureValidator for CountingVerifier {
    fn verify(&self, signed_element_xml: &str, keys: &[armature_xmldsig::VerificationKey]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(signed_element_xml, keys)
    }
}
