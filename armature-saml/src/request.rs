//! Outgoing SAML2 AuthnRequests.

use crate::error::{Result, SamlError};
use crate::types::{EntityId, NameIdFormat, NameIdPolicy, SAML2_NS, SAML2P_NS, Saml2Id};
use armature_saml_metadata::xsd::{format_datetime, parse_datetime};
use armature_xmldsig::xml::text_content;
use armature_xmldsig::{SigningCredentials, XmlSigner};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::BytesText;
use rand::RngCore;
use url::Url;

/// Length in bytes of the random relay state before encoding.
const RELAY_STATE_BYTES: usize = 42;

/// An AuthnRequest to send to an identity provider.
#[derive(Debug, Clone)]
pub struct Saml2AuthenticationRequest {
    pub id: Saml2Id,
    pub issue_instant: DateTime<Utc>,
    pub issuer: EntityId,
    pub destination: Option<Url>,
    pub assertion_consumer_service_url: Option<Url>,
    pub attribute_consuming_service_index: Option<u16>,
    pub name_id_policy: Option<NameIdPolicy>,
    /// Opaque token the IdP round-trips back to the SP.
    pub relay_state: Option<String>,
    /// Signs the request when set.
    pub signing_credentials: Option<SigningCredentials>,
}

impl Saml2AuthenticationRequest {
    /// A request with a fresh id and relay state.
    pub fn new(issuer: EntityId, destination: Url) -> Self {
        Self {
            id: Saml2Id::generate(),
            issue_instant: Utc::now(),
            issuer,
            destination: Some(destination),
            assertion_consumer_service_url: None,
            attribute_consuming_service_index: None,
            name_id_policy: None,
            relay_state: Some(generate_relay_state()),
            signing_credentials: None,
        }
    }

    pub fn with_assertion_consumer_service_url(mut self, url: Url) -> Self {
        self.assertion_consumer_service_url = Some(url);
        self
    }

    pub fn with_attribute_consuming_service_index(mut self, index: Option<u16>) -> Self {
        self.attribute_consuming_service_index = index;
        self
    }

    pub fn with_name_id_policy(mut self, policy: Option<NameIdPolicy>) -> Self {
        self.name_id_policy = policy;
        self
    }

    pub fn with_signing_credentials(mut self, credentials: SigningCredentials) -> Self {
        self.signing_credentials = Some(credentials);
        self
    }

    /// Serializes the request, signed if signing credentials are set.
    pub fn to_xml(&self) -> Result<String> {
        let xml = self.unsigned_xml()?;
        match &self.signing_credentials {
            Some(credentials) => Ok(XmlSigner::new(credentials.clone()).sign(&xml)?),
            None => Ok(xml),
        }
    }

    fn unsigned_xml(&self) -> Result<String> {
        let issue_instant = format_datetime(self.issue_instant);
        let index = self.attribute_consuming_service_index.map(|i| i.to_string());

        let mut writer = Writer::new(Vec::new());
        let mut root = writer
            .create_element("saml2p:AuthnRequest")
            .with_attribute(("xmlns:saml2p", SAML2P_NS))
            .with_attribute(("xmlns:saml2", SAML2_NS))
            .with_attribute(("ID", self.id.as_str()))
            .with_attribute(("Version", "2.0"))
            .with_attribute(("IssueInstant", issue_instant.as_str()));
        if let Some(destination) = &self.destination {
            root = root.with_attribute(("Destination", destination.as_str()));
        }
        if let Some(acs) = &self.assertion_consumer_service_url {
            root = root.with_attribute(("AssertionConsumerServiceURL", acs.as_str()));
        }
        if let Some(index) = &index {
            root = root.with_attribute(("AttributeConsumingServiceIndex", index.as_str()));
        }
        root.write_inner_content(|w| {
            w.create_element("saml2:Issuer")
                .write_text_content(BytesText::new(self.issuer.as_str()))?;
            if let Some(policy) = &self.name_id_policy {
                let mut element = w.create_element("saml2p:NameIDPolicy");
                if let Some(allow) = policy.allow_create {
                    element = element.with_attribute(("AllowCreate", if allow { "true" } else { "false" }));
                }
                element
                    .with_attribute(("Format", policy.format.uri()))
                    .write_empty()?;
            }
            Ok(())
        })
        .map_err(|e| SamlError::BadFormat(e.to_string()))?;

        String::from_utf8(writer.into_inner()).map_err(|e| SamlError::BadFormat(e.to_string()))
    }

    /// Parses an AuthnRequest, as an identity provider receives it.
    pub fn read(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().namespace() != Some(SAML2P_NS) || root.tag_name().name() != "AuthnRequest" {
            return Err(SamlError::Parse("Expected a SAML2 authentication request document".into()));
        }
        if root.attribute("Version") != Some("2.0") {
            return Err(SamlError::Parse("Wrong or unsupported SAML2 version".into()));
        }

        let id = root
            .attribute("ID")
            .ok_or_else(|| SamlError::Parse("AuthnRequest has no ID".into()))?;
        let issue_instant = root
            .attribute("IssueInstant")
            .and_then(parse_datetime)
            .ok_or_else(|| SamlError::Parse("AuthnRequest has no valid IssueInstant".into()))?;
        let issuer = root
            .children()
            .find(|c| c.has_tag_name((SAML2_NS, "Issuer")))
            .map(text_content)
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| SamlError::Parse("AuthnRequest has no Issuer".into()))?;
        let index = root
            .attribute("AttributeConsumingServiceIndex")
            .map(|v| {
                v.parse()
                    .map_err(|_| SamlError::Parse(format!("Invalid AttributeConsumingServiceIndex {v}")))
            })
            .transpose()?;
        let name_id_policy = root
            .children()
            .find(|c| c.has_tag_name((SAML2P_NS, "NameIDPolicy")))
            .map(|policy| {
                NameIdPolicy::new(
                    policy.attribute("AllowCreate").map(|v| v == "true" || v == "1"),
                    policy
                        .attribute("Format")
                        .and_then(NameIdFormat::from_uri)
                        .unwrap_or_default(),
                )
            });

        Ok(Self {
            id: Saml2Id::new(id),
            issue_instant,
            issuer: EntityId::new(issuer.trim()),
            destination: optional_url(root.attribute("Destination"))?,
            assertion_consumer_service_url: optional_url(root.attribute("AssertionConsumerServiceURL"))?,
            attribute_consuming_service_index: index,
            name_id_policy,
            relay_state: None,
            signing_credentials: None,
        })
    }
}

fn optional_url(value: Option<&str>) -> Result<Option<Url>> {
    value
        .map(|v| Url::parse(v).map_err(|e| SamlError::Parse(format!("Invalid URL {v}: {e}"))))
        .transpose()
}

/// A fresh relay state: 42 random bytes, URL-safe base64 (56 characters).
pub fn generate_relay_state() -> String {
    let mut bytes = [0u8; RELAY_STATE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
