//! SAML2 metadata model and parser.
//!
//! Only the parts an SP needs from IdP metadata are modelled. Signatures on
//! the metadata are filtered out before parsing and are not verified: trust in
//! metadata comes from how it is obtained.

use crate::error::{MetadataError, Result};
use crate::xsd::{parse_datetime, parse_duration};
use armature_xmldsig::VerificationKey;
use armature_xmldsig::algorithm::DSIG_NS;
use armature_xmldsig::xml::{child_element, child_elements, outer_xml_filtered, parse, text_content};
use chrono::{DateTime, TimeDelta, Utc};
use roxmltree::Node;
use url::Url;

/// SAML2 metadata namespace.
pub const METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";

/// SAML2 protocol namespace, required in `protocolSupportEnumeration`.
pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

/// A parsed metadata document.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    Entity(EntityDescriptor),
    Entities(EntitiesDescriptor),
}

impl Metadata {
    /// Parses a metadata document after stripping `ds:Signature` elements.
    pub fn parse(xml: &str) -> Result<Self> {
        let filtered = strip_signatures(xml)?;
        let doc = parse(&filtered)?;
        let root = doc.root_element();
        if root.tag_name().namespace() != Some(METADATA_NS) {
            return Err(MetadataError::Parse(format!(
                "unexpected root element {}",
                root.tag_name().name()
            )));
        }
        match root.tag_name().name() {
            "EntityDescriptor" => Ok(Self::Entity(EntityDescriptor::from_node(root)?)),
            "EntitiesDescriptor" => Ok(Self::Entities(EntitiesDescriptor::from_node(root)?)),
            other => Err(MetadataError::Parse(format!("unexpected root element {other}"))),
        }
    }

    /// Views the document as a federation. A lone entity becomes a
    /// federation of one.
    pub fn into_entities(self) -> EntitiesDescriptor {
        match self {
            Self::Entities(entities) => entities,
            Self::Entity(entity) => EntitiesDescriptor {
                name: None,
                valid_until: entity.valid_until,
                cache_duration: entity.cache_duration,
                entities: vec![entity],
            },
        }
    }
}

/// `md:EntitiesDescriptor`, with nested groups flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitiesDescriptor {
    pub name: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub cache_duration: Option<TimeDelta>,
    pub entities: Vec<EntityDescriptor>,
}

impl EntitiesDescriptor {
    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let mut entities = Vec::new();
        collect_entities(node, &mut entities)?;
        Ok(Self {
            name: node.attribute("Name").map(str::to_owned),
            valid_until: valid_until(node)?,
            cache_duration: cache_duration(node)?,
            entities,
        })
    }

    /// Entities that act as identity providers.
    pub fn identity_providers(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter().filter(|e| e.idp_sso_descriptor.is_some())
    }
}

fn collect_entities(node: Node<'_, '_>, out: &mut Vec<EntityDescriptor>) -> Result<()> {
    for child in node.children().filter(|c| c.is_element()) {
        if child.tag_name().namespace() != Some(METADATA_NS) {
            continue;
        }
        match child.tag_name().name() {
            "EntityDescriptor" => out.push(EntityDescriptor::from_node(child)?),
            "EntitiesDescriptor" => collect_entities(child, out)?,
            _ => {}
        }
    }
    Ok(())
}

/// `md:EntityDescriptor`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub cache_duration: Option<TimeDelta>,
    pub idp_sso_descriptor: Option<IdpSsoDescriptor>,
}

impl EntityDescriptor {
    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let entity_id = node
            .attribute("entityID")
            .ok_or_else(|| MetadataError::Parse("EntityDescriptor without entityID".into()))?;
        let idp_sso_descriptor = child_elements(node, METADATA_NS, "IDPSSODescriptor")
            .find(|d| {
                d.attribute("protocolSupportEnumeration")
                    .is_some_and(|p| p.split_whitespace().any(|p| p == PROTOCOL_NS))
            })
            .map(IdpSsoDescriptor::from_node)
            .transpose()?;
        Ok(Self {
            entity_id: entity_id.to_owned(),
            valid_until: valid_until(node)?,
            cache_duration: cache_duration(node)?,
            idp_sso_descriptor,
        })
    }
}

/// `md:IDPSSODescriptor`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdpSsoDescriptor {
    pub want_authn_requests_signed: bool,
    pub single_sign_on_services: Vec<Endpoint>,
    pub artifact_resolution_services: Vec<IndexedEndpoint>,
    pub keys: Vec<KeyDescriptor>,
}

impl IdpSsoDescriptor {
    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let single_sign_on_services = child_elements(node, METADATA_NS, "SingleSignOnService")
            .map(Endpoint::from_node)
            .collect::<Result<_>>()?;
        let artifact_resolution_services = child_elements(node, METADATA_NS, "ArtifactResolutionService")
            .map(IndexedEndpoint::from_node)
            .collect::<Result<_>>()?;
        let keys = child_elements(node, METADATA_NS, "KeyDescriptor")
            .map(KeyDescriptor::from_node)
            .collect::<Result<_>>()?;
        Ok(Self {
            want_authn_requests_signed: node
                .attribute("WantAuthnRequestsSigned")
                .is_some_and(|v| v == "true" || v == "1"),
            single_sign_on_services,
            artifact_resolution_services,
            keys,
        })
    }

    /// Keys usable for checking IdP signatures: those marked `signing` or
    /// with no declared use.
    pub fn signing_keys(&self) -> impl Iterator<Item = &VerificationKey> {
        self.keys
            .iter()
            .filter(|k| k.key_use != KeyUse::Encryption)
            .flat_map(|k| k.keys.iter())
    }
}

/// An endpoint with a binding and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub binding: String,
    pub location: Url,
}

impl Endpoint {
    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let binding = required(node, "Binding")?;
        let location = required(node, "Location")?;
        let location = Url::parse(location)
            .map_err(|e| MetadataError::Parse(format!("invalid endpoint location {location}: {e}")))?;
        Ok(Self {
            binding: binding.to_owned(),
            location,
        })
    }
}

/// An endpoint with an index, such as an artifact resolution service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEndpoint {
    pub index: u16,
    pub is_default: bool,
    pub endpoint: Endpoint,
}

impl IndexedEndpoint {
    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let index = required(node, "index")?;
        let index = index
            .parse()
            .map_err(|_| MetadataError::Parse(format!("invalid endpoint index {index}")))?;
        Ok(Self {
            index,
            is_default: node.attribute("isDefault").is_some_and(|v| v == "true" || v == "1"),
            endpoint: Endpoint::from_node(node)?,
        })
    }
}

/// Declared purpose of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUse {
    Signing,
    Encryption,
    Unspecified,
}

/// `md:KeyDescriptor` with the certificates found in its `KeyInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDescriptor {
    pub key_use: KeyUse,
    pub keys: Vec<VerificationKey>,
}

impl KeyDescriptor {
    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let key_use = match node.attribute("use") {
            None => KeyUse::Unspecified,
            Some("signing") => KeyUse::Signing,
            Some("encryption") => KeyUse::Encryption,
            Some(other) => return Err(MetadataError::Parse(format!("unknown key use {other}"))),
        };
        let keys = child_element(node, DSIG_NS, "KeyInfo")
            .into_iter()
            .flat_map(|info| child_elements(info, DSIG_NS, "X509Data"))
            .flat_map(|data| child_elements(data, DSIG_NS, "X509Certificate"))
            .map(|cert| VerificationKey::from_certificate_base64(&text_content(cert)))
            .collect::<std::result::Result<Vec<_>, armature_xmldsig::XmlDsigError>>()?;
        Ok(Self { key_use, keys })
    }
}

fn required<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        MetadataError::Parse(format!("{} without {name}", node.tag_name().name()))
    })
}

fn valid_until(node: Node<'_, '_>) -> Result<Option<DateTime<Utc>>> {
    node.attribute("validUntil")
        .map(|v| parse_datetime(v).ok_or_else(|| MetadataError::Parse(format!("invalid validUntil {v}"))))
        .transpose()
}

fn cache_duration(node: Node<'_, '_>) -> Result<Option<TimeDelta>> {
    node.attribute("cacheDuration")
        .map(|v| parse_duration(v).ok_or_else(|| MetadataError::Parse(format!("invalid cacheDuration {v}"))))
        .transpose()
}

/// Rewrites `xml` without any `ds:Signature` elements.
pub fn strip_signatures(xml: &str) -> Result<String> {
    let doc = parse(xml)?;
    Ok(outer_xml_filtered(doc.root_element(), &|n: Node<'_, '_>| {
        !(n.tag_name().namespace() == Some(DSIG_NS) && n.tag_name().name() == "Signature")
    }))
}
