//! SAML2 assertions: parsing the parts claims are built from, and writing
//! assertions for outgoing responses.

use crate::claims::{ClaimsIdentity, claim_types};
use crate::error::{Result, SamlError};
use crate::types::{EntityId, SAML2_NS, Saml2Id};
use armature_saml_metadata::xsd::{format_datetime, parse_datetime};
use armature_xmldsig::xml::{child_element, child_elements, text_content};
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::BytesText;
use roxmltree::Node;

const BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// The subject's name identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
}

/// `saml2:Conditions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Audiences of each `AudienceRestriction`, one list per restriction.
    /// A relying party has to appear in every one of them.
    pub audience_restrictions: Vec<Vec<EntityId>>,
}

/// A multi-valued `saml2:Attribute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saml2Attribute {
    pub name: String,
    pub values: Vec<String>,
}

/// A parsed `saml2:Assertion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saml2Assertion {
    pub id: Saml2Id,
    pub issuer: EntityId,
    pub issue_instant: DateTime<Utc>,
    pub subject: Option<NameId>,
    pub conditions: Option<Conditions>,
    pub attributes: Vec<Saml2Attribute>,
}

impl Saml2Assertion {
    /// Parses a standalone assertion document.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        Self::from_node(doc.root_element())
    }

    pub fn from_node(node: Node<'_, '_>) -> Result<Self> {
        if !node.has_tag_name((SAML2_NS, "Assertion")) {
            return Err(SamlError::Parse("Expected a SAML2 assertion".into()));
        }
        let id = node
            .attribute("ID")
            .ok_or_else(|| SamlError::Parse("Assertion has no ID".into()))?;
        let issuer = child_element(node, SAML2_NS, "Issuer")
            .map(text_content)
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| SamlError::Parse(format!("Assertion {id} has no Issuer")))?;
        let issue_instant = node
            .attribute("IssueInstant")
            .and_then(parse_datetime)
            .ok_or_else(|| SamlError::Parse(format!("Assertion {id} has no valid IssueInstant")))?;

        let subject = child_element(node, SAML2_NS, "Subject")
            .and_then(|s| child_element(s, SAML2_NS, "NameID"))
            .map(|name_id| NameId {
                value: text_content(name_id).trim().to_owned(),
                format: name_id.attribute("Format").map(str::to_owned),
            });

        let conditions = child_element(node, SAML2_NS, "Conditions")
            .map(|c| -> Result<Conditions> {
                Ok(Conditions {
                    not_before: time_attribute(c, "NotBefore")?,
                    not_on_or_after: time_attribute(c, "NotOnOrAfter")?,
                    audience_restrictions: child_elements(c, SAML2_NS, "AudienceRestriction")
                        .map(|r| {
                            child_elements(r, SAML2_NS, "Audience")
                                .map(|a| EntityId::new(text_content(a).trim()))
                                .collect()
                        })
                        .collect(),
                })
            })
            .transpose()?;

        let attributes = child_elements(node, SAML2_NS, "AttributeStatement")
            .flat_map(|s| child_elements(s, SAML2_NS, "Attribute"))
            .filter_map(|a| {
                Some(Saml2Attribute {
                    name: a.attribute("Name")?.to_owned(),
                    values: child_elements(a, SAML2_NS, "AttributeValue")
                        .map(text_content)
                        .collect(),
                })
            })
            .collect();

        Ok(Self {
            id: Saml2Id::new(id),
            issuer: EntityId::new(issuer.trim()),
            issue_instant,
            subject,
            conditions,
            attributes,
        })
    }
}

fn time_attribute(node: Node<'_, '_>, name: &str) -> Result<Option<DateTime<Utc>>> {
    node.attribute(name)
        .map(|v| parse_datetime(v).ok_or_else(|| SamlError::Parse(format!("Invalid {name} {v}"))))
        .transpose()
}

/// What goes into an assertion written for an outgoing response.
#[derive(Debug, Clone)]
pub(crate) struct AssertionTemplate<'a> {
    pub issuer: &'a EntityId,
    pub identity: &'a ClaimsIdentity,
    pub in_response_to: Option<&'a Saml2Id>,
    pub audience: Option<&'a EntityId>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: DateTime<Utc>,
}

impl AssertionTemplate<'_> {
    /// Writes the assertion as a standalone document. The name identifier
    /// claim becomes the subject, every other claim an attribute.
    pub fn to_xml(&self, id: &Saml2Id) -> Result<String> {
        let issue_instant = format_datetime(Utc::now());
        let not_on_or_after = format_datetime(self.not_on_or_after);
        let not_before = self.not_before.map(format_datetime);

        let mut writer = Writer::new(Vec::new());
        writer
            .create_element("saml2:Assertion")
            .with_attribute(("xmlns:saml2", SAML2_NS))
            .with_attribute(("ID", id.as_str()))
            .with_attribute(("Version", "2.0"))
            .with_attribute(("IssueInstant", issue_instant.as_str()))
            .write_inner_content(|w| {
                w.create_element("saml2:Issuer")
                    .write_text_content(BytesText::new(self.issuer.as_str()))?;

                if let Some(name_id) = self.identity.name_identifier() {
                    w.create_element("saml2:Subject").write_inner_content(|w| {
                        w.create_element("saml2:NameID")
                            .write_text_content(BytesText::new(name_id))?;
                        w.create_element("saml2:SubjectConfirmation")
                            .with_attribute(("Method", BEARER))
                            .write_inner_content(|w| {
                                let mut data = w
                                    .create_element("saml2:SubjectConfirmationData")
                                    .with_attribute(("NotOnOrAfter", not_on_or_after.as_str()));
                                if let Some(in_response_to) = self.in_response_to {
                                    data = data.with_attribute(("InResponseTo", in_response_to.as_str()));
                                }
                                data.write_empty()?;
                                Ok(())
                            })?;
                        Ok(())
                    })?;
                }

                let mut conditions = w.create_element("saml2:Conditions");
                if let Some(not_before) = &not_before {
                    conditions = conditions.with_attribute(("NotBefore", not_before.as_str()));
                }
                conditions
                    .with_attribute(("NotOnOrAfter", not_on_or_after.as_str()))
                    .write_inner_content(|w| {
                        if let Some(audience) = self.audience {
                            w.create_element("saml2:AudienceRestriction")
                                .write_inner_content(|w| {
                                    w.create_element("saml2:Audience")
                                        .write_text_content(BytesText::new(audience.as_str()))?;
                                    Ok(())
                                })?;
                        }
                        Ok(())
                    })?;

                let attributes: Vec<_> = self
                    .identity
                    .claims()
                    .iter()
                    .filter(|c| c.claim_type != claim_types::NAME_IDENTIFIER)
                    .collect();
                if !attributes.is_empty() {
                    w.create_element("saml2:AttributeStatement")
                        .write_inner_content(|w| {
                            for claim in &attributes {
                                w.create_element("saml2:Attribute")
                                    .with_attribute(("Name", claim.claim_type.as_str()))
                                    .write_inner_content(|w| {
                                        w.create_element("saml2:AttributeValue")
                                            .write_text_content(BytesText::new(&claim.value))?;
                                        Ok(())
                                    })?;
                            }
                            Ok(())
                        })?;
                }
                Ok(())
            })
            .map_err(|e| SamlError::BadFormat(e.to_string()))?;

        String::from_utf8(writer.into_inner()).map_err(|e| SamlError::BadFormat(e.to_string()))
    }
}
