//! Incoming SAML2 responses: parsing, validation and claims.
//!
//! A response goes through `read`, then [`Saml2Response::validate`], then
//! [`Saml2Response::claims`]. Both later steps run once per response; repeated
//! calls return the first outcome, including a first failure.

use crate::assertion::{AssertionTemplate, Saml2Assertion};
use crate::claims::{ClaimsExtractor, ClaimsIdentity};
use crate::error::{Result, SamlError};
use crate::identity_provider::IdentityProvider;
use crate::pending::PendingRequestStore;
use crate::types::{EntityId, SAML2_NS, SAML2P_NS, Saml2Id, StatusCode};
use armature_saml_metadata::xsd::{format_datetime, parse_datetime};
use armature_xmldsig::algorithm::DSIG_NS;
use armature_xmldsig::xml::{child_element, child_elements, text_content};
use armature_xmldsig::{SignatureValidator, SigningCredentials, XmlSigner, outer_xml};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesText, Event};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

/// A SAML2 `Response` message.
#[derive(Debug)]
pub struct Saml2Response {
    xml: String,
    id: Saml2Id,
    in_response_to: Option<Saml2Id>,
    issue_instant: DateTime<Utc>,
    status: StatusCode,
    issuer: Option<EntityId>,
    destination: Option<Url>,
    root_signed: bool,
    /// Each direct child assertion, serialized standalone.
    assertions: Vec<String>,
    /// `Issuer` of each assertion, in the same order.
    assertion_issuers: Vec<Option<EntityId>>,
    validated: OnceLock<bool>,
    claims: OnceLock<Result<Vec<ClaimsIdentity>>>,
}

impl Saml2Response {
    /// Parses a response document.
    pub fn read(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if !root.has_tag_name((SAML2P_NS, "Response")) {
            return Err(SamlError::Parse("Expected a SAML2 assertion document".into()));
        }
        if root.attribute("Version") != Some("2.0") {
            return Err(SamlError::Parse("Wrong or unsupported SAML2 version".into()));
        }

        let id = root
            .attribute("ID")
            .ok_or_else(|| SamlError::Parse("Response has no ID".into()))?;
        let issue_instant = root
            .attribute("IssueInstant")
            .and_then(parse_datetime)
            .ok_or_else(|| SamlError::Parse("Response has no valid IssueInstant".into()))?;
        let status = child_element(root, SAML2P_NS, "Status")
            .and_then(|s| child_element(s, SAML2P_NS, "StatusCode"))
            .and_then(|c| c.attribute("Value"))
            .map(StatusCode::from_uri)
            .ok_or_else(|| SamlError::Parse("Response has no StatusCode".into()))?;
        let destination = root
            .attribute("Destination")
            .map(|d| Url::parse(d).map_err(|e| SamlError::Parse(format!("Invalid Destination {d}: {e}"))))
            .transpose()?;

        Ok(Self {
            xml: xml.to_owned(),
            id: Saml2Id::new(id),
            in_response_to: root.attribute("InResponseTo").map(Saml2Id::new),
            issue_instant,
            status,
            issuer: child_element(root, SAML2_NS, "Issuer").map(|i| EntityId::new(text_content(i).trim())),
            destination,
            root_signed: child_element(root, DSIG_NS, "Signature").is_some(),
            assertions: child_elements(root, SAML2_NS, "Assertion")
                .map(|a| outer_xml(a, None))
                .collect(),
            assertion_issuers: child_elements(root, SAML2_NS, "Assertion")
                .map(|a| child_element(a, SAML2_NS, "Issuer").map(|i| EntityId::new(text_content(i).trim())))
                .collect(),
            validated: OnceLock::new(),
            claims: OnceLock::new(),
        })
    }

    /// Parses a base64 encoded response, as posted to the assertion consumer
    /// service.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let compact: String = encoded.split_whitespace().collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| SamlError::BadFormat(e.to_string()))?;
        let xml = String::from_utf8(bytes).map_err(|e| SamlError::BadFormat(e.to_string()))?;
        Self::read(&xml)
    }

    /// Builds a successful response with one assertion per identity, signed
    /// with `credentials`.
    pub fn create(
        issuer: EntityId,
        credentials: SigningCredentials,
        destination: Option<Url>,
        in_response_to: Option<Saml2Id>,
        identities: Vec<ClaimsIdentity>,
    ) -> Result<Self> {
        let mut builder = Self::builder(issuer).signed_by(credentials).with_identities(identities);
        if let Some(destination) = destination {
            builder = builder.with_destination(destination);
        }
        if let Some(in_response_to) = in_response_to {
            builder = builder.in_response_to(in_response_to);
        }
        builder.build()
    }

    pub fn builder(issuer: EntityId) -> Saml2ResponseBuilder {
        Saml2ResponseBuilder::new(issuer)
    }

    pub fn id(&self) -> &Saml2Id {
        &self.id
    }

    pub fn in_response_to(&self) -> Option<&Saml2Id> {
        self.in_response_to.as_ref()
    }

    pub fn issue_instant(&self) -> DateTime<Utc> {
        self.issue_instant
    }

    pub fn status(&self) -> &StatusCode {
        &self.status
    }

    pub fn issuer(&self) -> Option<&EntityId> {
        self.issuer.as_ref()
    }

    pub fn destination(&self) -> Option<&Url> {
        self.destination.as_ref()
    }

    /// The document exactly as read.
    pub fn to_xml(&self) -> &str {
        &self.xml
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.xml)
    }

    /// Outcome of [`validate`](Self::validate), if it has run.
    pub fn validation_result(&self) -> Option<bool> {
        self.validated.get().copied()
    }

    /// Checks correlation and signatures against `idp`. Runs once; later
    /// calls return the first result without checking again.
    ///
    /// Every assertion must be issued by `idp`. `InResponseTo` must name a
    /// pending request sent to this response's issuer, or be absent with
    /// `idp` accepting unsolicited responses. A signed response root must
    /// verify; otherwise every assertion must, and there must be at least one.
    pub fn validate(
        &self,
        idp: &IdentityProvider,
        pending: &PendingRequestStore,
        verifier: &dyn SignatureValidator,
    ) -> bool {
        *self.validated.get_or_init(|| {
            self.validate_assertion_issuers(idp)
                && self.validate_in_response_to(idp, pending)
                && self.validate_signature(idp, verifier)
        })
    }

    fn validate_assertion_issuers(&self, idp: &IdentityProvider) -> bool {
        match self
            .assertion_issuers
            .iter()
            .find(|issuer| issuer.as_ref() != Some(idp.entity_id()))
        {
            Some(issuer) => {
                debug!(
                    "Response {} from Idp {} carries an assertion issued by {:?}",
                    self.id,
                    idp.entity_id(),
                    issuer
                );
                false
            }
            None => true,
        }
    }

    fn validate_in_response_to(&self, idp: &IdentityProvider, pending: &PendingRequestStore) -> bool {
        if self.issuer.as_ref().is_some_and(|issuer| issuer != idp.entity_id()) {
            debug!("Response {} was not issued by Idp {}", self.id, idp.entity_id());
            return false;
        }
        let Some(in_response_to) = &self.in_response_to else {
            if !idp.allow_unsolicited_authn_response() {
                debug!("Unsolicited response {} from Idp {} rejected", self.id, idp.entity_id());
            }
            return idp.allow_unsolicited_authn_response();
        };
        match pending.try_consume(in_response_to) {
            Some(state) if Some(&state.idp) == self.issuer.as_ref() => true,
            Some(state) => {
                debug!(
                    "Response {} answers request {} sent to {}, but was issued by {:?}",
                    self.id, in_response_to, state.idp, self.issuer
                );
                false
            }
            None => {
                debug!("Response {} answers unknown request {}", self.id, in_response_to);
                false
            }
        }
    }

    fn validate_signature(&self, idp: &IdentityProvider, verifier: &dyn SignatureValidator) -> bool {
        let keys = idp.signing_keys();
        if self.root_signed {
            return verifier.verify(&self.xml, &keys);
        }
        !self.assertions.is_empty() && self.assertions.iter().all(|a| verifier.verify(a, &keys))
    }

    /// Claims of a validated, successful response: one identity per
    /// assertion. Runs once; a failure is returned unchanged on every call.
    pub fn claims(&self, extractor: &ClaimsExtractor<'_>) -> Result<Vec<ClaimsIdentity>> {
        self.claims.get_or_init(|| self.extract_claims(extractor)).clone()
    }

    fn extract_claims(&self, extractor: &ClaimsExtractor<'_>) -> Result<Vec<ClaimsIdentity>> {
        match self.validated.get() {
            None => return Err(SamlError::NotValidated),
            Some(false) => return Err(SamlError::ValidationFailed),
            Some(true) => {}
        }
        if self.status != StatusCode::Success {
            return Err(SamlError::StatusNotSuccess);
        }
        let assertions = self
            .assertions
            .iter()
            .map(|a| Saml2Assertion::parse(a))
            .collect::<Result<Vec<_>>>()?;
        extractor.extract(&assertions)
    }
}

/// Builds response documents, as an identity provider would send them.
#[derive(Debug, Clone)]
pub struct Saml2ResponseBuilder {
    issuer: EntityId,
    id: Saml2Id,
    destination: Option<Url>,
    in_response_to: Option<Saml2Id>,
    status: StatusCode,
    identities: Vec<ClaimsIdentity>,
    audience: Option<EntityId>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: DateTime<Utc>,
    credentials: Option<SigningCredentials>,
    sign_assertions: bool,
}

impl Saml2ResponseBuilder {
    fn new(issuer: EntityId) -> Self {
        Self {
            issuer,
            id: Saml2Id::generate(),
            destination: None,
            in_response_to: None,
            status: StatusCode::Success,
            identities: Vec::new(),
            audience: None,
            not_before: None,
            not_on_or_after: Utc::now() + TimeDelta::minutes(2),
            credentials: None,
            sign_assertions: false,
        }
    }

    pub fn with_destination(mut self, destination: Url) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn in_response_to(mut self, id: Saml2Id) -> Self {
        self.in_response_to = Some(id);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_identity(mut self, identity: ClaimsIdentity) -> Self {
        self.identities.push(identity);
        self
    }

    pub fn with_identities(mut self, identities: Vec<ClaimsIdentity>) -> Self {
        self.identities.extend(identities);
        self
    }

    /// Restricts every assertion to `audience`.
    pub fn with_audience(mut self, audience: EntityId) -> Self {
        self.audience = Some(audience);
        self
    }

    pub fn with_validity(mut self, not_before: Option<DateTime<Utc>>, not_on_or_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_on_or_after = not_on_or_after;
        self
    }

    /// Signs the response root.
    pub fn signed_by(mut self, credentials: SigningCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Signs each assertion instead of the response root.
    pub fn sign_assertions(mut self, sign: bool) -> Self {
        self.sign_assertions = sign;
        self
    }

    pub fn build(self) -> Result<Saml2Response> {
        Saml2Response::read(&self.to_xml()?)
    }

    fn to_xml(&self) -> Result<String> {
        let signer = self.credentials.clone().map(XmlSigner::new);
        let assertions = self
            .identities
            .iter()
            .map(|identity| {
                let xml = AssertionTemplate {
                    issuer: &self.issuer,
                    identity,
                    in_response_to: self.in_response_to.as_ref(),
                    audience: self.audience.as_ref(),
                    not_before: self.not_before,
                    not_on_or_after: self.not_on_or_after,
                }
                .to_xml(&Saml2Id::generate())?;
                match &signer {
                    Some(signer) if self.sign_assertions => Ok(signer.sign(&xml)?),
                    _ => Ok(xml),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let issue_instant = format_datetime(Utc::now());
        let status = self.status.uri();
        let mut writer = Writer::new(Vec::new());
        let mut root = writer
            .create_element("saml2p:Response")
            .with_attribute(("xmlns:saml2p", SAML2P_NS))
            .with_attribute(("xmlns:saml2", SAML2_NS))
            .with_attribute(("ID", self.id.as_str()))
            .with_attribute(("Version", "2.0"))
            .with_attribute(("IssueInstant", issue_instant.as_str()));
        if let Some(destination) = &self.destination {
            root = root.with_attribute(("Destination", destination.as_str()));
        }
        if let Some(in_response_to) = &self.in_response_to {
            root = root.with_attribute(("InResponseTo", in_response_to.as_str()));
        }
        root.write_inner_content(|w| {
            w.create_element("saml2:Issuer")
                .write_text_content(BytesText::new(self.issuer.as_str()))?;
            w.create_element("saml2p:Status").write_inner_content(|w| {
                w.create_element("saml2p:StatusCode")
                    .with_attribute(("Value", status.as_str()))
                    .write_empty()?;
                Ok(())
            })?;
            for assertion in &assertions {
                // Already serialized markup; written as is.
                w.write_event(Event::Text(BytesText::from_escaped(assertion.as_str())))?;
            }
            Ok(())
        })
        .map_err(|e| SamlError::BadFormat(e.to_string()))?;

        let xml = String::from_utf8(writer.into_inner()).map_err(|e| SamlError::BadFormat(e.to_string()))?;
        match &signer {
            Some(signer) if !self.sign_assertions => Ok(signer.sign(&xml)?),
            _ => Ok(xml),
        }
    }
}
