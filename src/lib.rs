// Armature SSO - SAML2 single sign-on for Rust services
//
// This library bundles the XML signature, SAML metadata and SAML service
// provider crates behind one dependency.

// Re-export the member crates
pub use armature_saml as saml;
pub use armature_saml_metadata as metadata;
pub use armature_xmldsig as xmldsig;

// Prelude for common imports
pub mod prelude {
    pub use armature_saml::{
        Binding, Claim, ClaimsIdentity, EntityId, FederationConfig, FederationManager,
        IdentityProvider, IdentityProviderConfig, MetadataOptions, NameIdFormat, NameIdPolicy,
        Options, Saml2AuthenticationRequest, Saml2Id, Saml2Response, SamlError, ServiceProvider,
        SigningBehavior, SpOptions, StatusCode, claim_types,
    };
    pub use armature_saml_metadata::{MetadataLocator, MetadataResolver, MetadataSource};
    pub use armature_xmldsig::{
        SignatureValidator, SigningCredentials, VerificationKey, XmlSignatureVerifier, XmlSigner,
    };
}
