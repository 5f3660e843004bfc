//! XML signature benchmarks for armature-xmldsig

use armature_sso::xmldsig::{
    CanonicalizationMethod, SignatureMethod, SignatureValidator, SigningCredentials,
    VerificationKey, XmlSignatureVerifier, XmlSigner, canonicalize, xml,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

const IDP_KEY: &str = include_str!("../testdata/idp-key.pem");
const IDP_CERT: &str = include_str!("../testdata/idp-cert.pem");

fn assertion(attributes: usize) -> String {
    let values: String = (0..attributes)
        .map(|i| {
            format!(
                r#"<saml2:Attribute Name="attr{i}"><saml2:AttributeValue>value {i}</saml2:AttributeValue></saml2:Attribute>"#
            )
        })
        .collect();
    format!(
        r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_bench" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml2:Issuer>https://idp.example.com</saml2:Issuer><saml2:Subject><saml2:NameID>user</saml2:NameID></saml2:Subject><saml2:AttributeStatement>{values}</saml2:AttributeStatement></saml2:Assertion>"#
    )
}

fn canonicalization_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("c14n");

    for size in [1, 10, 100] {
        let doc = assertion(size);
        group.bench_function(format!("exclusive_{size}_attributes"), |b| {
            b.iter(|| {
                let parsed = xml::parse(black_box(&doc)).unwrap();
                black_box(canonicalize(
                    parsed.root_element(),
                    CanonicalizationMethod::Exclusive,
                    None,
                    &[],
                ))
            })
        });
    }

    group.finish();
}

fn signature_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("xmldsig");

    let credentials = SigningCredentials::from_pem(IDP_KEY).unwrap();
    let key = VerificationKey::parse(IDP_CERT).unwrap();
    let doc = assertion(10);

    for method in [SignatureMethod::RsaSha1, SignatureMethod::RsaSha256] {
        let signer = XmlSigner::new(credentials.clone()).with_signature_method(method);
        group.bench_function(format!("sign_{:?}", method), |b| {
            b.iter(|| signer.sign(black_box(&doc)).unwrap())
        });
    }

    let signed = XmlSigner::new(credentials).sign(&doc).unwrap();
    let verifier = XmlSignatureVerifier::new();
    let keys = [key];

    group.bench_function("verify", |b| {
        b.iter(|| assert!(verifier.verify(black_box(&signed), &keys)))
    });

    let tampered = signed.replace("value 3", "value 4");
    group.bench_function("verify_tampered", |b| {
        b.iter(|| assert!(!verifier.verify(black_box(&tampered), &keys)))
    });

    group.finish();
}

criterion_group!(signature_benches, canonicalization_benchmark, signature_benchmark);

criterion_main!(signature_benches);
