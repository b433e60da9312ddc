//! Encrypted and certified sources
//!
//! Run with: cargo test -p pades-presign --test security

mod common;

use common::*;
use pades_presign::{
    CryptMethod, Degradation, DocumentHandle, EncryptionState, FixedAnswers, LoadOptions,
    NoInteraction, PresignError, RevisionMode, SessionBuilder,
};
use pretty_assertions::assert_eq;

const OWNER: &str = "owner-secret";
const USER: &str = "user-secret";
/// Print and copy allowed, modification denied
const PERMISSIONS: i32 = -3904 | 4 | 16;

fn open(bytes: &[u8], user_password: Option<&str>) -> Result<DocumentHandle, PresignError> {
    DocumentHandle::load(
        bytes,
        &LoadOptions {
            owner_password: None,
            user_password,
            headless: true,
            allow_signing_certified: Some(true),
            interaction: &NoInteraction,
        },
    )
}

/// The last trailer, or cross-reference stream dictionary, names `/Encrypt`
fn trailer_has_encrypt(bytes: &[u8]) -> bool {
    let tail = &bytes[bytes.len().saturating_sub(1024)..];
    tail.windows(8).any(|w| w == b"/Encrypt")
}

#[test]
fn test_encryption_is_reapplied_with_same_permissions() {
    for method in [CryptMethod::Rc4, CryptMethod::AesV2, CryptMethod::AesV3] {
        let pdf = PdfBuilder::new(2).build_encrypted(OWNER, USER, PERMISSIONS, method);
        let source = open(&pdf, Some(USER)).unwrap();
        assert_eq!(source.encryption(), EncryptionState::UserPassword);

        let session = build(&format!("headLess=true\nuserPassword={}", USER), &pdf).unwrap();
        assert_eq!(session.mode(), RevisionMode::Fresh, "{:?}", method);
        assert!(session.degradations().is_empty(), "{:?}", session.degradations());
        assert!(gap_is_zero_filled(&session));
        let signature = session.appearance().signature_object;

        let signed = session.complete(&[0x30, 0x03, 0x02, 0x01, 0x01]).unwrap();
        assert!(trailer_has_encrypt(&signed), "{:?}", method);
        assert!(matches!(open(&signed, None), Err(PresignError::PasswordProtected)));

        let reopened = open(&signed, Some(USER)).unwrap();
        assert_eq!(reopened.permissions(), source.permissions(), "{:?}", method);
        assert_eq!(reopened.page_count(), 2);
        assert_eq!(reopened.signature_count(), 1);

        // Strings decrypt back to plain text, /Contents was never encrypted
        let sig = reopened.document().get_dictionary(signature).unwrap();
        assert_eq!(sig.get(b"Name").unwrap().as_str().unwrap(), b"Test Signer");
        assert_eq!(
            &sig.get(b"Contents").unwrap().as_str().unwrap()[..5],
            &[0x30, 0x03, 0x02, 0x01, 0x01]
        );
    }
}

#[test]
fn test_owner_password_opens_too() {
    let pdf = PdfBuilder::new(1).build_encrypted(OWNER, USER, PERMISSIONS, CryptMethod::AesV2);
    let session = build(&format!("headLess=true\nownerPassword={}", OWNER), &pdf).unwrap();
    let signed = session.complete(&[0x30]).unwrap();
    assert!(trailer_has_encrypt(&signed));
    assert_eq!(
        open(&signed, Some(USER)).unwrap().encryption(),
        EncryptionState::UserPassword
    );
}

#[test]
fn test_avoid_flag_writes_plain_fresh_output() {
    let pdf = PdfBuilder::new(1).build_encrypted(OWNER, USER, PERMISSIONS, CryptMethod::AesV2);
    let session = build(
        &format!("headLess=true\nuserPassword={}\navoidEncryptingSignedPdfs=true", USER),
        &pdf,
    )
    .unwrap();
    assert!(session.degradations().is_empty());

    let signed = session.complete(&[0x30]).unwrap();
    assert!(!trailer_has_encrypt(&signed));
    let reopened = open(&signed, None).unwrap();
    assert_eq!(reopened.encryption(), EncryptionState::None);
    assert_eq!(reopened.page_count(), 1);
}

#[test]
fn test_wrong_or_missing_password() {
    let pdf = PdfBuilder::new(1).build_encrypted(OWNER, USER, PERMISSIONS, CryptMethod::Rc4);

    let headless = build("headLess=true\nuserPassword=guess", &pdf);
    assert_eq!(headless.unwrap_err(), PresignError::PasswordProtected);

    let declined = build("headLess=false", &pdf);
    assert!(matches!(declined, Err(PresignError::UserCancelled(_))));

    let mistyped = SessionBuilder::new(config(""), chain(), sign_time())
        .with_interaction(FixedAnswers {
            password: Some("guess".to_string()),
            sign_certified: false,
        })
        .build(&pdf);
    assert_eq!(mistyped.unwrap_err(), PresignError::PasswordProtected);
}

#[test]
fn test_typed_password_counts_as_supplied() {
    let pdf = PdfBuilder::new(1).build_encrypted(OWNER, USER, PERMISSIONS, CryptMethod::AesV2);
    let session = SessionBuilder::new(config(""), chain(), sign_time())
        .with_interaction(FixedAnswers {
            password: Some(USER.to_string()),
            sign_certified: false,
        })
        .build(&pdf)
        .unwrap();
    let signed = session.complete(&[0x30]).unwrap();
    assert!(trailer_has_encrypt(&signed));
}

#[test]
fn test_encrypted_signed_source_keeps_encryption_when_appending() {
    let pdf = PdfBuilder::new(1)
        .with_signature("Author", None)
        .build_encrypted(OWNER, USER, PERMISSIONS, CryptMethod::AesV2);
    let session = build(
        &format!("headLess=true\nuserPassword={}\navoidEncryptingSignedPdfs=true", USER),
        &pdf,
    )
    .unwrap();

    assert_eq!(session.mode(), RevisionMode::Incremental);
    assert!(session.bytes().starts_with(&pdf));
    assert!(session.degradations().is_empty());

    let signed = session.complete(&[0x30]).unwrap();
    assert!(trailer_has_encrypt(&signed));
    let reopened = open(&signed, Some(USER)).unwrap();
    assert_eq!(reopened.signature_count(), 2);
    assert_eq!(reopened.permissions(), open(&pdf, Some(USER)).unwrap().permissions());
}

#[test]
fn test_change_restricted_certification_policy() {
    let pdf = PdfBuilder::new(1).with_signature("Certifier", Some(1)).build();

    for properties in ["headLess=true", "headLess=true\nallowSigningCertifiedPdfs=false"] {
        assert_eq!(
            build(properties, &pdf).unwrap_err(),
            PresignError::CertifiedDocumentRejected
        );
    }
    assert_eq!(
        build("allowSigningCertifiedPdfs=false", &pdf).unwrap_err(),
        PresignError::CertifiedDocumentRejected
    );

    let allowed = build("headLess=true\nallowSigningCertifiedPdfs=true", &pdf).unwrap();
    assert_eq!(allowed.mode(), RevisionMode::Incremental);
    assert!(allowed.bytes().starts_with(&pdf));

    let declined = build("", &pdf);
    assert!(matches!(declined, Err(PresignError::UserCancelled(_))));

    let confirmed = SessionBuilder::new(config(""), chain(), sign_time())
        .with_interaction(FixedAnswers {
            password: None,
            sign_certified: true,
        })
        .build(&pdf);
    assert!(confirmed.is_ok());
}

#[test]
fn test_form_filling_certification_allows_signing() {
    let pdf = PdfBuilder::new(1).with_signature("Certifier", Some(2)).build();
    let session = build("headLess=true\ncertificationLevel=1", &pdf).unwrap();
    assert_eq!(session.degradations(), &[Degradation::CertificationIgnored(1)]);
}

#[test]
fn test_encrypted_object_streams_are_unpacked() {
    let pdf = PdfBuilder::new(2).build_encrypted_packed(OWNER, USER, PERMISSIONS, CryptMethod::AesV2);
    let source = open(&pdf, Some(USER)).unwrap();
    assert_eq!(source.page_count(), 2);
    assert!(source.degradations().is_empty(), "{:?}", source.degradations());
    assert!(source.document().catalog().is_ok());

    let session = build(&format!("headLess=true\nuserPassword={}", USER), &pdf).unwrap();
    assert_eq!(session.mode(), RevisionMode::Fresh);
    assert!(session.degradations().is_empty(), "{:?}", session.degradations());

    let signed = session.complete(&[0x30]).unwrap();
    assert!(trailer_has_encrypt(&signed));
    let reopened = open(&signed, Some(USER)).unwrap();
    assert_eq!(reopened.page_count(), 2);
    assert_eq!(reopened.permissions(), source.permissions());
}

#[test]
fn test_signature_is_appended_to_packed_encrypted_source() {
    let pdf = PdfBuilder::new(1)
        .with_signature("Author", None)
        .build_encrypted_packed(OWNER, USER, PERMISSIONS, CryptMethod::Rc4);
    assert_eq!(open(&pdf, Some(USER)).unwrap().signature_count(), 1);

    let session = build(&format!("headLess=true\nuserPassword={}", USER), &pdf).unwrap();
    assert_eq!(session.mode(), RevisionMode::Incremental);
    assert!(session.bytes().starts_with(&pdf));

    let signed = session.complete(&[0x30]).unwrap();
    let reopened = open(&signed, Some(USER)).unwrap();
    assert_eq!(reopened.signature_count(), 2);
    assert_eq!(reopened.page_count(), 1);
}

#[test]
fn test_unreadable_object_stream_is_a_degradation() {
    let pdf = PdfBuilder::new(1).build_encrypted_with_broken_stream(
        OWNER,
        USER,
        PERMISSIONS,
        CryptMethod::AesV2,
    );
    let source = open(&pdf, Some(USER)).unwrap();
    assert_eq!(source.page_count(), 1);
    assert!(matches!(
        source.degradations(),
        [Degradation::UnreadableSourceObjects(_)]
    ));

    let session = build(&format!("headLess=true\nuserPassword={}", USER), &pdf).unwrap();
    assert!(session
        .degradations()
        .iter()
        .any(|d| matches!(d, Degradation::UnreadableSourceObjects(_))));
}
