//! Pre-signature session
//!
//! A session moves through `Loaded -> Composed -> Reserved`, one type per
//! state: [`DocumentHandle`], a private `Composed` revision and the
//! returned [`PdfTriPhaseSession`]. The external signer then hashes
//! [`PdfTriPhaseSession::signed_content`] and hands the CMS bytes back to
//! [`PdfTriPhaseSession::complete`], which yields the finalized document.

use chrono::{DateTime, FixedOffset};
use lopdf::ObjectId;
use serde::{Deserialize, Serialize};
use shared_crypto::CertificateChain;
use tracing::Dispatch;

use crate::appearance::{AppearanceHandle, SignatureAppearance};
use crate::attachment;
use crate::config::SigningConfiguration;
use crate::diagnostics::{Degradation, Diagnostics};
use crate::dictionary::{apply_certification, SignatureDictionary};
use crate::encryption::EncryptionPlan;
use crate::error::PresignError;
use crate::extensions::declare_esic;
use crate::interaction::{Interaction, NoInteraction};
use crate::loader::{DocumentHandle, FileId, LoadOptions};
use crate::revision::{Revision, RevisionMode};
use crate::writer::{self, ReservationReceipt, WriteRequest};
use crate::CSIZE;

/// Version the appended revision declares, needed by the ESIC extension
const MIN_VERSION: &str = "1.7";

/// Builds one [`PdfTriPhaseSession`] per document
///
/// ```no_run
/// use chrono::{FixedOffset, TimeZone};
/// use pades_presign::{SessionBuilder, SigningConfiguration};
/// use shared_crypto::CertificateChain;
///
/// # fn run(pdf: &[u8], pem: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let config = SigningConfiguration::parse_properties("signReason=Approved\nheadLess=true");
/// let chain = CertificateChain::from_pem(pem)?;
/// let sign_time = FixedOffset::east_opt(3600).unwrap().with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
/// let session = SessionBuilder::new(config, chain, sign_time).build(pdf)?;
/// let digest_input = session.signed_content();
/// # let cms = digest_input;
/// let signed = session.complete(&cms[..16])?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    config: SigningConfiguration,
    chain: CertificateChain,
    sign_time: DateTime<FixedOffset>,
    interaction: Box<dyn Interaction>,
    dispatch: Option<Dispatch>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("certificates", &self.chain.len())
            .field("sign_time", &self.sign_time)
            .finish()
    }
}

impl SessionBuilder {
    pub fn new(
        config: SigningConfiguration,
        chain: CertificateChain,
        sign_time: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            config,
            chain,
            sign_time,
            interaction: Box::new(NoInteraction),
            dispatch: None,
        }
    }

    /// Answer password and certification prompts; ignored when headless
    pub fn with_interaction(mut self, interaction: impl Interaction + 'static) -> Self {
        self.interaction = Box::new(interaction);
        self
    }

    /// Run the session under `dispatch` instead of the global subscriber
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn build(&self, pdf: &[u8]) -> Result<PdfTriPhaseSession, PresignError> {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || self.run(pdf)),
            None => self.run(pdf),
        }
    }

    fn run(&self, pdf: &[u8]) -> Result<PdfTriPhaseSession, PresignError> {
        let span = tracing::info_span!("presign", bytes = pdf.len());
        let _entered = span.enter();

        let mut diagnostics = Diagnostics::default();
        for warning in self.config.warnings() {
            diagnostics.record(warning.clone());
        }

        let options = LoadOptions {
            owner_password: self.config.owner_password.as_deref(),
            user_password: self.config.user_password.as_deref(),
            headless: self.config.headless,
            allow_signing_certified: self.config.allow_signing_certified,
            interaction: &*self.interaction,
        };
        let loaded = DocumentHandle::load(pdf, &options)?;

        self.compose(loaded, diagnostics)?.reserve()
    }

    fn compose(
        &self,
        loaded: DocumentHandle,
        mut diagnostics: Diagnostics,
    ) -> Result<Composed, PresignError> {
        let config = &self.config;
        let signer_name = match self.chain.signer_common_name()? {
            Some(cn) => Some(cn),
            None => {
                diagnostics.record(Degradation::MissingSignerName);
                None
            }
        };

        let page_count = loaded.page_count();
        let signature_count = loaded.signature_count();
        let file_id = loaded.file_id().cloned();
        let (doc, source, security, loader_entries) = loaded.into_parts();
        diagnostics.absorb(loader_entries);

        let preferred = RevisionMode::for_signature_count(signature_count);
        let (encryption, mode) = EncryptionPlan::decide(
            security.as_ref(),
            preferred,
            config.avoid_encrypting_signed,
            file_id.is_some(),
            &mut diagnostics,
        );
        tracing::info!(mode = ?mode, signatures = signature_count, "selected revision mode");

        let mut revision = Revision::new(doc, mode);
        revision.strip_usage_rights()?;
        revision.promote_info();

        let appearance = SignatureAppearance::compose(
            config,
            revision.document(),
            page_count,
            signer_name.as_deref(),
            self.sign_time,
            &mut diagnostics,
        )?;

        let dictionary = SignatureDictionary::build(
            config,
            signer_name,
            self.sign_time,
            signature_count,
            &mut diagnostics,
        );
        let signature = revision.add_object(dictionary.to_dictionary());
        if dictionary.certification.is_some() {
            apply_certification(&mut revision, signature)?;
        }

        let handle = appearance.attach(&mut revision, signature)?;
        attachment::embed(&mut revision, config, &mut diagnostics)?;
        declare_esic(&mut revision)?;

        match revision.mode() {
            RevisionMode::Incremental => {
                revision.require_version(MIN_VERSION)?;
            }
            RevisionMode::Fresh if !encryption.is_encrypted() => {
                if let Some(id) = security.as_ref().and_then(|s| s.encrypt_id) {
                    revision.remove_object(id);
                }
            }
            RevisionMode::Fresh => {}
        }

        Ok(Composed {
            revision,
            source,
            signature,
            dictionary,
            appearance: handle,
            encryption,
            file_id: writer::file_identifier(file_id.as_ref()),
            diagnostics,
        })
    }
}

/// Every structural change applied, nothing serialized yet
struct Composed {
    revision: Revision,
    source: Vec<u8>,
    signature: ObjectId,
    dictionary: SignatureDictionary,
    appearance: AppearanceHandle,
    encryption: EncryptionPlan,
    file_id: FileId,
    diagnostics: Diagnostics,
}

impl Composed {
    fn reserve(self) -> Result<PdfTriPhaseSession, PresignError> {
        let mode = self.revision.mode();
        let (doc, dirty) = self.revision.into_document();
        let (bytes, receipt) = writer::write(&WriteRequest {
            doc: &doc,
            dirty: &dirty,
            source: &self.source,
            mode,
            signature: self.signature,
            encryption: &self.encryption,
            file_id: self.file_id,
        })?;

        let degradations = self.diagnostics.into_entries();
        tracing::info!(
            bytes = bytes.len(),
            gap_offset = receipt.gap_offset,
            degradations = degradations.len(),
            "pre-signature session ready"
        );

        Ok(PdfTriPhaseSession {
            bytes,
            receipt,
            appearance: self.appearance,
            signature: self.dictionary,
            mode,
            degradations,
        })
    }
}

/// A prepared document waiting for its signature bytes
///
/// Deserializing checks the receipt against the bytes, so a session read
/// back from storage is as trustworthy as a freshly built one.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredSession")]
pub struct PdfTriPhaseSession {
    #[serde(with = "base64_bytes")]
    bytes: Vec<u8>,
    receipt: ReservationReceipt,
    appearance: AppearanceHandle,
    signature: SignatureDictionary,
    mode: RevisionMode,
    degradations: Vec<Degradation>,
}

/// Wire form of [`PdfTriPhaseSession`] before its receipt is checked
#[derive(Deserialize)]
struct StoredSession {
    #[serde(with = "base64_bytes")]
    bytes: Vec<u8>,
    receipt: ReservationReceipt,
    appearance: AppearanceHandle,
    signature: SignatureDictionary,
    mode: RevisionMode,
    degradations: Vec<Degradation>,
}

impl TryFrom<StoredSession> for PdfTriPhaseSession {
    type Error = PresignError;

    fn try_from(stored: StoredSession) -> Result<Self, Self::Error> {
        check_reservation(&stored.bytes, &stored.receipt)?;
        Ok(Self {
            bytes: stored.bytes,
            receipt: stored.receipt,
            appearance: stored.appearance,
            signature: stored.signature,
            mode: stored.mode,
            degradations: stored.degradations,
        })
    }
}

/// The receipt fits `bytes` and points at a `<...>` gap
fn check_reservation<'a>(bytes: &'a [u8], receipt: &ReservationReceipt) -> Result<&'a [u8], PresignError> {
    receipt.validate(bytes.len())?;
    bytes
        .get(receipt.gap_offset..receipt.gap_end())
        .filter(|gap| gap.first() == Some(&b'<') && gap.last() == Some(&b'>'))
        .ok_or_else(|| PresignError::invalid("Reserved signature gap is not where the receipt says"))
}

impl std::fmt::Debug for PdfTriPhaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfTriPhaseSession")
            .field("bytes", &self.bytes.len())
            .field("receipt", &self.receipt)
            .field("appearance", &self.appearance)
            .field("mode", &self.mode)
            .field("degradations", &self.degradations)
            .finish()
    }
}

impl PdfTriPhaseSession {
    /// Prepared document with the zero-filled gap
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn receipt(&self) -> &ReservationReceipt {
        &self.receipt
    }

    pub fn appearance(&self) -> &AppearanceHandle {
        &self.appearance
    }

    pub fn signature_dictionary(&self) -> &SignatureDictionary {
        &self.signature
    }

    pub fn mode(&self) -> RevisionMode {
        self.mode
    }

    /// Non-fatal problems met while preparing, in order
    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The two byte ranges the signature covers, concatenated
    pub fn signed_content(&self) -> Vec<u8> {
        let range = |start: usize, len: usize| {
            start
                .checked_add(len)
                .and_then(|end| self.bytes.get(start..end))
                .unwrap_or_default()
        };
        let [start, first_len, second_start, second_len] = self.receipt.byte_range;
        [range(start, first_len), range(second_start, second_len)].concat()
    }

    /// Inject the CMS signature and return the finalized document
    ///
    /// The contents are hex encoded and padded with zeros up to the gap
    /// size; bytes outside the gap are never touched.
    pub fn complete(self, contents: &[u8]) -> Result<Vec<u8>, PresignError> {
        if contents.len() > CSIZE {
            return Err(PresignError::ReservationOverflow {
                needed: contents.len(),
                reserved: CSIZE,
            });
        }

        check_reservation(&self.bytes, &self.receipt)?;

        let mut bytes = self.bytes;
        let start = self.receipt.gap_offset + 1;
        let encoded = hex::encode_upper(contents);
        bytes[start..start + encoded.len()].copy_from_slice(encoded.as_bytes());
        tracing::info!(signature_bytes = contents.len(), "signature injected");
        Ok(bytes)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
