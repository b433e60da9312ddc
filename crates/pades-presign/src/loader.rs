//! Document loading
//!
//! Opens the source PDF with lopdf, authenticates against the Standard
//! security handler, decrypts the object graph in memory and reads the facts
//! later components depend on: page count, certification level, existing
//! signatures and the file identifier.

use lopdf::{Document, Object, ObjectId, ObjectStream, Reader};
use serde::{Deserialize, Serialize};

use crate::appearance::field::terminal_fields;
use crate::diagnostics::{Degradation, Diagnostics};
use crate::error::PresignError;
use crate::interaction::Interaction;
use crate::objects::{catalog, get_resolved, resolve, resolve_dict, type_name};
use crate::security::{EncryptDict, PasswordKind, SecurityHandler};

/// `/Type` given to object streams kept packed until decryption
const HELD_OBJECT_STREAM: &[u8] = b"HeldObjStm";

/// Modification policy of a certified document (DocMDP `/P`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CertificationLevel {
    #[default]
    NotCertified,
    NoChangesAllowed,
    FormFillingAllowed,
    FormFillingAndAnnotationsAllowed,
}

impl CertificationLevel {
    /// Map a DocMDP permission value; anything unknown means form filling
    pub fn from_permission(p: i64) -> Self {
        match p {
            1 => CertificationLevel::NoChangesAllowed,
            3 => CertificationLevel::FormFillingAndAnnotationsAllowed,
            _ => CertificationLevel::FormFillingAllowed,
        }
    }

    /// Numeric level as used in signing properties
    pub fn level(self) -> u8 {
        match self {
            CertificationLevel::NotCertified => 0,
            CertificationLevel::NoChangesAllowed => 1,
            CertificationLevel::FormFillingAllowed => 2,
            CertificationLevel::FormFillingAndAnnotationsAllowed => 3,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(CertificationLevel::NotCertified),
            1 => Some(CertificationLevel::NoChangesAllowed),
            2 => Some(CertificationLevel::FormFillingAllowed),
            3 => Some(CertificationLevel::FormFillingAndAnnotationsAllowed),
            _ => None,
        }
    }
}

/// Which password, if any, unlocked the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncryptionState {
    #[default]
    None,
    OwnerPassword,
    UserPassword,
}

/// Trailer `/ID` pair; the first element stays stable across revisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileId {
    #[serde(with = "hex_bytes")]
    pub original: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub current: Vec<u8>,
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// Encryption facts kept for writing the output
#[derive(Debug, Clone)]
pub(crate) struct SourceSecurity {
    pub handler: SecurityHandler,
    /// Indirect `/Encrypt` object, `None` when the dictionary is inline
    pub encrypt_id: Option<ObjectId>,
    /// The trailer `/Encrypt` value as found
    pub encrypt_entry: Object,
    /// A password was configured or typed, not just the empty one
    pub password_supplied: bool,
}

/// Inputs of [`DocumentHandle::load`]
pub struct LoadOptions<'a> {
    pub owner_password: Option<&'a str>,
    pub user_password: Option<&'a str>,
    pub headless: bool,
    pub allow_signing_certified: Option<bool>,
    pub interaction: &'a dyn Interaction,
}

/// A parsed, authenticated and decrypted source document
pub struct DocumentHandle {
    pub(crate) doc: Document,
    source: Vec<u8>,
    page_count: u32,
    certification: CertificationLevel,
    encryption: EncryptionState,
    signature_count: usize,
    file_id: Option<FileId>,
    pub(crate) security: Option<SourceSecurity>,
    degradations: Vec<Degradation>,
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("bytes", &self.source.len())
            .field("page_count", &self.page_count)
            .field("certification", &self.certification)
            .field("encryption", &self.encryption)
            .field("signature_count", &self.signature_count)
            .finish()
    }
}

impl DocumentHandle {
    /// Parse and unlock a PDF
    pub fn load(bytes: &[u8], options: &LoadOptions<'_>) -> Result<Self, PresignError> {
        let mut diagnostics = Diagnostics::default();
        let mut doc = parse(bytes)?;
        tracing::debug!(version = %doc.version, objects = doc.objects.len(), "parsed source document");

        let (encryption, security) = match doc.trailer.get(b"Encrypt") {
            Ok(entry) => {
                let entry = entry.clone();
                let (kind, security) = unlock(&mut doc, entry, options, &mut diagnostics)?;
                (kind, Some(security))
            }
            Err(_) => (EncryptionState::None, None),
        };

        let page_count = doc.get_pages().len() as u32;
        if page_count == 0 {
            return Err(PresignError::invalid("Document has no pages"));
        }

        let certification = read_certification(&doc);
        check_certification_policy(certification, options)?;

        let signature_count = count_signatures(&doc);
        let file_id = read_file_id(&doc);

        tracing::info!(
            pages = page_count,
            signatures = signature_count,
            certification = ?certification,
            encryption = ?encryption,
            "loaded document"
        );

        Ok(Self {
            doc,
            source: bytes.to_vec(),
            page_count,
            certification,
            encryption,
            signature_count,
            file_id,
            security,
            degradations: diagnostics.into_entries(),
        })
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn certification(&self) -> CertificationLevel {
        self.certification
    }

    pub fn encryption(&self) -> EncryptionState {
        self.encryption
    }

    pub fn signature_count(&self) -> usize {
        self.signature_count
    }

    pub fn file_id(&self) -> Option<&FileId> {
        self.file_id.as_ref()
    }

    /// The untouched input bytes
    pub fn source_bytes(&self) -> &[u8] {
        &self.source
    }

    /// The decrypted object graph
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Degradations found while loading
    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    /// Permission bits of the source Encrypt dictionary
    pub fn permissions(&self) -> Option<i32> {
        self.security.as_ref().map(|s| s.handler.permissions())
    }

    pub(crate) fn into_parts(self) -> (Document, Vec<u8>, Option<SourceSecurity>, Vec<Degradation>) {
        (self.doc, self.source, self.security, self.degradations)
    }
}

fn parse(bytes: &[u8]) -> Result<Document, PresignError> {
    let failed = |e: lopdf::Error| PresignError::invalid(format!("Failed to parse PDF: {}", e));
    let doc = Document::load_mem(bytes).map_err(failed)?;
    if !doc.trailer.has(b"Encrypt") {
        return Ok(doc);
    }
    // The reader drops object streams it cannot unpack, and encrypted ones
    // only unpack after decryption
    Reader {
        buffer: bytes,
        document: Document::new(),
    }
    .read(Some(hold_object_streams))
    .map_err(failed)
}

fn hold_object_streams(id: ObjectId, object: &mut Object) -> Option<(ObjectId, Object)> {
    if let Object::Stream(stream) = object {
        if stream.dict.type_is(b"ObjStm") {
            stream.dict.set("Type", Object::Name(HELD_OBJECT_STREAM.to_vec()));
        }
    }
    Some((id, object.clone()))
}

/// Authenticate and decrypt in place
fn unlock(
    doc: &mut Document,
    entry: Object,
    options: &LoadOptions<'_>,
    diagnostics: &mut Diagnostics,
) -> Result<(EncryptionState, SourceSecurity), PresignError> {
    let (encrypt_id, dict) = match &entry {
        Object::Reference(id) => {
            let dict = doc
                .get_object(*id)
                .and_then(Object::as_dict)
                .map_err(|_| PresignError::invalid("Encrypt dictionary is missing"))?;
            (Some(*id), dict.clone())
        }
        Object::Dictionary(dict) => (None, dict.clone()),
        _ => return Err(PresignError::invalid("Malformed /Encrypt entry")),
    };
    let encrypt = EncryptDict::from_dict(&dict)?;
    let id0 = read_file_id(doc).map(|id| id.original).unwrap_or_default();

    let mut candidates: Vec<&str> = [options.owner_password, options.user_password]
        .into_iter()
        .flatten()
        .collect();
    let password_supplied = !candidates.is_empty();
    if candidates.is_empty() {
        candidates.push("");
    }

    let mut unlocked = candidates
        .iter()
        .find_map(|pw| SecurityHandler::authenticate(&encrypt, &id0, pw.as_bytes()));
    let mut typed = false;

    if unlocked.is_none() {
        if options.headless {
            tracing::warn!("document password missing or wrong in headless mode");
            return Err(PresignError::PasswordProtected);
        }
        let typed_password = options.interaction.request_password().ok_or_else(|| {
            PresignError::UserCancelled("password prompt dismissed".to_string())
        })?;
        unlocked = SecurityHandler::authenticate(&encrypt, &id0, typed_password.as_bytes());
        typed = true;
    }

    let (handler, kind) = unlocked.ok_or(PresignError::PasswordProtected)?;
    tracing::info!(
        revision = encrypt.revision,
        password = ?kind,
        "authenticated encrypted document"
    );

    decrypt_document(doc, &handler, encrypt_id, diagnostics);

    let state = match kind {
        PasswordKind::Owner => EncryptionState::OwnerPassword,
        PasswordKind::User => EncryptionState::UserPassword,
    };
    Ok((
        state,
        SourceSecurity {
            handler,
            encrypt_id,
            encrypt_entry: entry,
            password_supplied: password_supplied || typed,
        },
    ))
}

fn decrypt_document(
    doc: &mut Document,
    handler: &SecurityHandler,
    encrypt_id: Option<ObjectId>,
    diagnostics: &mut Diagnostics,
) {
    let mut failed = 0;
    for (&id, object) in doc.objects.iter_mut() {
        if Some(id) == encrypt_id {
            continue;
        }
        failed += handler.decrypt_object(id, object);
    }

    // Compressed objects could not be parsed while their stream was encrypted
    let streams: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, object)| {
            object
                .as_stream()
                .map(|s| type_name(&s.dict) == Some(HELD_OBJECT_STREAM))
                .unwrap_or(false)
        })
        .map(|(&id, _)| id)
        .collect();

    let mut unreadable_streams = 0;
    for id in streams {
        let Some(Object::Stream(held)) = doc.objects.get_mut(&id) else {
            continue;
        };
        held.dict.set("Type", Object::Name(b"ObjStm".to_vec()));
        let mut stream = held.clone();
        match ObjectStream::new(&mut stream) {
            Ok(object_stream) => {
                for (inner_id, inner) in object_stream.objects {
                    doc.objects.entry(inner_id).or_insert(inner);
                }
            }
            Err(err) => {
                tracing::warn!(object = ?id, error = %err, "object stream not expanded");
                unreadable_streams += 1;
            }
        }
    }
    if let Some(max) = doc.objects.keys().map(|id| id.0).max() {
        doc.max_id = doc.max_id.max(max);
    }

    if failed > 0 || unreadable_streams > 0 {
        diagnostics.record(Degradation::UnreadableSourceObjects(format!(
            "{} value(s) failed to decrypt, {} object stream(s) unreadable",
            failed, unreadable_streams
        )));
    }
}

fn read_file_id(doc: &Document) -> Option<FileId> {
    let ids = doc.trailer.get(b"ID").ok().and_then(|o| resolve(doc, o))?;
    let ids = ids.as_array().ok()?;
    let original = ids.first().and_then(|o| o.as_str().ok())?.to_vec();
    let current = ids
        .get(1)
        .and_then(|o| o.as_str().ok())
        .map(<[u8]>::to_vec)
        .unwrap_or_else(|| original.clone());
    Some(FileId { original, current })
}

/// Certification level from `/Perms /DocMDP`
pub(crate) fn read_certification(doc: &Document) -> CertificationLevel {
    let Ok(root) = catalog(doc) else {
        return CertificationLevel::NotCertified;
    };
    let Some(signature) = get_resolved(doc, root, b"Perms")
        .and_then(|perms| perms.as_dict().ok())
        .and_then(|perms| get_resolved(doc, perms, b"DocMDP"))
        .and_then(|sig| sig.as_dict().ok())
    else {
        return CertificationLevel::NotCertified;
    };

    let references = get_resolved(doc, signature, b"Reference")
        .and_then(|r| r.as_array().ok())
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let permission = references
        .iter()
        .filter_map(|r| resolve_dict(doc, r))
        .find(|r| {
            r.get(b"TransformMethod").and_then(Object::as_name).ok() == Some(b"DocMDP".as_slice())
        })
        .and_then(|r| get_resolved(doc, r, b"TransformParams"))
        .and_then(|params| params.as_dict().ok())
        .and_then(|params| params.get(b"P").and_then(Object::as_i64).ok())
        .unwrap_or(2);

    CertificationLevel::from_permission(permission)
}

fn check_certification_policy(
    level: CertificationLevel,
    options: &LoadOptions<'_>,
) -> Result<(), PresignError> {
    if level != CertificationLevel::NoChangesAllowed {
        return Ok(());
    }
    match options.allow_signing_certified {
        Some(true) => {
            tracing::info!("signing a certified document as explicitly allowed");
            Ok(())
        }
        Some(false) => Err(PresignError::CertifiedDocumentRejected),
        None if options.headless => Err(PresignError::CertifiedDocumentRejected),
        None => {
            if options.interaction.confirm_certified_signing() {
                Ok(())
            } else {
                Err(PresignError::UserCancelled(
                    "signing a certified document was declined".to_string(),
                ))
            }
        }
    }
}

/// Count terminal signature fields carrying a value
pub(crate) fn count_signatures(doc: &Document) -> usize {
    terminal_fields(doc)
        .iter()
        .filter(|field| field.is_signature && field.signed)
        .count()
}
