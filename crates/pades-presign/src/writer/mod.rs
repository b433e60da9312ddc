//! Placeholder reservation writer
//!
//! Serializes the prepared revision with a fixed-size, zero-filled
//! `/Contents` gap and a `/ByteRange` patched once the final layout is known.
//! Incremental output appends to the untouched source bytes; fresh output is
//! a full rewrite with object streams whenever it is not encrypted.

mod objstm;
pub(crate) mod serialize;
pub(crate) mod xref;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Document, Object, ObjectId};
use md5::{Digest, Md5};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;

use crate::encryption::EncryptionPlan;
use crate::error::PresignError;
use crate::loader::FileId;
use crate::objects::type_name;
use crate::revision::RevisionMode;
use crate::CSIZE;
use serialize::{byte_range_text, write_indirect, write_signature, SignatureSlots};
use xref::XrefEntry;

/// Lowest header version able to carry object streams and the ESIC extension
const MIN_VERSION: &str = "1.7";

/// Where the signature must be injected, and what it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReceipt {
    /// Offset of the `<` opening the `/Contents` gap
    pub gap_offset: usize,
    /// Gap length including both delimiters, always `2 * CSIZE + 2`
    pub gap_length: usize,
    pub byte_range: [usize; 4],
    pub file_id: FileId,
}

impl ReservationReceipt {
    /// Offset just past the closing `>`, saturating on a corrupt receipt
    pub fn gap_end(&self) -> usize {
        self.gap_offset.saturating_add(self.gap_length)
    }

    /// Check the receipt against a document of `len` bytes
    ///
    /// The gap must be exactly `2 * CSIZE + 2` bytes inside the document and
    /// `/ByteRange` must cover everything else.
    pub fn validate(&self, len: usize) -> Result<(), PresignError> {
        if self.gap_length != 2 * CSIZE + 2 {
            return Err(PresignError::invalid(format!(
                "Signature gap is {} bytes instead of {}",
                self.gap_length,
                2 * CSIZE + 2
            )));
        }
        let gap_end = self
            .gap_offset
            .checked_add(self.gap_length)
            .filter(|&end| end <= len)
            .ok_or_else(|| PresignError::invalid("Signature gap lies outside the document"))?;
        let expected = [0, self.gap_offset, gap_end, len - gap_end];
        if self.byte_range != expected {
            return Err(PresignError::invalid(format!(
                "/ByteRange {:?} does not match the signature gap {:?}",
                self.byte_range, expected
            )));
        }
        Ok(())
    }
}

/// Everything the writer needs from a prepared revision
pub(crate) struct WriteRequest<'a> {
    pub doc: &'a Document,
    pub dirty: &'a BTreeSet<ObjectId>,
    pub source: &'a [u8],
    pub mode: RevisionMode,
    pub signature: ObjectId,
    pub encryption: &'a EncryptionPlan,
    pub file_id: FileId,
}

/// Keep the first identifier, mint a new second one
pub(crate) fn file_identifier(existing: Option<&FileId>) -> FileId {
    let mut seed = [0u8; 16];
    OsRng.fill_bytes(&mut seed);
    let mut hasher = Md5::new();
    hasher.update(seed);
    hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    let current = hasher.finalize().to_vec();
    FileId {
        original: existing.map(|id| id.original.clone()).unwrap_or_else(|| current.clone()),
        current,
    }
}

pub(crate) fn write(request: &WriteRequest<'_>) -> Result<(Vec<u8>, ReservationReceipt), PresignError> {
    let (mut out, slots) = match request.mode {
        RevisionMode::Fresh => write_fresh(request)?,
        RevisionMode::Incremental => write_incremental(request)?,
    };
    let slots = slots.ok_or_else(|| PresignError::invalid("Signature dictionary was not written"))?;

    let gap_length = slots.contents.len();
    if gap_length != 2 * CSIZE + 2 || slots.byte_range.len() != serialize::BYTE_RANGE_WIDTH {
        return Err(PresignError::invalid(format!(
            "Signature gap is {} bytes instead of {}, /ByteRange slot is {} bytes",
            gap_length,
            2 * CSIZE + 2,
            slots.byte_range.len()
        )));
    }
    let byte_range = [
        0,
        slots.contents.start,
        slots.contents.end,
        out.len() - slots.contents.end,
    ];
    let text = byte_range_text(byte_range)
        .ok_or_else(|| PresignError::invalid("Document too large for the /ByteRange slot"))?;
    out[slots.byte_range].copy_from_slice(&text);

    tracing::info!(
        mode = ?request.mode,
        encrypted = request.encryption.is_encrypted(),
        bytes = out.len(),
        gap_offset = slots.contents.start,
        "reserved signature gap"
    );

    let receipt = ReservationReceipt {
        gap_offset: slots.contents.start,
        gap_length,
        byte_range,
        file_id: request.file_id.clone(),
    };
    receipt.validate(out.len())?;
    Ok((out, receipt))
}

/// Flate-compress streams written without a filter
fn compress(object: &mut Object) -> Result<(), PresignError> {
    let Object::Stream(stream) = object else {
        return Ok(());
    };
    if stream.dict.has(b"Filter") || stream.content.is_empty() {
        return Ok(());
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&stream.content)
        .and_then(|_| encoder.finish())
        .map(|compressed| {
            stream.dict.set("Filter", "FlateDecode");
            stream.set_content(compressed);
        })
        .map_err(|e| PresignError::invalid(format!("Failed to compress stream: {}", e)))
}

/// Prepare one object for output: compress, then encrypt
fn prepare(request: &WriteRequest<'_>, id: ObjectId, object: &Object) -> Result<Object, PresignError> {
    let mut object = object.clone();
    compress(&mut object)?;
    if let EncryptionPlan::Reapply {
        handler,
        encrypt_id,
        ..
    } = request.encryption
    {
        if Some(id) != *encrypt_id {
            handler.encrypt_object(id, &mut object)?;
        }
    }
    Ok(object)
}

/// Source structures that a full rewrite regenerates or drops
fn discarded(object: &Object) -> bool {
    match object {
        Object::Stream(stream) => matches!(type_name(&stream.dict), Some(b"XRef") | Some(b"ObjStm")),
        Object::Dictionary(dict) => dict.has(b"Linearized"),
        _ => false,
    }
}

fn trailer_entries(request: &WriteRequest<'_>) -> Result<(Object, Option<Object>), PresignError> {
    let root = request
        .doc
        .trailer
        .get(b"Root")
        .map_err(|_| PresignError::invalid("Trailer has no /Root"))?
        .clone();
    let info = request
        .doc
        .trailer
        .get(b"Info")
        .ok()
        .filter(|info| matches!(info, Object::Reference(_)))
        .cloned();
    Ok((root, info))
}

fn write_fresh(request: &WriteRequest<'_>) -> Result<(Vec<u8>, Option<SignatureSlots>), PresignError> {
    let doc = request.doc;
    let encrypted = request.encryption.is_encrypted();
    let version = if doc.version.as_str() < MIN_VERSION {
        MIN_VERSION
    } else {
        doc.version.as_str()
    };

    let mut out = Vec::new();
    let _ = writeln!(out, "%PDF-{}", version);
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let mut entries = BTreeMap::new();
    entries.insert(0, XrefEntry::Free);
    let mut slots = None;
    let mut packed: Vec<(ObjectId, Object)> = Vec::new();
    let mut highest = 0;

    for (&id, object) in &doc.objects {
        if discarded(object) {
            continue;
        }
        highest = highest.max(id.0);
        let object = prepare(request, id, object)?;
        if id == request.signature {
            let offset = out.len();
            let dict = object
                .as_dict()
                .map_err(|_| PresignError::invalid("Signature object is not a dictionary"))?;
            slots = Some(write_signature(&mut out, id, dict));
            entries.insert(id.0, XrefEntry::InUse { offset, generation: id.1 });
            continue;
        }
        if !encrypted && objstm::packable(id, &object) {
            packed.push((id, object));
            continue;
        }
        entries.insert(id.0, XrefEntry::InUse { offset: out.len(), generation: id.1 });
        write_indirect(&mut out, id, &object);
    }

    let mut next_id = highest + 1;
    for chunk in packed.chunks(objstm::CAPACITY) {
        let stream_id = (next_id, 0);
        next_id += 1;
        for (index, (id, _)) in chunk.iter().enumerate() {
            entries.insert(id.0, XrefEntry::Compressed { stream: stream_id.0, index: index as u32 });
        }
        let mut stream = Object::Stream(objstm::pack(chunk));
        compress(&mut stream)?;
        entries.insert(stream_id.0, XrefEntry::InUse { offset: out.len(), generation: 0 });
        write_indirect(&mut out, stream_id, &stream);
    }

    let (root, info) = trailer_entries(request)?;
    let id = [request.file_id.original.as_slice(), request.file_id.current.as_slice()];

    if encrypted {
        fill_free(&mut entries, next_id);
        let mut trailer = xref::trailer(next_id, root, info, id);
        if let EncryptionPlan::Reapply { entry, .. } = request.encryption {
            trailer.set("Encrypt", entry.clone());
        }
        xref::write_table(&mut out, &entries, &trailer);
    } else {
        let xref_id = (next_id, 0);
        let offset = out.len();
        entries.insert(xref_id.0, XrefEntry::InUse { offset, generation: 0 });
        fill_free(&mut entries, next_id + 1);
        let trailer = xref::trailer(next_id + 1, root, info, id);
        let mut stream = Object::Stream(xref::stream(&entries, &trailer));
        compress(&mut stream)?;
        write_indirect(&mut out, xref_id, &stream);
        xref::write_startxref(&mut out, offset);
    }

    tracing::debug!(
        objects = entries.len(),
        object_streams = packed.len().div_ceil(objstm::CAPACITY),
        "wrote fresh document"
    );
    Ok((out, slots))
}

/// Mark unused numbers below `size` as free
fn fill_free(entries: &mut BTreeMap<u32, XrefEntry>, size: u32) {
    for number in 0..size {
        entries.entry(number).or_insert(XrefEntry::Free);
    }
}

fn write_incremental(
    request: &WriteRequest<'_>,
) -> Result<(Vec<u8>, Option<SignatureSlots>), PresignError> {
    let source = request.source;
    let prev = xref::find_startxref(source)
        .ok_or_else(|| PresignError::invalid("Source has no startxref"))?;
    let classic = xref::is_table(source, prev);

    let mut out = source.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }

    let mut entries = BTreeMap::new();
    let mut slots = None;
    for &id in request.dirty {
        let Some(object) = request.doc.objects.get(&id) else {
            continue;
        };
        let object = prepare(request, id, object)?;
        entries.insert(id.0, XrefEntry::InUse { offset: out.len(), generation: id.1 });
        if id == request.signature {
            let dict = object
                .as_dict()
                .map_err(|_| PresignError::invalid("Signature object is not a dictionary"))?;
            slots = Some(write_signature(&mut out, id, dict));
        } else {
            write_indirect(&mut out, id, &object);
        }
    }

    let declared = request
        .doc
        .trailer
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u32::try_from(size).ok())
        .unwrap_or(0);
    let mut size = entries.keys().last().map_or(0, |n| n + 1).max(declared);

    let (root, info) = trailer_entries(request)?;
    let id = [request.file_id.original.as_slice(), request.file_id.current.as_slice()];

    if classic {
        let mut trailer = xref::trailer(size, root, info, id);
        trailer.set("Prev", prev as i64);
        if let EncryptionPlan::Reapply { entry, .. } = request.encryption {
            trailer.set("Encrypt", entry.clone());
        }
        xref::write_table(&mut out, &entries, &trailer);
    } else {
        let xref_id = (size, 0);
        size += 1;
        let offset = out.len();
        entries.insert(xref_id.0, XrefEntry::InUse { offset, generation: 0 });
        let mut trailer = xref::trailer(size, root, info, id);
        trailer.set("Prev", prev as i64);
        if let EncryptionPlan::Reapply { entry, .. } = request.encryption {
            trailer.set("Encrypt", entry.clone());
        }
        let mut stream = Object::Stream(xref::stream(&entries, &trailer));
        compress(&mut stream)?;
        write_indirect(&mut out, xref_id, &stream);
        xref::write_startxref(&mut out, offset);
    }

    tracing::debug!(
        appended = entries.len(),
        prev,
        table = classic,
        "appended incremental revision"
    );
    Ok((out, slots))
}
