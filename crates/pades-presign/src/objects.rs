//! Small helpers over the lopdf object model

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

use crate::error::PresignError;

/// Value of the `/Type` entry
pub(crate) fn type_name(dict: &Dictionary) -> Option<&[u8]> {
    dict.get(b"Type").and_then(Object::as_name).ok()
}

/// Follow references until a direct object is reached
pub(crate) fn resolve<'a>(doc: &'a Document, mut object: &'a Object) -> Option<&'a Object> {
    // Bounded to survive reference cycles in damaged files
    for _ in 0..32 {
        match object {
            Object::Reference(id) => object = doc.objects.get(id)?,
            other => return Some(other),
        }
    }
    None
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Dictionary entry resolved through references
pub(crate) fn get_resolved<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    resolve(doc, dict.get(key).ok()?)
}

pub(crate) fn catalog_id(doc: &Document) -> Result<ObjectId, PresignError> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| PresignError::invalid("Trailer has no /Root reference"))
}

pub(crate) fn catalog(doc: &Document) -> Result<&Dictionary, PresignError> {
    let id = catalog_id(doc)?;
    doc.objects
        .get(&id)
        .and_then(|object| object.as_dict().ok())
        .ok_or_else(|| PresignError::invalid("Document catalog is missing"))
}

/// Encode a text string, PDFDocEncoding compatible when possible
pub(crate) fn text_string(text: &str) -> Object {
    let latin1 = text
        .chars()
        .all(|c| matches!(c as u32, 0x20..=0x7E | 0x0A | 0x0D | 0x09 | 0xA1..=0xFF));
    if latin1 {
        Object::String(text.chars().map(|c| c as u8).collect(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Decode a text string written as UTF-16BE with BOM or PDFDocEncoding
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(body) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(body).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

pub(crate) fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}
