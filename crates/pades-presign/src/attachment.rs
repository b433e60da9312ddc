//! Embedded file attachment
//!
//! The payload becomes an `/EmbeddedFile` stream behind a file
//! specification, listed in the catalog `/Names /EmbeddedFiles` name tree.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use md5::{Digest, Md5};

use crate::appearance::decode_base64;
use crate::config::SigningConfiguration;
use crate::diagnostics::{Degradation, Diagnostics};
use crate::error::PresignError;
use crate::objects::{get_resolved, resolve_dict, text_string};
use crate::revision::Revision;

/// Embed the configured attachment, if any
///
/// Needs both the payload and the file name. Returns the file
/// specification object when something was embedded.
pub(crate) fn embed(
    revision: &mut Revision,
    config: &SigningConfiguration,
    diagnostics: &mut Diagnostics,
) -> Result<Option<ObjectId>, PresignError> {
    let (Some(payload), Some(file_name)) = (&config.attachment, &config.attachment_file_name) else {
        if config.attachment.is_some() {
            tracing::debug!("attachment without file name ignored");
        }
        return Ok(None);
    };

    let Some(data) = decode_base64(payload) else {
        diagnostics.record(Degradation::InvalidAttachment(format!(
            "{} is not valid Base64",
            file_name
        )));
        return Ok(None);
    };

    let checksum = Md5::digest(&data);
    let size = data.len();
    let file = revision.add_object(Stream::new(
        dictionary! {
            "Type" => "EmbeddedFile",
            "Params" => dictionary! {
                "Size" => size as i64,
                "CheckSum" => Object::String(checksum.to_vec(), StringFormat::Hexadecimal),
            },
        },
        data,
    ));

    let mut filespec = dictionary! {
        "Type" => "Filespec",
        "F" => text_string(file_name),
        "UF" => utf16_string(file_name),
        "EF" => dictionary! { "F" => file, "UF" => file },
    };
    if let Some(description) = &config.attachment_description {
        filespec.set("Desc", text_string(description));
    }
    let filespec = revision.add_object(filespec);

    insert_name(revision, file_name, filespec)?;
    tracing::info!(file = %file_name, bytes = size, "embedded attachment");
    Ok(Some(filespec))
}

fn utf16_string(text: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn key_bytes(object: &Object) -> Vec<u8> {
    match object {
        Object::String(bytes, _) => bytes.clone(),
        _ => Vec::new(),
    }
}

/// Add `key -> value` to the embedded files tree, keeping keys sorted
fn insert_name(revision: &mut Revision, key: &str, value: ObjectId) -> Result<(), PresignError> {
    let root = revision.catalog_id()?;
    let key = text_string(key);
    let key_sort = key_bytes(&key);

    let names_ref = match revision.document().get_dictionary(root)?.get(b"Names") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    let tree_ref = {
        let doc = revision.document();
        let names = match names_ref {
            Some(id) => doc.get_dictionary(id).ok(),
            None => doc
                .get_dictionary(root)?
                .get(b"Names")
                .ok()
                .and_then(|n| n.as_dict().ok()),
        };
        match names.and_then(|n| n.get(b"EmbeddedFiles").ok()) {
            Some(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    };

    let leaf = match tree_ref {
        Some(tree) => leaf_for(revision.document(), tree, &key_sort),
        None => None,
    };

    let node: &mut Dictionary = match (leaf, tree_ref) {
        (Some(leaf), _) => revision.dict_mut(leaf)?,
        (None, Some(tree)) => revision.dict_mut(tree)?,
        (None, None) => {
            let names = match names_ref {
                Some(id) => revision.dict_mut(id)?,
                None => revision.child_dict_mut(root, b"Names")?,
            };
            if !matches!(names.get(b"EmbeddedFiles"), Ok(Object::Dictionary(_))) {
                names.set("EmbeddedFiles", Dictionary::new());
            }
            names.get_mut(b"EmbeddedFiles")?.as_dict_mut()?
        }
    };

    if !matches!(node.get(b"Names"), Ok(Object::Array(_))) {
        node.set("Names", Vec::<Object>::new());
    }
    let entries = node.get_mut(b"Names")?.as_array_mut()?;
    let position = entries
        .chunks(2)
        .position(|pair| key_bytes(&pair[0]) > key_sort)
        .map(|pair_index| pair_index * 2)
        .unwrap_or(entries.len() & !1);
    entries.insert(position, Object::Reference(value));
    entries.insert(position, key);

    // A leaf of a larger tree keeps its own range current
    if node.has(b"Limits") {
        let entries = node.get(b"Names")?.as_array()?;
        let limits: Vec<Object> = match (entries.first(), entries.iter().rev().nth(1)) {
            (Some(first), Some(last)) => vec![first.clone(), last.clone()],
            _ => Vec::new(),
        };
        if !limits.is_empty() {
            node.set("Limits", limits);
        }
    }
    Ok(())
}

/// Leaf of an indirect name tree whose range should receive `key`
fn leaf_for(doc: &Document, tree: ObjectId, key: &[u8]) -> Option<ObjectId> {
    let mut node = tree;
    for _ in 0..32 {
        let dict = doc.get_dictionary(node).ok()?;
        let Some(kids) = get_resolved(doc, dict, b"Kids").and_then(|k| k.as_array().ok()) else {
            return Some(node);
        };
        let candidates: Vec<ObjectId> = kids.iter().filter_map(|k| k.as_reference().ok()).collect();
        // Last kid whose lower limit does not exceed the key
        let chosen = candidates
            .iter()
            .rev()
            .find(|kid| {
                doc.get_dictionary(**kid)
                    .ok()
                    .and_then(|k| get_resolved(doc, k, b"Limits"))
                    .and_then(|l| l.as_array().ok())
                    .and_then(|l| l.first())
                    .map(|low| key_bytes(low).as_slice() <= key)
                    .unwrap_or(false)
            })
            .or(candidates.first())?;
        if resolve_dict(doc, &Object::Reference(*chosen)).is_none() {
            return None;
        }
        node = *chosen;
    }
    None
}
