//! Revision policy and change tracking
//!
//! A [`Revision`] wraps the decrypted source document. Every object touched
//! through it is remembered, so an incremental section can be written with
//! exactly the changed objects while a fresh write simply takes everything.

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PresignError;
use crate::objects::catalog_id;

/// How the output is produced from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionMode {
    /// Source bytes kept verbatim, changes appended
    Incremental,
    /// Whole document rewritten with structural compression
    Fresh,
}

impl RevisionMode {
    /// Signed documents must be appended to, or their signatures break
    pub fn for_signature_count(signatures: usize) -> Self {
        if signatures > 0 {
            RevisionMode::Incremental
        } else {
            RevisionMode::Fresh
        }
    }
}

/// Mutable view over the document being prepared
#[derive(Debug)]
pub(crate) struct Revision {
    doc: Document,
    mode: RevisionMode,
    dirty: BTreeSet<ObjectId>,
    next_id: u32,
}

impl Revision {
    pub(crate) fn new(doc: Document, mode: RevisionMode) -> Self {
        // Object numbers below the source /Size may belong to free entries
        let declared = doc
            .trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|size| u32::try_from(size).ok())
            .unwrap_or(0);
        let highest = doc.objects.keys().map(|id| id.0).max().unwrap_or(0);
        let next_id = doc.max_id.max(highest).max(declared.saturating_sub(1)) + 1;
        Self {
            doc,
            mode,
            dirty: BTreeSet::new(),
            next_id,
        }
    }

    pub(crate) fn mode(&self) -> RevisionMode {
        self.mode
    }

    pub(crate) fn document(&self) -> &Document {
        &self.doc
    }

    /// Objects created or modified in this revision
    pub(crate) fn dirty(&self) -> &BTreeSet<ObjectId> {
        &self.dirty
    }

    pub(crate) fn add_object(&mut self, object: impl Into<Object>) -> ObjectId {
        let id = (self.next_id, 0);
        self.next_id += 1;
        self.doc.objects.insert(id, object.into());
        self.doc.max_id = self.doc.max_id.max(id.0);
        self.dirty.insert(id);
        id
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Result<&mut Object, PresignError> {
        let object = self
            .doc
            .objects
            .get_mut(&id)
            .ok_or_else(|| PresignError::invalid(format!("Object {} {} R is missing", id.0, id.1)))?;
        self.dirty.insert(id);
        Ok(object)
    }

    pub(crate) fn dict_mut(&mut self, id: ObjectId) -> Result<&mut Dictionary, PresignError> {
        match self.object_mut(id)? {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&mut stream.dict),
            _ => Err(PresignError::invalid(format!(
                "Object {} {} R is not a dictionary",
                id.0, id.1
            ))),
        }
    }

    pub(crate) fn catalog_id(&self) -> Result<ObjectId, PresignError> {
        catalog_id(&self.doc)
    }

    /// Dictionary stored under `key` of `owner`, created empty when absent
    ///
    /// Follows one level of indirection so the dictionary that actually
    /// changes is the one marked dirty.
    pub(crate) fn child_dict_mut(
        &mut self,
        owner: ObjectId,
        key: &[u8],
    ) -> Result<&mut Dictionary, PresignError> {
        match self.indirect_child(owner, key)? {
            Some(id) => self.dict_mut(id),
            None => {
                let dict = self.dict_mut(owner)?;
                if !matches!(dict.get(key), Ok(Object::Dictionary(_))) {
                    dict.set(key.to_vec(), Dictionary::new());
                }
                Ok(dict.get_mut(key)?.as_dict_mut()?)
            }
        }
    }

    /// Array stored under `key` of `owner`, created empty when absent
    pub(crate) fn child_array_mut(
        &mut self,
        owner: ObjectId,
        key: &[u8],
    ) -> Result<&mut Vec<Object>, PresignError> {
        match self.indirect_child(owner, key)? {
            Some(id) => match self.object_mut(id)? {
                Object::Array(items) => Ok(items),
                _ => Err(PresignError::invalid(format!(
                    "Object {} {} R is not an array",
                    id.0, id.1
                ))),
            },
            None => {
                let dict = self.dict_mut(owner)?;
                if !matches!(dict.get(key), Ok(Object::Array(_))) {
                    dict.set(key.to_vec(), Object::Array(Vec::new()));
                }
                Ok(dict.get_mut(key)?.as_array_mut()?)
            }
        }
    }

    fn indirect_child(&self, owner: ObjectId, key: &[u8]) -> Result<Option<ObjectId>, PresignError> {
        let dict = self.doc.get_dictionary(owner)?;
        Ok(match dict.get(key) {
            Ok(Object::Reference(id)) if self.doc.objects.contains_key(id) => Some(*id),
            _ => None,
        })
    }

    /// Drop `/UR` and `/UR3` usage rights, which a new signature invalidates
    ///
    /// `/DocMDP` is preserved; `/Perms` disappears once empty. Returns true
    /// when anything was removed.
    pub(crate) fn strip_usage_rights(&mut self) -> Result<bool, PresignError> {
        let root = self.catalog_id()?;
        let perms_ref = match self.doc.get_dictionary(root)?.get(b"Perms") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => return Ok(false),
        };

        let has_rights = |perms: &Dictionary| perms.has(b"UR") || perms.has(b"UR3");
        let present = match perms_ref {
            Some(id) => self.doc.get_dictionary(id).map(has_rights).unwrap_or(false),
            None => self
                .doc
                .get_dictionary(root)?
                .get(b"Perms")
                .and_then(Object::as_dict)
                .map(has_rights)
                .unwrap_or(false),
        };
        if !present {
            return Ok(false);
        }

        let perms = self.child_dict_mut(root, b"Perms")?;
        perms.remove(b"UR");
        perms.remove(b"UR3");
        if perms.is_empty() {
            self.dict_mut(root)?.remove(b"Perms");
        }
        tracing::info!("removed usage rights from the catalog");
        Ok(true)
    }

    /// Drop an object from the output; only meaningful for fresh writes
    pub(crate) fn remove_object(&mut self, id: ObjectId) -> Option<Object> {
        self.dirty.remove(&id);
        self.doc.objects.remove(&id)
    }

    /// Raise the catalog `/Version` when the source header is older
    pub(crate) fn require_version(&mut self, version: &str) -> Result<bool, PresignError> {
        if self.doc.version.as_str() >= version {
            return Ok(false);
        }
        let root = self.catalog_id()?;
        let declared = self
            .doc
            .get_dictionary(root)?
            .get(b"Version")
            .and_then(Object::as_name)
            .ok()
            .map(|v| String::from_utf8_lossy(v).into_owned());
        if declared.is_some_and(|v| v.as_str() >= version) {
            return Ok(false);
        }
        self.dict_mut(root)?.set("Version", Object::Name(version.as_bytes().to_vec()));
        tracing::debug!(from = %self.doc.version, to = version, "raised catalog version");
        Ok(true)
    }

    /// Move a direct trailer `/Info` dictionary into its own object
    ///
    /// The trailer written later only carries `/Info` as a reference.
    pub(crate) fn promote_info(&mut self) -> Option<ObjectId> {
        let info = match self.doc.trailer.get(b"Info") {
            Ok(Object::Dictionary(info)) => info.clone(),
            _ => return None,
        };
        let id = self.add_object(info);
        self.doc.trailer.set("Info", id);
        tracing::debug!(object = ?id, "moved direct /Info into an object");
        Some(id)
    }

    pub(crate) fn into_document(self) -> (Document, BTreeSet<ObjectId>) {
        (self.doc, self.dirty)
    }
}
