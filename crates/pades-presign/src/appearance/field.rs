//! AcroForm field lookup

use lopdf::{Document, Object, ObjectId};
use std::collections::HashSet;

use crate::objects::{catalog, decode_text, get_resolved, resolve_dict};

/// A terminal form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormField {
    pub id: ObjectId,
    /// Fully qualified name, parts joined with `.`
    pub name: String,
    pub is_signature: bool,
    pub signed: bool,
    /// First widget annotation; the field itself when merged
    pub widget: ObjectId,
}

/// Every terminal field reachable from `/AcroForm /Fields`
pub(crate) fn terminal_fields(doc: &Document) -> Vec<FormField> {
    let Some(fields) = catalog(doc)
        .ok()
        .and_then(|root| get_resolved(doc, root, b"AcroForm"))
        .and_then(|form| form.as_dict().ok())
        .and_then(|form| get_resolved(doc, form, b"Fields"))
        .and_then(|fields| fields.as_array().ok())
    else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let mut visited = HashSet::new();
    for field in fields {
        if let Object::Reference(id) = field {
            walk(doc, *id, "", None, &mut visited, &mut found);
        }
    }
    found
}

fn walk(
    doc: &Document,
    id: ObjectId,
    parent_name: &str,
    inherited_type: Option<&[u8]>,
    visited: &mut HashSet<ObjectId>,
    found: &mut Vec<FormField>,
) {
    if !visited.insert(id) {
        return;
    }
    let Ok(dict) = doc.get_dictionary(id) else {
        return;
    };

    let partial = dict.get(b"T").and_then(Object::as_str).ok().map(decode_text);
    let name = match (parent_name, partial) {
        (parent, Some(part)) if !parent.is_empty() => format!("{}.{}", parent, part),
        (_, Some(part)) => part,
        (parent, None) => parent.to_string(),
    };
    let field_type = dict.get(b"FT").and_then(Object::as_name).ok().or(inherited_type);

    let kids: Vec<ObjectId> = get_resolved(doc, dict, b"Kids")
        .and_then(|kids| kids.as_array().ok())
        .map(|kids| kids.iter().filter_map(|k| k.as_reference().ok()).collect())
        .unwrap_or_default();
    let (field_kids, widget_kids): (Vec<ObjectId>, Vec<ObjectId>) = kids.into_iter().partition(|kid| {
        doc.get_dictionary(*kid)
            .map(|k| k.has(b"T") || k.has(b"Kids"))
            .unwrap_or(false)
    });

    if field_kids.is_empty() {
        let signed = matches!(
            get_resolved(doc, dict, b"V"),
            Some(value) if resolve_dict(doc, value).is_some()
        );
        found.push(FormField {
            id,
            name,
            is_signature: field_type == Some(b"Sig".as_slice()),
            signed,
            widget: widget_kids.first().copied().unwrap_or(id),
        });
        return;
    }

    for kid in field_kids {
        walk(doc, kid, &name, field_type, visited, found);
    }
}

/// Page holding `widget`: its `/P` entry, else the page listing it in `/Annots`
pub(crate) fn widget_page(doc: &Document, widget: ObjectId) -> Option<ObjectId> {
    let dict = doc.get_dictionary(widget).ok()?;
    if let Ok(page) = dict.get(b"P").and_then(Object::as_reference) {
        if doc.get_dictionary(page).is_ok() {
            return Some(page);
        }
    }
    doc.get_pages().into_values().find(|page| {
        doc.get_dictionary(*page)
            .ok()
            .and_then(|p| get_resolved(doc, p, b"Annots"))
            .and_then(|annots| annots.as_array().ok())
            .is_some_and(|annots| annots.iter().any(|a| a.as_reference().ok() == Some(widget)))
    })
}
