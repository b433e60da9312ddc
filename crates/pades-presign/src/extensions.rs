//! Developer extensions declared in the catalog

use lopdf::{dictionary, Object};

use crate::error::PresignError;
use crate::objects::resolve_dict;
use crate::revision::Revision;

/// ETSI PAdES extension prefix
const ESIC: &[u8] = b"ESIC";

/// Declare `/Extensions /ESIC << /BaseVersion /1.7 /ExtensionLevel 1 >>`
///
/// Existing extensions are kept; an ESIC entry with a higher level wins.
pub(crate) fn declare_esic(revision: &mut Revision) -> Result<(), PresignError> {
    let root = revision.catalog_id()?;
    let current = revision
        .document()
        .get_dictionary(root)?
        .get(b"Extensions")
        .ok()
        .and_then(|ext| resolve_dict(revision.document(), ext))
        .and_then(|ext| ext.get(ESIC).ok())
        .and_then(|esic| resolve_dict(revision.document(), esic))
        .and_then(|esic| esic.get(b"ExtensionLevel").and_then(Object::as_i64).ok());
    if current.is_some_and(|level| level >= 1) {
        return Ok(());
    }

    revision.child_dict_mut(root, b"Extensions")?.set(
        ESIC.to_vec(),
        dictionary! { "BaseVersion" => "1.7", "ExtensionLevel" => 1 },
    );
    tracing::debug!("declared ESIC developer extension");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevisionMode;
    use lopdf::{Dictionary, Document};
    use pretty_assertions::assert_eq;

    fn revision(catalog: Dictionary) -> Revision {
        let mut doc = Document::with_version("1.7");
        let root = doc.add_object(catalog);
        doc.trailer.set("Root", root);
        Revision::new(doc, RevisionMode::Incremental)
    }

    fn extensions(revision: &Revision) -> Dictionary {
        let root = revision.catalog_id().unwrap();
        revision
            .document()
            .get_dictionary(root)
            .unwrap()
            .get(b"Extensions")
            .unwrap()
            .as_dict()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_adds_esic_next_to_existing_extensions() {
        let mut revision = revision(dictionary! {
            "Type" => "Catalog",
            "Extensions" => dictionary! { "ADBE" => dictionary! { "ExtensionLevel" => 3 } },
        });
        declare_esic(&mut revision).unwrap();
        let ext = extensions(&revision);
        assert!(ext.has(b"ADBE"));
        let esic = ext.get(b"ESIC").unwrap().as_dict().unwrap();
        assert_eq!(esic.get(b"BaseVersion").unwrap().as_name().unwrap(), b"1.7");
        assert_eq!(esic.get(b"ExtensionLevel").unwrap().as_i64().unwrap(), 1);
    }

    #[test]
    fn test_existing_esic_is_left_alone() {
        let mut revision = revision(dictionary! {
            "Type" => "Catalog",
            "Extensions" => dictionary! {
                "ESIC" => dictionary! { "BaseVersion" => "1.7", "ExtensionLevel" => 2 },
            },
        });
        declare_esic(&mut revision).unwrap();
        assert!(revision.dirty().is_empty());
    }
}
