//! Fixture PDFs built in memory with lopdf

#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, TimeZone};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use pades_presign::{CryptMethod, PdfTriPhaseSession, PresignError, SecurityHandler, SessionBuilder};
use pades_presign::{SigningConfiguration, CSIZE};
use shared_crypto::CertificateChain;

pub const SIGNER_PEM: &str = include_str!("../../../shared-crypto/testdata/signer.pem");
pub const NO_CN_PEM: &str = include_str!("../../../shared-crypto/testdata/no_common_name.pem");

/// First trailer identifier of every fixture
pub const FIXTURE_ID: &[u8; 16] = b"fixture-id-00001";

/// 1x1 grayscale baseline JPEG header, enough for the rubric parser
pub const TINY_JPEG: &[u8] = &[
    0xFF, 0xD8, // SOI
    0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, // SOF0
    0xFF, 0xD9, // EOI
];

pub fn sign_time() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 14, 15, 9, 26)
        .unwrap()
}

pub fn chain() -> CertificateChain {
    CertificateChain::from_pem(SIGNER_PEM).unwrap()
}

pub fn config(properties: &str) -> SigningConfiguration {
    SigningConfiguration::parse_properties(properties)
}

pub fn build(properties: &str, pdf: &[u8]) -> Result<PdfTriPhaseSession, PresignError> {
    SessionBuilder::new(config(properties), chain(), sign_time()).build(pdf)
}

/// Fill the gap with a fake CMS blob and reload the result
pub fn complete_and_reload(session: PdfTriPhaseSession) -> (Vec<u8>, Document) {
    let signed = session.complete(&[0x30, 0x82, 0x01, 0x00]).unwrap();
    let doc = Document::load_mem(&signed).unwrap();
    (signed, doc)
}

/// The single signature dictionary added by `session`
pub fn signature_dict(session: &PdfTriPhaseSession, doc: &Document) -> Dictionary {
    doc.get_dictionary(session.appearance().signature_object)
        .unwrap()
        .clone()
}

pub fn gap_is_zero_filled(session: &PdfTriPhaseSession) -> bool {
    let receipt = session.receipt();
    let gap = &session.bytes()[receipt.gap_offset..receipt.gap_end()];
    gap.len() == 2 * CSIZE + 2
        && gap[0] == b'<'
        && gap[gap.len() - 1] == b'>'
        && gap[1..gap.len() - 1].iter().all(|&b| b == b'0')
}

/// Minimal multi-page document builder
pub struct PdfBuilder {
    doc: Document,
    catalog: ObjectId,
    pages: Vec<ObjectId>,
    fields: Vec<ObjectId>,
}

impl PdfBuilder {
    pub fn new(page_count: u32) -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut pages = Vec::new();
        for number in 1..=page_count {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("Page {}", number))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            pages.push(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Contents" => content_id,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
            }));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => pages.iter().map(|&id| id.into()).collect::<Vec<Object>>(),
                "Count" => page_count as i64,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let info = doc.add_object(dictionary! { "Producer" => Object::string_literal("fixture") });
        doc.trailer.set("Info", info);

        Self {
            doc,
            catalog,
            pages,
            fields: Vec::new(),
        }
    }

    pub fn page(&self, number: usize) -> ObjectId {
        self.pages[number - 1]
    }

    /// Existing signature on page 1, optionally certifying with DocMDP `/P`
    pub fn with_signature(mut self, name: &str, docmdp: Option<i64>) -> Self {
        let mut sig = dictionary! {
            "Type" => "Sig",
            "Filter" => "Adobe.PPKLite",
            "SubFilter" => "adbe.pkcs7.detached",
            "Contents" => Object::String(vec![0x30, 0x80, 0x06, 0x09], StringFormat::Hexadecimal),
            "ByteRange" => vec![0.into(), 10.into(), 20.into(), 30.into()],
            "M" => Object::string_literal("D:20240101000000Z"),
        };
        if let Some(p) = docmdp {
            sig.set(
                "Reference",
                vec![Object::Dictionary(dictionary! {
                    "Type" => "SigRef",
                    "TransformMethod" => "DocMDP",
                    "TransformParams" => dictionary! { "Type" => "TransformParams", "P" => p, "V" => "1.2" },
                })],
            );
        }
        let sig_id = self.doc.add_object(sig);
        if docmdp.is_some() {
            let catalog = self.catalog_mut();
            catalog.set("Perms", dictionary! { "DocMDP" => sig_id });
        }
        self.add_field(name, Some(sig_id), [20, 20, 120, 60])
    }

    /// Unsigned signature field on page 1
    pub fn with_empty_field(self, name: &str, rect: [i64; 4]) -> Self {
        self.add_field(name, None, rect)
    }

    /// Text field, not usable for signing
    pub fn with_text_field(mut self, name: &str) -> Self {
        let page = self.page(1);
        let field = self.doc.add_object(dictionary! {
            "FT" => "Tx",
            "T" => Object::string_literal(name),
            "Type" => "Annot",
            "Subtype" => "Widget",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
            "P" => page,
        });
        self.register(page, field);
        self
    }

    pub fn with_usage_rights(mut self) -> Self {
        let ur = self.doc.add_object(dictionary! { "Type" => "Sig", "Filter" => "Adobe.PPKLite" });
        let catalog = self.catalog_mut();
        match catalog.get_mut(b"Perms") {
            Ok(Object::Dictionary(perms)) => perms.set("UR3", ur),
            _ => catalog.set("Perms", dictionary! { "UR3" => ur }),
        }
        self
    }

    /// Trailer `/Info` written inline instead of as a reference
    pub fn with_direct_info(mut self) -> Self {
        let info = self
            .doc
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .unwrap();
        let dict = self.doc.get_dictionary(info).unwrap().clone();
        self.doc.objects.remove(&info);
        self.doc.trailer.set("Info", dict);
        self
    }

    fn add_field(mut self, name: &str, value: Option<ObjectId>, rect: [i64; 4]) -> Self {
        let page = self.page(1);
        let mut field = dictionary! {
            "FT" => "Sig",
            "T" => Object::string_literal(name),
            "Type" => "Annot",
            "Subtype" => "Widget",
            "Rect" => rect.iter().map(|&v| v.into()).collect::<Vec<Object>>(),
            "F" => 132,
            "P" => page,
        };
        if let Some(value) = value {
            field.set("V", value);
        }
        let field = self.doc.add_object(field);
        self.register(page, field);
        self
    }

    fn register(&mut self, page: ObjectId, field: ObjectId) {
        self.fields.push(field);
        if let Ok(Object::Dictionary(page)) = self.doc.get_object_mut(page) {
            match page.get_mut(b"Annots") {
                Ok(Object::Array(annots)) => annots.push(field.into()),
                _ => page.set("Annots", vec![field.into()]),
            }
        }
        let fields: Vec<Object> = self.fields.iter().map(|&id| id.into()).collect();
        let signed = self.doc.objects.iter().any(|(_, o)| {
            o.as_dict()
                .map(|d| d.get(b"FT").and_then(Object::as_name).ok() == Some(b"Sig".as_slice()) && d.has(b"V"))
                .unwrap_or(false)
        });
        let catalog = self.catalog_mut();
        let mut acroform = dictionary! { "Fields" => fields };
        if signed {
            acroform.set("SigFlags", 3);
        }
        catalog.set("AcroForm", acroform);
    }

    fn catalog_mut(&mut self) -> &mut Dictionary {
        self.doc
            .get_object_mut(self.catalog)
            .and_then(Object::as_dict_mut)
            .unwrap()
    }

    fn set_id(&mut self) {
        let id = Object::String(FIXTURE_ID.to_vec(), StringFormat::Hexadecimal);
        self.doc.trailer.set("ID", vec![id.clone(), id]);
    }

    pub fn build(mut self) -> Vec<u8> {
        self.set_id();
        let mut out = Vec::new();
        self.doc.save_to(&mut out).unwrap();
        out
    }

    /// Protect with the Standard handler; the user password must not be empty
    pub fn build_encrypted(mut self, owner: &str, user: &str, permissions: i32, method: CryptMethod) -> Vec<u8> {
        self.set_id();
        let (handler, encrypt) =
            SecurityHandler::protect(owner, user, permissions, FIXTURE_ID, method).unwrap();
        for (&id, object) in self.doc.objects.iter_mut() {
            handler.encrypt_object(id, object).unwrap();
        }
        let encrypt_id = self.doc.add_object(encrypt);
        self.doc.trailer.set("Encrypt", encrypt_id);
        let mut out = Vec::new();
        self.doc.save_to(&mut out).unwrap();
        out
    }

    /// Like [`Self::build_encrypted`], with every dictionary packed into one
    /// encrypted object stream and a cross-reference stream
    pub fn build_encrypted_packed(self, owner: &str, user: &str, permissions: i32, method: CryptMethod) -> Vec<u8> {
        self.pack_encrypted(owner, user, permissions, method, false)
    }

    /// Packed and encrypted, plus a second object stream that cannot be unpacked
    pub fn build_encrypted_with_broken_stream(self, owner: &str, user: &str, permissions: i32, method: CryptMethod) -> Vec<u8> {
        self.pack_encrypted(owner, user, permissions, method, true)
    }

    fn pack_encrypted(
        mut self,
        owner: &str,
        user: &str,
        permissions: i32,
        method: CryptMethod,
        broken: bool,
    ) -> Vec<u8> {
        self.set_id();
        let (handler, encrypt) =
            SecurityHandler::protect(owner, user, permissions, FIXTURE_ID, method).unwrap();

        let mut next_id = self.doc.max_id + 1;
        let mut allocate = || {
            next_id += 1;
            (next_id - 1, 0u16)
        };
        let encrypt_id = allocate();
        let stream_id = allocate();
        let broken_id = broken.then(&mut allocate);
        let xref_id = allocate();

        let mut top_level: Vec<(ObjectId, Object)> = vec![(encrypt_id, Object::Dictionary(encrypt))];
        let mut index = Vec::new();
        let mut bodies = Vec::new();
        let mut packed = Vec::new();
        for (&id, object) in &self.doc.objects {
            if let Object::Stream(_) = object {
                let mut object = object.clone();
                handler.encrypt_object(id, &mut object).unwrap();
                top_level.push((id, object));
            } else {
                index.extend_from_slice(format!("{} {} ", id.0, bodies.len()).as_bytes());
                write_value(&mut bodies, object);
                bodies.push(b'\n');
                packed.push(id);
            }
        }
        let first = index.len();
        index.extend_from_slice(&bodies);
        let mut object_stream = Object::Stream(Stream::new(
            dictionary! { "Type" => "ObjStm", "N" => packed.len() as i64, "First" => first as i64 },
            index,
        ));
        handler.encrypt_object(stream_id, &mut object_stream).unwrap();
        top_level.push((stream_id, object_stream));
        if let Some(broken_id) = broken_id {
            let mut garbage = Object::Stream(Stream::new(
                dictionary! { "Type" => "ObjStm", "N" => 1, "First" => 4096 },
                b"1 0 null".to_vec(),
            ));
            handler.encrypt_object(broken_id, &mut garbage).unwrap();
            top_level.push((broken_id, garbage));
        }

        let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut rows = vec![(0u8, 0u32, 0xFFFFu16); xref_id.0 as usize + 1];
        for (id, object) in &top_level {
            rows[id.0 as usize] = (1, out.len() as u32, 0);
            out.extend_from_slice(format!("{} 0 obj\n", id.0).as_bytes());
            write_value(&mut out, object);
            out.extend_from_slice(b"\nendobj\n");
        }
        for (position, id) in packed.iter().enumerate() {
            rows[id.0 as usize] = (2, stream_id.0, position as u16);
        }

        let xref_offset = out.len();
        rows[xref_id.0 as usize] = (1, xref_offset as u32, 0);
        let mut table = Vec::new();
        for (kind, field, generation) in rows {
            table.push(kind);
            table.extend_from_slice(&field.to_be_bytes());
            table.extend_from_slice(&generation.to_be_bytes());
        }
        let mut xref = dictionary! {
            "Type" => "XRef",
            "Size" => xref_id.0 as i64 + 1,
            "W" => vec![1.into(), 4.into(), 2.into()],
            "Encrypt" => encrypt_id,
        };
        for key in [&b"Root"[..], &b"Info"[..], &b"ID"[..]] {
            if let Ok(value) = self.doc.trailer.get(key) {
                xref.set(key.to_vec(), value.clone());
            }
        }
        out.extend_from_slice(format!("{} 0 obj\n", xref_id.0).as_bytes());
        write_value(&mut out, &Object::Stream(Stream::new(xref, table)));
        out.extend_from_slice(format!("\nendobj\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        out
    }
}

/// Plain object syntax, strings always hex
fn write_value(out: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(value) => out.extend_from_slice(value.to_string().as_bytes()),
        Object::Integer(value) => out.extend_from_slice(value.to_string().as_bytes()),
        Object::Real(value) => out.extend_from_slice(format!("{:.4}", value).as_bytes()),
        Object::Name(name) => {
            out.push(b'/');
            out.extend_from_slice(name);
        }
        Object::String(bytes, _) => {
            out.push(b'<');
            out.extend_from_slice(hex::encode(bytes).as_bytes());
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for item in items {
                write_value(out, item);
                out.push(b' ');
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(out, dict),
        Object::Reference((id, generation)) => {
            out.extend_from_slice(format!("{} {} R", id, generation).as_bytes())
        }
        Object::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.set("Length", stream.content.len() as i64);
            write_dictionary(out, &dict);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.content);
            out.extend_from_slice(b"\nendstream");
        }
    }
}

fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        out.push(b'/');
        out.extend_from_slice(key);
        out.push(b' ');
        write_value(out, value);
        out.push(b' ');
    }
    out.extend_from_slice(b">>");
}
