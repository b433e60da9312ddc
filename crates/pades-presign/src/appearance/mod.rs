//! Signature appearance
//!
//! Resolves where the signature goes (an existing empty field, a rectangle
//! on a page, or nowhere visible), what it shows (a rubric image or layer-2
//! text, plus optional layer-4 text), and writes the widget annotation with
//! its layered appearance streams.

pub(crate) mod field;
pub mod font;
mod rubric;
mod stream;

pub use font::{FontColor, FontDescriptor, FontFamily, FontStyle};
pub use rubric::RubricImage;
pub(crate) use rubric::decode_base64;

use chrono::{DateTime, FixedOffset};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::{PageSelector, SigningConfiguration};
use crate::diagnostics::{Degradation, Diagnostics};
use crate::error::PresignError;
use crate::objects::{name, text_string};
use crate::revision::Revision;
use field::{terminal_fields, widget_page};

/// Print and locked annotation flags
const WIDGET_FLAGS: i64 = 4 | 128;

/// SignaturesExist and AppendOnly
const SIG_FLAGS: i64 = 3;

/// Where the signature widget goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Placement {
    /// Existing empty signature field, fully qualified name
    Field(String),
    /// New widget, `[llx lly urx ury]` on a 1-based page
    Rectangle { rect: [f32; 4], page: u32 },
    /// Zero-size widget on the first page
    Invisible,
}

/// Everything the widget shows
#[derive(Debug, Clone)]
pub struct SignatureAppearance {
    pub placement: Placement,
    pub rubric: Option<RubricImage>,
    pub layer2_text: Option<String>,
    pub layer4_text: Option<String>,
    pub font: FontDescriptor,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub sign_time: DateTime<FixedOffset>,
}

/// Objects written for the appearance, handed to the completion phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceHandle {
    pub field_name: String,
    pub signature_object: ObjectId,
    pub widget_object: ObjectId,
    /// 1-based page of the widget, when it is on a page
    pub page: Option<u32>,
    pub placement: Placement,
    pub rect: [f32; 4],
    pub sign_time: DateTime<FixedOffset>,
}

impl SignatureAppearance {
    /// Resolve placement and content from the configuration
    pub(crate) fn compose(
        config: &SigningConfiguration,
        doc: &Document,
        page_count: u32,
        signer_name: Option<&str>,
        sign_time: DateTime<FixedOffset>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, PresignError> {
        let placement = resolve_placement(config, doc, page_count, diagnostics)?;

        let rubric = config
            .rubric_image
            .as_deref()
            .and_then(|encoded| match RubricImage::from_base64(encoded) {
                Ok(image) => Some(image),
                Err(reason) => {
                    diagnostics.record(Degradation::InvalidRubricImage(reason));
                    None
                }
            });

        let color = match config.layer2_font_color.as_deref() {
            None => FontColor::Black,
            Some(requested) => FontColor::from_name(requested).unwrap_or_else(|| {
                diagnostics.record(Degradation::UnsupportedFontColor(requested.to_string()));
                FontColor::Black
            }),
        };
        let font = FontDescriptor {
            family: config.layer2_font_family,
            size: config.layer2_font_size,
            style: config.layer2_font_style,
            color,
        };

        // An image replaces both text layers
        let (layer2_text, layer4_text) = if rubric.is_some() {
            (None, None)
        } else {
            let layer2 = config.layer2_text.clone().unwrap_or_else(|| {
                describe(
                    signer_name,
                    sign_time,
                    config.reason.as_deref(),
                    config.production_city.as_deref(),
                )
            });
            (Some(layer2), config.layer4_text.clone())
        };

        tracing::debug!(
            placement = ?placement,
            image = rubric.is_some(),
            font = font.base_font(),
            "composed signature appearance"
        );

        Ok(Self {
            placement,
            rubric,
            layer2_text,
            layer4_text,
            font,
            location: config.production_city.clone(),
            contact: config.signer_contact.clone(),
            sign_time,
        })
    }

    /// Write the widget, its appearance streams and the form registration
    pub(crate) fn attach(
        &self,
        revision: &mut Revision,
        signature: ObjectId,
    ) -> Result<AppearanceHandle, PresignError> {
        let (field_name, widget, page_id, rect) = match &self.placement {
            Placement::Field(field_name) => {
                let field = terminal_fields(revision.document())
                    .into_iter()
                    .find(|f| &f.name == field_name)
                    .ok_or_else(|| {
                        PresignError::invalid(format!("Signature field {} does not exist", field_name))
                    })?;
                let rect = revision
                    .document()
                    .get_dictionary(field.widget)
                    .ok()
                    .and_then(|w| w.get(b"Rect").ok())
                    .and_then(read_rect)
                    .unwrap_or([0.0; 4]);
                let page_id = widget_page(revision.document(), field.widget);

                let appearance = self.build_streams(revision, rect)?;
                revision.dict_mut(field.id)?.set("V", signature);
                let widget = revision.dict_mut(field.widget)?;
                widget.set("AP", dictionary! { "N" => appearance });
                widget.set("F", WIDGET_FLAGS);
                if let (Some(page), false) = (page_id, widget.has(b"P")) {
                    widget.set("P", page);
                }
                register_form(revision, None)?;
                (field_name.clone(), field.widget, page_id, rect)
            }
            Placement::Rectangle { rect, page } => {
                let page_id = page_object(revision.document(), *page)?;
                let (name, widget) = self.new_widget(revision, signature, page_id, *rect)?;
                (name, widget, Some(page_id), *rect)
            }
            Placement::Invisible => {
                let page_id = page_object(revision.document(), 1)?;
                let (name, widget) = self.new_widget(revision, signature, page_id, [0.0; 4])?;
                (name, widget, Some(page_id), [0.0; 4])
            }
        };

        let page = page_id.and_then(|id| {
            revision
                .document()
                .get_pages()
                .into_iter()
                .find_map(|(number, page)| (page == id).then_some(number))
        });

        tracing::info!(field = %field_name, widget = ?widget, page = ?page, "attached signature widget");

        Ok(AppearanceHandle {
            field_name,
            signature_object: signature,
            widget_object: widget,
            page,
            placement: self.placement.clone(),
            rect,
            sign_time: self.sign_time,
        })
    }

    /// Merged field and widget on `page`, listed in the page annotations
    fn new_widget(
        &self,
        revision: &mut Revision,
        signature: ObjectId,
        page: ObjectId,
        rect: [f32; 4],
    ) -> Result<(String, ObjectId), PresignError> {
        let field_name = unused_field_name(revision.document());
        let appearance = self.build_streams(revision, rect)?;
        let widget = revision.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Sig",
            "T" => text_string(&field_name),
            "V" => signature,
            "F" => WIDGET_FLAGS,
            "P" => page,
            "Rect" => rect.iter().map(|v| Object::Real(*v as _)).collect::<Vec<_>>(),
            "AP" => dictionary! { "N" => appearance },
        });
        revision.child_array_mut(page, b"Annots")?.push(widget.into());
        register_form(revision, Some(widget))?;
        Ok((field_name, widget))
    }

    /// Normal appearance: `N` paints `FRM`, which stacks `n0`, `n2` and `n4`
    fn build_streams(&self, revision: &mut Revision, rect: [f32; 4]) -> Result<ObjectId, PresignError> {
        let width = (rect[2] - rect[0]).abs();
        let height = (rect[3] - rect[1]).abs();
        if width == 0.0 || height == 0.0 {
            return Ok(revision.add_object(form(0.0, 0.0, Dictionary::new(), Vec::new())));
        }

        let n0 = revision.add_object(form(width, height, Dictionary::new(), stream::BLANK_LAYER.to_vec()));

        let n2 = match &self.rubric {
            Some(image) => {
                let mut image_dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => image.width as i64,
                    "Height" => image.height as i64,
                    "ColorSpace" => name(image.color_space()),
                    "BitsPerComponent" => image.bits_per_component as i64,
                    "Filter" => "DCTDecode",
                };
                if image.inverted {
                    let decode: Vec<Object> = (0..image.components)
                        .flat_map(|_| [Object::Integer(1), Object::Integer(0)])
                        .collect();
                    image_dict.set("Decode", decode);
                }
                let image_id = revision.add_object(Stream::new(image_dict, image.data.clone()));
                let resources = dictionary! { "XObject" => dictionary! { "Im1" => image_id } };
                let content = stream::image_layer(image.width, image.height, width, height);
                revision.add_object(form(width, height, resources, content))
            }
            None => {
                let text = self.layer2_text.as_deref().unwrap_or_default();
                let content = stream::text_layer(text, &self.font, width, height);
                revision.add_object(form(width, height, self.font_resources(), content))
            }
        };

        let mut layers = dictionary! { "n0" => n0, "n2" => n2 };
        let mut names = vec!["n0", "n2"];
        if let Some(text) = &self.layer4_text {
            let content = stream::text_layer(text, &self.font, width, height);
            let n4 = revision.add_object(form(width, height, self.font_resources(), content));
            layers.set("n4", n4);
            names.push("n4");
        }

        let frm = revision.add_object(form(
            width,
            height,
            dictionary! { "XObject" => layers },
            stream::stack_layers(&names),
        ));
        Ok(revision.add_object(form(
            width,
            height,
            dictionary! { "XObject" => dictionary! { "FRM" => frm } },
            stream::stack_layers(&["FRM"]),
        )))
    }

    fn font_resources(&self) -> Dictionary {
        let mut font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => name(self.font.base_font()),
        };
        if !self.font.family.is_symbolic() {
            font.set("Encoding", "WinAnsiEncoding");
        }
        dictionary! { "Font" => dictionary! { "F1" => font } }
    }
}

fn form(width: f32, height: f32, resources: Dictionary, content: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), Object::Real(width as _), Object::Real(height as _)],
            "Resources" => resources,
        },
        content,
    )
}

/// Standard description used when no layer-2 text is configured
fn describe(
    signer: Option<&str>,
    sign_time: DateTime<FixedOffset>,
    reason: Option<&str>,
    location: Option<&str>,
) -> String {
    let mut lines = vec![match signer {
        Some(cn) => format!("Digitally signed by {}", cn),
        None => "Digitally signed".to_string(),
    }];
    lines.push(format!("Date: {}", sign_time.format("%Y.%m.%d %H:%M:%S %:z")));
    if let Some(reason) = reason {
        lines.push(format!("Reason: {}", reason));
    }
    if let Some(location) = location {
        lines.push(format!("Location: {}", location));
    }
    lines.join("\n")
}

fn resolve_placement(
    config: &SigningConfiguration,
    doc: &Document,
    page_count: u32,
    diagnostics: &mut Diagnostics,
) -> Result<Placement, PresignError> {
    if let Some(field_name) = &config.field_name {
        let field = terminal_fields(doc)
            .into_iter()
            .find(|f| &f.name == field_name)
            .ok_or_else(|| {
                PresignError::invalid(format!("Signature field {} does not exist", field_name))
            })?;
        if !field.is_signature {
            return Err(PresignError::invalid(format!(
                "Field {} is not a signature field",
                field_name
            )));
        }
        if field.signed {
            return Err(PresignError::invalid(format!(
                "Signature field {} is already signed",
                field_name
            )));
        }
        return Ok(Placement::Field(field_name.clone()));
    }

    if !config.position.is_requested() {
        return Ok(Placement::Invisible);
    }

    let rect = match parse_rect(config) {
        Ok(rect) => rect,
        Err(reason) => {
            diagnostics.record(Degradation::InvalidSignatureRectangle(reason));
            return Ok(Placement::Invisible);
        }
    };

    let page = match config.page {
        PageSelector::Last => page_count,
        PageSelector::Number(n) if n <= page_count => n,
        PageSelector::Number(n) => {
            return Err(PresignError::invalid(format!(
                "Signature page {} is out of range, document has {} page(s)",
                n, page_count
            )))
        }
    };
    Ok(Placement::Rectangle { rect, page })
}

/// Integer coordinates, normalized so the lower-left corner comes first
fn parse_rect(config: &SigningConfiguration) -> Result<[f32; 4], String> {
    let position = &config.position;
    let coordinate = |label: &str, raw: &Option<String>| -> Result<f32, String> {
        let raw = raw.as_deref().ok_or_else(|| format!("{} is missing", label))?;
        raw.trim()
            .parse::<i64>()
            .map(|v| v as f32)
            .map_err(|_| format!("{} {:?} is not an integer", label, raw))
    };
    let llx = coordinate("lower left x", &position.lower_left_x)?;
    let lly = coordinate("lower left y", &position.lower_left_y)?;
    let urx = coordinate("upper right x", &position.upper_right_x)?;
    let ury = coordinate("upper right y", &position.upper_right_y)?;

    let rect = [llx.min(urx), lly.min(ury), llx.max(urx), lly.max(ury)];
    if rect[0] == rect[2] || rect[1] == rect[3] {
        return Err("rectangle has no area".to_string());
    }
    Ok(rect)
}

fn read_rect(object: &Object) -> Option<[f32; 4]> {
    let values: Vec<f32> = object
        .as_array()
        .ok()?
        .iter()
        .filter_map(|v| match v {
            Object::Integer(i) => Some(*i as f32),
            Object::Real(r) => Some(*r as f32),
            _ => None,
        })
        .collect();
    let [a, b, c, d] = values.as_slice() else {
        return None;
    };
    Some([a.min(*c), b.min(*d), a.max(*c), b.max(*d)])
}

fn page_object(doc: &Document, page: u32) -> Result<ObjectId, PresignError> {
    doc.get_pages()
        .get(&page)
        .copied()
        .ok_or_else(|| PresignError::invalid(format!("Page {} does not exist", page)))
}

/// `SignatureN` with the lowest unused N
fn unused_field_name(doc: &Document) -> String {
    let taken: HashSet<String> = terminal_fields(doc).into_iter().map(|f| f.name).collect();
    (1..)
        .map(|n| format!("Signature{}", n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| "Signature".to_string())
}

/// Set `/SigFlags` and list a new field in `/AcroForm /Fields`
fn register_form(revision: &mut Revision, field: Option<ObjectId>) -> Result<(), PresignError> {
    let root = revision.catalog_id()?;
    let form = revision.child_dict_mut(root, b"AcroForm")?;
    let flags = form.get(b"SigFlags").and_then(Object::as_i64).unwrap_or(0);
    form.set("SigFlags", flags | SIG_FLAGS);

    let Some(field) = field else {
        return Ok(());
    };
    let fields_ref = match form.get(b"Fields") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    match fields_ref {
        Some(id) => match revision.object_mut(id)? {
            Object::Array(fields) => fields.push(field.into()),
            _ => return Err(PresignError::invalid("AcroForm /Fields is not an array")),
        },
        None => {
            let form = revision.child_dict_mut(root, b"AcroForm")?;
            if !matches!(form.get(b"Fields"), Ok(Object::Array(_))) {
                form.set("Fields", Vec::<Object>::new());
            }
            form.get_mut(b"Fields")?.as_array_mut()?.push(field.into());
        }
    }
    Ok(())
}
