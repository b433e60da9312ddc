//! Object serialization
//!
//! Writes lopdf objects in PDF syntax. The signature dictionary goes through
//! [`write_signature`], which lays out fixed-width `/ByteRange` and
//! `/Contents` slots and reports where they landed.

use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};
use std::io::Write as _;
use std::ops::Range;

/// Room for `[0 a b c]` with three ten-digit offsets
pub(crate) const BYTE_RANGE_WIDTH: usize = 36;

pub(crate) fn write_object(out: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(value) => out.extend_from_slice(if *value { b"true" } else { b"false" }),
        Object::Integer(value) => {
            let _ = write!(out, "{}", value);
        }
        Object::Real(value) => out.extend_from_slice(format_real(f64::from(*value)).as_bytes()),
        Object::Name(name) => write_name(out, name),
        Object::String(bytes, StringFormat::Literal) => write_literal(out, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            out.extend_from_slice(hex::encode_upper(bytes).as_bytes());
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(out, dict),
        Object::Stream(stream) => write_stream(out, stream),
        Object::Reference((number, generation)) => {
            let _ = write!(out, "{} {} R", number, generation);
        }
    }
}

pub(crate) fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        write_name(out, key);
        out.push(b' ');
        write_object(out, value);
    }
    out.extend_from_slice(b">>");
}

fn write_stream(out: &mut Vec<u8>, stream: &Stream) {
    let mut dict = stream.dict.clone();
    dict.set("Length", stream.content.len() as i64);
    write_dictionary(out, &dict);
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(&stream.content);
    out.extend_from_slice(b"\nendstream");
}

/// `n g obj ... endobj`
pub(crate) fn write_indirect(out: &mut Vec<u8>, id: ObjectId, object: &Object) {
    let _ = writeln!(out, "{} {} obj", id.0, id.1);
    write_object(out, object);
    out.extend_from_slice(b"\nendobj\n");
}

/// Byte positions of the signature placeholders in the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureSlots {
    pub byte_range: Range<usize>,
    /// From `<` through `>`
    pub contents: Range<usize>,
}

/// Write the signature dictionary as an indirect object
///
/// `/Contents` is emitted as hex zeros of its current byte length and
/// `/ByteRange` as a space padded slot of [`BYTE_RANGE_WIDTH`] bytes.
pub(crate) fn write_signature(out: &mut Vec<u8>, id: ObjectId, dict: &Dictionary) -> SignatureSlots {
    let _ = writeln!(out, "{} {} obj", id.0, id.1);
    let mut byte_range = 0..0;
    let mut contents = 0..0;

    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        write_name(out, key);
        out.push(b' ');
        match key.as_slice() {
            b"ByteRange" => {
                let start = out.len();
                out.extend_from_slice(b"[0 0 0 0");
                out.resize(start + BYTE_RANGE_WIDTH - 1, b' ');
                out.push(b']');
                byte_range = start..out.len();
            }
            b"Contents" => {
                let length = value.as_str().map(<[u8]>::len).unwrap_or(0);
                let start = out.len();
                out.push(b'<');
                out.resize(start + 1 + 2 * length, b'0');
                out.push(b'>');
                contents = start..out.len();
            }
            _ => write_object(out, value),
        }
    }
    out.extend_from_slice(b">>");
    out.extend_from_slice(b"\nendobj\n");

    SignatureSlots {
        byte_range,
        contents,
    }
}

/// Text for the `/ByteRange` slot, `None` when it does not fit
pub(crate) fn byte_range_text(range: [usize; 4]) -> Option<Vec<u8>> {
    let text = format!("[{} {} {} {}", range[0], range[1], range[2], range[3]);
    if text.len() + 1 > BYTE_RANGE_WIDTH {
        return None;
    }
    let mut bytes = text.into_bytes();
    bytes.resize(BYTE_RANGE_WIDTH - 1, b' ');
    bytes.push(b']');
    Some(bytes)
}

fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &b in name {
        match b {
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#' => {
                let _ = write!(out, "#{:02X}", b);
            }
            0x21..=0x7E => out.push(b),
            _ => {
                let _ = write!(out, "#{:02X}", b);
            }
        }
    }
}

fn write_literal(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}

fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{:.5}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}
