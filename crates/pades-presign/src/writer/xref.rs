//! Cross-reference sections
//!
//! Classic tables and cross-reference streams (`/W [1 4 2]`), plus the
//! `startxref` lookup used to chain an appended section to its source.

use lopdf::{dictionary, Dictionary, Object, Stream};
use std::collections::BTreeMap;
use std::io::Write as _;

use super::serialize::write_dictionary;

/// Location of one object number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XrefEntry {
    Free,
    InUse { offset: usize, generation: u16 },
    /// Stored in an object stream at `index`
    Compressed { stream: u32, index: u32 },
}

/// Contiguous runs of object numbers as `(first, count)`
fn subsections(entries: &BTreeMap<u32, XrefEntry>) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &number in entries.keys() {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == number => *count += 1,
            _ => runs.push((number, 1)),
        }
    }
    runs
}

/// Classic `xref` table followed by `trailer` and `startxref`
pub(crate) fn write_table(out: &mut Vec<u8>, entries: &BTreeMap<u32, XrefEntry>, trailer: &Dictionary) {
    let start = out.len();
    out.extend_from_slice(b"xref\n");
    for (first, count) in subsections(entries) {
        let _ = writeln!(out, "{} {}", first, count);
        for number in first..first + count {
            match entries[&number] {
                XrefEntry::InUse { offset, generation } => {
                    let _ = write!(out, "{:010} {:05} n \n", offset, generation);
                }
                XrefEntry::Free if number == 0 => out.extend_from_slice(b"0000000000 65535 f \n"),
                // Compressed entries only exist with cross-reference streams
                XrefEntry::Free | XrefEntry::Compressed { .. } => {
                    out.extend_from_slice(b"0000000000 00001 f \n")
                }
            }
        }
    }
    out.extend_from_slice(b"trailer\n");
    write_dictionary(out, trailer);
    let _ = write!(out, "\nstartxref\n{}\n%%EOF\n", start);
}

/// Cross-reference stream carrying `trailer` entries
///
/// `entries` must already contain the stream's own location.
pub(crate) fn stream(entries: &BTreeMap<u32, XrefEntry>, trailer: &Dictionary) -> Stream {
    let mut content = Vec::with_capacity(entries.len() * 7);
    for entry in entries.values() {
        let (kind, field2, field3): (u8, u32, u16) = match *entry {
            XrefEntry::Free => (0, 0, 0xFFFF),
            XrefEntry::InUse { offset, generation } => (1, offset as u32, generation),
            XrefEntry::Compressed { stream, index } => (2, stream, index as u16),
        };
        content.push(kind);
        content.extend_from_slice(&field2.to_be_bytes());
        content.extend_from_slice(&field3.to_be_bytes());
    }

    let index: Vec<Object> = subsections(entries)
        .into_iter()
        .flat_map(|(first, count)| [Object::Integer(first as i64), Object::Integer(count as i64)])
        .collect();

    let mut dict = trailer.clone();
    dict.set("Type", "XRef");
    dict.set("W", vec![1.into(), 4.into(), 2.into()]);
    dict.set("Index", index);
    Stream::new(dict, content)
}

/// Close a file whose last section is a cross-reference stream at `offset`
pub(crate) fn write_startxref(out: &mut Vec<u8>, offset: usize) {
    let _ = write!(out, "startxref\n{}\n%%EOF\n", offset);
}

/// Offset of the last cross-reference section
pub(crate) fn find_startxref(bytes: &[u8]) -> Option<usize> {
    let search_start = bytes.len().saturating_sub(1024);
    let tail = &bytes[search_start..];
    let pos = tail.windows(9).rposition(|w| w == b"startxref")?;
    let digits: String = tail[pos + 9..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    digits.parse().ok()
}

/// True when the section at `offset` is a classic table
pub(crate) fn is_table(bytes: &[u8], offset: usize) -> bool {
    bytes
        .get(offset..)
        .map(|rest| {
            let rest = rest
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .map_or(rest, |skip| &rest[skip..]);
            rest.starts_with(b"xref")
        })
        .unwrap_or(false)
}

/// Trailer entries common to both section kinds
pub(crate) fn trailer(size: u32, root: Object, info: Option<Object>, id: [&[u8]; 2]) -> Dictionary {
    let mut dict = dictionary! {
        "Size" => size as i64,
        "Root" => root,
    };
    if let Some(info) = info {
        dict.set("Info", info);
    }
    dict.set(
        "ID",
        vec![
            Object::String(id[0].to_vec(), lopdf::StringFormat::Hexadecimal),
            Object::String(id[1].to_vec(), lopdf::StringFormat::Hexadecimal),
        ],
    );
    dict
}
