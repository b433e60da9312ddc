//! Object stream packing for fresh, unencrypted output

use lopdf::{dictionary, Object, ObjectId, Stream};
use std::io::Write as _;

use super::serialize::write_object;

/// Objects per stream
pub(crate) const CAPACITY: usize = 100;

/// Whether an object may live inside an object stream
pub(crate) fn packable(id: ObjectId, object: &Object) -> bool {
    id.1 == 0 && !matches!(object, Object::Stream(_))
}

/// Build one `/ObjStm` holding `objects` in order
pub(crate) fn pack(objects: &[(ObjectId, Object)]) -> Stream {
    let mut header = Vec::new();
    let mut body = Vec::new();
    for (idx, (id, object)) in objects.iter().enumerate() {
        if idx > 0 {
            header.push(b' ');
        }
        let _ = write!(header, "{} {}", id.0, body.len());
        write_object(&mut body, object);
        body.push(b'\n');
    }
    header.push(b'\n');

    let first = header.len();
    header.extend_from_slice(&body);
    Stream::new(
        dictionary! {
            "Type" => "ObjStm",
            "N" => objects.len() as i64,
            "First" => first as i64,
        },
        header,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pack_offsets() {
        let stream = pack(&[
            ((4, 0), Object::Integer(7)),
            ((9, 0), Object::Name(b"Catalog".to_vec())),
        ]);
        assert_eq!(stream.content, b"4 0 9 2\n7\n/Catalog\n".to_vec());
        assert_eq!(stream.dict.get(b"First").unwrap().as_i64().unwrap(), 8);
        assert_eq!(stream.dict.get(b"N").unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn test_streams_and_old_generations_stay_outside() {
        assert!(packable((3, 0), &Object::Null));
        assert!(!packable((3, 1), &Object::Null));
        assert!(!packable((3, 0), &Object::Stream(Stream::new(dictionary! {}, vec![]))));
    }
}
