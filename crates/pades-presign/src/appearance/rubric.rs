//! Rubric image: a Base64 JPEG drawn inside the visible signature.
//!
//! Only the JPEG header is read; the compressed data is embedded untouched
//! behind a `/DCTDecode` filter.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

/// Decoded rubric JPEG
#[derive(Clone, PartialEq, Eq)]
pub struct RubricImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub components: u8,
    pub bits_per_component: u8,
    /// Adobe CMYK JPEGs store inverted samples
    pub inverted: bool,
}

impl std::fmt::Debug for RubricImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RubricImage")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("components", &self.components)
            .finish()
    }
}

impl RubricImage {
    /// Decode Base64 text, ignoring whitespace and line breaks
    pub fn from_base64(text: &str) -> Result<Self, String> {
        let data = decode_base64(text).ok_or_else(|| "not valid Base64".to_string())?;
        Self::from_jpeg(data)
    }

    pub fn from_jpeg(data: Vec<u8>) -> Result<Self, String> {
        let header = parse_jpeg_header(&data)?;
        Ok(Self {
            width: header.width,
            height: header.height,
            components: header.components,
            bits_per_component: header.precision,
            inverted: header.adobe && header.components == 4,
            data,
        })
    }

    pub fn color_space(&self) -> &'static str {
        match self.components {
            1 => "DeviceGray",
            4 => "DeviceCMYK",
            _ => "DeviceRGB",
        }
    }
}

/// Strict Base64 after whitespace removal; padding is optional
pub(crate) fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .ok()
}

struct JpegHeader {
    width: u32,
    height: u32,
    components: u8,
    precision: u8,
    adobe: bool,
}

fn parse_jpeg_header(data: &[u8]) -> Result<JpegHeader, String> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return Err("not a JPEG image".to_string());
    }

    let mut adobe = false;
    let mut pos = 2;
    loop {
        // Markers may be preceded by any number of fill bytes
        while pos < data.len() && data[pos] == 0xFF {
            pos += 1;
        }
        let marker = *data.get(pos).ok_or("JPEG ended before a frame header")?;
        pos += 1;

        match marker {
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return Err("JPEG has no frame header".to_string()),
            _ => {}
        }

        let length = data
            .get(pos..pos + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or("truncated JPEG segment")?;
        if length < 2 {
            return Err("malformed JPEG segment length".to_string());
        }
        let segment = data
            .get(pos + 2..pos + length)
            .ok_or("truncated JPEG segment")?;

        match marker {
            0xEE if segment.starts_with(b"Adobe") => adobe = true,
            // SOF0..SOF15 except DHT, JPG and DAC
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                if segment.len() < 6 {
                    return Err("truncated JPEG frame header".to_string());
                }
                let precision = segment[0];
                let height = u16::from_be_bytes([segment[1], segment[2]]) as u32;
                let width = u16::from_be_bytes([segment[3], segment[4]]) as u32;
                let components = segment[5];
                if width == 0 || height == 0 {
                    return Err("JPEG frame has no size".to_string());
                }
                if !matches!(components, 1 | 3 | 4) {
                    return Err(format!("unsupported JPEG component count {}", components));
                }
                return Ok(JpegHeader {
                    width,
                    height,
                    components,
                    precision,
                    adobe,
                });
            }
            _ => {}
        }
        pos += length;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Smallest header sequence the parser accepts
    pub(crate) fn tiny_jpeg(width: u16, height: u16, components: u8, adobe: bool) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        jpeg.extend_from_slice(b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");
        if adobe {
            jpeg.extend_from_slice(&[0xFF, 0xEE, 0x00, 0x0E]);
            jpeg.extend_from_slice(b"Adobe\0\x64\0\0\0\0\x02");
        }
        let sof_len = 8 + 3 * components as u16;
        jpeg.extend_from_slice(&[0xFF, 0xC0]);
        jpeg.extend_from_slice(&sof_len.to_be_bytes());
        jpeg.push(8);
        jpeg.extend_from_slice(&height.to_be_bytes());
        jpeg.extend_from_slice(&width.to_be_bytes());
        jpeg.push(components);
        for c in 0..components {
            jpeg.extend_from_slice(&[c + 1, 0x11, 0]);
        }
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_reads_frame_header() {
        let image = RubricImage::from_jpeg(tiny_jpeg(120, 40, 3, false)).unwrap();
        assert_eq!((image.width, image.height), (120, 40));
        assert_eq!(image.color_space(), "DeviceRGB");
        assert_eq!(image.bits_per_component, 8);
        assert!(!image.inverted);
    }

    #[test]
    fn test_adobe_cmyk_is_inverted() {
        let image = RubricImage::from_jpeg(tiny_jpeg(10, 10, 4, true)).unwrap();
        assert_eq!(image.color_space(), "DeviceCMYK");
        assert!(image.inverted);
    }

    #[test]
    fn test_base64_with_line_breaks() {
        let encoded = STANDARD.encode(tiny_jpeg(8, 8, 1, false));
        let wrapped = format!("{}\n  {}", &encoded[..10], &encoded[10..]);
        let image = RubricImage::from_base64(&wrapped).unwrap();
        assert_eq!(image.color_space(), "DeviceGray");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(RubricImage::from_base64("@@not base64@@").is_err());
        assert!(RubricImage::from_base64("").is_err());
        assert!(RubricImage::from_jpeg(b"\x89PNG\r\n\x1a\n".to_vec()).is_err());
        assert!(RubricImage::from_jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9]).is_err());

        let mut truncated = tiny_jpeg(8, 8, 3, false);
        truncated.truncate(24);
        assert!(RubricImage::from_jpeg(truncated).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Arbitrary bytes after a JPEG signature never panic the header parser
        #[test]
        fn header_parser_never_panics(tail in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut data = vec![0xFF, 0xD8];
            data.extend(tail);
            let _ = RubricImage::from_jpeg(data);
        }
    }
}
