//! Font descriptor for layer-2 text: standard 14 family, style bits and the
//! named color palette.

use serde::{Deserialize, Serialize};

/// Standard font families, numbered as in signing properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FontFamily {
    #[default]
    Courier,
    Helvetica,
    TimesRoman,
    Symbol,
    ZapfDingbats,
}

impl FontFamily {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FontFamily::Courier),
            1 => Some(FontFamily::Helvetica),
            2 => Some(FontFamily::TimesRoman),
            3 => Some(FontFamily::Symbol),
            4 => Some(FontFamily::ZapfDingbats),
            _ => None,
        }
    }

    /// Standard 14 `/BaseFont` name for this family and style
    pub fn base_font(self, style: FontStyle) -> &'static str {
        match (self, style.bold, style.italic) {
            (FontFamily::Courier, false, false) => "Courier",
            (FontFamily::Courier, true, false) => "Courier-Bold",
            (FontFamily::Courier, false, true) => "Courier-Oblique",
            (FontFamily::Courier, true, true) => "Courier-BoldOblique",
            (FontFamily::Helvetica, false, false) => "Helvetica",
            (FontFamily::Helvetica, true, false) => "Helvetica-Bold",
            (FontFamily::Helvetica, false, true) => "Helvetica-Oblique",
            (FontFamily::Helvetica, true, true) => "Helvetica-BoldOblique",
            (FontFamily::TimesRoman, false, false) => "Times-Roman",
            (FontFamily::TimesRoman, true, false) => "Times-Bold",
            (FontFamily::TimesRoman, false, true) => "Times-Italic",
            (FontFamily::TimesRoman, true, true) => "Times-BoldItalic",
            (FontFamily::Symbol, _, _) => "Symbol",
            (FontFamily::ZapfDingbats, _, _) => "ZapfDingbats",
        }
    }

    /// Symbolic fonts use their built-in encoding
    pub fn is_symbolic(self) -> bool {
        matches!(self, FontFamily::Symbol | FontFamily::ZapfDingbats)
    }

    /// Glyph advance in 1/1000 em
    ///
    /// Approximate widths, close enough to wrap lines inside a widget.
    pub fn glyph_width(self, style: FontStyle, ch: char) -> f32 {
        let base = match self {
            FontFamily::Courier => return 600.0,
            FontFamily::Symbol | FontFamily::ZapfDingbats => return 700.0,
            FontFamily::Helvetica => helvetica_width(ch),
            FontFamily::TimesRoman => times_width(ch),
        };
        if style.bold {
            base * 1.06
        } else {
            base
        }
    }

    pub fn text_width(self, style: FontStyle, text: &str, size: f32) -> f32 {
        let units: f32 = text.chars().map(|c| self.glyph_width(style, c)).sum();
        units * size / 1000.0
    }
}

fn helvetica_width(ch: char) -> f32 {
    match ch {
        ' ' | '.' | ',' | ':' | ';' | '!' | '/' | 'f' | 't' | 'I' => 278.0,
        'i' | 'j' | 'l' | '\'' | '|' => 222.0,
        '-' | '(' | ')' | '[' | ']' | 'r' => 333.0,
        'm' => 833.0,
        'w' => 722.0,
        'M' => 833.0,
        'W' => 944.0,
        '@' => 1015.0,
        '%' => 889.0,
        'k' | 's' | 'v' | 'x' | 'y' | 'z' => 500.0,
        'E' | 'P' | 'S' | 'V' | 'X' | 'Y' => 667.0,
        'F' | 'T' | 'Z' => 611.0,
        'C' | 'D' | 'H' | 'N' | 'R' | 'U' | 'A' | 'B' | 'K' => 722.0,
        'G' | 'O' | 'Q' => 778.0,
        'J' | 'c' => 500.0,
        'a'..='z' | '0'..='9' => 556.0,
        _ => 556.0,
    }
}

fn times_width(ch: char) -> f32 {
    match ch {
        ' ' | '.' | ',' | '\'' => 250.0,
        'i' | 'j' | 'l' | 't' | ':' | ';' | '/' => 278.0,
        '-' | '(' | ')' | '[' | ']' | 'f' | 'r' | 'I' | '!' => 333.0,
        's' => 389.0,
        'a' | 'c' | 'e' | 'z' => 444.0,
        'm' | 'W' => 778.0,
        'w' => 722.0,
        'M' => 889.0,
        'E' | 'L' | 'T' | 'Z' | 'F' | 'P' => 611.0,
        'A' | 'D' | 'G' | 'H' | 'K' | 'N' | 'O' | 'Q' | 'U' | 'V' | 'X' | 'Y' => 722.0,
        'B' | 'C' | 'R' => 667.0,
        'S' | 'J' => 556.0,
        '%' => 833.0,
        '@' => 921.0,
        _ => 500.0,
    }
}

/// Style bits: bold 1, italic 2, underline 4, strikethrough 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FontStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
}

impl FontStyle {
    pub const NORMAL: FontStyle = FontStyle {
        bold: false,
        italic: false,
        underline: false,
        strikethrough: false,
    };

    /// Decode a style value; combinations of the bits are accepted
    pub fn from_bits(bits: i64) -> Option<Self> {
        if !(0..=15).contains(&bits) {
            return None;
        }
        Some(FontStyle {
            bold: bits & 1 != 0,
            italic: bits & 2 != 0,
            underline: bits & 4 != 0,
            strikethrough: bits & 8 != 0,
        })
    }

    pub fn bits(self) -> u8 {
        (self.bold as u8)
            | (self.italic as u8) << 1
            | (self.underline as u8) << 2
            | (self.strikethrough as u8) << 3
    }
}

/// Named text colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FontColor {
    #[default]
    Black,
    White,
    LightGray,
    Gray,
    DarkGray,
    Red,
    Pink,
}

impl FontColor {
    /// Case-insensitive lookup of a palette name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "black" => Some(FontColor::Black),
            "white" => Some(FontColor::White),
            "lightgray" => Some(FontColor::LightGray),
            "gray" => Some(FontColor::Gray),
            "darkgray" => Some(FontColor::DarkGray),
            "red" => Some(FontColor::Red),
            "pink" => Some(FontColor::Pink),
            _ => None,
        }
    }

    pub fn rgb(self) -> [u8; 3] {
        match self {
            FontColor::Black => [0, 0, 0],
            FontColor::White => [255, 255, 255],
            FontColor::LightGray => [192, 192, 192],
            FontColor::Gray => [128, 128, 128],
            FontColor::DarkGray => [64, 64, 64],
            FontColor::Red => [255, 0, 0],
            FontColor::Pink => [255, 175, 175],
        }
    }
}

/// Complete layer-2 font description
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontDescriptor {
    pub family: FontFamily,
    pub size: f32,
    pub style: FontStyle,
    pub color: FontColor,
}

impl Default for FontDescriptor {
    fn default() -> Self {
        Self {
            family: FontFamily::Courier,
            size: 12.0,
            style: FontStyle::NORMAL,
            color: FontColor::Black,
        }
    }
}

impl FontDescriptor {
    pub fn base_font(&self) -> &'static str {
        self.family.base_font(self.style)
    }

    pub fn text_width(&self, text: &str) -> f32 {
        self.family.text_width(self.style, text, self.size)
    }
}

/// Encode text for a simple font using WinAnsiEncoding
///
/// Characters without a WinAnsi code are replaced with `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch as u32 {
            0x20..=0x7E | 0xA0..=0xFF => ch as u8,
            _ => win_ansi_high(ch).unwrap_or(b'?'),
        })
        .collect()
}

fn win_ansi_high(ch: char) -> Option<u8> {
    let code = match ch {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_family_codes() {
        assert_eq!(FontFamily::from_code(0), Some(FontFamily::Courier));
        assert_eq!(FontFamily::from_code(2), Some(FontFamily::TimesRoman));
        assert_eq!(FontFamily::from_code(4), Some(FontFamily::ZapfDingbats));
        assert_eq!(FontFamily::from_code(5), None);
        assert_eq!(FontFamily::from_code(-1), None);
    }

    #[test]
    fn test_base_font_styles() {
        let bold_italic = FontStyle::from_bits(3).unwrap();
        assert_eq!(FontFamily::Helvetica.base_font(bold_italic), "Helvetica-BoldOblique");
        assert_eq!(FontFamily::TimesRoman.base_font(FontStyle::NORMAL), "Times-Roman");
        assert_eq!(FontFamily::Symbol.base_font(bold_italic), "Symbol");
    }

    #[test]
    fn test_style_bits() {
        let underline = FontStyle::from_bits(4).unwrap();
        assert!(underline.underline && !underline.bold);
        let strike = FontStyle::from_bits(8).unwrap();
        assert!(strike.strikethrough);
        assert_eq!(FontStyle::from_bits(16), None);
        assert_eq!(FontStyle::from_bits(-2), None);
        assert_eq!(FontStyle::from_bits(13).unwrap().bits(), 13);
    }

    #[test]
    fn test_palette() {
        assert_eq!(FontColor::from_name("lightGray").unwrap().rgb(), [192, 192, 192]);
        assert_eq!(FontColor::from_name("DARKGRAY").unwrap().rgb(), [64, 64, 64]);
        assert_eq!(FontColor::from_name("pink").unwrap().rgb(), [255, 175, 175]);
        assert_eq!(FontColor::from_name("chartreuse"), None);
    }

    #[test]
    fn test_courier_is_monospaced() {
        let font = FontDescriptor::default();
        assert_eq!(font.text_width("iiii"), font.text_width("MMMM"));
        assert_eq!(font.text_width("abcd"), 4.0 * 600.0 * 12.0 / 1000.0);
    }

    #[test]
    fn test_win_ansi() {
        assert_eq!(encode_win_ansi("Año €5 “ok”"), b"A\xF1o \x805 \x93ok\x94".to_vec());
        assert_eq!(encode_win_ansi("Ω"), b"?".to_vec());
    }
}
