//! Content streams of the signature appearance layers

use std::fmt::Write as _;

use super::font::{encode_win_ansi, FontDescriptor};

/// Inner padding between the widget border and its text
pub(crate) const MARGIN: f32 = 2.0;

/// Line spacing as a multiple of the font size
const LEADING: f32 = 1.2;

/// Blank background layer, recognized by viewers by its comment
pub(crate) const BLANK_LAYER: &[u8] = b"% DSBlank\n";

/// Format a number the way PDF content streams expect
pub(crate) fn num(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        return format!("{}", value as i64);
    }
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Greedy word wrap to `max_width`; explicit newlines always break
pub(crate) fn wrap_text(text: &str, font: &FontDescriptor, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim_end_matches('\r');
        let mut current = String::new();
        for word in paragraph.split(' ').filter(|w| !w.is_empty()) {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if current.is_empty() || font.text_width(&candidate) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        lines.push(current);
    }
    lines
}

fn escape_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7E => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push(')');
    out
}

/// Text layer drawn top-down inside a `width` x `height` box with `/F1`
pub(crate) fn text_layer(text: &str, font: &FontDescriptor, width: f32, height: f32) -> Vec<u8> {
    let size = font.size;
    let [r, g, b] = font.color.rgb().map(|c| c as f32 / 255.0);
    let color = format!("{} {} {}", num(r), num(g), num(b));
    let lines = wrap_text(text, font, width - 2.0 * MARGIN);

    let mut ops = String::new();
    let _ = writeln!(ops, "q");
    let _ = writeln!(
        ops,
        "{} {} {} {} re W n",
        num(MARGIN),
        num(MARGIN),
        num((width - 2.0 * MARGIN).max(0.0)),
        num((height - 2.0 * MARGIN).max(0.0))
    );
    let _ = writeln!(ops, "BT");
    let _ = writeln!(ops, "/F1 {} Tf", num(size));
    let _ = writeln!(ops, "{} rg", color);

    let mut decorations = Vec::new();
    let mut y = height - MARGIN - size;
    for line in &lines {
        if y < MARGIN - size {
            break;
        }
        let _ = writeln!(ops, "1 0 0 1 {} {} Tm", num(MARGIN), num(y));
        let _ = writeln!(ops, "{} Tj", escape_string(&encode_win_ansi(line)));
        let line_width = font.text_width(line);
        if line_width > 0.0 {
            if font.style.underline {
                decorations.push((y - size * 0.15, line_width));
            }
            if font.style.strikethrough {
                decorations.push((y + size * 0.3, line_width));
            }
        }
        y -= size * LEADING;
    }
    let _ = writeln!(ops, "ET");

    if !decorations.is_empty() {
        let _ = writeln!(ops, "{} RG", color);
        let _ = writeln!(ops, "{} w", num((size * 0.06).max(0.5)));
        for (line_y, line_width) in decorations {
            let _ = writeln!(
                ops,
                "{} {} m {} {} l S",
                num(MARGIN),
                num(line_y),
                num(MARGIN + line_width),
                num(line_y)
            );
        }
    }
    let _ = writeln!(ops, "Q");
    ops.into_bytes()
}

/// Image layer: `/Im1` scaled to fit the box, aspect ratio kept, centred
pub(crate) fn image_layer(image_width: u32, image_height: u32, width: f32, height: f32) -> Vec<u8> {
    let (iw, ih) = (image_width as f32, image_height as f32);
    let scale = (width / iw).min(height / ih);
    let (draw_w, draw_h) = (iw * scale, ih * scale);
    let x = (width - draw_w) / 2.0;
    let y = (height - draw_h) / 2.0;
    format!(
        "q\n{} 0 0 {} {} {} cm\n/Im1 Do\nQ\n",
        num(draw_w),
        num(draw_h),
        num(x),
        num(y)
    )
    .into_bytes()
}

/// Paint the named forms one over the other
pub(crate) fn stack_layers(names: &[&str]) -> Vec<u8> {
    let mut ops = String::new();
    for name in names {
        let _ = writeln!(ops, "q 1 0 0 1 0 0 cm /{} Do Q", name);
    }
    ops.into_bytes()
}
