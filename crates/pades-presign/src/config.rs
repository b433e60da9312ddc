//! Signing configuration
//!
//! Signing requests carry a flat set of string properties. They are parsed
//! once, in a single pass, into a typed [`SigningConfiguration`]. A value that
//! does not parse never aborts the request: the default is used and the
//! problem is kept as a [`Degradation`] so the session can report it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::appearance::font::{FontFamily, FontStyle};
use crate::diagnostics::Degradation;

/// Value of `signaturePage` that selects the last page
pub const LAST_PAGE: i64 = -666;

/// Default layer-2 font size in points
pub const DEFAULT_FONT_SIZE: f32 = 12.0;

/// Page that receives a rectangle-placed signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSelector {
    #[default]
    Last,
    /// 1-based page number
    Number(u32),
}

/// Raw signature rectangle coordinates, validated when the appearance is composed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePosition {
    pub lower_left_x: Option<String>,
    pub lower_left_y: Option<String>,
    pub upper_right_x: Option<String>,
    pub upper_right_y: Option<String>,
}

impl SignaturePosition {
    /// True when at least one coordinate was supplied
    pub fn is_requested(&self) -> bool {
        self.lower_left_x.is_some()
            || self.lower_left_y.is_some()
            || self.upper_right_x.is_some()
            || self.upper_right_y.is_some()
    }
}

/// Every option recognized by the pre-signature phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfiguration {
    /// Base64 JPEG rendered in the visible signature
    pub rubric_image: Option<String>,
    pub reason: Option<String>,
    /// Existing empty signature field to sign
    pub field_name: Option<String>,
    pub production_city: Option<String>,
    pub signer_contact: Option<String>,
    pub page: PageSelector,
    pub position: SignaturePosition,
    /// Overrides `adbe.pkcs7.detached`
    pub sub_filter: Option<String>,
    /// Base64 payload of the file to embed
    pub attachment: Option<String>,
    pub attachment_file_name: Option<String>,
    pub attachment_description: Option<String>,
    /// 0 to 3, `None` leaves certification alone
    pub certification_level: Option<u8>,
    pub layer2_text: Option<String>,
    pub layer4_text: Option<String>,
    pub layer2_font_family: FontFamily,
    pub layer2_font_size: f32,
    pub layer2_font_style: FontStyle,
    /// Palette name, resolved when the appearance is composed
    pub layer2_font_color: Option<String>,
    #[serde(skip_serializing)]
    pub owner_password: Option<String>,
    #[serde(skip_serializing)]
    pub user_password: Option<String>,
    pub headless: bool,
    pub allow_signing_certified: Option<bool>,
    pub avoid_encrypting_signed: bool,
    /// Values that fell back to their default while parsing
    #[serde(skip)]
    warnings: Vec<Degradation>,
}

impl Default for SigningConfiguration {
    fn default() -> Self {
        Self {
            rubric_image: None,
            reason: None,
            field_name: None,
            production_city: None,
            signer_contact: None,
            page: PageSelector::Last,
            position: SignaturePosition::default(),
            sub_filter: None,
            attachment: None,
            attachment_file_name: None,
            attachment_description: None,
            certification_level: None,
            layer2_text: None,
            layer4_text: None,
            layer2_font_family: FontFamily::Courier,
            layer2_font_size: DEFAULT_FONT_SIZE,
            layer2_font_style: FontStyle::NORMAL,
            layer2_font_color: None,
            owner_password: None,
            user_password: None,
            headless: false,
            allow_signing_certified: None,
            avoid_encrypting_signed: false,
            warnings: Vec::new(),
        }
    }
}

impl SigningConfiguration {
    /// Build the configuration from string properties
    ///
    /// # Example
    ///
    /// ```
    /// use pades_presign::SigningConfiguration;
    /// use std::collections::HashMap;
    ///
    /// let mut props = HashMap::new();
    /// props.insert("signReason".to_string(), "Approval".to_string());
    /// props.insert("layer2FontSize".to_string(), "big".to_string());
    ///
    /// let config = SigningConfiguration::from_properties(&props);
    /// assert_eq!(config.reason.as_deref(), Some("Approval"));
    /// assert_eq!(config.layer2_font_size, 12.0);
    /// assert_eq!(config.warnings().len(), 1);
    /// ```
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        let mut keys: Vec<&String> = props.keys().collect();
        // Deterministic warning order regardless of map iteration
        keys.sort();
        for key in keys {
            config.apply(key, &props[key]);
        }
        config
    }

    /// Parse `key=value` properties text (`#`/`!` comments, `\` continuations)
    pub fn parse_properties(text: &str) -> Self {
        Self::from_properties(&parse_properties_text(text))
    }

    /// Values that were replaced by their defaults
    pub fn warnings(&self) -> &[Degradation] {
        &self.warnings
    }

    fn warn(&mut self, key: &str, value: &str) {
        tracing::debug!(key, value, "unparseable signing property");
        self.warnings.push(Degradation::InvalidConfigValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn apply(&mut self, key: &str, raw: &str) {
        let text = non_empty(raw);
        match key {
            "signatureRubricImage" => self.rubric_image = text,
            "signReason" => self.reason = text,
            "signatureField" => self.field_name = text,
            "signatureProductionCity" => self.production_city = text,
            "signerContact" => self.signer_contact = text,
            "signatureSubFilter" => self.sub_filter = text,
            "attach" => self.attachment = text,
            "attachFileName" => self.attachment_file_name = text,
            "attachDescription" => self.attachment_description = text,
            "layer2Text" => self.layer2_text = text,
            "layer4Text" => self.layer4_text = text,
            "layer2FontColor" => self.layer2_font_color = text,
            "ownerPassword" => self.owner_password = text,
            "userPassword" => self.user_password = text,
            "signaturePositionOnPageLowerLeftX" => self.position.lower_left_x = text,
            "signaturePositionOnPageLowerLeftY" => self.position.lower_left_y = text,
            "signaturePositionOnPageUpperRightX" => self.position.upper_right_x = text,
            "signaturePositionOnPageUpperRightY" => self.position.upper_right_y = text,
            "signaturePage" => match parse_page(raw) {
                Some(page) => self.page = page,
                None => self.warn(key, raw),
            },
            "certificationLevel" => match raw.trim().parse::<i64>() {
                Ok(-1) => self.certification_level = None,
                Ok(level @ 0..=3) => self.certification_level = Some(level as u8),
                _ => self.warn(key, raw),
            },
            "layer2FontFamily" => match raw.trim().parse::<i64>().ok().and_then(FontFamily::from_code) {
                Some(family) => self.layer2_font_family = family,
                None => self.warn(key, raw),
            },
            "layer2FontSize" => match raw.trim().parse::<f32>() {
                Ok(size) if size.is_finite() && size > 0.0 => self.layer2_font_size = size,
                _ => self.warn(key, raw),
            },
            "layer2FontStyle" => match raw.trim().parse::<i64>().ok().and_then(FontStyle::from_bits) {
                Some(style) => self.layer2_font_style = style,
                None => self.warn(key, raw),
            },
            "headLess" => match parse_bool(raw) {
                Some(value) => self.headless = value,
                None => self.warn(key, raw),
            },
            "allowSigningCertifiedPdfs" => match parse_bool(raw) {
                Some(value) => self.allow_signing_certified = Some(value),
                None => self.warn(key, raw),
            },
            "avoidEncryptingSignedPdfs" => match parse_bool(raw) {
                Some(value) => self.avoid_encrypting_signed = value,
                None => self.warn(key, raw),
            },
            other => tracing::debug!(key = other, "ignoring unknown signing property"),
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_page(raw: &str) -> Option<PageSelector> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("last") {
        return Some(PageSelector::Last);
    }
    match raw.parse::<i64>().ok()? {
        LAST_PAGE => Some(PageSelector::Last),
        n if n >= 1 && n <= u32::MAX as i64 => Some(PageSelector::Number(n as u32)),
        _ => None,
    }
}

/// Split properties text into key/value pairs
fn parse_properties_text(text: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    let mut logical = String::new();

    for line in text.lines() {
        // Continuation lines drop their leading whitespace too
        let line = line.trim_start();
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            continue;
        }
        logical.push_str(line);

        let (key, value) = split_key_value(&logical);
        props.insert(unescape(key), unescape(value));
        logical.clear();
    }

    if !logical.is_empty() {
        let (key, value) = split_key_value(&logical);
        props.insert(unescape(key), unescape(value));
    }

    props
}

/// Odd number of trailing backslashes continues the line
fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut escaped = false;
    for (idx, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'=' | b':' => return (line[..idx].trim_end(), line[idx + 1..].trim_start()),
            b' ' | b'\t' => {
                let rest = line[idx..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..idx], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{0C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
