//! Non-fatal degradations.
//!
//! Every problem that does not abort a session is logged as a warning and
//! kept on the session, so callers can report what was silently changed.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    /// A configuration value did not parse and the default was used
    InvalidConfigValue { key: String, value: String },
    /// The rubric image is not Base64 or not a JPEG
    InvalidRubricImage(String),
    /// The attachment payload is not valid Base64
    InvalidAttachment(String),
    /// Unknown text color name, black was used
    UnsupportedFontColor(String),
    /// Signature rectangle coordinates were unusable, signature made invisible
    InvalidSignatureRectangle(String),
    /// Source encryption could not be re-applied, output is unencrypted
    EncryptionNotReapplied(String),
    /// The signer certificate has no common name
    MissingSignerName,
    /// Certification was requested on a document that is already signed
    CertificationIgnored(u8),
    /// Appending was not possible, the document is rewritten
    FreshRevisionForced(String),
    /// Part of the source could not be decrypted or expanded
    UnreadableSourceObjects(String),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::InvalidConfigValue { key, value } => {
                write!(f, "invalid value {:?} for {}, using default", value, key)
            }
            Degradation::InvalidRubricImage(reason) => {
                write!(f, "rubric image ignored: {}", reason)
            }
            Degradation::InvalidAttachment(reason) => write!(f, "attachment skipped: {}", reason),
            Degradation::UnsupportedFontColor(name) => {
                write!(f, "unsupported font color {:?}, using black", name)
            }
            Degradation::InvalidSignatureRectangle(reason) => {
                write!(f, "signature rectangle ignored, signature is invisible: {}", reason)
            }
            Degradation::EncryptionNotReapplied(reason) => {
                write!(f, "output is not encrypted: {}", reason)
            }
            Degradation::MissingSignerName => write!(f, "signer certificate has no common name"),
            Degradation::CertificationIgnored(level) => write!(
                f,
                "certification level {} ignored on an already signed document",
                level
            ),
            Degradation::FreshRevisionForced(reason) => {
                write!(f, "document is rewritten instead of appended: {}", reason)
            }
            Degradation::UnreadableSourceObjects(reason) => {
                write!(f, "source objects left as found: {}", reason)
            }
        }
    }
}

/// Collects degradations while a session runs
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    entries: Vec<Degradation>,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, degradation: Degradation) {
        tracing::warn!(degradation = %degradation, "signature preparation degraded");
        self.entries.push(degradation);
    }

    /// Take over entries that were already logged elsewhere
    pub(crate) fn absorb(&mut self, entries: impl IntoIterator<Item = Degradation>) {
        self.entries.extend(entries);
    }

    pub(crate) fn into_entries(self) -> Vec<Degradation> {
        self.entries
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[Degradation] {
        &self.entries
    }
}
