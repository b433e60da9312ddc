//! PAdES pre-signature sessions
//!
//! Prepares a PDF for a signature whose bytes are produced later, possibly by
//! a remote signing service. The prepared document carries the signature
//! dictionary, the visible or invisible appearance, an optional attachment and
//! the source encryption, with a fixed `/Contents` gap of `2 * CSIZE + 2`
//! bytes at a known offset.
//!
//! - [`SessionBuilder`]: load, compose and reserve in one call
//! - [`PdfTriPhaseSession`]: the prepared bytes, the [`ReservationReceipt`]
//!   and [`PdfTriPhaseSession::complete`] for injecting the CMS signature
//! - [`DocumentHandle`]: inspect a document (pages, certification,
//!   encryption, existing signatures) without preparing it

pub mod appearance;
mod attachment;
pub mod config;
pub mod diagnostics;
pub mod dictionary;
mod encryption;
pub mod error;
mod extensions;
pub mod interaction;
pub mod loader;
mod objects;
pub mod revision;
pub mod security;
pub mod session;
mod writer;

pub use appearance::{
    AppearanceHandle, FontColor, FontDescriptor, FontFamily, FontStyle, Placement, RubricImage,
};
pub use config::{PageSelector, SignaturePosition, SigningConfiguration};
pub use diagnostics::Degradation;
pub use dictionary::{pdf_date, SignatureDictionary, DEFAULT_SUB_FILTER};
pub use error::PresignError;
pub use interaction::{FixedAnswers, Interaction, NoInteraction};
pub use loader::{CertificationLevel, DocumentHandle, EncryptionState, FileId, LoadOptions};
pub use revision::RevisionMode;
pub use security::{CryptMethod, EncryptDict, PasswordKind, SecurityHandler};
pub use session::{PdfTriPhaseSession, SessionBuilder};
pub use writer::ReservationReceipt;

/// Bytes reserved for the CMS signature; the gap holds twice as many hex digits
pub const CSIZE: usize = 27000;
