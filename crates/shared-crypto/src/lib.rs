//! Shared cryptography utilities
//!
//! This crate provides the certificate handling used by the signing crates:
//! decoding X.509 chains from PEM or DER and reading the signer identity.

pub mod cert;

pub use cert::{CertError, CertificateChain};
