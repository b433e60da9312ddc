//! Encryption re-application
//!
//! Decides whether the output is encrypted again with the source key and
//! Encrypt dictionary. Never fails: when encryption cannot be written the
//! output is plain and a degradation is recorded.

use lopdf::{Object, ObjectId};

use crate::diagnostics::{Degradation, Diagnostics};
use crate::loader::SourceSecurity;
use crate::revision::RevisionMode;
use crate::security::SecurityHandler;

/// How the writer treats encryption
#[derive(Debug, Clone)]
pub(crate) enum EncryptionPlan {
    Plain,
    Reapply {
        handler: SecurityHandler,
        /// Indirect Encrypt dictionary, written unencrypted
        encrypt_id: Option<ObjectId>,
        /// Trailer `/Encrypt` value
        entry: Object,
    },
}

impl EncryptionPlan {
    pub(crate) fn is_encrypted(&self) -> bool {
        matches!(self, EncryptionPlan::Reapply { .. })
    }

    /// Decide the plan; may switch an incremental revision to a fresh one
    pub(crate) fn decide(
        security: Option<&SourceSecurity>,
        mode: RevisionMode,
        avoid_encrypting: bool,
        has_file_id: bool,
        diagnostics: &mut Diagnostics,
    ) -> (Self, RevisionMode) {
        let Some(security) = security else {
            return (EncryptionPlan::Plain, mode);
        };

        match mode {
            RevisionMode::Incremental => {
                if avoid_encrypting {
                    tracing::info!("appended revision must use the source encryption, avoid flag has no effect");
                }
            }
            RevisionMode::Fresh => {
                if !security.password_supplied {
                    tracing::info!("no password supplied, output is written unencrypted");
                    return (EncryptionPlan::Plain, mode);
                }
                if avoid_encrypting {
                    tracing::info!("encryption of the signed document avoided as configured");
                    return (EncryptionPlan::Plain, mode);
                }
            }
        }

        match writable(security, has_file_id) {
            Ok(()) => {
                tracing::debug!(revision = security.handler.dict().revision, "re-applying source encryption");
                (
                    EncryptionPlan::Reapply {
                        handler: security.handler.clone(),
                        encrypt_id: security.encrypt_id,
                        entry: security.encrypt_entry.clone(),
                    },
                    mode,
                )
            }
            Err(reason) => {
                diagnostics.record(Degradation::EncryptionNotReapplied(reason.clone()));
                if mode == RevisionMode::Incremental {
                    diagnostics.record(Degradation::FreshRevisionForced(reason));
                }
                (EncryptionPlan::Plain, RevisionMode::Fresh)
            }
        }
    }
}

fn writable(security: &SourceSecurity, has_file_id: bool) -> Result<(), String> {
    let dict = security.handler.dict();
    // Keys before revision 5 are derived from the first file identifier
    if dict.revision < 5 && !has_file_id {
        return Err("source has no file identifier".to_string());
    }
    if dict.string_method != dict.stream_method {
        return Err("strings and streams use different crypt filters".to_string());
    }
    if !security.handler.can_encrypt() {
        return Err("crypt filters cannot be written".to_string());
    }
    Ok(())
}
