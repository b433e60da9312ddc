//! Signature dictionary and certification

use chrono::{DateTime, FixedOffset};
use lopdf::{dictionary, Dictionary, Object, ObjectId, StringFormat};
use serde::{Deserialize, Serialize};

use crate::config::SigningConfiguration;
use crate::diagnostics::{Degradation, Diagnostics};
use crate::error::PresignError;
use crate::loader::CertificationLevel;
use crate::objects::{name, text_string};
use crate::revision::Revision;
use crate::CSIZE;

pub const DEFAULT_SUB_FILTER: &str = "adbe.pkcs7.detached";

const FILTER: &str = "Adobe.PPKLite";

/// Placeholder `/ByteRange`, rewritten once offsets are known
pub(crate) const BYTE_RANGE_PLACEHOLDER: [i64; 4] = [0, 0, 0, 0];

/// Contents of the signature dictionary, minus the signature bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDictionary {
    pub filter: String,
    pub sub_filter: String,
    /// Common name of the signer certificate
    pub name: Option<String>,
    pub sign_time: DateTime<FixedOffset>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub certification: Option<CertificationLevel>,
}

impl SignatureDictionary {
    /// Collect the dictionary fields from the configuration
    ///
    /// Certification is dropped with a warning when the document already
    /// carries signatures, since only the first signature may certify.
    pub(crate) fn build(
        config: &SigningConfiguration,
        signer_name: Option<String>,
        sign_time: DateTime<FixedOffset>,
        existing_signatures: usize,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let certification = match config
            .certification_level
            .and_then(CertificationLevel::from_level)
        {
            None | Some(CertificationLevel::NotCertified) => None,
            Some(level) if existing_signatures > 0 => {
                diagnostics.record(Degradation::CertificationIgnored(level.level()));
                None
            }
            Some(level) => Some(level),
        };

        Self {
            filter: FILTER.to_string(),
            sub_filter: config
                .sub_filter
                .clone()
                .unwrap_or_else(|| DEFAULT_SUB_FILTER.to_string()),
            name: signer_name,
            sign_time,
            reason: config.reason.clone(),
            location: config.production_city.clone(),
            contact: config.signer_contact.clone(),
            certification,
        }
    }

    /// PDF dictionary with a zeroed `/Contents` of `CSIZE` bytes
    pub fn to_dictionary(&self) -> Dictionary {
        let mut dict = dictionary! {
            "Type" => "Sig",
            "Filter" => name(&self.filter),
            "SubFilter" => name(&self.sub_filter),
            "Contents" => Object::String(vec![0; CSIZE], StringFormat::Hexadecimal),
            "ByteRange" => BYTE_RANGE_PLACEHOLDER.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            "M" => Object::String(pdf_date(&self.sign_time).into_bytes(), StringFormat::Literal),
        };
        if let Some(cn) = &self.name {
            dict.set("Name", text_string(cn));
        }
        if let Some(reason) = &self.reason {
            dict.set("Reason", text_string(reason));
        }
        if let Some(location) = &self.location {
            dict.set("Location", text_string(location));
        }
        if let Some(contact) = &self.contact {
            dict.set("ContactInfo", text_string(contact));
        }
        if let Some(level) = self.certification {
            dict.set(
                "Reference",
                vec![Object::Dictionary(dictionary! {
                    "Type" => "SigRef",
                    "TransformMethod" => "DocMDP",
                    "TransformParams" => dictionary! {
                        "Type" => "TransformParams",
                        "P" => level.level() as i64,
                        "V" => "1.2",
                    },
                })],
            );
        }
        dict
    }
}

/// Point the catalog `/Perms /DocMDP` entry at the certifying signature
pub(crate) fn apply_certification(
    revision: &mut Revision,
    signature: ObjectId,
) -> Result<(), PresignError> {
    let root = revision.catalog_id()?;
    revision
        .child_dict_mut(root, b"Perms")?
        .set("DocMDP", signature);
    tracing::info!(signature = ?signature, "document certified");
    Ok(())
}

/// `D:YYYYMMDDHHmmSS+HH'mm'`
pub fn pdf_date(time: &DateTime<FixedOffset>) -> String {
    let offset = time.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let minutes = offset.abs() / 60;
    format!(
        "D:{}{}{:02}'{:02}'",
        time.format("%Y%m%d%H%M%S"),
        sign,
        minutes / 60,
        minutes % 60
    )
}
