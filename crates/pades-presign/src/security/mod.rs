//! PDF Standard security handler.
//!
//! Supports the password based handler in all revisions found in the wild:
//!
//! - RC4 40 to 128 bit (V1/V2, R2/R3)
//! - AES-128 through crypt filters (V4, R4)
//! - AES-256 (V5, R5/R6)
//!
//! The same handler decrypts a source document after authentication and
//! encrypts the objects written back, so an output revision reuses the exact
//! Encrypt dictionary of its source.

mod aes;
mod algorithms;
mod rc4;

use lopdf::{Dictionary, Object, ObjectId, StringFormat};
#[cfg(any(test, feature = "test-support"))]
use rand_core::{OsRng, RngCore};

use crate::error::PresignError;
use crate::objects::type_name;

/// How strings or streams are enciphered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    /// Data is stored in the clear
    Identity,
    Rc4,
    /// AES-128-CBC
    AesV2,
    /// AES-256-CBC
    AesV3,
}

impl CryptMethod {
    fn is_aes(self) -> bool {
        matches!(self, CryptMethod::AesV2 | CryptMethod::AesV3)
    }

    #[cfg(any(test, feature = "test-support"))]
    fn cfm_name(self) -> &'static str {
        match self {
            CryptMethod::Identity => "None",
            CryptMethod::Rc4 => "V2",
            CryptMethod::AesV2 => "AESV2",
            CryptMethod::AesV3 => "AESV3",
        }
    }
}

/// Which password opened the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    Owner,
    User,
}

/// Parsed Standard security handler dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptDict {
    pub version: u32,
    pub revision: u32,
    /// File key length in bytes
    pub key_len: usize,
    pub owner: Vec<u8>,
    pub user: Vec<u8>,
    pub owner_key: Vec<u8>,
    pub user_key: Vec<u8>,
    pub permissions: i32,
    pub encrypt_metadata: bool,
    pub string_method: CryptMethod,
    pub stream_method: CryptMethod,
}

impl EncryptDict {
    /// Parse an `/Encrypt` dictionary
    pub fn from_dict(dict: &Dictionary) -> Result<Self, PresignError> {
        let filter = dict
            .get(b"Filter")
            .and_then(Object::as_name)
            .map_err(|_| PresignError::invalid("Encrypt dictionary missing /Filter"))?;
        if filter != b"Standard" {
            return Err(PresignError::invalid(format!(
                "Unsupported security handler: {}",
                String::from_utf8_lossy(filter)
            )));
        }

        let int = |key: &[u8]| dict.get(key).and_then(Object::as_i64).ok();
        let bytes = |key: &[u8]| {
            dict.get(key)
                .and_then(Object::as_str)
                .map(<[u8]>::to_vec)
                .unwrap_or_default()
        };

        let version = int(b"V").unwrap_or(0) as u32;
        let revision = int(b"R")
            .ok_or_else(|| PresignError::invalid("Encrypt dictionary missing /R"))?
            as u32;
        // Some writers store /P as an unsigned 32 bit value
        let permissions = int(b"P")
            .ok_or_else(|| PresignError::invalid("Encrypt dictionary missing /P"))?
            as i32;
        let encrypt_metadata = dict
            .get(b"EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let (key_len, string_method, stream_method) = match version {
            1 => (5, CryptMethod::Rc4, CryptMethod::Rc4),
            2 => {
                let bits = int(b"Length").unwrap_or(40);
                ((bits / 8).clamp(5, 16) as usize, CryptMethod::Rc4, CryptMethod::Rc4)
            }
            4 | 5 => {
                let string_method = crypt_filter(dict, b"StrF")?;
                let stream_method = crypt_filter(dict, b"StmF")?;
                let key_len = if version == 5 {
                    32
                } else {
                    let bits = int(b"Length").unwrap_or(128);
                    ((bits / 8).clamp(5, 16)) as usize
                };
                (key_len, string_method, stream_method)
            }
            other => {
                return Err(PresignError::invalid(format!(
                    "Unsupported encryption version V={}",
                    other
                )))
            }
        };

        Ok(Self {
            version,
            revision,
            key_len,
            owner: bytes(b"O"),
            user: bytes(b"U"),
            owner_key: bytes(b"OE"),
            user_key: bytes(b"UE"),
            permissions,
            encrypt_metadata,
            string_method,
            stream_method,
        })
    }

    fn legacy_params<'a>(&'a self, file_id: &'a [u8]) -> algorithms::LegacyParams<'a> {
        algorithms::LegacyParams {
            revision: self.revision,
            key_len: self.key_len,
            owner: &self.owner,
            user: &self.user,
            permissions: self.permissions,
            file_id,
            encrypt_metadata: self.encrypt_metadata,
        }
    }

    fn modern_params(&self) -> algorithms::ModernParams<'_> {
        algorithms::ModernParams {
            revision: self.revision,
            owner: &self.owner,
            user: &self.user,
            owner_key: &self.owner_key,
            user_key: &self.user_key,
        }
    }
}

/// Resolve `/StmF` or `/StrF` through the `/CF` dictionary
fn crypt_filter(dict: &Dictionary, entry: &[u8]) -> Result<CryptMethod, PresignError> {
    let name = match dict.get(entry).and_then(Object::as_name) {
        Ok(name) => name,
        Err(_) => return Ok(CryptMethod::Identity),
    };
    if name == b"Identity" {
        return Ok(CryptMethod::Identity);
    }

    let cfm = dict
        .get(b"CF")
        .and_then(Object::as_dict)
        .and_then(|cf| cf.get(name))
        .and_then(Object::as_dict)
        .and_then(|filter| filter.get(b"CFM"))
        .and_then(Object::as_name)
        .map_err(|_| {
            PresignError::invalid(format!(
                "Crypt filter {} is not defined",
                String::from_utf8_lossy(name)
            ))
        })?;

    match cfm {
        b"V2" => Ok(CryptMethod::Rc4),
        b"AESV2" => Ok(CryptMethod::AesV2),
        b"AESV3" => Ok(CryptMethod::AesV3),
        other => Err(PresignError::invalid(format!(
            "Unsupported crypt filter method: {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Authenticated security handler holding the file key
#[derive(Clone)]
pub struct SecurityHandler {
    dict: EncryptDict,
    file_key: Vec<u8>,
}

impl std::fmt::Debug for SecurityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHandler")
            .field("dict", &self.dict)
            .field("file_key", &"<redacted>")
            .finish()
    }
}

impl SecurityHandler {
    /// Try `password` as owner password, then as user password
    pub fn authenticate(
        dict: &EncryptDict,
        file_id: &[u8],
        password: &[u8],
    ) -> Option<(Self, PasswordKind)> {
        let (owner, user) = if dict.revision >= 5 {
            let params = dict.modern_params();
            (
                algorithms::modern_authenticate_owner(password, &params),
                algorithms::modern_authenticate_user(password, &params),
            )
        } else {
            let params = dict.legacy_params(file_id);
            (
                algorithms::legacy_authenticate_owner(password, &params),
                algorithms::legacy_authenticate_user(password, &params),
            )
        };

        let (file_key, kind) = match (owner, user) {
            (Some(key), _) => (key, PasswordKind::Owner),
            (None, Some(key)) => (key, PasswordKind::User),
            (None, None) => return None,
        };

        Some((
            Self {
                dict: dict.clone(),
                file_key,
            },
            kind,
        ))
    }

    /// Create a Standard security handler protecting a new document
    ///
    /// Returns the handler and the `/Encrypt` dictionary to write. Only built
    /// for tests and the `test-support` feature, which need encrypted fixtures.
    #[cfg(any(test, feature = "test-support"))]
    pub fn protect(
        owner_password: &str,
        user_password: &str,
        permissions: i32,
        file_id: &[u8],
        method: CryptMethod,
    ) -> Result<(Self, Dictionary), PresignError> {
        // Bits 1-2 clear, bits 7-8 and 13-32 set
        let permissions = (permissions & 0xF3C) | !0xF3F;
        let owner_password = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };

        let (dict, file_key) = match method {
            CryptMethod::Rc4 | CryptMethod::AesV2 => {
                let (version, revision) = if method == CryptMethod::Rc4 {
                    (2, 3)
                } else {
                    (4, 4)
                };
                let owner = algorithms::legacy_owner_entry(
                    owner_password.as_bytes(),
                    user_password.as_bytes(),
                    revision,
                    16,
                );
                let mut dict = EncryptDict {
                    version,
                    revision,
                    key_len: 16,
                    owner,
                    user: Vec::new(),
                    owner_key: Vec::new(),
                    user_key: Vec::new(),
                    permissions,
                    encrypt_metadata: true,
                    string_method: method,
                    stream_method: method,
                };
                let file_key =
                    algorithms::legacy_file_key(user_password.as_bytes(), &dict.legacy_params(file_id));
                dict.user = algorithms::legacy_user_entry(&file_key, &dict.legacy_params(file_id));
                (dict, file_key)
            }
            CryptMethod::AesV3 => modern_protection(owner_password, user_password, permissions)?,
            CryptMethod::Identity => {
                return Err(PresignError::invalid("Identity is not a protection method"))
            }
        };

        let encrypt = encrypt_dictionary(&dict, &file_key)?;
        Ok((Self { dict, file_key }, encrypt))
    }

    pub fn dict(&self) -> &EncryptDict {
        &self.dict
    }

    pub fn permissions(&self) -> i32 {
        self.dict.permissions
    }

    /// True when the same method protects strings and streams of any object
    pub fn can_encrypt(&self) -> bool {
        let usable = |m: CryptMethod| match m {
            CryptMethod::AesV3 => self.file_key.len() == 32,
            CryptMethod::AesV2 => self.dict.revision < 5,
            _ => true,
        };
        usable(self.dict.string_method) && usable(self.dict.stream_method)
    }

    fn crypt(
        &self,
        id: ObjectId,
        data: &[u8],
        method: CryptMethod,
        encrypt: bool,
    ) -> Result<Vec<u8>, &'static str> {
        if method == CryptMethod::Identity {
            return Ok(data.to_vec());
        }
        let key = algorithms::object_key(&self.file_key, id, method.is_aes(), self.dict.revision);
        match (method, encrypt) {
            (CryptMethod::Rc4, _) => Ok(rc4::rc4(&key, data)),
            (_, true) => aes::encrypt(&key, data),
            (_, false) => aes::decrypt(&key, data),
        }
    }

    /// Decrypt every string and stream of an indirect object in place
    ///
    /// Returns the number of values that could not be decrypted; those are
    /// left untouched.
    pub fn decrypt_object(&self, id: ObjectId, object: &mut Object) -> usize {
        self.transform(id, object, false)
    }

    /// Encrypt every string and stream of an indirect object in place
    pub fn encrypt_object(&self, id: ObjectId, object: &mut Object) -> Result<(), PresignError> {
        match self.transform(id, object, true) {
            0 => Ok(()),
            failed => Err(PresignError::invalid(format!(
                "Failed to encrypt {} value(s) of object {} {}",
                failed, id.0, id.1
            ))),
        }
    }

    fn transform(&self, id: ObjectId, object: &mut Object, encrypt: bool) -> usize {
        match object {
            Object::String(bytes, format) => {
                match self.crypt(id, bytes, self.dict.string_method, encrypt) {
                    Ok(out) => {
                        *bytes = out;
                        if encrypt {
                            *format = StringFormat::Hexadecimal;
                        }
                        0
                    }
                    Err(err) => {
                        tracing::debug!(object = ?id, error = err, "string crypt failed");
                        1
                    }
                }
            }
            Object::Array(items) => items
                .iter_mut()
                .map(|item| self.transform(id, item, encrypt))
                .sum(),
            Object::Dictionary(dict) => self.transform_dict(id, dict, encrypt),
            // Cross-reference streams are never encrypted, /ID included
            Object::Stream(stream) if type_name(&stream.dict) == Some(b"XRef") => 0,
            Object::Stream(stream) => {
                let mut failed = self.transform_dict(id, &mut stream.dict, encrypt);
                if self.stream_is_encrypted(&stream.dict) {
                    match self.crypt(id, &stream.content, self.dict.stream_method, encrypt) {
                        Ok(out) => stream.set_content(out),
                        Err(err) => {
                            tracing::debug!(object = ?id, error = err, "stream crypt failed");
                            failed += 1;
                        }
                    }
                }
                failed
            }
            _ => 0,
        }
    }

    fn transform_dict(&self, id: ObjectId, dict: &mut Dictionary, encrypt: bool) -> usize {
        // Signature values are never encrypted
        let skip_contents = matches!(type_name(dict), Some(b"Sig") | Some(b"DocTimeStamp"));
        dict.iter_mut()
            .filter(|(key, _)| !(skip_contents && key.as_slice() == b"Contents"))
            .map(|(_, value)| self.transform(id, value, encrypt))
            .sum()
    }

    fn stream_is_encrypted(&self, dict: &Dictionary) -> bool {
        match type_name(dict) {
            Some(b"XRef") => return false,
            Some(b"Metadata") if !self.dict.encrypt_metadata => return false,
            _ => {}
        }
        // A per-stream /Crypt filter overrides the default method
        let first_filter = match dict.get(b"Filter") {
            Ok(Object::Name(name)) => Some(name.as_slice()),
            Ok(Object::Array(filters)) => filters.first().and_then(|f| f.as_name().ok()),
            _ => None,
        };
        first_filter != Some(b"Crypt")
    }
}

#[cfg(any(test, feature = "test-support"))]
fn modern_protection(
    owner_password: &str,
    user_password: &str,
    permissions: i32,
) -> Result<(EncryptDict, Vec<u8>), PresignError> {
    let mut file_key = vec![0u8; 32];
    OsRng.fill_bytes(&mut file_key);
    let mut salts = [0u8; 32];
    OsRng.fill_bytes(&mut salts);

    let user_pw = &user_password.as_bytes()[..user_password.len().min(127)];
    let owner_pw = &owner_password.as_bytes()[..owner_password.len().min(127)];

    let mut user = algorithms::modern_hash(user_pw, &salts[0..8], &[], 6);
    user.extend_from_slice(&salts[0..16]);
    let user_key = aes::aes256_wrap(&algorithms::modern_hash(user_pw, &salts[8..16], &[], 6), &file_key)
        .map_err(PresignError::invalid)?;

    let mut owner = algorithms::modern_hash(owner_pw, &salts[16..24], &user, 6);
    owner.extend_from_slice(&salts[16..32]);
    let owner_key = aes::aes256_wrap(
        &algorithms::modern_hash(owner_pw, &salts[24..32], &user, 6),
        &file_key,
    )
    .map_err(PresignError::invalid)?;

    Ok((
        EncryptDict {
            version: 5,
            revision: 6,
            key_len: 32,
            owner,
            user,
            owner_key,
            user_key,
            permissions,
            encrypt_metadata: true,
            string_method: CryptMethod::AesV3,
            stream_method: CryptMethod::AesV3,
        },
        file_key,
    ))
}

/// Serialize an `EncryptDict` as written by `SecurityHandler::protect`
#[cfg(any(test, feature = "test-support"))]
fn encrypt_dictionary(dict: &EncryptDict, file_key: &[u8]) -> Result<Dictionary, PresignError> {
    let hex = |bytes: &[u8]| Object::String(bytes.to_vec(), StringFormat::Hexadecimal);

    let mut encrypt = Dictionary::new();
    encrypt.set("Filter", Object::Name(b"Standard".to_vec()));
    encrypt.set("V", dict.version as i64);
    encrypt.set("R", dict.revision as i64);
    encrypt.set("Length", (dict.key_len * 8) as i64);
    encrypt.set("O", hex(&dict.owner));
    encrypt.set("U", hex(&dict.user));
    encrypt.set("P", dict.permissions as i64);

    if dict.version >= 4 {
        let mut filter = Dictionary::new();
        filter.set("Type", Object::Name(b"CryptFilter".to_vec()));
        filter.set("CFM", Object::Name(dict.stream_method.cfm_name().as_bytes().to_vec()));
        filter.set("AuthEvent", Object::Name(b"DocOpen".to_vec()));
        filter.set("Length", dict.key_len as i64);
        let mut cf = Dictionary::new();
        cf.set("StdCF", filter);
        encrypt.set("CF", cf);
        encrypt.set("StmF", Object::Name(b"StdCF".to_vec()));
        encrypt.set("StrF", Object::Name(b"StdCF".to_vec()));
    }

    if dict.revision >= 5 {
        encrypt.set("OE", hex(&dict.owner_key));
        encrypt.set("UE", hex(&dict.user_key));

        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&dict.permissions.to_le_bytes());
        perms[4..8].copy_from_slice(&[0xFF; 4]);
        perms[8] = if dict.encrypt_metadata { b'T' } else { b'F' };
        perms[9..12].copy_from_slice(b"adb");
        OsRng.fill_bytes(&mut perms[12..]);
        // One block with a zero IV is plain ECB
        let sealed = aes::aes256_wrap(file_key, &perms).map_err(PresignError::invalid)?;
        encrypt.set("Perms", hex(&sealed));
    }

    Ok(encrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};
    use pretty_assertions::assert_eq;

    const FILE_ID: &[u8] = b"\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f\x10";

    fn roundtrip(method: CryptMethod) {
        let (handler, encrypt) =
            SecurityHandler::protect("owner", "user", -3904, FILE_ID, method).unwrap();
        let parsed = EncryptDict::from_dict(&encrypt).unwrap();
        assert_eq!(parsed.permissions, handler.permissions());

        let (by_user, kind) = SecurityHandler::authenticate(&parsed, FILE_ID, b"user").unwrap();
        assert_eq!(kind, PasswordKind::User);
        let (_, kind) = SecurityHandler::authenticate(&parsed, FILE_ID, b"owner").unwrap();
        assert_eq!(kind, PasswordKind::Owner);
        assert!(SecurityHandler::authenticate(&parsed, FILE_ID, b"guess").is_none());

        let original = Object::Dictionary(dictionary! {
            "Title" => Object::string_literal("Quarterly report"),
            "Kids" => vec![Object::string_literal("a"), Object::Integer(3)],
        });
        let mut object = original.clone();
        handler.encrypt_object((7, 0), &mut object).unwrap();
        assert_ne!(object, original);
        assert_eq!(by_user.decrypt_object((7, 0), &mut object), 0);

        let title = object.as_dict().unwrap().get(b"Title").unwrap().as_str().unwrap();
        assert_eq!(title, b"Quarterly report");
    }

    #[test]
    fn test_rc4_roundtrip() {
        roundtrip(CryptMethod::Rc4);
    }

    #[test]
    fn test_aes128_roundtrip() {
        roundtrip(CryptMethod::AesV2);
    }

    #[test]
    fn test_aes256_roundtrip() {
        roundtrip(CryptMethod::AesV3);
    }

    #[test]
    fn test_signature_contents_are_not_encrypted() {
        let (handler, _) =
            SecurityHandler::protect("o", "u", -4, FILE_ID, CryptMethod::AesV2).unwrap();
        let mut sig = Object::Dictionary(dictionary! {
            "Type" => "Sig",
            "Contents" => Object::String(vec![0u8; 8], StringFormat::Hexadecimal),
            "Reason" => Object::string_literal("Approval"),
        });
        handler.encrypt_object((3, 0), &mut sig).unwrap();
        let dict = sig.as_dict().unwrap();
        assert_eq!(dict.get(b"Contents").unwrap().as_str().unwrap(), &[0u8; 8]);
        assert_ne!(dict.get(b"Reason").unwrap().as_str().unwrap(), b"Approval");
    }

    #[test]
    fn test_xref_and_plain_metadata_streams_are_skipped() {
        let (handler, _) = SecurityHandler::protect("o", "u", -4, FILE_ID, CryptMethod::Rc4).unwrap();
        let id = Object::String(FILE_ID.to_vec(), StringFormat::Hexadecimal);
        let mut xref = Object::Stream(Stream::new(
            dictionary! { "Type" => "XRef", "ID" => vec![id.clone(), id] },
            b"raw".to_vec(),
        ));
        handler.encrypt_object((9, 0), &mut xref).unwrap();
        let xref = xref.as_stream().unwrap();
        assert_eq!(xref.content, b"raw");
        let ids = xref.dict.get(b"ID").unwrap().as_array().unwrap();
        assert_eq!(ids[0].as_str().unwrap(), FILE_ID);
        let (aes, _) = SecurityHandler::protect("o", "u", -4, FILE_ID, CryptMethod::AesV2).unwrap();
        let mut xref = Object::Stream(xref.clone());
        assert_eq!(aes.decrypt_object((9, 0), &mut xref), 0);

        let mut content = Object::Stream(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        handler.encrypt_object((10, 0), &mut content).unwrap();
        assert_ne!(content.as_stream().unwrap().content, b"BT ET");
    }

    #[test]
    fn test_non_standard_handler_is_rejected() {
        let dict = dictionary! { "Filter" => "Adobe.PubSec", "V" => 4, "R" => 4, "P" => -4 };
        assert!(matches!(
            EncryptDict::from_dict(&dict),
            Err(PresignError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_crypt_filters_are_resolved() {
        let dict = dictionary! {
            "Filter" => "Standard",
            "V" => 4,
            "R" => 4,
            "P" => -4,
            "O" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
            "U" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
            "CF" => dictionary! { "StdCF" => dictionary! { "CFM" => "AESV2" } },
            "StmF" => "StdCF",
            "StrF" => "Identity",
        };
        let parsed = EncryptDict::from_dict(&dict).unwrap();
        assert_eq!(parsed.stream_method, CryptMethod::AesV2);
        assert_eq!(parsed.string_method, CryptMethod::Identity);
        assert_eq!(parsed.key_len, 16);
    }

    #[test]
    fn test_unsigned_permissions_wrap() {
        let dict = dictionary! {
            "Filter" => "Standard",
            "V" => 2,
            "R" => 3,
            "Length" => 128,
            "P" => 4294963392i64,
        };
        assert_eq!(EncryptDict::from_dict(&dict).unwrap().permissions, -3904);
    }
}
