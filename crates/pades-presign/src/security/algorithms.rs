//! Standard security handler key algorithms.
//!
//! Revisions 2 to 4 derive the file key from the padded password with MD5 and
//! RC4 (ISO 32000-1 algorithms 2 to 7). Revisions 5 and 6 wrap a random file
//! key with a SHA-2 based password hash (ISO 32000-2 algorithms 2.A and 2.B).

use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

use super::aes;
use super::rc4::rc4;

/// Password padding string
pub const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Inputs shared by the MD5 based revisions
#[derive(Debug, Clone, Copy)]
pub struct LegacyParams<'a> {
    pub revision: u32,
    /// File key length in bytes (5 to 16)
    pub key_len: usize,
    pub owner: &'a [u8],
    pub user: &'a [u8],
    pub permissions: i32,
    pub file_id: &'a [u8],
    pub encrypt_metadata: bool,
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

/// Algorithm 2: file key from a user password
pub fn legacy_file_key(password: &[u8], params: &LegacyParams<'_>) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(params.owner);
    hasher.update(params.permissions.to_le_bytes());
    hasher.update(params.file_id);
    if params.revision >= 4 && !params.encrypt_metadata {
        hasher.update([0xFF; 4]);
    }
    let mut hash = hasher.finalize().to_vec();

    let key_len = params.key_len.clamp(5, 16);
    if params.revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..key_len]).to_vec();
        }
        hash.truncate(key_len);
    } else {
        hash.truncate(5);
    }
    hash
}

/// Algorithms 4 and 5: the /U value for a file key
pub fn legacy_user_entry(file_key: &[u8], params: &LegacyParams<'_>) -> Vec<u8> {
    if params.revision == 2 {
        return rc4(file_key, &PADDING);
    }

    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(params.file_id);
    let mut hash = hasher.finalize().to_vec();

    for round in 0..20u8 {
        let round_key: Vec<u8> = file_key.iter().map(|b| b ^ round).collect();
        hash = rc4(&round_key, &hash);
    }
    // Arbitrary padding up to 32 bytes
    hash.extend_from_slice(&[0u8; 16]);
    hash
}

/// RC4 key derived from the owner password (algorithm 3, steps a to d)
fn owner_rc4_key(owner_password: &[u8], revision: u32, key_len: usize) -> Vec<u8> {
    let mut hash = Md5::digest(pad_password(owner_password)).to_vec();
    let key_len = if revision >= 3 { key_len.clamp(5, 16) } else { 5 };
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    hash.truncate(key_len);
    hash
}

/// Algorithm 3: the /O value
#[cfg(any(test, feature = "test-support"))]
pub fn legacy_owner_entry(
    owner_password: &[u8],
    user_password: &[u8],
    revision: u32,
    key_len: usize,
) -> Vec<u8> {
    let owner = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };
    let key = owner_rc4_key(owner, revision, key_len);

    let mut out = rc4(&key, &pad_password(user_password));
    if revision >= 3 {
        for round in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ round).collect();
            out = rc4(&round_key, &out);
        }
    }
    out
}

/// Algorithms 4/5 check: returns the file key when `password` is the user password
pub fn legacy_authenticate_user(password: &[u8], params: &LegacyParams<'_>) -> Option<Vec<u8>> {
    let key = legacy_file_key(password, params);
    let expected = legacy_user_entry(&key, params);

    let compare_len = if params.revision >= 3 { 16 } else { 32 };
    if params.user.len() < compare_len {
        return None;
    }
    constant_time_eq(&expected[..compare_len], &params.user[..compare_len]).then_some(key)
}

/// Algorithm 7: recover the user password from /O, then authenticate it
pub fn legacy_authenticate_owner(password: &[u8], params: &LegacyParams<'_>) -> Option<Vec<u8>> {
    let key = owner_rc4_key(password, params.revision, params.key_len);

    let mut user_password = params.owner.to_vec();
    if params.revision == 2 {
        user_password = rc4(&key, &user_password);
    } else {
        for round in (0..=19u8).rev() {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ round).collect();
            user_password = rc4(&round_key, &user_password);
        }
    }

    legacy_authenticate_user(&user_password, params)
}

/// Algorithm 2.B (revision 6) or plain SHA-256 (revision 5)
pub fn modern_hash(password: &[u8], salt: &[u8], udata: &[u8], revision: u32) -> Vec<u8> {
    let mut sha = Sha256::new();
    sha.update(password);
    sha.update(salt);
    sha.update(udata);
    let mut k = sha.finalize().to_vec();

    if revision < 6 {
        return k;
    }

    let mut round: u32 = 0;
    loop {
        let mut block = Vec::with_capacity(password.len() + k.len() + udata.len());
        block.extend_from_slice(password);
        block.extend_from_slice(&k);
        block.extend_from_slice(udata);
        let k1 = block.repeat(64);

        // k1 is a multiple of 64 bytes so the raw CBC call cannot fail
        let e = match aes::aes128_cbc_raw(&k[..16], &k[16..32], &k1) {
            Ok(e) => e,
            Err(_) => return k[..32].to_vec(),
        };

        let selector: u32 = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
        k = match selector {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };

        round += 1;
        let last = e.last().copied().unwrap_or(0) as u32;
        if round >= 64 && last + 32 <= round {
            break;
        }
    }

    k.truncate(32);
    k
}

/// Inputs for revisions 5 and 6
#[derive(Debug, Clone, Copy)]
pub struct ModernParams<'a> {
    pub revision: u32,
    pub owner: &'a [u8],
    pub user: &'a [u8],
    pub owner_key: &'a [u8],
    pub user_key: &'a [u8],
}

/// Passwords are UTF-8, truncated to 127 bytes
fn modern_password(password: &[u8]) -> &[u8] {
    &password[..password.len().min(127)]
}

/// Algorithm 2.A, user branch
pub fn modern_authenticate_user(password: &[u8], params: &ModernParams<'_>) -> Option<Vec<u8>> {
    if params.user.len() < 48 || params.user_key.len() < 32 {
        return None;
    }
    let password = modern_password(password);
    let hash = modern_hash(password, &params.user[32..40], &[], params.revision);
    if !constant_time_eq(&hash, &params.user[..32]) {
        return None;
    }
    let intermediate = modern_hash(password, &params.user[40..48], &[], params.revision);
    aes::aes256_unwrap(&intermediate, &params.user_key[..32]).ok()
}

/// Algorithm 2.A, owner branch
pub fn modern_authenticate_owner(password: &[u8], params: &ModernParams<'_>) -> Option<Vec<u8>> {
    if params.owner.len() < 48 || params.user.len() < 48 || params.owner_key.len() < 32 {
        return None;
    }
    let password = modern_password(password);
    let udata = &params.user[..48];
    let hash = modern_hash(password, &params.owner[32..40], udata, params.revision);
    if !constant_time_eq(&hash, &params.owner[..32]) {
        return None;
    }
    let intermediate = modern_hash(password, &params.owner[40..48], udata, params.revision);
    aes::aes256_unwrap(&intermediate, &params.owner_key[..32]).ok()
}

/// Per-object key (algorithm 1); revisions 5+ use the file key directly
pub fn object_key(file_key: &[u8], id: (u32, u16), aes: bool, revision: u32) -> Vec<u8> {
    if revision >= 5 {
        return file_key.to_vec();
    }

    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(&id.0.to_le_bytes()[..3]);
    hasher.update(id.1.to_le_bytes());
    if aes {
        hasher.update(b"sAlT");
    }
    let hash = hasher.finalize();
    hash[..(file_key.len() + 5).min(16)].to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
