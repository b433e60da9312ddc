//! AES-CBC helpers for the AESV2/AESV3 crypt filters.
//!
//! Encrypted strings and streams carry their 16 byte IV as a prefix and use
//! PKCS#7 padding. The key derivation of revision 6 needs raw CBC without
//! padding, so both flavours are exposed.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use rand_core::{OsRng, RngCore};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK: usize = 16;

/// Encrypt with a fresh random IV, returning `IV || ciphertext`
pub fn encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    let mut iv = [0u8; BLOCK];
    OsRng.fill_bytes(&mut iv);
    encrypt_with_iv(key, &iv, data)
}

/// Encrypt with the given IV, returning `IV || ciphertext`
pub fn encrypt_with_iv(key: &[u8], iv: &[u8; BLOCK], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    let pad = BLOCK - data.len() % BLOCK;
    let mut buffer = vec![0u8; data.len() + pad];
    buffer[..data.len()].copy_from_slice(data);
    let len = data.len();

    let written = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| "Invalid AES-128 key")?
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, len)
            .map_err(|_| "AES encryption failed")?
            .len(),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| "Invalid AES-256 key")?
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, len)
            .map_err(|_| "AES encryption failed")?
            .len(),
        _ => return Err("AES key must be 16 or 32 bytes"),
    };
    buffer.truncate(written);

    let mut out = Vec::with_capacity(BLOCK + buffer.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&buffer);
    Ok(out)
}

/// Decrypt `IV || ciphertext`
///
/// Data shorter than one block decrypts to nothing, which is how empty
/// strings show up in real files.
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if data.len() < BLOCK {
        return Ok(Vec::new());
    }
    let (iv, body) = data.split_at(BLOCK);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if body.len() % BLOCK != 0 {
        return Err("AES ciphertext is not block aligned");
    }

    let mut buffer = body.to_vec();
    let plain = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| "Invalid AES-128 key")?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|_| "Invalid PKCS#7 padding")?
            .len(),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| "Invalid AES-256 key")?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|_| "Invalid PKCS#7 padding")?
            .len(),
        _ => return Err("AES key must be 16 or 32 bytes"),
    };
    buffer.truncate(plain);
    Ok(buffer)
}

/// AES-128-CBC without padding, input must be block aligned
pub fn aes128_cbc_raw(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    let mut buffer = data.to_vec();
    let len = buffer.len();
    Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|_| "Invalid AES-128 key")?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| "AES input is not block aligned")?;
    Ok(buffer)
}

/// AES-256-CBC decryption without padding and a zero IV (OE/UE unwrapping)
pub fn aes256_unwrap(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    let mut buffer = data.to_vec();
    let iv = [0u8; BLOCK];
    let len = Aes256CbcDec::new_from_slices(key, &iv)
        .map_err(|_| "Invalid AES-256 key")?
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| "AES input is not block aligned")?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

/// AES-256-CBC encryption without padding and a zero IV (OE/UE wrapping)
#[cfg(any(test, feature = "test-support"))]
pub fn aes256_wrap(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    let mut buffer = data.to_vec();
    let len = buffer.len();
    let iv = [0u8; BLOCK];
    Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| "Invalid AES-256 key")?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| "AES input is not block aligned")?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aes128_roundtrip() {
        let key = [7u8; 16];
        let sealed = encrypt(&key, b"Hello, signed world").unwrap();
        assert_eq!(sealed.len(), 16 + 32);
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"Hello, signed world");
    }

    #[test]
    fn test_aes256_roundtrip() {
        let key = [9u8; 32];
        let sealed = encrypt(&key, b"").unwrap();
        // Empty input still produces one padding block
        assert_eq!(sealed.len(), 32);
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"");
    }

    #[test]
    fn test_fixed_iv_is_prefixed() {
        let iv = [3u8; 16];
        let sealed = encrypt_with_iv(&[1u8; 16], &iv, b"abc").unwrap();
        assert_eq!(&sealed[..16], &iv);
    }

    #[test]
    fn test_short_input_is_empty() {
        assert_eq!(decrypt(&[0u8; 16], b"short").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(encrypt(&[0u8; 5], b"data").is_err());
    }

    #[test]
    fn test_wrap_unwrap() {
        let key = [5u8; 32];
        let file_key = [0xABu8; 32];
        let wrapped = aes256_wrap(&key, &file_key).unwrap();
        assert_eq!(aes256_unwrap(&key, &wrapped).unwrap(), file_key.to_vec());
    }
}
