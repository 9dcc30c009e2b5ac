//! AES-256-CBC and HMAC-SHA256 primitives.
//!
//! ## Wire Conventions
//!
//! - Ciphertext is PKCS#7-padded AES-256-CBC, carried as standard base64
//! - Signatures are lowercase hex HMAC-SHA256 over newline-joined fields

use crate::domain::types::KeyMaterial;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Encrypt `plaintext` under the given key and IV.
pub fn aes_encrypt(material: &KeyMaterial, plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(&material.key.into(), &material.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt and strip padding. `None` on bad length or bad padding.
pub fn aes_decrypt(material: &KeyMaterial, ciphertext: &[u8]) -> Option<Vec<u8>> {
    Aes256CbcDec::new(&material.key.into(), &material.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .ok()
}

/// Hex HMAC-SHA256 of `message` keyed by `secret`
pub fn hmac_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Canonical request signing string: `"{ts}\n{nonce}\n{method}\n{payload}"`
pub fn request_signing_string(timestamp: &str, nonce: &str, method: &str, payload: &str) -> String {
    format!("{}\n{}\n{}\n{}", timestamp, nonce, method, payload)
}

/// Response signing string: `"{ts}\n{cipherBase64}"`
pub fn response_signing_string(timestamp: i64, data: &str) -> String {
    format!("{}\n{}", timestamp, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn material() -> KeyMaterial {
        KeyMaterial::new([0x42; 32], [0x24; 16])
    }

    #[test]
    fn test_ciphertext_is_block_aligned() {
        let ct = aes_encrypt(&material(), b"exactly 16 bytes");
        // Full padding block appended when input is aligned
        assert_eq!(ct.len(), 32);
        assert_eq!(aes_decrypt(&material(), &ct).unwrap(), b"exactly 16 bytes");
    }

    #[test]
    fn test_wrong_key_fails_or_garbles() {
        let ct = aes_encrypt(&material(), br#"{"a":1}"#);
        let other = KeyMaterial::new([0x43; 32], [0x24; 16]);
        assert_ne!(aes_decrypt(&other, &ct).as_deref(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let ct = aes_encrypt(&material(), b"hello world");
        assert!(aes_decrypt(&material(), &ct[..15]).is_none());
        assert!(aes_decrypt(&material(), &[]).is_none());
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_hex(b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signing_strings() {
        assert_eq!(request_signing_string("1", "n", "m", "d"), "1\nn\nm\nd");
        assert_eq!(response_signing_string(7, "abc"), "7\nabc");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            key in prop::array::uniform32(any::<u8>()),
            iv in prop::array::uniform16(any::<u8>()),
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let material = KeyMaterial::new(key, iv);
            let ct = aes_encrypt(&material, &plaintext);
            prop_assert_eq!(ct.len() % 16, 0);
            prop_assert_eq!(aes_decrypt(&material, &ct), Some(plaintext));
        }
    }
}
