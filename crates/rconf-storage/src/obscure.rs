//! Reversible encoding for key material passed between cooperating processes.
//!
//! The cipher key is compiled in, so this only keeps bytes from sitting on disk
//! in the clear. It is not a security boundary.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use zeroize::Zeroizing;

use crate::key::KeyError;

const OBSCURE_KEY: [u8; 32] = [
    0x9c, 0x93, 0x5b, 0x48, 0x73, 0x0a, 0x55, 0x4d, 0x6b, 0xfd, 0x7c, 0x63, 0xc8, 0x86, 0xa9, 0x2b,
    0xd3, 0x90, 0x19, 0x8e, 0xb8, 0x12, 0x8a, 0xfb, 0xf4, 0xde, 0x16, 0x2b, 0x8b, 0x95, 0xf6, 0x38,
];
const NONCE_LEN: usize = 12;

fn cipher() -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&OBSCURE_KEY))
}

/// Encode `plain` as URL-safe base64 of `nonce || aes-gcm(plain)`.
pub fn obscure(plain: &[u8]) -> Result<String, KeyError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher()
        .encrypt(&nonce, plain)
        .map_err(|e| KeyError::Obscure(format!("encrypt failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Inverse of [`obscure`]. Surrounding whitespace is ignored.
pub fn reveal(text: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let raw = URL_SAFE_NO_PAD
        .decode(text.trim())
        .map_err(|e| KeyError::Obscure(format!("base64 decode failed: {e}")))?;
    if raw.len() < NONCE_LEN {
        return Err(KeyError::Obscure("input too short".to_string()));
    }
    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    cipher()
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map(Zeroizing::new)
        .map_err(|e| KeyError::Obscure(format!("decrypt failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_inverts_obscure() {
        let secret = [7u8; 32];
        let text = obscure(&secret).expect("obscure");
        assert_eq!(reveal(&text).expect("reveal").as_slice(), &secret);
    }

    #[test]
    fn output_differs_per_call() {
        let a = obscure(b"same").expect("obscure");
        let b = obscure(b"same").expect("obscure");
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_input_is_rejected() {
        let mut text = obscure(b"payload").expect("obscure");
        let last = text.pop().expect("non-empty");
        text.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(reveal(&text), Err(KeyError::Obscure(_))));
    }
}
