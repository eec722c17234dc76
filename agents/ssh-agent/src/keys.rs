//! Public-key and signature wire formats (C3): Ed25519 and ECDSA-P256
//! blob encoding/decoding, signature wire forms, and fingerprint
//! derivation.
//!
//! Grounded on the algorithm-tagged `PublicKey` enum pattern used across
//! the SSH-key crates in the example pack, adapted to the two algorithms
//! this agent actually speaks.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::wire::{self, mpint_to_fixed, Reader, WireError};

pub const SSH_ED25519: &str = "ssh-ed25519";
pub const ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";
const NISTP256_CURVE_NAME: &str = "nistp256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Ed25519,
    EcdsaP256,
}

impl KeyAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => SSH_ED25519,
            KeyAlgorithm::EcdsaP256 => ECDSA_SHA2_NISTP256,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            SSH_ED25519 => Some(KeyAlgorithm::Ed25519),
            ECDSA_SHA2_NISTP256 => Some(KeyAlgorithm::EcdsaP256),
            _ => None,
        }
    }
}

/// Build an Ed25519 public-key blob: `string("ssh-ed25519"), string(raw)`.
pub fn encode_ed25519_public_key(raw: &[u8; 32]) -> Vec<u8> {
    let mut blob = Vec::new();
    wire::write_string(&mut blob, SSH_ED25519.as_bytes());
    wire::write_string(&mut blob, raw);
    blob
}

/// Build an ECDSA-P256 public-key blob:
/// `string("ecdsa-sha2-nistp256"), string("nistp256"), string(point)`.
pub fn encode_ecdsa_p256_public_key(point: &[u8; 65]) -> Vec<u8> {
    let mut blob = Vec::new();
    wire::write_string(&mut blob, ECDSA_SHA2_NISTP256.as_bytes());
    wire::write_string(&mut blob, NISTP256_CURVE_NAME.as_bytes());
    wire::write_string(&mut blob, point);
    blob
}

/// A parsed public-key blob, tagged by algorithm.
#[derive(Debug, Clone)]
pub enum ParsedPublicKey {
    Ed25519 { raw: [u8; 32] },
    EcdsaP256 { point: [u8; 65] },
}

impl ParsedPublicKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            ParsedPublicKey::Ed25519 { .. } => KeyAlgorithm::Ed25519,
            ParsedPublicKey::EcdsaP256 { .. } => KeyAlgorithm::EcdsaP256,
        }
    }
}

/// Parse a public-key blob, dispatching on its leading algorithm name.
pub fn parse_public_key_blob(blob: &[u8]) -> WireResult<ParsedPublicKey> {
    let mut r = Reader::new(blob);
    let algo = r.read_utf8_string()?;
    match algo.as_str() {
        SSH_ED25519 => {
            let raw = r.read_string()?;
            if raw.len() != 32 {
                return Err(WireError::InvalidFormat(
                    "ed25519 public key must be 32 bytes".into(),
                ));
            }
            let mut fixed = [0u8; 32];
            fixed.copy_from_slice(&raw);
            Ok(ParsedPublicKey::Ed25519 { raw: fixed })
        }
        ECDSA_SHA2_NISTP256 => {
            let curve = r.read_utf8_string()?;
            if curve != NISTP256_CURVE_NAME {
                return Err(WireError::InvalidFormat(format!(
                    "unexpected curve name {curve}"
                )));
            }
            let point = r.read_string()?;
            if point.len() != 65 || point[0] != 0x04 {
                return Err(WireError::InvalidFormat(
                    "ecdsa-p256 point must be 65 bytes, uncompressed".into(),
                ));
            }
            let mut fixed = [0u8; 65];
            fixed.copy_from_slice(&point);
            Ok(ParsedPublicKey::EcdsaP256 { point: fixed })
        }
        other => Err(WireError::InvalidFormat(format!(
            "unsupported key algorithm {other}"
        ))),
    }
}

type WireResult<T> = Result<T, WireError>;

/// Build an Ed25519 signature wire form: `string("ssh-ed25519"), string(raw)`.
pub fn ed25519_signature_to_ssh(raw: &[u8; 64]) -> Vec<u8> {
    let mut out = Vec::new();
    wire::write_string(&mut out, SSH_ED25519.as_bytes());
    wire::write_string(&mut out, raw);
    out
}

/// Build an ECDSA-P256 signature wire form from a raw 64-byte `r‖s`.
/// Rejects any other input length with `InvalidFormat`.
pub fn ecdsa_signature_to_ssh(raw_r_s: &[u8]) -> WireResult<Vec<u8>> {
    if raw_r_s.len() != 64 {
        return Err(WireError::InvalidFormat(
            "ecdsa-p256 raw signature must be 64 bytes".into(),
        ));
    }
    let (r, s) = raw_r_s.split_at(32);
    let mut inner = Vec::new();
    wire::write_mpint(&mut inner, r);
    wire::write_mpint(&mut inner, s);
    let mut out = Vec::new();
    wire::write_string(&mut out, ECDSA_SHA2_NISTP256.as_bytes());
    wire::write_string(&mut out, &inner);
    Ok(out)
}

/// Parse an ECDSA-P256 signature wire form (the inner `mpint(r), mpint(s)`
/// region) back into normalized 32-byte `r` and `s`.
pub fn parse_ecdsa_signature_inner(inner: &[u8]) -> WireResult<([u8; 32], [u8; 32])> {
    let mut r = Reader::new(inner);
    let r_mpint = r.read_mpint()?;
    let s_mpint = r.read_mpint()?;
    let r_fixed = mpint_to_fixed(&r_mpint, 32)?;
    let s_fixed = mpint_to_fixed(&s_mpint, 32)?;
    let mut r_out = [0u8; 32];
    let mut s_out = [0u8; 32];
    r_out.copy_from_slice(&r_fixed);
    s_out.copy_from_slice(&s_fixed);
    Ok((r_out, s_out))
}

/// `SHA256:<base64 of SHA-256(blob), padding stripped>`.
pub fn fingerprint(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

/// `algorithm_name SP base64(public_key_blob) SP comment`.
pub fn authorized_keys_line(algorithm: KeyAlgorithm, blob: &[u8], comment: &str) -> String {
    format!(
        "{} {} {}",
        algorithm.name(),
        STANDARD_NO_PAD.encode(blob),
        comment
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_blob_round_trips() {
        let raw = [7u8; 32];
        let blob = encode_ed25519_public_key(&raw);
        match parse_public_key_blob(&blob).unwrap() {
            ParsedPublicKey::Ed25519 { raw: parsed } => assert_eq!(parsed, raw),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ecdsa_blob_round_trips() {
        let mut point = [0u8; 65];
        point[0] = 0x04;
        point[1] = 9;
        let blob = encode_ecdsa_p256_public_key(&point);
        match parse_public_key_blob(&blob).unwrap() {
            ParsedPublicKey::EcdsaP256 { point: parsed } => assert_eq!(parsed, point),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ecdsa_blob_rejects_compressed_point() {
        let mut point = [0u8; 65];
        point[0] = 0x02;
        let blob = encode_ecdsa_p256_public_key(&point);
        assert!(parse_public_key_blob(&blob).is_err());
    }

    #[test]
    fn unsupported_algorithm_rejected() {
        let mut blob = Vec::new();
        wire::write_string(&mut blob, b"ssh-rsa");
        wire::write_string(&mut blob, b"junk");
        assert!(parse_public_key_blob(&blob).is_err());
    }

    #[test]
    fn ed25519_signature_wire_form() {
        let raw = [3u8; 64];
        let wire_form = ed25519_signature_to_ssh(&raw);
        let mut r = Reader::new(&wire_form);
        assert_eq!(r.read_utf8_string().unwrap(), SSH_ED25519);
        assert_eq!(r.read_string().unwrap(), raw);
    }

    #[test]
    fn ecdsa_signature_wrong_length_rejected() {
        assert!(ecdsa_signature_to_ssh(&[0u8; 63]).is_err());
        assert!(ecdsa_signature_to_ssh(&[0u8; 65]).is_err());
    }

    #[test]
    fn ecdsa_signature_round_trips_through_mpint_normalization() {
        let mut raw = [0u8; 64];
        raw[0] = 0x80; // high bit set in r -> requires sign pad on the wire
        raw[63] = 0x01;
        let wire_form = ecdsa_signature_to_ssh(&raw).unwrap();

        let mut outer = Reader::new(&wire_form);
        assert_eq!(outer.read_utf8_string().unwrap(), ECDSA_SHA2_NISTP256);
        let inner = outer.read_string().unwrap();

        let (r, s) = parse_ecdsa_signature_inner(&inner).unwrap();
        assert_eq!(r, raw[0..32]);
        assert_eq!(s, raw[32..64]);
    }

    #[test]
    fn fingerprint_is_stable_and_distinguishes_blobs() {
        let a = encode_ed25519_public_key(&[1u8; 32]);
        let b = encode_ed25519_public_key(&[2u8; 32]);
        assert_eq!(fingerprint(&a), fingerprint(&a));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint(&a).starts_with("SHA256:"));
        assert!(!fingerprint(&a).contains('='));
    }

    #[test]
    fn authorized_keys_line_format() {
        let blob = encode_ed25519_public_key(&[0u8; 32]);
        let line = authorized_keys_line(KeyAlgorithm::Ed25519, &blob, "user@host");
        let mut parts = line.splitn(3, ' ');
        assert_eq!(parts.next().unwrap(), "ssh-ed25519");
        assert!(parts.next().is_some());
        assert_eq!(parts.next().unwrap(), "user@host");
    }
}
