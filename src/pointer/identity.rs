// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pointer identity and signatures.
//!
//! The pointer id is the lowercase hex sha-256 of the canonical JSON
//! `{"pubkey":…,"timestamp":…,"pointerhash":…,"size":…,"nonce":…}` (fixed
//! field order, no whitespace). Signatures are BIP-340 Schnorr signatures over
//! the 32 raw id bytes, verified with the 32-byte x-only `pubkey`.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{Pointer, PointerDraft, PointerFields};

/// Errors raised while signing pointers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("pointer is missing id fields")]
    MissingFields,

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid pointer id: {0}")]
    InvalidId(String),

    #[error("private key does not match pointer pubkey")]
    PubkeyMismatch,

    #[error("signing failed")]
    SigningFailed,
}

/// Canonical serialization order of the id-bearing fields.
#[derive(Serialize)]
struct CanonicalFields<'a> {
    pubkey: &'a str,
    timestamp: i64,
    pointerhash: &'a str,
    size: u64,
    nonce: u64,
}

/// Lowercase hex sha-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `value` is a 64-character lowercase hex digest.
pub fn is_hex_digest(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Derive the canonical id of a submitted pointer.
///
/// Returns `None` when any id-bearing field is missing, when `timestamp` or
/// `size` is zero, or when the draft already carries an `id` or `signature`.
pub fn derive_id(draft: &PointerDraft) -> Option<String> {
    if draft.id.is_some() || draft.signature.is_some() {
        return None;
    }

    let fields = PointerFields {
        pubkey: draft.pubkey.clone()?,
        timestamp: draft.timestamp?,
        pointerhash: draft.pointerhash.clone()?,
        size: draft.size?,
        nonce: draft.nonce?,
    };
    derive_fields_id(&fields)
}

pub(super) fn derive_fields_id(fields: &PointerFields) -> Option<String> {
    if fields.pubkey.is_empty()
        || fields.pointerhash.is_empty()
        || fields.timestamp <= 0
        || fields.size == 0
    {
        return None;
    }

    let canonical = CanonicalFields {
        pubkey: &fields.pubkey,
        timestamp: fields.timestamp,
        pointerhash: &fields.pointerhash,
        size: fields.size,
        nonce: fields.nonce,
    };
    let json = serde_json::to_vec(&canonical).ok()?;
    Some(sha256_hex(&json))
}

/// Verify a pointer's id derivation and signature.
pub fn verify(pointer: &Pointer) -> bool {
    match pointer.fields().derive_id() {
        Some(expected) if expected == pointer.id => {}
        _ => return false,
    }

    let Ok(id_bytes) = hex::decode(&pointer.id) else {
        return false;
    };
    let Ok(pubkey_bytes) = hex::decode(&pointer.pubkey) else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(&pointer.signature) else {
        return false;
    };

    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
        return false;
    };

    verifying_key.verify_prehash(&id_bytes, &signature).is_ok()
}

/// Sign `pointer.id` with `private_key_hex`.
///
/// The x-only public key of the private key must equal `pointer.pubkey`.
pub fn sign(private_key_hex: &str, pointer: &Pointer) -> Result<String, IdentityError> {
    let signing_key = signing_key(private_key_hex)?;

    let derived = hex::encode(signing_key.verifying_key().to_bytes());
    if !derived.eq_ignore_ascii_case(&pointer.pubkey) {
        return Err(IdentityError::PubkeyMismatch);
    }

    let id_bytes =
        hex::decode(&pointer.id).map_err(|e| IdentityError::InvalidId(e.to_string()))?;
    if id_bytes.len() != 32 {
        return Err(IdentityError::InvalidId(format!(
            "expected 32 bytes, got {}",
            id_bytes.len()
        )));
    }

    let signature: Signature = signing_key
        .sign_prehash(&id_bytes)
        .map_err(|_| IdentityError::SigningFailed)?;
    Ok(hex::encode(signature.to_bytes()))
}

/// x-only public key (hex) belonging to a private key.
pub fn public_key_hex(private_key_hex: &str) -> Result<String, IdentityError> {
    let signing_key = signing_key(private_key_hex)?;
    Ok(hex::encode(signing_key.verifying_key().to_bytes()))
}

fn signing_key(private_key_hex: &str) -> Result<SigningKey, IdentityError> {
    let bytes = hex::decode(private_key_hex)
        .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;
    SigningKey::from_bytes(&bytes).map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))
}
