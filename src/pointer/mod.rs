// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pointer Records
//!
//! A pointer binds an owner key to the sha-256 digest of an immutable blob,
//! together with the blob's size and a small anti-replay nonce. The `id` is
//! derived from the other fields and the signature covers the `id`.
//!
//! ## Shapes
//!
//! - [`PointerDraft`]: the loosely-typed wire form; every field optional.
//! - [`PointerFields`]: the five fields the id is derived from.
//! - [`Pointer`]: a complete record as stored and served.

pub mod identity;

use serde::{Deserialize, Serialize};

pub use identity::{derive_id, is_hex_digest, sign, verify, IdentityError};

/// A complete, signed pointer record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pointer {
    pub id: String,
    pub pubkey: String,
    pub timestamp: i64,
    pub pointerhash: String,
    pub size: u64,
    pub nonce: u64,
    pub signature: String,
}

impl Pointer {
    /// The fields the id is derived from.
    pub fn fields(&self) -> PointerFields {
        PointerFields {
            pubkey: self.pubkey.clone(),
            timestamp: self.timestamp,
            pointerhash: self.pointerhash.clone(),
            size: self.size,
            nonce: self.nonce,
        }
    }

    /// Recompute the id and check the signature. Never fails loudly.
    pub fn verify(&self) -> bool {
        identity::verify(self)
    }
}

/// The id-bearing fields of a pointer, without `id` or `signature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerFields {
    pub pubkey: String,
    pub timestamp: i64,
    pub pointerhash: String,
    pub size: u64,
    pub nonce: u64,
}

impl PointerFields {
    /// Canonical id of these fields, `None` if they cannot carry one.
    pub fn derive_id(&self) -> Option<String> {
        identity::derive_fields_id(self)
    }

    /// Derive the id and sign it, producing a complete pointer.
    pub fn into_signed(self, private_key_hex: &str) -> Result<Pointer, IdentityError> {
        let id = self.derive_id().ok_or(IdentityError::MissingFields)?;
        let mut pointer = Pointer {
            id,
            pubkey: self.pubkey,
            timestamp: self.timestamp,
            pointerhash: self.pointerhash,
            size: self.size,
            nonce: self.nonce,
            signature: String::new(),
        };
        pointer.signature = sign(private_key_hex, &pointer)?;
        Ok(pointer)
    }
}

/// Wire form of a pointer as submitted by a client.
///
/// Fields are optional so malformed submissions can be reported as
/// `InvalidPointer` instead of failing frame parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointerDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointerhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl PointerDraft {
    /// Id to quote back in error responses (empty when absent).
    pub fn context_id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Convert into a complete pointer; `None` if any field is missing.
    pub fn into_pointer(self) -> Option<Pointer> {
        Some(Pointer {
            id: self.id?,
            pubkey: self.pubkey?,
            timestamp: self.timestamp?,
            pointerhash: self.pointerhash?,
            size: self.size?,
            nonce: self.nonce?,
            signature: self.signature?,
        })
    }
}

impl From<Pointer> for PointerDraft {
    fn from(pointer: Pointer) -> Self {
        Self {
            id: Some(pointer.id),
            pubkey: Some(pointer.pubkey),
            timestamp: Some(pointer.timestamp),
            pointerhash: Some(pointer.pointerhash),
            size: Some(pointer.size),
            nonce: Some(pointer.nonce),
            signature: Some(pointer.signature),
        }
    }
}

impl From<PointerFields> for PointerDraft {
    fn from(fields: PointerFields) -> Self {
        Self {
            id: None,
            pubkey: Some(fields.pubkey),
            timestamp: Some(fields.timestamp),
            pointerhash: Some(fields.pointerhash),
            size: Some(fields.size),
            nonce: Some(fields.nonce),
            signature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_with_missing_field_is_not_a_pointer() {
        let draft = PointerDraft {
            id: Some("a".repeat(64)),
            pubkey: Some("b".repeat(64)),
            timestamp: Some(1),
            pointerhash: None,
            size: Some(1),
            nonce: Some(0),
            signature: Some("c".repeat(128)),
        };
        assert_eq!(draft.context_id(), "a".repeat(64));
        assert!(draft.into_pointer().is_none());
    }

    #[test]
    fn draft_parses_from_wire_json() {
        let draft: PointerDraft =
            serde_json::from_str(r#"{"pubkey":"ab","timestamp":5,"size":3,"nonce":1}"#).unwrap();
        assert_eq!(draft.pubkey.as_deref(), Some("ab"));
        assert_eq!(draft.context_id(), "");
        assert!(draft.pointerhash.is_none());
    }

    #[test]
    fn pointer_roundtrips_through_draft() {
        let pointer = Pointer {
            id: "1".into(),
            pubkey: "2".into(),
            timestamp: 3,
            pointerhash: "4".into(),
            size: 5,
            nonce: 6,
            signature: "7".into(),
        };
        let draft = PointerDraft::from(pointer.clone());
        assert_eq!(draft.into_pointer(), Some(pointer));
    }
}
