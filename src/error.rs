// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay error taxonomy.
//!
//! Every public operation of the relay returns [`RelayError`] on failure. The
//! error carries a stable numeric code (so clients can branch without parsing
//! prose), the id of the request or pointer that triggered it, and a
//! human-readable context string.

use serde_json::{json, Value};

/// Error kinds surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Frame could not be parsed at all
    InvalidInput,
    /// A value was present but unusable (e.g. bad base64)
    InvalidValues,
    /// Unknown command or wrong argument count
    InvalidCommand,
    /// Malformed search criteria
    InvalidQuery,
    /// Malformed, unverifiable or unknown pointer
    InvalidPointer,
    /// Blob content does not hash to the claimed pointerhash
    InvalidDataHash,
    /// Size mismatch or size over the configured limit
    InvalidSize,
    /// Deletion claim failed the anti-replay gate
    InvalidDeletionPointer,
    /// Blob exists in metadata but could not be read
    ErrorRetrievingData,
    /// Blob is missing from the store
    DataNotFound,
    /// Metadata lookup failed
    ErrorRetrievingPointers,
    /// Action denied by the key's filter group
    InvalidPubkey,
    /// Generic quota/policy refusal
    ActionNotAllowed,
    /// Pointer count quota exceeded
    CountQuotaExceeded,
    /// Pointer size quota exceeded
    SizeQuotaExceeded,
    /// Benign rejection (duplicate publish)
    Notice,
    /// Backing store timed out or is unreachable (retryable)
    StorageUnavailable,
    /// Stored blob failed its integrity check (non-retryable)
    DataCorruption,
}

impl ErrorKind {
    /// Stable numeric wire code.
    pub fn code(&self) -> u8 {
        match self {
            ErrorKind::InvalidInput => 0x00,
            ErrorKind::InvalidValues => 0x01,
            ErrorKind::InvalidCommand => 0x02,
            ErrorKind::InvalidQuery => 0x03,
            ErrorKind::InvalidPointer => 0x04,
            ErrorKind::InvalidDataHash => 0x05,
            ErrorKind::InvalidSize => 0x06,
            ErrorKind::InvalidDeletionPointer => 0x07,
            ErrorKind::ErrorRetrievingData | ErrorKind::DataNotFound => 0x08,
            ErrorKind::ErrorRetrievingPointers => 0x09,
            ErrorKind::InvalidPubkey => 0x0a,
            ErrorKind::ActionNotAllowed
            | ErrorKind::CountQuotaExceeded
            | ErrorKind::SizeQuotaExceeded => 0x0b,
            ErrorKind::Notice => 0x0c,
            ErrorKind::StorageUnavailable => 0x0d,
            ErrorKind::DataCorruption => 0x0e,
        }
    }

    /// Message prefix prepended to the context string.
    pub fn prefix(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Invalid input",
            ErrorKind::InvalidValues => "Invalid values: ",
            ErrorKind::InvalidCommand => "Bad command: ",
            ErrorKind::InvalidQuery => "Bad query: ",
            ErrorKind::InvalidPointer => "Invalid pointer: ",
            ErrorKind::InvalidDataHash => "Data hash error: ",
            ErrorKind::InvalidSize => "Bad data size: ",
            ErrorKind::InvalidDeletionPointer => "Deletion pointer error: ",
            ErrorKind::ErrorRetrievingData | ErrorKind::DataNotFound => "Data retrieval error: ",
            ErrorKind::ErrorRetrievingPointers => "Pointer retrieval error: ",
            ErrorKind::InvalidPubkey => "Public Key Error: ",
            ErrorKind::ActionNotAllowed
            | ErrorKind::CountQuotaExceeded
            | ErrorKind::SizeQuotaExceeded => "Action not allowed: ",
            ErrorKind::Notice => "Notice: ",
            ErrorKind::StorageUnavailable => "Storage unavailable: ",
            ErrorKind::DataCorruption => "Data corruption: ",
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StorageUnavailable)
    }
}

/// Typed error returned by every relay operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{message} (code {:#04x}, context {context_id:?})", .kind.prefix(), .kind.code())]
pub struct RelayError {
    pub kind: ErrorKind,
    pub context_id: String,
    pub message: String,
}

impl RelayError {
    pub fn new(kind: ErrorKind, context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            context_id: context_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput, "", "")
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCommand, "", message)
    }

    pub fn invalid_values(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidValues, context_id, message)
    }

    pub fn invalid_query(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidQuery, context_id, message)
    }

    pub fn invalid_pointer(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPointer, context_id, message)
    }

    pub fn invalid_size(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidSize, context_id, message)
    }

    pub fn notice(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Notice, context_id, message)
    }

    pub fn storage_unavailable(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, context_id, message)
    }

    /// Numeric code of this error.
    pub fn code(&self) -> u8 {
        self.kind.code()
    }

    /// Full client-facing message (prefix + context).
    pub fn client_message(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.message)
    }

    /// Wire form: `["ERROR", code, contextId, message]`.
    pub fn to_wire(&self) -> Value {
        json!(["ERROR", self.code(), self.context_id, self.client_message()])
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::InvalidInput.code(), 0x00);
        assert_eq!(ErrorKind::InvalidPointer.code(), 0x04);
        assert_eq!(ErrorKind::InvalidDeletionPointer.code(), 0x07);
        assert_eq!(ErrorKind::InvalidPubkey.code(), 0x0a);
        assert_eq!(ErrorKind::Notice.code(), 0x0c);
        assert_eq!(ErrorKind::CountQuotaExceeded.code(), ErrorKind::ActionNotAllowed.code());
        assert_ne!(ErrorKind::DataCorruption.code(), ErrorKind::DataNotFound.code());
    }

    #[test]
    fn only_storage_unavailable_is_retryable() {
        assert!(ErrorKind::StorageUnavailable.is_retryable());
        assert!(!ErrorKind::DataCorruption.is_retryable());
        assert!(!ErrorKind::Notice.is_retryable());
    }

    #[test]
    fn wire_form_carries_code_context_and_message() {
        let err = RelayError::notice("abc", "Duplicate pointer, ignoring");
        assert_eq!(
            err.to_wire(),
            json!(["ERROR", 12, "abc", "Notice: Duplicate pointer, ignoring"])
        );
    }

    #[test]
    fn display_includes_prefix() {
        let err = RelayError::invalid_pointer("id1", "Pointer not found");
        let text = err.to_string();
        assert!(text.starts_with("Invalid pointer: Pointer not found"));
        assert!(text.contains("0x04"));
    }
}
