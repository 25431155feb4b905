// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for the shisha backends.
//
// One enum for every adapter. Backend-specific failures (HTTP statuses,
// SQLSTATE codes, transport errors) are folded into these variants together
// with the name of the operation that hit them.

use thiserror::Error;

use crate::model::ShishaId;

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The shisha targeted by a mutation does not exist.
    #[error("shisha {0} not found")]
    NotFound(ShishaId),

    /// The backend could not be reached (connection refused, timeout, pool closed).
    #[error("{operation}: backend unavailable: {message}")]
    BackendUnavailable {
        operation: &'static str,
        message: String,
    },

    /// The backend answered with an error. `code` is the HTTP status for the
    /// document store and the SQLSTATE for the relational backend.
    #[error("{operation}: backend rejected request ({code}): {body}")]
    BackendRejected {
        operation: &'static str,
        code: String,
        body: String,
    },

    /// Data coming from or going to the backend does not fit the record shape.
    #[error("{operation}: mapping error: {message}")]
    Mapping {
        operation: &'static str,
        message: String,
    },

    /// The request is well-formed but cannot be applied (e.g. unknown manufacturer).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    pub fn unavailable(operation: &'static str, message: impl ToString) -> Self {
        Self::BackendUnavailable {
            operation,
            message: message.to_string(),
        }
    }

    pub fn rejected(operation: &'static str, code: impl ToString, body: impl Into<String>) -> Self {
        Self::BackendRejected {
            operation,
            code: code.to_string(),
            body: body.into(),
        }
    }

    pub fn mapping(operation: &'static str, message: impl ToString) -> Self {
        Self::Mapping {
            operation,
            message: message.to_string(),
        }
    }

    /// True for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
