// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every runtime component.
//!
//! Handlers return a [`UspError`] carrying a failure kind and a
//! human-readable message. The dispatcher embeds the corresponding USP
//! wire code (7xxx range) per operand in the outgoing response; most USP
//! responses are lists of per-operand results, so partial success is the
//! norm rather than the exception.

use std::fmt;

/// Convenience alias used throughout the agent.
pub type Result<T> = std::result::Result<T, UspError>;

/// Failure kinds surfaced to controllers and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UspError {
    // ========================================================================
    // Path and value errors
    // ========================================================================
    /// The path does not name anything in the supported data model.
    InvalidPath(String),
    /// A validator rejected the proposed parameter value.
    InvalidValue(String),
    /// Attempt to write a read-only parameter.
    ParamReadOnly(String),
    /// A path expression resolved through a dangling reference.
    ResolveTargetNotFound(String),

    // ========================================================================
    // Object errors
    // ========================================================================
    /// Add refused by the table or its add-validator.
    ObjectNotCreatable(String),
    /// Delete refused by the table.
    ObjectNotDeletable(String),
    /// A create/update/delete failed after validation.
    CrudFailure(String),

    // ========================================================================
    // Access errors
    // ========================================================================
    /// The controller's trust role does not permit the operation.
    PermissionDenied(String),
    /// The sender is not a known controller (and the MTP does not permit
    /// autodiscovery), or the request is refused outright.
    RequestDenied(String),

    // ========================================================================
    // Resource and internal errors
    // ========================================================================
    /// A sizing limit (table capacity, message length) was exceeded.
    ResourcesExceeded(String),
    /// An Operate command handler failed.
    CommandFailure(String),
    /// Unexpected internal failure (I/O, database, codec).
    Internal(String),
}

impl UspError {
    /// USP wire error code (TR-369 7xxx range) for this failure kind.
    pub fn code(&self) -> u32 {
        match self {
            Self::RequestDenied(_) => 7002,
            Self::Internal(_) => 7003,
            Self::ResourcesExceeded(_) => 7005,
            Self::PermissionDenied(_) => 7006,
            Self::InvalidValue(_) => 7012,
            Self::ParamReadOnly(_) => 7013,
            Self::ResolveTargetNotFound(_) => 7016,
            Self::CrudFailure(_) => 7017,
            Self::ObjectNotCreatable(_) => 7019,
            Self::CommandFailure(_) => 7022,
            Self::ObjectNotDeletable(_) => 7024,
            Self::InvalidPath(_) => 7026,
        }
    }

    /// The human-readable message carried alongside the code.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidPath(m)
            | Self::InvalidValue(m)
            | Self::ParamReadOnly(m)
            | Self::ResolveTargetNotFound(m)
            | Self::ObjectNotCreatable(m)
            | Self::ObjectNotDeletable(m)
            | Self::CrudFailure(m)
            | Self::PermissionDenied(m)
            | Self::RequestDenied(m)
            | Self::ResourcesExceeded(m)
            | Self::CommandFailure(m)
            | Self::Internal(m) => m,
        }
    }
}

impl fmt::Display for UspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath(m) => write!(f, "Invalid path: {m}"),
            Self::InvalidValue(m) => write!(f, "Invalid value: {m}"),
            Self::ParamReadOnly(m) => write!(f, "Parameter is read-only: {m}"),
            Self::ResolveTargetNotFound(m) => write!(f, "Resolve target not found: {m}"),
            Self::ObjectNotCreatable(m) => write!(f, "Object not creatable: {m}"),
            Self::ObjectNotDeletable(m) => write!(f, "Object not deletable: {m}"),
            Self::CrudFailure(m) => write!(f, "CRUD failure: {m}"),
            Self::PermissionDenied(m) => write!(f, "Permission denied: {m}"),
            Self::RequestDenied(m) => write!(f, "Request denied: {m}"),
            Self::ResourcesExceeded(m) => write!(f, "Resources exceeded: {m}"),
            Self::CommandFailure(m) => write!(f, "Command failure: {m}"),
            Self::Internal(m) => write!(f, "Internal error: {m}"),
        }
    }
}

impl std::error::Error for UspError {}

impl From<std::io::Error> for UspError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for UspError {
    fn from(e: anyhow::Error) -> Self {
        // Database layer errors (rusp-store) arrive here; keep the full
        // context chain in the message.
        Self::Internal(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_tr369() {
        assert_eq!(UspError::RequestDenied(String::new()).code(), 7002);
        assert_eq!(UspError::Internal(String::new()).code(), 7003);
        assert_eq!(UspError::ResourcesExceeded(String::new()).code(), 7005);
        assert_eq!(UspError::PermissionDenied(String::new()).code(), 7006);
        assert_eq!(UspError::InvalidValue(String::new()).code(), 7012);
        assert_eq!(UspError::ParamReadOnly(String::new()).code(), 7013);
        assert_eq!(UspError::ObjectNotCreatable(String::new()).code(), 7019);
        assert_eq!(UspError::CommandFailure(String::new()).code(), 7022);
        assert_eq!(UspError::ObjectNotDeletable(String::new()).code(), 7024);
        assert_eq!(UspError::InvalidPath(String::new()).code(), 7026);
    }

    #[test]
    fn display_carries_the_message() {
        let err = UspError::InvalidValue("Enable expects a boolean".into());
        assert_eq!(err.to_string(), "Invalid value: Enable expects a boolean");
        assert_eq!(err.message(), "Enable expects a boolean");
    }
}
