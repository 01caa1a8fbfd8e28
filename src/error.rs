// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the OPC UA tag client.
//!
//! Errors are grouped by domain so callers can match on the failure class
//! without string inspection:
//!
//! ```text
//! ClientError
//! ├── Connection    - Endpoint, certificate, and session establishment
//! ├── Security      - Identity resolution and authentication
//! ├── Subscription  - Subscription and monitored item creation
//! ├── Operation     - Batched read/write failures
//! ├── Coercion      - Textual value to typed value conversion
//! ├── Configuration - Invalid settings
//! └── Observers     - Aggregated notification observer failures
//! ```
//!
//! # Examples
//!
//! ```
//! use opcua_link::error::{ClientError, ConnectionError};
//!
//! let error = ClientError::connection(ConnectionError::unreachable(
//!     "opc.tcp://localhost:4840",
//!     "connection refused",
//! ));
//! assert!(error.is_retryable());
//! ```

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ClientResult<T> = Result<T, ClientError>;

// =============================================================================
// ClientError - Main Error Type
// =============================================================================

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection and session establishment errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Identity and authentication errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Read/write operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Textual value coercion errors.
    #[error("{0}")]
    Coercion(#[from] CoercionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// One or more notification observers failed for a single event.
    ///
    /// Every observer still ran; this aggregates the failures afterwards.
    #[error("{} observer(s) failed during notification dispatch (first: {})",
        .failures.len(),
        .failures.first().map(|f| f.to_string()).unwrap_or_default())]
    Observers {
        /// The individual observer failures, in registration order.
        failures: Vec<ObserverFailure>,
    },
}

impl ClientError {
    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a security error.
    #[inline]
    pub fn security(error: SecurityError) -> Self {
        Self::Security(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a not-connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a bad-status operation error for a node.
    pub fn bad_status(node_id: impl Into<String>, status_code: u32) -> Self {
        Self::Operation(OperationError::BadStatus {
            node_id: node_id.into(),
            status_code,
        })
    }

    /// Returns `true` if retrying the failed operation may succeed.
    ///
    /// Transient transport conditions are retryable; rejections that require
    /// operator intervention (certificates, credentials, configuration) are
    /// not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Operation(e) => e.is_retryable(),
            Self::Subscription(SubscriptionError::CreationFailed { .. }) => true,
            _ => false,
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Errors establishing or maintaining the connection to the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The server certificate was rejected by the validator.
    #[error("Server certificate rejected: {reason}")]
    CertificateRejected {
        /// Why the certificate was not accepted.
        reason: String,
    },

    /// The endpoint could not be reached.
    #[error("Endpoint '{endpoint}' unreachable: {reason}")]
    Unreachable {
        /// Endpoint URL.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// The server refused to create or activate the session.
    #[error("Session activation rejected: {reason}")]
    ActivationRejected {
        /// Why the server refused.
        reason: String,
    },

    /// A connection step did not complete within its deadline.
    #[error("'{operation}' timed out after {duration:?}")]
    Timeout {
        /// The step that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        duration: Duration,
    },

    /// No session is currently established.
    #[error("Not connected to server")]
    NotConnected,

    /// The server closed the session.
    #[error("Session closed by server: {reason}")]
    ClosedByServer {
        /// Server-supplied close reason.
        reason: String,
    },
}

impl ConnectionError {
    /// Creates an unreachable-endpoint error.
    pub fn unreachable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a certificate rejection.
    pub fn certificate_rejected(reason: impl Into<String>) -> Self {
        Self::CertificateRejected {
            reason: reason.into(),
        }
    }

    /// Creates an activation rejection.
    pub fn activation_rejected(reason: impl Into<String>) -> Self {
        Self::ActivationRejected {
            reason: reason.into(),
        }
    }

    /// Creates a timeout for a named connection step.
    pub fn timeout(operation: &'static str, duration: Duration) -> Self {
        Self::Timeout {
            operation,
            duration,
        }
    }

    /// Returns `true` if the condition is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Timeout { .. }
                | Self::NotConnected
                | Self::ClosedByServer { .. }
        )
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Identity resolution and authentication errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Neither a username token nor an anonymous token can be used.
    #[error(
        "No usable identity: credentials are not configured and the server \
         does not advertise an anonymous token policy"
    )]
    NoUsableIdentity,

    /// The server rejected the supplied credentials.
    #[error("Authentication rejected for user '{username}': {reason}")]
    AuthenticationRejected {
        /// Username presented to the server.
        username: String,
        /// Why it was rejected.
        reason: String,
    },
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The server refused to create the subscription.
    #[error("Subscription creation failed: {reason}")]
    CreationFailed {
        /// Underlying failure.
        reason: String,
    },

    /// A monitored item could not be created.
    #[error("Monitored item rejected for node '{node_id}': {reason}")]
    ItemRejected {
        /// Node the item targets.
        node_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A notification could not be delivered to a downstream consumer.
    #[error("Notification delivery failed: {reason}")]
    DeliveryFailed {
        /// Why delivery failed.
        reason: String,
    },
}

impl SubscriptionError {
    /// Creates a creation failure.
    pub fn creation_failed(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            reason: reason.into(),
        }
    }

    /// Creates a monitored item rejection.
    pub fn item_rejected(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ItemRejected {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Batched read/write operation errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A read request failed as a whole.
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// Underlying failure.
        reason: String,
    },

    /// A write request failed as a whole.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Underlying failure.
        reason: String,
    },

    /// The server returned a bad status for one node.
    #[error("Bad status code {status_code:#010x} for node '{node_id}'")]
    BadStatus {
        /// Node the status applies to.
        node_id: String,
        /// Raw OPC UA status code.
        status_code: u32,
    },

    /// The response does not line up with the request.
    #[error("Response mismatch in '{operation}': expected {expected} results, got {actual}")]
    ResponseMismatch {
        /// The operation whose response was malformed.
        operation: &'static str,
        /// Number of results requested.
        expected: usize,
        /// Number of results returned.
        actual: usize,
    },

    /// A response entry does not match the node requested at its position.
    #[error(
        "Response out of order in '{operation}' at index {index}: \
         expected node '{expected}', got '{actual}'"
    )]
    ResponseOutOfOrder {
        /// The operation whose response was malformed.
        operation: &'static str,
        /// Position of the offending entry.
        index: usize,
        /// Node requested at that position.
        expected: String,
        /// Node returned at that position.
        actual: String,
    },

    /// An operation did not complete within its deadline.
    #[error("'{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        duration: Duration,
    },
}

impl OperationError {
    /// Creates a whole-read failure.
    pub fn read_failed(reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            reason: reason.into(),
        }
    }

    /// Creates a whole-write failure.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a response mismatch.
    pub fn response_mismatch(operation: &'static str, expected: usize, actual: usize) -> Self {
        Self::ResponseMismatch {
            operation,
            expected,
            actual,
        }
    }

    /// Creates an operation timeout.
    pub fn timeout(operation: &'static str, duration: Duration) -> Self {
        Self::Timeout {
            operation,
            duration,
        }
    }

    /// Returns `true` if the condition is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// =============================================================================
// CoercionError
// =============================================================================

/// Failure to coerce a textual value into the declared node type.
#[derive(Debug, Error)]
#[error("Cannot coerce '{value}' to {semantic_type} for node '{node_id}'")]
pub struct CoercionError {
    /// Node the value was destined for.
    pub node_id: String,
    /// Declared semantic type of the node.
    pub semantic_type: String,
    /// The offending textual value.
    pub value: String,
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A required field is missing or empty.
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// The field name.
        field: &'static str,
    },

    /// The endpoint URL is malformed.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint {
        /// The supplied URL.
        url: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A node identifier string could not be parsed.
    #[error("Invalid node ID '{input}': {reason}")]
    InvalidNodeId {
        /// The unparseable input.
        input: String,
        /// Why it is invalid.
        reason: String,
    },

    /// An unknown data type name.
    #[error("Unknown data type '{input}'")]
    InvalidDataType {
        /// The unparseable input.
        input: String,
    },

    /// A field holds an out-of-range or inconsistent value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// Two configured tags reference the same node.
    #[error("Duplicate node ID '{node_id}' in tag configuration")]
    DuplicateNode {
        /// The repeated node ID.
        node_id: String,
    },
}

impl ConfigurationError {
    /// Creates a missing-field error.
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// ObserverFailure
// =============================================================================

/// One observer's failure while handling a notification event.
#[derive(Debug, Error)]
#[error("observer #{index}: {message}")]
pub struct ObserverFailure {
    /// Position of the observer in the registration order.
    pub index: usize,
    /// The observer's error, rendered.
    pub message: String,
}

// =============================================================================
// Tests
// =============================================================================
