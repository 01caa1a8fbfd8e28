// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The transport seam.
//!
//! Everything the client needs from an OPC UA stack is expressed through the
//! [`UaTransport`] trait: endpoint selection, session create/close, keep-alive
//! probes, batched reads and writes, and subscription delivery. The wire
//! protocol itself lives behind this trait and is not part of this crate.
//!
//! Notifications are delivered by the transport on an `mpsc` channel returned
//! from [`UaTransport::subscribe`]; the subscription layer drains it on its
//! own task.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::ClientResult;
use crate::security::Identity;
use crate::types::{NodeId, SecurityMode, SecurityPolicy, TokenPolicy};

// =============================================================================
// StatusCode
// =============================================================================

/// An OPC UA status code.
///
/// The top bits carry severity: `00` good, `01` uncertain, `10` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The good status.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// Generic bad status.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    /// The node id refers to a node that does not exist.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// The operation timed out.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    /// The session id is not valid.
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    /// The value supplied for the attribute is not of the same type.
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);

    /// Returns `true` if the severity is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// =============================================================================
// UaValue
// =============================================================================

/// A typed OPC UA scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum UaValue {
    /// Boolean.
    Boolean(bool),
    /// Signed 8-bit integer.
    SByte(i8),
    /// Unsigned 8-bit integer.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// Null / no value.
    Null,
}

impl UaValue {
    /// Returns the value as a bool if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value widened to an i64 if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SByte(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value widened to an f64 if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for UaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Null => write!(f, "null"),
        }
    }
}

// =============================================================================
// Request / Response Records
// =============================================================================

/// Opaque handle to a transport-level session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportSession(pub u64);

impl fmt::Display for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A selected endpoint as described by the server.
#[derive(Debug, Clone)]
pub struct EndpointDescription {
    /// Endpoint URL.
    pub endpoint_url: String,

    /// Message security mode of the endpoint.
    pub security_mode: SecurityMode,

    /// Security policy of the endpoint.
    pub security_policy: SecurityPolicy,

    /// DER-encoded server certificate, if the endpoint presents one.
    pub server_certificate: Option<Vec<u8>>,

    /// User token policies the endpoint advertises.
    pub token_policies: Vec<TokenPolicy>,
}

/// One result of a batched read.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// The node the result belongs to.
    pub node_id: NodeId,

    /// The value, if the status is good.
    pub value: UaValue,

    /// Per-node status code.
    pub status: StatusCode,

    /// Source timestamp reported by the server.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// One entry of a batched write.
///
/// Carries value and node only; timestamps are left unset so the server
/// assigns its own (some stacks reject client-supplied timestamps).
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// The node to write.
    pub node_id: NodeId,

    /// The typed value to write.
    pub value: UaValue,
}

/// A monitored item creation request.
#[derive(Debug, Clone)]
pub struct MonitoredItemRequest {
    /// The node to monitor (value attribute).
    pub node_id: NodeId,

    /// Client-assigned handle echoed back in notifications.
    pub client_handle: u32,
}

/// One sampled value inside a publish notification.
#[derive(Debug, Clone)]
pub struct DataValue {
    /// The sampled value.
    pub value: UaValue,

    /// Per-sample status.
    pub status: StatusCode,

    /// Source timestamp reported by the server.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// A raw data-change notification for one monitored item.
///
/// `values` holds the queued samples in publish order; each one becomes a
/// separate event downstream.
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// Client handle of the monitored item.
    pub client_handle: u32,

    /// Queued samples, oldest first.
    pub values: Vec<DataValue>,
}

// =============================================================================
// UaTransport
// =============================================================================

/// The protocol operations the client depends on.
///
/// Implementations wrap a concrete OPC UA stack. All methods are fallible and
/// must not retry internally; retry policy belongs to the caller.
#[async_trait]
pub trait UaTransport: Send + Sync {
    /// Discovers the server's endpoints and selects the best match for the
    /// requested security settings.
    async fn select_endpoint(
        &self,
        endpoint_url: &str,
        security_mode: SecurityMode,
        security_policy: SecurityPolicy,
    ) -> ClientResult<EndpointDescription>;

    /// Creates and activates a session on the selected endpoint.
    async fn create_session(
        &self,
        endpoint: &EndpointDescription,
        application_name: &str,
        identity: &Identity,
        session_timeout: std::time::Duration,
    ) -> ClientResult<TransportSession>;

    /// Closes a session. Must be safe to call for a session the server has
    /// already discarded.
    async fn close_session(&self, session: TransportSession) -> ClientResult<()>;

    /// Probes session liveness. A bad status or an `Err` both count as a
    /// failed probe.
    async fn keep_alive(&self, session: TransportSession) -> ClientResult<StatusCode>;

    /// Reads the value attribute of every node, in request order.
    async fn read(
        &self,
        session: TransportSession,
        nodes: &[NodeId],
    ) -> ClientResult<Vec<ReadResult>>;

    /// Writes the value attribute of every node, returning one status per
    /// request, in request order.
    async fn write(
        &self,
        session: TransportSession,
        requests: &[WriteRequest],
    ) -> ClientResult<Vec<StatusCode>>;

    /// Creates a subscription with the given monitored items and returns the
    /// server-assigned subscription id plus the notification channel for it.
    ///
    /// The transport owns the sending half; dropping the receiver tells the
    /// transport the client is no longer interested.
    async fn subscribe(
        &self,
        session: TransportSession,
        publishing_interval: std::time::Duration,
        items: &[MonitoredItemRequest],
    ) -> ClientResult<(u32, mpsc::Receiver<RawNotification>)>;

    /// Deletes a subscription on the server. Must be safe to call for a
    /// subscription the server has already discarded.
    async fn delete_subscription(
        &self,
        session: TransportSession,
        subscription_id: u32,
    ) -> ClientResult<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());

        assert!(StatusCode::BAD.is_bad());
        assert!(!StatusCode::BAD.is_good());
        assert!(StatusCode::BAD_NODE_ID_UNKNOWN.is_bad());
        assert!(StatusCode::BAD_TYPE_MISMATCH.is_bad());

        let uncertain = StatusCode(0x4000_0000);
        assert!(uncertain.is_uncertain());
        assert!(!uncertain.is_good());
        assert!(!uncertain.is_bad());
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(StatusCode::BAD.to_string(), "0x80000000");
        assert_eq!(StatusCode::GOOD.to_string(), "0x00000000");
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(UaValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(UaValue::Int32(-5).as_i64(), Some(-5));
        assert_eq!(UaValue::UInt16(7).as_i64(), Some(7));
        assert_eq!(UaValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(UaValue::Int32(3).as_f64(), Some(3.0));
        assert_eq!(UaValue::String("x".into()).as_str(), Some("x"));
        assert!(UaValue::Null.is_null());

        assert_eq!(UaValue::String("x".into()).as_i64(), None);
        assert_eq!(UaValue::UInt64(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(UaValue::Int32(42).to_string(), "42");
        assert_eq!(UaValue::Boolean(false).to_string(), "false");
        assert_eq!(UaValue::Double(2.5).to_string(), "2.5");
        assert_eq!(UaValue::Null.to_string(), "null");
    }
}
