// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core types: node identifiers, semantic tag types, security settings, and
//! client configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult, ConfigurationError};

// =============================================================================
// NodeId
// =============================================================================

/// An OPC UA node identifier.
///
/// Combines a namespace index with one of the four identifier forms. Parses
/// from and renders to the standard string form:
///
/// ```
/// use opcua_link::types::NodeId;
///
/// let node: NodeId = "ns=2;s=Pump.Speed".parse().unwrap();
/// assert_eq!(node.namespace_index, 2);
/// assert_eq!(node.to_string(), "ns=2;s=Pump.Speed");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    /// Namespace index into the server's namespace array.
    pub namespace_index: u16,

    /// The identifier within the namespace.
    pub identifier: NodeIdentifier,
}

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentifier {
    /// Numeric identifier (`i=...`).
    Numeric(u32),

    /// String identifier (`s=...`).
    String(String),

    /// GUID identifier (`g=...`).
    Guid(Uuid),

    /// Opaque (byte string) identifier (`b=...`, base64).
    Opaque(Vec<u8>),
}

impl NodeId {
    /// Creates a numeric node ID.
    pub fn numeric(namespace_index: u16, id: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(id),
        }
    }

    /// Creates a string node ID.
    pub fn string(namespace_index: u16, id: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(id.into()),
        }
    }

    /// Creates a GUID node ID.
    pub fn guid(namespace_index: u16, id: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(id),
        }
    }

    /// Creates an opaque node ID.
    pub fn opaque(namespace_index: u16, id: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(id.into()),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index != 0 {
            write!(f, "ns={};", self.namespace_index)?;
        }
        match &self.identifier {
            NodeIdentifier::Numeric(id) => write!(f, "i={id}"),
            NodeIdentifier::String(id) => write!(f, "s={id}"),
            NodeIdentifier::Guid(id) => write!(f, "g={id}"),
            NodeIdentifier::Opaque(id) => {
                write!(f, "b={}", base64::engine::general_purpose::STANDARD.encode(id))
            }
        }
    }
}

impl FromStr for NodeId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigurationError::InvalidNodeId {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = s.trim();
        let mut namespace_index = 0u16;

        if let Some(after) = rest.strip_prefix("ns=") {
            let (ns, tail) = after
                .split_once(';')
                .ok_or_else(|| invalid("missing ';' after namespace index"))?;
            namespace_index = ns
                .parse()
                .map_err(|_| invalid("namespace index is not a u16"))?;
            rest = tail;
        }

        let (kind, value) = rest
            .split_once('=')
            .ok_or_else(|| invalid("missing identifier form (i=, s=, g=, b=)"))?;

        let identifier = match kind {
            "i" => NodeIdentifier::Numeric(
                value.parse().map_err(|_| invalid("numeric identifier is not a u32"))?,
            ),
            "s" => {
                if value.is_empty() {
                    return Err(invalid("string identifier is empty"));
                }
                NodeIdentifier::String(value.to_string())
            }
            "g" => NodeIdentifier::Guid(
                value.parse().map_err(|_| invalid("identifier is not a valid GUID"))?,
            ),
            "b" => NodeIdentifier::Opaque(
                base64::engine::general_purpose::STANDARD
                    .decode(value)
                    .map_err(|_| invalid("opaque identifier is not valid base64"))?,
            ),
            other => {
                return Err(ConfigurationError::InvalidNodeId {
                    input: s.to_string(),
                    reason: format!("unknown identifier form '{other}='"),
                });
            }
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

impl TryFrom<String> for NodeId {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_string()
    }
}

// =============================================================================
// SemanticType
// =============================================================================

/// The declared value type of a configured tag.
///
/// Governs how textual tag values are coerced before a write. [`Text`] is the
/// pass-through fallback: values are sent as strings unmodified.
///
/// [`Text`]: SemanticType::Text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Boolean.
    Bool,
    /// Signed 8-bit integer.
    SByte,
    /// Unsigned 8-bit integer.
    Byte,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Free text, passed through without coercion.
    #[default]
    Text,
}

impl SemanticType {
    /// Returns the canonical type name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::SByte => "SByte",
            Self::Byte => "Byte",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Int64 => "Int64",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::Text => "Text",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SemanticType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(Self::Bool),
            "sbyte" | "i8" => Ok(Self::SByte),
            "byte" | "u8" => Ok(Self::Byte),
            "int16" | "i16" | "short" => Ok(Self::Int16),
            "uint16" | "u16" | "ushort" => Ok(Self::UInt16),
            "int32" | "i32" | "int" => Ok(Self::Int32),
            "uint32" | "u32" | "uint" => Ok(Self::UInt32),
            "int64" | "i64" | "long" => Ok(Self::Int64),
            "uint64" | "u64" | "ulong" => Ok(Self::UInt64),
            "float" | "f32" | "single" => Ok(Self::Float),
            "double" | "f64" => Ok(Self::Double),
            "text" | "string" | "str" => Ok(Self::Text),
            _ => Err(ConfigurationError::InvalidDataType {
                input: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Security Types
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No message security.
    None,

    /// Messages are signed.
    Sign,

    /// Messages are signed and encrypted.
    #[default]
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the OPC UA enumeration value.
    pub fn value(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Sign => write!(f, "Sign"),
            Self::SignAndEncrypt => write!(f, "SignAndEncrypt"),
        }
    }
}

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    None,

    /// Basic256Sha256 policy.
    #[default]
    Basic256Sha256,

    /// Aes128-Sha256-RsaOaep policy.
    Aes128Sha256RsaOaep,

    /// Aes256-Sha256-RsaPss policy.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the policy URI.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }
}

/// A user token policy advertised by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPolicy {
    /// Anonymous access.
    Anonymous,

    /// Username and password.
    UserName,

    /// X.509 certificate.
    Certificate,

    /// Token issued by an external authority.
    IssuedToken,
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Client configuration.
///
/// Built with [`ClientConfig::builder`]; there is no process-global
/// configuration. All durations accept humantime strings when deserialized
/// (`"15s"`, `"500ms"`).
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application name presented to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Endpoint URL (`opc.tcp://host:port/path`).
    pub endpoint_url: String,

    /// Requested message security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Requested security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Username for the user token. Empty means not configured.
    #[serde(default)]
    pub username: String,

    /// Password for the user token. Empty means not configured.
    #[serde(default)]
    pub password: String,

    /// Accept untrusted server certificates.
    #[serde(default)]
    pub auto_accept_certificates: bool,

    /// Deadline for endpoint discovery and selection.
    #[serde(with = "humantime_serde", default = "default_endpoint_select_timeout")]
    pub endpoint_select_timeout: Duration,

    /// Requested session lifetime.
    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub session_timeout: Duration,

    /// Deadline for individual service calls.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Interval between keep-alive probes.
    #[serde(with = "humantime_serde", default = "default_keepalive_interval")]
    pub keepalive_interval: Duration,

    /// Subscription publishing interval.
    #[serde(with = "humantime_serde", default = "default_publishing_interval")]
    pub publishing_interval: Duration,

    /// Deadline for closing the session on shutdown.
    #[serde(with = "humantime_serde", default = "default_close_timeout")]
    pub close_timeout: Duration,
}

fn default_application_name() -> String {
    "opcua-link".to_string()
}

fn default_endpoint_select_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ClientConfig {
    /// Returns a builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns `true` if both credentials are configured.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.application_name.is_empty() {
            return Err(ConfigurationError::missing_field("application_name").into());
        }
        if self.endpoint_url.is_empty() {
            return Err(ConfigurationError::missing_field("endpoint_url").into());
        }
        if !self.endpoint_url.starts_with("opc.tcp://") {
            return Err(ClientError::configuration(ConfigurationError::InvalidEndpoint {
                url: self.endpoint_url.clone(),
                reason: "must start with 'opc.tcp://'".to_string(),
            }));
        }

        let none_mode = self.security_mode == SecurityMode::None;
        let none_policy = self.security_policy == SecurityPolicy::None;
        if none_mode != none_policy {
            return Err(ConfigurationError::invalid_value(
                "security_policy",
                format!(
                    "policy {:?} is inconsistent with mode {}",
                    self.security_policy, self.security_mode
                ),
            )
            .into());
        }

        for (field, value) in [
            ("endpoint_select_timeout", self.endpoint_select_timeout),
            ("session_timeout", self.session_timeout),
            ("request_timeout", self.request_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("publishing_interval", self.publishing_interval),
            ("close_timeout", self.close_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigurationError::invalid_value(field, "must be non-zero").into());
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("application_name", &self.application_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("security_mode", &self.security_mode)
            .field("security_policy", &self.security_policy)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auto_accept_certificates", &self.auto_accept_certificates)
            .field("session_timeout", &self.session_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("publishing_interval", &self.publishing_interval)
            .finish()
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
///
/// # Examples
///
/// ```
/// use opcua_link::types::{ClientConfig, SecurityMode, SecurityPolicy};
///
/// let config = ClientConfig::builder()
///     .endpoint("opc.tcp://localhost:4840")
///     .application_name("line-hmi")
///     .security(SecurityMode::None, SecurityPolicy::None)
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoint_url, "opc.tcp://localhost:4840");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    application_name: Option<String>,
    endpoint_url: Option<String>,
    security_mode: SecurityMode,
    security_policy: SecurityPolicy,
    username: String,
    password: String,
    auto_accept_certificates: bool,
    endpoint_select_timeout: Option<Duration>,
    session_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
    publishing_interval: Option<Duration>,
    close_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint URL (required).
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the message security mode and policy together.
    pub fn security(mut self, mode: SecurityMode, policy: SecurityPolicy) -> Self {
        self.security_mode = mode;
        self.security_policy = policy;
        self
    }

    /// Sets the username/password credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Accepts untrusted server certificates.
    pub fn auto_accept_certificates(mut self, accept: bool) -> Self {
        self.auto_accept_certificates = accept;
        self
    }

    /// Sets the endpoint selection deadline.
    pub fn endpoint_select_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_select_timeout = Some(timeout);
        self
    }

    /// Sets the requested session lifetime.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Sets the per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the keep-alive probe interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Sets the subscription publishing interval.
    pub fn publishing_interval(mut self, interval: Duration) -> Self {
        self.publishing_interval = Some(interval);
        self
    }

    /// Sets the session close deadline.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ClientResult<ClientConfig> {
        let config = ClientConfig {
            application_name: self
                .application_name
                .unwrap_or_else(default_application_name),
            endpoint_url: self.endpoint_url.unwrap_or_default(),
            security_mode: self.security_mode,
            security_policy: self.security_policy,
            username: self.username,
            password: self.password,
            auto_accept_certificates: self.auto_accept_certificates,
            endpoint_select_timeout: self
                .endpoint_select_timeout
                .unwrap_or_else(default_endpoint_select_timeout),
            session_timeout: self.session_timeout.unwrap_or_else(default_session_timeout),
            request_timeout: self.request_timeout.unwrap_or_else(default_request_timeout),
            keepalive_interval: self
                .keepalive_interval
                .unwrap_or_else(default_keepalive_interval),
            publishing_interval: self
                .publishing_interval
                .unwrap_or_else(default_publishing_interval),
            close_timeout: self.close_timeout.unwrap_or_else(default_close_timeout),
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================
