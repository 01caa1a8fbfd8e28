// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Resilient OPC UA tag client for supervisory applications.
//!
//! `opcua-link` keeps a set of configured tags connected to one OPC UA
//! server: it establishes and monitors the session, maintains a subscription
//! with one monitored item per tag, fans data changes out to observers, and
//! runs batched read/write passes with per-node error reporting.
//!
//! # Architecture
//!
//! ```text
//! ClientController
//! ├── SessionManager       connect / keep-alive / reconnect / close
//! │     └── watch channel  session generation, drives rebuilds
//! ├── SubscriptionManager  one monitored item per tag, observer fan-out
//! ├── DataAccess           batched read / write passes
//! └── TagSet               configured tags and their current value text
//!          │
//!          └── UaTransport (trait)  the wire stack, injected
//! ```
//!
//! The wire protocol is not part of this crate; everything the client needs
//! from an OPC UA stack is behind the [`UaTransport`] trait, and certificate
//! trust decisions are behind [`CertificateValidator`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use opcua_link::{
//!     ClientConfig, ClientController, DataItemConfig, NodeId, SemanticType,
//! };
//! # async fn run(
//! #     transport: Arc<dyn opcua_link::UaTransport>,
//! #     validator: Arc<dyn opcua_link::CertificateValidator>,
//! # ) -> Result<(), opcua_link::ClientError> {
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://plc01:4840")
//!     .application_name("line-hmi")
//!     .build()?;
//!
//! let items = vec![DataItemConfig::new(
//!     "speed",
//!     "ns=2;s=Pump.Speed".parse::<NodeId>()?,
//!     SemanticType::Double,
//! )];
//!
//! let client = ClientController::start(config, items, transport, validator).await?;
//! let outcome = client.execute().await?;
//! for read in &outcome.results {
//!     println!("{} -> {:?}", read.node_id, read.outcome);
//! }
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod access;
pub mod coerce;
pub mod controller;
pub mod error;
pub mod security;
pub mod session;
pub mod subscription;
pub mod tags;
pub mod transport;
pub mod types;

// Facade and configuration.
pub use controller::ClientController;
pub use types::{
    ClientConfig, ClientConfigBuilder, NodeId, NodeIdentifier, SecurityMode, SecurityPolicy,
    SemanticType, TokenPolicy,
};

// Tags and values.
pub use tags::{DataItem, DataItemConfig, TagSet};
pub use transport::{StatusCode, UaValue};

// Lifecycle.
pub use session::{Session, SessionManager, SessionState};
pub use subscription::{
    ChannelObserver, MonitoredItem, NotificationEvent, NotificationObserver, SubscriptionManager,
};

// Data access.
pub use access::{DataAccess, ReadOutcome, TagRead, TagWrite, WriteOutcome};

// Seams.
pub use security::{CertificateRejection, CertificateValidator, Identity};
pub use transport::UaTransport;

// Errors.
pub use error::{ClientError, ClientResult};
