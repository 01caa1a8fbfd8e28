// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Batched read and write passes over the tag table.
//!
//! Both directions go to the server as one batch in tag configuration order.
//! Responses are validated for length and per-position node identity before
//! any value is applied; a malformed response fails the whole pass. Per-node
//! failures inside a well-formed response are first-class: every tag ends up
//! with either a value or its own error, and one bad tag never hides the
//! others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::coerce;
use crate::error::{ClientError, ClientResult, OperationError};
use crate::session::Session;
use crate::tags::TagSet;
use crate::transport::{UaTransport, UaValue, WriteRequest};
use crate::types::NodeId;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one tag in a read pass.
#[derive(Debug)]
pub struct TagRead {
    /// The tag's node.
    pub node_id: NodeId,

    /// The value read, or this tag's own failure.
    pub outcome: ClientResult<UaValue>,
}

/// Result of a whole read pass, in tag configuration order.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Per-tag results.
    pub results: Vec<TagRead>,
}

impl ReadOutcome {
    /// Returns `true` if every tag read successfully.
    pub fn is_all_good(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_ok())
    }

    /// Returns the value read for a node, if it succeeded.
    pub fn value_of(&self, node_id: &NodeId) -> Option<&UaValue> {
        self.results
            .iter()
            .find(|r| r.node_id == *node_id)
            .and_then(|r| r.outcome.as_ref().ok())
    }

    /// Iterates over the tags that failed.
    pub fn failures(&self) -> impl Iterator<Item = (&NodeId, &ClientError)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.node_id, e)))
    }
}

/// Result of one tag in a write pass.
#[derive(Debug)]
pub struct TagWrite {
    /// The tag's node.
    pub node_id: NodeId,

    /// Success, or this tag's own failure.
    pub outcome: ClientResult<()>,
}

/// Result of a whole write pass, in tag configuration order.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    /// Per-tag results.
    pub results: Vec<TagWrite>,
}

impl WriteOutcome {
    /// Returns `true` if every tag was written successfully.
    pub fn is_all_good(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_ok())
    }

    /// Returns the first failing tag, if any.
    pub fn first_failure(&self) -> Option<(&NodeId, &ClientError)> {
        self.failures().next()
    }

    /// Iterates over the tags that failed.
    pub fn failures(&self) -> impl Iterator<Item = (&NodeId, &ClientError)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.node_id, e)))
    }
}

// =============================================================================
// DataAccess
// =============================================================================

/// Batched value access for the configured tags.
#[derive(Clone)]
pub struct DataAccess {
    transport: Arc<dyn UaTransport>,
    tags: Arc<TagSet>,
    request_timeout: Duration,
}

impl DataAccess {
    /// Creates an accessor over the configured tag set.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        tags: Arc<TagSet>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            tags,
            request_timeout,
        }
    }

    /// Reads the value attribute of every tag in one batch.
    ///
    /// Good values update the tag table before being returned. A response
    /// with the wrong length or with results out of request order fails the
    /// whole pass with a response-mismatch error.
    pub async fn read_values(&self, session: &Session) -> ClientResult<ReadOutcome> {
        let nodes = self.tags.node_ids();
        if nodes.is_empty() {
            return Ok(ReadOutcome::default());
        }

        let _guard = session.health.track_request();
        let results = tokio::time::timeout(
            self.request_timeout,
            self.transport.read(session.handle, &nodes),
        )
        .await
        .map_err(|_| OperationError::timeout("read", self.request_timeout))??;

        if results.len() != nodes.len() {
            return Err(
                OperationError::response_mismatch("read", nodes.len(), results.len()).into(),
            );
        }

        let mut out = Vec::with_capacity(nodes.len());
        for (index, (node, result)) in nodes.iter().zip(results).enumerate() {
            if result.node_id != *node {
                return Err(ClientError::Operation(OperationError::ResponseOutOfOrder {
                    operation: "read",
                    index,
                    expected: node.to_string(),
                    actual: result.node_id.to_string(),
                }));
            }

            if result.status.is_good() {
                self.tags
                    .set_value(node, coerce::text_of(&result.value))
                    .await;
                out.push(TagRead {
                    node_id: node.clone(),
                    outcome: Ok(result.value),
                });
            } else {
                out.push(TagRead {
                    node_id: node.clone(),
                    outcome: Err(ClientError::bad_status(node.to_string(), result.status.0)),
                });
            }
        }

        debug!(nodes = nodes.len(), "Read pass complete");
        Ok(ReadOutcome { results: out })
    }

    /// Writes every tag's current value text in one batch.
    ///
    /// Each value is coerced to the tag's declared type first. A tag whose
    /// text cannot be coerced is excluded from the batch and reported as
    /// that tag's error; the remaining tags are still written. Every status
    /// in the response is checked at its own index. Timestamps are left to
    /// the server.
    pub async fn write_values(&self, session: &Session) -> ClientResult<WriteOutcome> {
        let mut requests = Vec::with_capacity(self.tags.len());
        let mut per_node: HashMap<NodeId, ClientResult<()>> = HashMap::new();

        for item in self.tags.iter() {
            let text = item.value().await;
            match coerce::coerce(&item.node_id, item.semantic_type, &text) {
                Ok(value) => requests.push(WriteRequest {
                    node_id: item.node_id.clone(),
                    value,
                }),
                Err(err) => {
                    warn!(node_id = %item.node_id, error = %err, "Tag excluded from write batch");
                    per_node.insert(item.node_id.clone(), Err(err.into()));
                }
            }
        }

        if !requests.is_empty() {
            let _guard = session.health.track_request();
            let statuses = tokio::time::timeout(
                self.request_timeout,
                self.transport.write(session.handle, &requests),
            )
            .await
            .map_err(|_| OperationError::timeout("write", self.request_timeout))??;

            if statuses.len() != requests.len() {
                return Err(OperationError::response_mismatch(
                    "write",
                    requests.len(),
                    statuses.len(),
                )
                .into());
            }

            for (request, status) in requests.iter().zip(statuses) {
                let outcome = if status.is_good() {
                    Ok(())
                } else {
                    Err(ClientError::bad_status(request.node_id.to_string(), status.0))
                };
                per_node.insert(request.node_id.clone(), outcome);
            }
        }

        let results = self
            .tags
            .iter()
            .map(|item| TagWrite {
                node_id: item.node_id.clone(),
                outcome: per_node.remove(&item.node_id).unwrap_or(Ok(())),
            })
            .collect();

        let outcome = WriteOutcome { results };
        if let Some((node_id, err)) = outcome.first_failure() {
            warn!(node_id = %node_id, error = %err, "Write pass finished with failures");
        } else {
            debug!(nodes = outcome.results.len(), "Write pass complete");
        }
        Ok(outcome)
    }
}

// =============================================================================
// Tests
// =============================================================================
