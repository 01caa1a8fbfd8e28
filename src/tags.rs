// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The configured tag table.
//!
//! A [`DataItem`] binds a human-readable tag name to a server node and a
//! declared value type. Items carry their current value as text; the
//! [`TagSet`] is the single mutation point, so the two writers (polled reads
//! and subscription notifications) are serialized per item and the result is
//! last-write-wins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ClientResult, ConfigurationError};
use crate::types::{NodeId, SemanticType};

// =============================================================================
// DataItemConfig
// =============================================================================

/// Static configuration of one tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItemConfig {
    /// Tag name, unique within the set by convention.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// The server node the tag is bound to.
    pub node_id: NodeId,

    /// Declared value type, governs write coercion.
    #[serde(default)]
    pub semantic_type: SemanticType,

    /// Initial value text. Also the value sent by the first write pass.
    #[serde(default)]
    pub value: String,
}

impl DataItemConfig {
    /// Creates a tag config with an empty description and initial value.
    pub fn new(name: impl Into<String>, node_id: NodeId, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            node_id,
            semantic_type,
            value: String::new(),
        }
    }
}

// =============================================================================
// DataItem
// =============================================================================

/// A configured tag with its mutable current value.
#[derive(Debug)]
pub struct DataItem {
    /// Tag name.
    pub name: String,

    /// Free-form description.
    pub description: String,

    /// The server node the tag is bound to.
    pub node_id: NodeId,

    /// Declared value type.
    pub semantic_type: SemanticType,

    value: RwLock<String>,
}

impl DataItem {
    fn from_config(config: DataItemConfig) -> Self {
        Self {
            name: config.name,
            description: config.description,
            node_id: config.node_id,
            semantic_type: config.semantic_type,
            value: RwLock::new(config.value),
        }
    }

    /// Returns the current value text.
    pub async fn value(&self) -> String {
        self.value.read().await.clone()
    }

    /// Replaces the current value text.
    pub async fn set_value(&self, value: impl Into<String>) {
        *self.value.write().await = value.into();
    }
}

// =============================================================================
// TagSet
// =============================================================================

/// The ordered set of configured tags, indexed by node ID.
///
/// Item order is the configuration order and also the order of batched
/// read/write requests and monitored item handles.
#[derive(Debug)]
pub struct TagSet {
    items: Vec<Arc<DataItem>>,
    by_node: HashMap<NodeId, usize>,
}

impl TagSet {
    /// Builds the tag set from configuration.
    ///
    /// Two tags bound to the same node are rejected; the node is the identity
    /// used to route notifications and batch results.
    pub fn new(configs: Vec<DataItemConfig>) -> ClientResult<Self> {
        let mut items = Vec::with_capacity(configs.len());
        let mut by_node = HashMap::with_capacity(configs.len());

        for config in configs {
            let node_id = config.node_id.clone();
            if by_node.contains_key(&node_id) {
                return Err(ConfigurationError::DuplicateNode {
                    node_id: node_id.to_string(),
                }
                .into());
            }
            by_node.insert(node_id, items.len());
            items.push(Arc::new(DataItem::from_config(config)));
        }

        Ok(Self { items, by_node })
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no tags are configured.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over the tags in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataItem>> {
        self.items.iter()
    }

    /// Looks up a tag by node ID.
    pub fn get(&self, node_id: &NodeId) -> Option<&Arc<DataItem>> {
        self.by_node.get(node_id).map(|&i| &self.items[i])
    }

    /// Returns the node IDs in configuration order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.items.iter().map(|item| item.node_id.clone()).collect()
    }

    /// Updates the value text of the tag bound to `node_id`, if configured.
    pub async fn set_value(&self, node_id: &NodeId, value: impl Into<String>) {
        if let Some(item) = self.get(node_id) {
            item.set_value(value).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
