// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Coercion between textual tag values and typed protocol values.
//!
//! Tag values are carried as text in the [`TagSet`](crate::tags::TagSet);
//! before a write they are coerced into the node's declared
//! [`SemanticType`]. Parsing is locale-invariant. The [`SemanticType::Text`]
//! fallback passes the text through as a string value rather than failing.

use crate::error::CoercionError;
use crate::transport::UaValue;
use crate::types::{NodeId, SemanticType};

/// Coerces a textual value into the node's declared type.
///
/// Whitespace is trimmed first. Booleans accept `true`/`false` in any case.
/// An unparseable value yields a [`CoercionError`] naming the node, the
/// declared type, and the offending text.
pub fn coerce(
    node_id: &NodeId,
    semantic_type: SemanticType,
    text: &str,
) -> Result<UaValue, CoercionError> {
    let trimmed = text.trim();
    let fail = || CoercionError {
        node_id: node_id.to_string(),
        semantic_type: semantic_type.to_string(),
        value: text.to_string(),
    };

    let value = match semantic_type {
        SemanticType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" => UaValue::Boolean(true),
            "false" => UaValue::Boolean(false),
            _ => return Err(fail()),
        },
        SemanticType::SByte => UaValue::SByte(trimmed.parse().map_err(|_| fail())?),
        SemanticType::Byte => UaValue::Byte(trimmed.parse().map_err(|_| fail())?),
        SemanticType::Int16 => UaValue::Int16(trimmed.parse().map_err(|_| fail())?),
        SemanticType::UInt16 => UaValue::UInt16(trimmed.parse().map_err(|_| fail())?),
        SemanticType::Int32 => UaValue::Int32(trimmed.parse().map_err(|_| fail())?),
        SemanticType::UInt32 => UaValue::UInt32(trimmed.parse().map_err(|_| fail())?),
        SemanticType::Int64 => UaValue::Int64(trimmed.parse().map_err(|_| fail())?),
        SemanticType::UInt64 => UaValue::UInt64(trimmed.parse().map_err(|_| fail())?),
        SemanticType::Float => UaValue::Float(trimmed.parse().map_err(|_| fail())?),
        SemanticType::Double => UaValue::Double(trimmed.parse().map_err(|_| fail())?),
        // Pass-through fallback: unknown semantics travel as strings.
        SemanticType::Text => UaValue::String(text.to_string()),
    };

    Ok(value)
}

/// Renders a typed value as canonical tag text.
///
/// For canonical input, `coerce` followed by `text_of` is value-preserving.
pub fn text_of(value: &UaValue) -> String {
    value.to_string()
}

// =============================================================================
// Tests
// =============================================================================
