//! Plain JSON documents to node graphs.
//!
//! The inverse direction is [`Decomposer::to_json`](crate::Decomposer::to_json).

use std::sync::Arc;

use graft_types::{is_transient, Member, Node, TypeChain, Value};
use serde_json::{Map, Value as JsonValue};

use crate::error::{DecomposeError, DecomposeResult};
use crate::fragment::{self, ID_KEY, TYPE_KEY};

/// Build a node from a JSON object.
///
/// Objects with a `_type` become nodes, other objects become maps. A root
/// object without `_type` is read as an untyped node. `id` and `__`-prefixed
/// keys are dropped, and references are rejected since there is nothing to
/// resolve them against.
pub fn node_from_json(document: &JsonValue) -> DecomposeResult<Node> {
    let object = document
        .as_object()
        .ok_or_else(|| DecomposeError::invalid("document is not a JSON object"))?;
    object_to_node(object)
}

fn object_to_node(object: &Map<String, JsonValue>) -> DecomposeResult<Node> {
    let chain = match fragment::discriminator(object) {
        Some(discriminator) => TypeChain::parse(discriminator)
            .map_err(|e| DecomposeError::invalid(e.to_string()).within(TYPE_KEY))?,
        None => TypeChain::base(),
    };
    let mut node = Node::new(chain);
    for (key, raw) in object {
        if key == TYPE_KEY || key == ID_KEY || is_transient(key) {
            continue;
        }
        graft_types::validate_member_name(key)
            .map_err(|e| DecomposeError::invalid(e.to_string()).within(key))?;
        let value = json_to_value(raw).map_err(|e| e.within(key))?;
        node.insert_unchecked(Member::dynamic(key.as_str(), value));
    }
    Ok(node)
}

fn json_to_value(raw: &JsonValue) -> DecomposeResult<Value> {
    Ok(match raw {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(
                n.as_f64()
                    .ok_or_else(|| DecomposeError::invalid("unrepresentable number"))?,
            ),
        },
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(items) => Value::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| json_to_value(item).map_err(|e| e.within(&format!("[{i}]"))))
                .collect::<DecomposeResult<_>>()?,
        ),
        JsonValue::Object(object) => {
            if fragment::reference_target(raw).is_some() {
                return Err(DecomposeError::invalid("references cannot be imported"));
            }
            if fragment::discriminator(object).is_some() {
                Value::Node(Arc::new(object_to_node(object)?))
            } else {
                let mut entries = Vec::with_capacity(object.len());
                for (key, item) in object {
                    entries.push((key.clone(), json_to_value(item).map_err(|e| e.within(key))?));
                }
                Value::Map(entries)
            }
        }
    })
}
