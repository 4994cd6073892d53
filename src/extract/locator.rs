//! Locate `edges`/`node` wrappers anywhere in a JSON tree.

use serde_json::Value;

const EDGES_KEY: &str = "edges";
const NODE_KEY: &str = "node";

/// Find every edge wrapper (`{"node": {...}}` inside an `edges` array).
///
/// Walks depth-first in document order. A mapping's own edges are reported
/// before anything nested below it, so the output matches a pre-order
/// recursive walk. Uses an explicit stack; depth is not limited by the call
/// stack.
#[must_use]
pub fn find_edges(root: &Value) -> Vec<&Value> {
    let mut found = Vec::new();
    let mut stack = vec![root];

    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                if let Some(Value::Array(edges)) = map.get(EDGES_KEY) {
                    found.extend(edges.iter().filter(|edge| is_edge_wrapper(edge)));
                }
                // Reverse so the first child is popped first.
                stack.extend(map.values().rev().filter(|v| is_container(v)));
            }
            Value::Array(items) => {
                stack.extend(items.iter().rev().filter(|v| is_container(v)));
            }
            _ => {}
        }
    }

    found
}

/// Find every node payload, unwrapped from its edge.
#[must_use]
pub fn find_nodes(root: &Value) -> Vec<&Value> {
    find_edges(root)
        .into_iter()
        .filter_map(|edge| edge.get(NODE_KEY))
        .collect()
}

fn is_edge_wrapper(value: &Value) -> bool {
    value.get(NODE_KEY).is_some_and(Value::is_object)
}

const fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}
