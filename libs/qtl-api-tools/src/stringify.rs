//! Cycle-tolerant JSON rendering of shared object graphs, for debug logs.
//!
//! Nodes are shared through `Rc<RefCell<_>>`, so a graph may reference a node
//! from several places or contain itself. [`stringify`] prints every path in
//! full and replaces a node that is already being printed further up the
//! current path with `"[Circular]"`.

use serde_json::{Map, Number, Value};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Marker emitted in place of a back-reference.
pub const CIRCULAR: &str = "[Circular]";

pub type NodeRef = Rc<RefCell<Node>>;

#[derive(Debug, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<NodeRef>),
    /// Entries keep insertion order; a repeated key replaces the earlier value.
    Object(Vec<(String, NodeRef)>),
}

impl Node {
    #[must_use]
    pub fn object() -> NodeRef {
        Node::Object(Vec::new()).into_ref()
    }

    #[must_use]
    pub fn array() -> NodeRef {
        Node::Array(Vec::new()).into_ref()
    }

    #[must_use]
    pub fn into_ref(self) -> NodeRef {
        Rc::new(RefCell::new(self))
    }

    /// Set `key` on an object node. No-op for other node kinds.
    pub fn set(target: &NodeRef, key: impl Into<String>, value: NodeRef) {
        if let Node::Object(entries) = &mut *target.borrow_mut() {
            let key = key.into();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
        }
    }

    /// Append to an array node. No-op for other node kinds.
    pub fn push(target: &NodeRef, value: NodeRef) {
        if let Node::Array(items) = &mut *target.borrow_mut() {
            items.push(value);
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => {
                Node::Array(items.into_iter().map(|v| Node::from(v).into_ref()).collect())
            }
            Value::Object(map) => Node::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Node::from(v).into_ref()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::String(value.to_owned())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::String(value)
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::Bool(value)
    }
}

impl From<u64> for Node {
    fn from(value: u64) -> Self {
        Node::Number(value.into())
    }
}

/// Render `root` as indented JSON, breaking cycles with `"[Circular]"`.
#[must_use]
pub fn stringify(root: &NodeRef) -> String {
    let value = to_value(root, &mut HashSet::new());
    pretty(&value)
}

/// Convenience for already-acyclic data.
#[must_use]
pub fn stringify_value(value: &Value) -> String {
    pretty(value)
}

fn pretty(value: &Value) -> String {
    // Serializing a `Value` cannot fail: keys are strings and there are no
    // custom `Serialize` impls involved.
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// `on_path` holds the nodes between the root and the current node.
fn to_value(node: &NodeRef, on_path: &mut HashSet<*const RefCell<Node>>) -> Value {
    let id = Rc::as_ptr(node);
    if !on_path.insert(id) {
        return Value::String(CIRCULAR.to_owned());
    }

    let value = match &*node.borrow() {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Number(n) => Value::Number(n.clone()),
        Node::String(s) => Value::String(s.clone()),
        Node::Array(items) => Value::Array(items.iter().map(|i| to_value(i, on_path)).collect()),
        Node::Object(entries) => {
            let mut map = Map::new();
            for (key, child) in entries {
                map.insert(key.clone(), to_value(child, on_path));
            }
            Value::Object(map)
        }
    };

    on_path.remove(&id);
    value
}
