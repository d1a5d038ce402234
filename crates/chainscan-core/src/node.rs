//! Node and property types handed out by a view

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property key carrying the node's display name
pub const NAME_PROP: &str = "Name";
/// Property key holding a node's register group
pub const REGS_PROP: &str = "regs";
/// Property key carrying a JTAG device's architecture name
pub const ARCH_NAME_PROP: &str = "arch_name";
/// Property key carrying the parent ID reported by the server
pub const PARENT_ID_PROP: &str = "ParentID";

/// Raw property map of a node
pub type Props = BTreeMap<String, PropValue>;

/// What a node represents, selecting kind-specific decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A JTAG cable at the top of the jtag view
    JtagCable,
    /// A device sitting on a JTAG chain
    JtagDevice,
    /// Any other target (memory, debug core, chipscope, ...)
    #[default]
    Generic,
}

/// A register whose backing bytes are little-endian
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JtagRegister {
    pub name: String,
    pub data: Vec<u8>,
}

impl JtagRegister {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// A single property value as reported by the server
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Register(JtagRegister),
    List(Vec<PropValue>),
    Map(Props),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Props> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(s) => write!(f, "{}", s),
            Self::Bytes(bytes) => write!(f, "{:?}", bytes),
            Self::Register(reg) => write!(f, "<register {}>", reg.name),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<serde_json::Value> for PropValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    // Wider than i64; keep the digits rather than lose precision
                    Self::Str(u.to_string())
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A node handle: view-local context, parent link and a property snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub ctx: String,
    pub parent_ctx: Option<String>,
    pub kind: NodeKind,
    pub props: Props,
}

impl Node {
    pub fn new(ctx: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            ctx: ctx.into(),
            parent_ctx: None,
            kind,
            props: Props::new(),
        }
    }

    pub fn with_parent(mut self, parent_ctx: impl Into<String>) -> Self {
        self.parent_ctx = Some(parent_ctx.into());
        self
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with_prop(NAME_PROP, PropValue::Str(name.into()))
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Add a register to the node's `regs` group
    pub fn with_register(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let register = JtagRegister::new(name, data);
        let regs = self
            .props
            .entry(REGS_PROP.to_string())
            .or_insert_with(|| PropValue::Map(Props::new()));
        if !matches!(regs, PropValue::Map(_)) {
            *regs = PropValue::Map(Props::new());
        }
        if let PropValue::Map(map) = regs {
            map.insert(register.name.clone(), PropValue::Register(register));
        }
        self
    }

    pub fn prop(&self, key: &str) -> Option<&PropValue> {
        self.props.get(key)
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.prop(key).and_then(PropValue::as_str)
    }

    /// The `Name` property, treating an empty name as absent
    pub fn name(&self) -> Option<&str> {
        self.prop_str(NAME_PROP).filter(|name| !name.is_empty())
    }

    pub fn arch_name(&self) -> Option<&str> {
        self.prop_str(ARCH_NAME_PROP)
    }

    /// Look up a register in the node's `regs` group
    pub fn register(&self, name: &str) -> Option<&JtagRegister> {
        match self.prop(REGS_PROP)?.as_map()?.get(name)? {
            PropValue::Register(reg) => Some(reg),
            _ => None,
        }
    }

    /// Whether this node can be handed out under the given kind hint
    pub fn is_compatible(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_is_absent() {
        let node = Node::new("t1", NodeKind::Generic).with_name("");
        assert_eq!(node.name(), None);
        assert_eq!(node.prop_str(NAME_PROP), Some(""));
    }

    #[test]
    fn test_register_lookup() {
        let node = Node::new("jd1", NodeKind::JtagDevice)
            .with_register("dna", vec![1, 2, 3])
            .with_register("idcode", vec![4]);

        assert_eq!(node.register("dna").unwrap().data, vec![1, 2, 3]);
        assert_eq!(node.register("idcode").unwrap().data, vec![4]);
        assert!(node.register("status").is_none());
    }

    #[test]
    fn test_prop_value_from_json() {
        let value: serde_json::Value = serde_json::json!({
            "Name": "xcvc1902",
            "DeviceDNA": [1, 2, 3, 4],
            "isActive": true,
            "Clock": 1.5,
        });
        let PropValue::Map(map) = PropValue::from(value) else {
            panic!("expected map");
        };
        assert_eq!(map["Name"], PropValue::Str("xcvc1902".into()));
        let words = map["DeviceDNA"].as_list().unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[2].as_int(), Some(3));
        assert_eq!(map["Name"].as_int(), None);
        assert_eq!(map["isActive"], PropValue::Bool(true));
        assert_eq!(map["Clock"], PropValue::Float(1.5));
    }

    #[test]
    fn test_display_list() {
        let value = PropValue::List(vec![PropValue::Int(1), PropValue::Str("a".into())]);
        assert_eq!(value.to_string(), "[1, a]");
    }
}
