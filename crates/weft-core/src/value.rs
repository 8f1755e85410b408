#![forbid(unsafe_code)]

//! The dynamic payload model.
//!
//! # Design
//!
//! A [`Value`] is either a leaf scalar, a non-owning [`Value::Ref`], or a
//! composite whose children are referenced **by identity**, never stored
//! inline. Keeping children behind identities is what lets a child mutate in
//! place without disturbing the parent's own structure: the parent's
//! structural revision moves only when the set/order/identity of its direct
//! children changes.
//!
//! [`Leaf`] is the hashable subset used as the interning key. Floats carry
//! their bit pattern there so the key stays `Eq + Hash` sound.
//!
//! Record fields keep declaration order (`Vec` of pairs); keyed maps use a
//! `BTreeMap` so iteration, equality, and deep copies are deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::identity::Identity;

/// Coarse type tag carried by every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    Text,
    Variant,
    Ref,
    List,
    Record,
    Map,
    /// Derived/hybrid/producer stores and observers: allocated identities
    /// whose payload type is whatever their computation yields.
    Computation,
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Variant => "variant",
            Self::Ref => "ref",
            Self::List => "list",
            Self::Record => "record",
            Self::Map => "map",
            Self::Computation => "computation",
        };
        f.write_str(name)
    }
}

/// Hashable leaf constant, used as the hash-consing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Leaf {
    Bool(bool),
    Int(i64),
    /// IEEE-754 bit pattern, so `NaN` payloads intern per bit pattern and
    /// the key stays `Eq`/`Hash` sound.
    Float(u64),
    Text(Arc<str>),
    /// Enum variant name.
    Variant(Arc<str>),
    /// Non-owning reference to another identity.
    Ref(Identity),
}

impl Leaf {
    /// Build a float leaf from its numeric value.
    #[must_use]
    pub fn float(v: f64) -> Self {
        Self::Float(v.to_bits())
    }

    #[must_use]
    pub fn text(v: impl Into<Arc<str>>) -> Self {
        Self::Text(v.into())
    }

    #[must_use]
    pub fn variant(v: impl Into<Arc<str>>) -> Self {
        Self::Variant(v.into())
    }

    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Float(_) => TypeTag::Float,
            Self::Text(_) => TypeTag::Text,
            Self::Variant(_) => TypeTag::Variant,
            Self::Ref(_) => TypeTag::Ref,
        }
    }

    /// Expand into a payload value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Text(s) => Value::Text(s.clone()),
            Self::Variant(s) => Value::Variant(s.clone()),
            Self::Ref(id) => Value::Ref(*id),
        }
    }
}

/// Runtime payload of a datum.
///
/// Defined only while the datum's availability is `Ready`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Arc<str>),
    Variant(Arc<str>),
    /// Non-owning reference: participates in subscriptions, never in the
    /// ownership tree.
    Ref(Identity),
    /// Ordered children by identity. List positions are deliberately not
    /// addressable as subscription keys.
    List(Vec<Identity>),
    /// Fields in declaration order.
    Record(Vec<(Arc<str>, Identity)>),
    /// Keyed children with deterministic iteration order.
    Map(BTreeMap<Arc<str>, Identity>),
}

impl Value {
    #[must_use]
    pub fn text(v: impl Into<Arc<str>>) -> Self {
        Self::Text(v.into())
    }

    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Float(_) => TypeTag::Float,
            Self::Text(_) => TypeTag::Text,
            Self::Variant(_) => TypeTag::Variant,
            Self::Ref(_) => TypeTag::Ref,
            Self::List(_) => TypeTag::List,
            Self::Record(_) => TypeTag::Record,
            Self::Map(_) => TypeTag::Map,
        }
    }

    /// Leaf view, if this value is a leaf scalar or ref.
    #[must_use]
    pub fn as_leaf(&self) -> Option<Leaf> {
        match self {
            Self::Bool(b) => Some(Leaf::Bool(*b)),
            Self::Int(i) => Some(Leaf::Int(*i)),
            Self::Float(v) => Some(Leaf::Float(v.to_bits())),
            Self::Text(s) => Some(Leaf::Text(s.clone())),
            Self::Variant(s) => Some(Leaf::Variant(s.clone())),
            Self::Ref(id) => Some(Leaf::Ref(*id)),
            Self::List(_) | Self::Record(_) | Self::Map(_) => None,
        }
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::List(_) | Self::Record(_) | Self::Map(_))
    }

    /// Directly-contained (owned) child identities. `Ref` is a leaf and
    /// contributes nothing: it never owns its target.
    pub fn children(&self) -> impl Iterator<Item = Identity> + '_ {
        let iter: Box<dyn Iterator<Item = Identity>> = match self {
            Self::List(items) => Box::new(items.iter().copied()),
            Self::Record(fields) => Box::new(fields.iter().map(|(_, id)| *id)),
            Self::Map(entries) => Box::new(entries.values().copied()),
            _ => Box::new(std::iter::empty()),
        };
        iter
    }

    /// Look up a record field or map key.
    #[must_use]
    pub fn child_by_key(&self, key: &str) -> Option<Identity> {
        match self {
            Self::Record(fields) => fields
                .iter()
                .find(|(name, _)| name.as_ref() == key)
                .map(|(_, id)| *id),
            Self::Map(entries) => entries.get(key).copied(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(Arc::from(v))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
