//! Strongly typed string identifiers.
use serde::{Deserialize, Serialize};

/// Define a newtype wrapping an interned string, for use as an ID.
macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize,
        )]
        #[serde(transparent)]
        /// An identifier wrapping a string
        pub struct $name(pub std::rc::Rc<str>);

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.into())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s.into())
            }
        }

        impl $name {
            /// Get the ID as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id_type! {NodeID}
define_id_type! {RegionID}

/// A directed interconnection edge between two nodes.
///
/// Serialised as `FROM-TO`, which is also how edges are named in time series files.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Edge {
    /// The node power flows out of
    pub from: NodeID,
    /// The node power flows into
    pub to: NodeID,
}

impl Edge {
    /// Parse an edge from a `FROM-TO` column name.
    ///
    /// Returns `None` if the name does not contain exactly one separator or either side is empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (from, to) = s.split_once('-')?;
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() || to.contains('-') {
            return None;
        }

        Some(Self {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Whether the given node is one of this edge's endpoints
    pub fn touches(&self, node: &NodeID) -> bool {
        &self.from == node || &self.to == node
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}
