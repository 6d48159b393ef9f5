//! # Core Enums
//!
//! Small value types shared by every engine component.
//!
//! | Type | Variants |
//! |------|----------|
//! | [`NodeType`] | `storage`, `compute`, `optimization`, `archive` |
//! | [`NodeStatus`] | `active`, `offline` |
//! | [`Priority`] | `low` < `medium` < `high` |
//!
//! All three serialize as lowercase strings and parse from the same
//! spelling via `FromStr`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

// ════════════════════════════════════════════════════════════════════════════
// NODE TYPE
// ════════════════════════════════════════════════════════════════════════════

/// Fixed enumeration of node kinds.
///
/// Each kind has a [`NodeTypeSpec`](crate::config::NodeTypeSpec) in the
/// engine configuration that supplies base/max storage, compute power
/// and reward rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Storage,
    Compute,
    Optimization,
    Archive,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Compute => "compute",
            Self::Optimization => "optimization",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "storage" => Ok(Self::Storage),
            "compute" => Ok(Self::Compute),
            "optimization" => Ok(Self::Optimization),
            "archive" => Ok(Self::Archive),
            other => Err(HarvestError::UnknownNodeType(other.to_string())),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NODE STATUS
// ════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a node. Nodes are never deleted; merged or
/// retired nodes stay in the registry as `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PRIORITY
// ════════════════════════════════════════════════════════════════════════════

/// Three-level priority used by storage allocations and queue items.
///
/// Ordering is `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// All priorities from highest to lowest.
    pub const DESCENDING: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(HarvestError::Validation(format!("unknown priority: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::DESCENDING[0], Priority::High);
    }

    #[test]
    fn test_node_type_parse() {
        assert_eq!("Optimization".parse::<NodeType>().ok(), Some(NodeType::Optimization));
        assert!(matches!(
            "quantum".parse::<NodeType>(),
            Err(HarvestError::UnknownNodeType(t)) if t == "quantum"
        ));
    }

    #[test]
    fn test_serde_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: NodeType,
            priority: Priority,
        }
        let w: Wrapper = toml::from_str("kind = \"archive\"\npriority = \"high\"").expect("parse");
        assert_eq!(w.kind, NodeType::Archive);
        assert_eq!(w.priority, Priority::High);
    }
}
