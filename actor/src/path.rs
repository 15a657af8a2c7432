// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor path
//!
//! Hierarchical addresses for actors. A path mirrors the supervision tree:
//! `/troupe/user/parent/child` names a `child` actor supervised by `parent`,
//! living under the `user` guardian of the `troupe` system. Paths are plain
//! values; holding one implies nothing about the liveness of the actor it
//! names.
//!

use serde::{Deserialize, Serialize};

/// Hierarchical path identifying an actor within the system tree.
///
/// Paths are built from `/`-separated segments and support the usual tree
/// queries (`parent`, `is_child_of`, ...) plus the `/` operator to derive a
/// child path:
///
/// ```ignore
/// use actor::ActorPath;
///
/// let parent = ActorPath::from("/troupe/user/manager");
/// let child = parent.clone() / "worker";
/// assert_eq!(child.to_string(), "/troupe/user/manager/worker");
/// assert!(child.is_child_of(&parent));
/// assert_eq!(child.name(), "worker");
/// ```
#[derive(
    Clone, Default, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorPath(Vec<String>);

impl ActorPath {
    /// Path of the immediate supervisor. The parent of a single-segment or
    /// empty path is the empty path.
    pub fn parent(&self) -> Self {
        if self.0.is_empty() {
            ActorPath(Vec::new())
        } else {
            ActorPath(self.0[..self.0.len() - 1].to_vec())
        }
    }

    /// Last segment of the path, the actor's own name.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Top-level segment of the path.
    pub fn root(&self) -> Self {
        ActorPath(self.0.iter().take(1).cloned().collect())
    }

    /// Number of segments.
    pub fn level(&self) -> usize {
        self.0.len()
    }

    /// True for the empty path `/`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &ActorPath) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True if `other` is a strict prefix of `self`.
    pub fn is_descendant_of(&self, other: &ActorPath) -> bool {
        other.is_ancestor_of(self)
    }

    /// True if `other` is a direct child of `self`.
    pub fn is_parent_of(&self, other: &ActorPath) -> bool {
        other.0.len() == self.0.len() + 1 && self.is_ancestor_of(other)
    }

    /// True if `self` is a direct child of `other`.
    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        other.is_parent_of(self)
    }
}

impl From<&str> for ActorPath {
    fn from(value: &str) -> Self {
        ActorPath(
            value
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }
}

impl From<String> for ActorPath {
    fn from(value: String) -> Self {
        ActorPath::from(value.as_str())
    }
}

impl From<&String> for ActorPath {
    fn from(value: &String) -> Self {
        ActorPath::from(value.as_str())
    }
}

impl std::ops::Div<&str> for ActorPath {
    type Output = ActorPath;

    fn div(self, segment: &str) -> Self::Output {
        let mut segments = self.0;
        segments.extend(
            segment
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        );
        ActorPath(segments)
    }
}

impl std::fmt::Display for ActorPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl std::fmt::Debug for ActorPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_construction() {
        let path = ActorPath::from("/troupe/user/manager");
        assert_eq!(path.level(), 3);
        assert_eq!(path.name(), "manager");
        assert_eq!(path.to_string(), "/troupe/user/manager");

        let child = path.clone() / "worker";
        assert_eq!(child.to_string(), "/troupe/user/manager/worker");
        assert_eq!(child.parent(), path);
    }

    #[test]
    fn test_path_relationships() {
        let root = ActorPath::from("/troupe");
        let parent = ActorPath::from("/troupe/user/manager");
        let child = ActorPath::from("/troupe/user/manager/worker");

        assert!(parent.is_parent_of(&child));
        assert!(child.is_child_of(&parent));
        assert!(root.is_ancestor_of(&child));
        assert!(child.is_descendant_of(&root));
        assert!(!root.is_parent_of(&child));
        assert!(!child.is_child_of(&root));
    }

    #[test]
    fn test_empty_path() {
        let empty = ActorPath::from("/");
        assert!(empty.is_empty());
        assert_eq!(empty.name(), "");
        assert_eq!(empty.parent(), empty);
        assert_eq!(empty.to_string(), "/");
    }

    #[test]
    fn test_multi_segment_div() {
        let path = ActorPath::from("/troupe") / "user/manager";
        assert_eq!(path.level(), 3);
        assert_eq!(path.name(), "manager");
    }
}
