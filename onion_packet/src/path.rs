/*! Onion path of three service nodes
*/

use serde::{Deserialize, Serialize};

use crate::errors::PathError;
use crate::snode::ServiceNode;

/// Number of nodes in an onion path.
pub const PATH_SIZE: usize = 3;

/** Ordered sequence of distinct service nodes.

The first node is the guard, i.e. the only node the client talks to
directly.
*/
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Path {
    nodes: [ServiceNode; PATH_SIZE],
}

impl Path {
    /// Create new `Path`. Fails when a node appears twice.
    pub fn new(nodes: [ServiceNode; PATH_SIZE]) -> Result<Path, PathError> {
        for (i, node) in nodes.iter().enumerate() {
            if nodes[i + 1..].contains(node) {
                return Err(PathError::DuplicateNode(node.to_string()));
            }
        }
        Ok(Path { nodes })
    }

    /// Create a path from a guard and the rest of the nodes.
    pub fn from_guard(guard: ServiceNode, rest: &[ServiceNode]) -> Result<Path, PathError> {
        match rest {
            [second, third] => Path::new([guard, second.clone(), third.clone()]),
            _ => Err(PathError::WrongLength(rest.len() + 1)),
        }
    }

    /// The node the client connects to.
    pub fn guard(&self) -> &ServiceNode {
        &self.nodes[0]
    }

    /// All nodes from guard to exit.
    pub fn nodes(&self) -> &[ServiceNode; PATH_SIZE] {
        &self.nodes
    }

    /// Check if the node is a part of this path.
    pub fn contains(&self, node: &ServiceNode) -> bool {
        self.nodes.contains(node)
    }

    /// Find a node of this path by its ed25519 key.
    pub fn find_by_ed25519(&self, ed25519: &str) -> Option<&ServiceNode> {
        self.nodes.iter().find(|node| node.keys.ed25519 == ed25519)
    }

    /// Copy of this path with `old` replaced by `new` at the same position.
    /// Returns `None` when `old` is not in the path or `new` already is.
    pub fn with_replaced(&self, old: &ServiceNode, new: ServiceNode) -> Option<Path> {
        let index = self.nodes.iter().position(|node| node == old)?;
        if self.contains(&new) {
            return None;
        }
        let mut nodes = self.nodes.clone();
        nodes[index] = new;
        Some(Path { nodes })
    }
}
