//! Membership registry: node name ↔ numeric id ↔ address
//!
//! Ids are handed out sequentially on first join and never recycled.

use crate::common::NodeId;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub address: String,
}

/// Whether a join created a new node or refreshed a known one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Joined,
    Rejoined,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    ids: HashMap<String, NodeId>,
    nodes: Vec<Node>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or update its address if already known.
    pub fn join(&mut self, name: &str, address: &str) -> (NodeId, Membership) {
        if let Some(id) = self.rejoin(name, address) {
            return (id, Membership::Rejoined);
        }

        let id = self.nodes.len() as NodeId;
        self.ids.insert(name.to_string(), id);
        self.nodes.push(Node {
            id,
            name: name.to_string(),
            address: address.to_string(),
        });
        (id, Membership::Joined)
    }

    /// Update the address of a known node. Unknown names are left alone.
    pub fn rejoin(&mut self, name: &str, address: &str) -> Option<NodeId> {
        let id = *self.ids.get(name)?;
        self.nodes[id as usize].address = address.to_string();
        Some(id)
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.ids.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    /// Nodes in id order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
