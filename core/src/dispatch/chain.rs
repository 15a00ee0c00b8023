use serde::Serialize;

use crate::val::Shape;

use super::node::{CacheNode, DispatchNode};

/// Call-site state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Uninitialized,
    Monomorphic,
    Polymorphic,
    Megamorphic,
}

/// Immutable view of a call site's chain. Published whole; never edited.
pub(crate) struct ChainSnapshot {
    pub(crate) head: DispatchNode,
    /// Nodes ever installed. Repairs do not lower it.
    installed: usize,
}

impl ChainSnapshot {
    pub(crate) fn empty() -> Self {
        Self {
            head: DispatchNode::Generic,
            installed: 0,
        }
    }

    pub(crate) fn megamorphic(installed: usize) -> Self {
        Self {
            head: DispatchNode::Megamorphic,
            installed,
        }
    }

    /// Link `nodes` in trial order in front of the generic terminal.
    pub(crate) fn from_nodes(nodes: Vec<CacheNode>, installed: usize) -> Self {
        debug_assert!(nodes.len() <= installed);
        let head = nodes
            .into_iter()
            .rev()
            .fold(DispatchNode::Generic, |next, node| DispatchNode::link(node, next));
        Self { head, installed }
    }

    #[inline]
    pub(crate) fn installed(&self) -> usize {
        self.installed
    }

    #[inline]
    pub(crate) fn is_megamorphic(&self) -> bool {
        matches!(self.head, DispatchNode::Megamorphic)
    }

    pub(crate) fn state(&self) -> ChainState {
        if self.is_megamorphic() {
            return ChainState::Megamorphic;
        }
        match self.installed {
            0 => ChainState::Uninitialized,
            1 => ChainState::Monomorphic,
            _ => ChainState::Polymorphic,
        }
    }

    pub(crate) fn nodes(&self) -> Nodes<'_> {
        Nodes { cursor: &self.head }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes().count()
    }

    /// Index of the node responsible for (`name`, `shape`), if any.
    pub(crate) fn position(&self, name: &str, shape: Shape) -> Option<usize> {
        self.nodes().position(|node| node.covers(name, shape))
    }

    /// Detached copies of the cached nodes, ready to be edited and relinked.
    pub(crate) fn to_nodes(&self) -> Vec<CacheNode> {
        self.nodes().cloned().collect()
    }
}

pub(crate) struct Nodes<'a> {
    cursor: &'a DispatchNode,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a CacheNode;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor {
            DispatchNode::Cached(link) => {
                self.cursor = &link.next;
                Some(&link.node)
            }
            DispatchNode::Megamorphic | DispatchNode::Generic => None,
        }
    }
}
