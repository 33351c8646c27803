//! Image operator graph
//!
//! Frames enter at a source node and are pushed synchronously, depth first, to
//! every registered target in registration order. Transforms produce a new
//! framebuffer and forward it; sinks present it and end the branch.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Links are identified by a
//! [`TargetHandle`] so that a single link can be detached later. The graph is
//! kept acyclic: links that would close a cycle are rejected.

mod filters;
mod operators;
mod registry;
mod sinks;

pub use filters::{FilterParams, FullscreenFilterPass, IdentityFilter, InvertFilter, PixellateFilter};
pub use operators::{FrameConsumer, ImageOperator};
pub use registry::{build_chain, FilterChain, FilterDefinition, FilterGpu, FilterRegistry, FilterSettings};
pub use sinks::{FrameLog, FrameRecorder, RecordedFrame};

use thiserror::Error;

use crate::error::PlayerError;
use crate::render::RenderFramebuffer;

/// Index of a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifies one link created by [`OperatorGraph::add_target`]
///
/// Handles stay valid across [`OperatorGraph::replace_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetHandle(u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{0} does not exist")]
    UnknownNode(NodeId),
    #[error("{0} is a sink and has no outputs")]
    SinkHasNoOutputs(NodeId),
    #[error("{0} is a source and cannot be a target")]
    SourceAsTarget(NodeId),
    #[error("{node} has {inputs} input(s), slot {slot} is out of range")]
    SlotOutOfRange { node: NodeId, slot: usize, inputs: usize },
    #[error("linking {from} to {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },
    #[error("link does not exist")]
    UnknownLink,
    #[error("{0} cannot be replaced by a node of a different role")]
    IncompatibleReplacement(NodeId),
}

/// What a node does with the frames it receives
pub enum NodeKind {
    /// Entry point; only ever propagates
    Source,
    Transform(Box<dyn ImageOperator>),
    Sink(Box<dyn FrameConsumer>),
}

impl NodeKind {
    fn input_count(&self) -> usize {
        match self {
            NodeKind::Source => 0,
            NodeKind::Transform(op) => op.input_count(),
            NodeKind::Sink(_) => 1,
        }
    }

    fn label(&self) -> &str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Transform(op) => op.label(),
            NodeKind::Sink(sink) => sink.label(),
        }
    }

    fn role(&self) -> u8 {
        match self {
            NodeKind::Source => 0,
            NodeKind::Transform(_) => 1,
            NodeKind::Sink(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    id: u64,
    to: NodeId,
    slot: usize,
}

struct Node {
    kind: NodeKind,
    targets: Vec<Link>,
}

/// Arena-backed directed acyclic graph of image operators
#[derive(Default)]
pub struct OperatorGraph {
    nodes: Vec<Option<Node>>,
    next_link: u64,
}

impl OperatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            kind,
            targets: Vec::new(),
        }));
        id
    }

    pub fn add_source(&mut self) -> NodeId {
        self.insert(NodeKind::Source)
    }

    pub fn add_transform(&mut self, operator: impl ImageOperator + 'static) -> NodeId {
        self.insert(NodeKind::Transform(Box::new(operator)))
    }

    pub fn add_boxed_transform(&mut self, operator: Box<dyn ImageOperator>) -> NodeId {
        self.insert(NodeKind::Transform(operator))
    }

    pub fn add_sink(&mut self, sink: impl FrameConsumer + 'static) -> NodeId {
        self.insert(NodeKind::Sink(Box::new(sink)))
    }

    pub fn add_boxed_sink(&mut self, sink: Box<dyn FrameConsumer>) -> NodeId {
        self.insert(NodeKind::Sink(sink))
    }

    fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.0)
            .and_then(|n| n.as_ref())
            .ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.0)
            .and_then(|n| n.as_mut())
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.node(id).ok().map(|n| n.kind.label())
    }

    /// Direct targets of `id` in delivery order
    pub fn targets(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.targets.iter().map(|l| l.to).collect())
            .unwrap_or_default()
    }

    /// Whether `to` can be reached from `from` by following links
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut visited = vec![false; self.nodes.len()];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if std::mem::replace(&mut visited[current.0], true) {
                continue;
            }
            if let Ok(node) = self.node(current) {
                stack.extend(node.targets.iter().map(|l| l.to));
            }
        }
        false
    }

    /// Link `from` to input `slot` of `to`
    ///
    /// Targets receive frames in the order they were added.
    pub fn add_target(&mut self, from: NodeId, to: NodeId, slot: usize) -> Result<TargetHandle, GraphError> {
        let source = self.node(from)?;
        if matches!(source.kind, NodeKind::Sink(_)) {
            return Err(GraphError::SinkHasNoOutputs(from));
        }
        let target = self.node(to)?;
        if matches!(target.kind, NodeKind::Source) {
            return Err(GraphError::SourceAsTarget(to));
        }
        let inputs = target.kind.input_count();
        if slot >= inputs {
            return Err(GraphError::SlotOutOfRange { node: to, slot, inputs });
        }
        if from == to || self.reaches(to, from) {
            return Err(GraphError::Cycle { from, to });
        }

        let id = self.next_link;
        self.next_link += 1;
        self.node_mut(from)?.targets.push(Link { id, to, slot });
        tracing::debug!("Graph: linked {} -> {} (slot {})", from, to, slot);
        Ok(TargetHandle(id))
    }

    /// Remove a single link
    pub fn detach(&mut self, handle: TargetHandle) -> Result<(), GraphError> {
        for node in self.nodes.iter_mut().flatten() {
            if let Some(index) = node.targets.iter().position(|l| l.id == handle.0) {
                node.targets.remove(index);
                return Ok(());
            }
        }
        Err(GraphError::UnknownLink)
    }

    /// Remove a node and every link into or out of it
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.node(id)?;
        self.nodes[id.0] = None;
        for node in self.nodes.iter_mut().flatten() {
            node.targets.retain(|l| l.to != id);
        }
        Ok(())
    }

    /// Swap `old` for `replacement` without disturbing delivery order
    ///
    /// The replacement takes the old node's place in every upstream target
    /// list and inherits its downstream links; the old node is dropped.
    pub fn replace_node(&mut self, old: NodeId, replacement: NodeKind) -> Result<NodeId, GraphError> {
        let current = self.node(old)?;
        if current.kind.role() != replacement.role() {
            return Err(GraphError::IncompatibleReplacement(old));
        }
        let inputs = replacement.input_count();
        for node in self.nodes.iter().flatten() {
            if let Some(link) = node.targets.iter().find(|l| l.to == old && l.slot >= inputs) {
                return Err(GraphError::SlotOutOfRange {
                    node: old,
                    slot: link.slot,
                    inputs,
                });
            }
        }

        let targets = std::mem::take(&mut self.node_mut(old)?.targets);
        let new_id = self.insert(replacement);
        self.node_mut(new_id)?.targets = targets;
        for node in self.nodes.iter_mut().flatten() {
            for link in node.targets.iter_mut().filter(|l| l.to == old) {
                link.to = new_id;
            }
        }
        self.nodes[old.0] = None;
        tracing::debug!("Graph: replaced {} with {}", old, new_id);
        Ok(new_id)
    }

    /// Deliver `framebuffer` from `from` to all of its targets, depth first
    ///
    /// A failing transform skips its own subtree and delivery continues with
    /// the next target. Fatal errors abort the whole propagation.
    pub fn propagate(&mut self, from: NodeId, framebuffer: &RenderFramebuffer) -> Result<(), PlayerError> {
        let mut index = 0;
        loop {
            let Some(link) = self.node(from)?.targets.get(index).copied() else {
                return Ok(());
            };
            index += 1;

            let node = self.node_mut(link.to)?;
            match &mut node.kind {
                NodeKind::Source => {}
                NodeKind::Sink(sink) => sink.present(framebuffer),
                NodeKind::Transform(op) => match op.process(framebuffer, link.slot) {
                    Ok(Some(output)) => self.propagate(link.to, &output)?,
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Graph: {} ({}) failed: {}", op.label(), link.to, e);
                    }
                },
            }
        }
    }
}
