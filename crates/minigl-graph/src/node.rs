//! The node record the engine keeps per id, and the closed set of node kinds.

use std::collections::{BTreeMap, BTreeSet};

use minigl_core::{EngineError, NodeId, TextureFormat};

use crate::backend::{Backend, TextureRef};
use crate::feedback::FeedbackNode;
use crate::multi_output::MultiOutputNode;
use crate::proxy::ProxyNode;
use crate::shader::{ShaderCore, ShaderNode};
use crate::source::{AssetNode, ConstantNode};
use crate::uniforms::UniformBlock;

/// Output name every node answers to; index 0 on multi-output nodes.
pub const DEFAULT_OUTPUT: &str = "default";

/// Where an input port reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEdge {
    pub source: NodeId,
    pub output: String,
}

/// How a node picks its texel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// Follow the engine surface.
    Surface,
    /// Follow the first connected input (by port name), else the surface.
    Input,
    /// The asset's own size.
    Native,
    /// Explicit override.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Ready,
    Failed(String),
}

impl NodeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, NodeStatus::Failed(_))
    }
}

/// An input resolved to a texture for this frame.
#[derive(Debug, Clone)]
pub(crate) struct BoundInput<T> {
    pub port: String,
    pub texture: TextureRef<T>,
    /// False when the source produced nothing and the engine's empty texture stands in.
    pub live: bool,
}

pub(crate) struct ProcessCtx<'a, T> {
    pub label: &'a str,
    pub inputs: &'a [BoundInput<T>],
    pub globals: &'a UniformBlock,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub clear: [f32; 4],
}

/// The closed set of node kinds.
#[derive(Debug)]
pub enum NodeKind<B: Backend> {
    Shader(ShaderNode<B>),
    Feedback(FeedbackNode<B>),
    MultiOutput(MultiOutputNode<B>),
    Constant(ConstantNode<B>),
    Asset(AssetNode<B>),
    Proxy(ProxyNode),
}

impl<B: Backend> NodeKind<B> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Shader(_) => "shader",
            NodeKind::Feedback(_) => "feedback",
            NodeKind::MultiOutput(_) => "multi_output",
            NodeKind::Constant(_) => "constant",
            NodeKind::Asset(_) => "asset",
            NodeKind::Proxy(_) => "proxy",
        }
    }

    /// Number of addressable outputs. Proxies report their own output node's count
    /// through the engine, not here.
    pub fn output_count(&self) -> usize {
        match self {
            NodeKind::MultiOutput(n) => n.target_count(),
            _ => 1,
        }
    }

    pub(crate) fn default_sizing(&self) -> Sizing {
        match self {
            NodeKind::Shader(_) | NodeKind::MultiOutput(_) => Sizing::Input,
            NodeKind::Feedback(_) | NodeKind::Constant(_) | NodeKind::Proxy(_) => Sizing::Surface,
            NodeKind::Asset(_) => Sizing::Native,
        }
    }

    pub(crate) fn shader_core(&self) -> Option<&ShaderCore<B>> {
        match self {
            NodeKind::Shader(n) => Some(n.core()),
            NodeKind::Feedback(n) => Some(n.core()),
            NodeKind::MultiOutput(n) => Some(n.core()),
            _ => None,
        }
    }

    pub(crate) fn shader_core_mut(&mut self) -> Option<&mut ShaderCore<B>> {
        match self {
            NodeKind::Shader(n) => Some(n.core_mut()),
            NodeKind::Feedback(n) => Some(n.core_mut()),
            NodeKind::MultiOutput(n) => Some(n.core_mut()),
            _ => None,
        }
    }

    pub(crate) fn process(
        &mut self,
        backend: &mut B,
        ctx: &ProcessCtx<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        match self {
            NodeKind::Shader(n) => n.process(backend, ctx),
            NodeKind::Feedback(n) => n.process(backend, ctx),
            NodeKind::MultiOutput(n) => n.process(backend, ctx),
            NodeKind::Constant(n) => n.process(backend, ctx),
            NodeKind::Asset(n) => n.process(backend, ctx),
            // Internal nodes are driven by the engine.
            NodeKind::Proxy(_) => Ok(()),
        }
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        match self {
            NodeKind::Shader(n) => n.release(backend),
            NodeKind::Feedback(n) => n.release(backend),
            NodeKind::MultiOutput(n) => n.release(backend),
            NodeKind::Constant(n) => n.release(backend),
            NodeKind::Asset(n) => n.release(backend),
            NodeKind::Proxy(_) => {}
        }
    }
}

/// A registered node.
#[derive(Debug)]
pub struct Node<B: Backend> {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) inputs: BTreeMap<String, InputEdge>,
    pub(crate) subscribers: BTreeSet<NodeId>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) sizing: Sizing,
    pub(crate) last_frame: Option<u64>,
    pub(crate) producing: bool,
    pub(crate) status: NodeStatus,
    pub(crate) owner: Option<NodeId>,
    pub(crate) kind: NodeKind<B>,
}

impl<B: Backend> Node<B> {
    pub(crate) fn new(id: NodeId, name: String, size: (u32, u32), kind: NodeKind<B>) -> Self {
        let sizing = kind.default_sizing();
        Self {
            id,
            name,
            inputs: BTreeMap::new(),
            subscribers: BTreeSet::new(),
            width: size.0,
            height: size.1,
            sizing,
            last_frame: None,
            producing: false,
            status: NodeStatus::Pending,
            owner: None,
            kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &BTreeMap<String, InputEdge> {
        &self.inputs
    }

    pub fn input(&self, port: &str) -> Option<&InputEdge> {
        self.inputs.get(port)
    }

    pub fn subscribers(&self) -> &BTreeSet<NodeId> {
        &self.subscribers
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sizing(&self) -> Sizing {
        self.sizing
    }

    /// Frame at which this node last produced.
    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    /// The proxy this node belongs to, if any.
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub fn kind(&self) -> &NodeKind<B> {
        &self.kind
    }

    pub fn shader(&self) -> Option<&ShaderCore<B>> {
        self.kind.shader_core()
    }

    pub fn as_feedback(&self) -> Option<&FeedbackNode<B>> {
        match &self.kind {
            NodeKind::Feedback(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_asset(&self) -> Option<&AssetNode<B>> {
        match &self.kind {
            NodeKind::Asset(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyNode> {
        match &self.kind {
            NodeKind::Proxy(n) => Some(n),
            _ => None,
        }
    }

    /// Validate `name` against this node's outputs and return its index.
    pub fn output_index(&self, name: &str) -> Result<usize, EngineError> {
        parse_output(self.id, name, self.kind.output_count())
    }

    /// The texture behind `name`, without producing anything. Failed nodes and
    /// proxies report `None`; the engine resolves proxies itself.
    pub(crate) fn current_output(
        &self,
        name: &str,
    ) -> Result<Option<TextureRef<B::Texture>>, EngineError> {
        let index = self.output_index(name)?;
        if self.status.is_failed() {
            return Ok(None);
        }
        Ok(match &self.kind {
            NodeKind::Shader(n) => n.output(),
            NodeKind::Feedback(n) => n.output(),
            NodeKind::MultiOutput(n) => n.output(index),
            NodeKind::Constant(n) => n.output(),
            NodeKind::Asset(n) => n.output(),
            NodeKind::Proxy(_) => None,
        })
    }

    /// A mutation happened; a failed node gets another chance next tick.
    pub(crate) fn touch(&mut self) {
        if self.status.is_failed() {
            self.status = NodeStatus::Pending;
        }
    }
}

/// `"default"` is index 0; otherwise a decimal index below `count`.
pub(crate) fn parse_output(node: NodeId, name: &str, count: usize) -> Result<usize, EngineError> {
    if name == DEFAULT_OUTPUT {
        return Ok(0);
    }
    match name.parse::<usize>() {
        Ok(index) if index < count => Ok(index),
        Ok(_) => Err(EngineError::OutputOutOfRange {
            node,
            output: name.to_string(),
            count,
        }),
        Err(_) => Err(EngineError::UnknownOutput {
            node,
            output: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_index_zero() {
        assert_eq!(parse_output(NodeId(1), DEFAULT_OUTPUT, 1).unwrap(), 0);
        assert_eq!(parse_output(NodeId(1), DEFAULT_OUTPUT, 4).unwrap(), 0);
    }

    #[test]
    fn numeric_names_select_by_index() {
        assert_eq!(parse_output(NodeId(1), "0", 3).unwrap(), 0);
        assert_eq!(parse_output(NodeId(1), "2", 3).unwrap(), 2);
    }

    #[test]
    fn index_at_count_is_out_of_range() {
        match parse_output(NodeId(7), "3", 3) {
            Err(EngineError::OutputOutOfRange { node, count, .. }) => {
                assert_eq!(node, NodeId(7));
                assert_eq!(count, 3);
            }
            other => panic!("expected OutputOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn single_output_nodes_reject_index_one() {
        assert!(matches!(
            parse_output(NodeId(1), "1", 1),
            Err(EngineError::OutputOutOfRange { .. })
        ));
    }

    #[test]
    fn non_numeric_names_are_unknown() {
        assert!(matches!(
            parse_output(NodeId(1), "alpha", 2),
            Err(EngineError::UnknownOutput { .. })
        ));
        assert!(matches!(
            parse_output(NodeId(1), "-1", 2),
            Err(EngineError::UnknownOutput { .. })
        ));
    }
}
