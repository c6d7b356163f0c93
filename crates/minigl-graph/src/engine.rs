//! The engine: node registry, edges, scheduling and the render tick.
//!
//! All mutation and all production happen on the caller's thread. The engine is not
//! reentrant; nodes never see the engine, only the backend, so a node cannot issue a
//! structural change from inside its own production.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use minigl_core::{EngineConfig, EngineError, NodeId};
use tracing::{debug, info, warn};

use crate::backend::{create_target, Backend, TextureRef};
use crate::feedback::{FeedbackNode, FEEDBACK_INPUT};
use crate::multi_output::MultiOutputNode;
use crate::node::{
    BoundInput, InputEdge, Node, NodeKind, NodeStatus, ProcessCtx, Sizing, DEFAULT_OUTPUT,
};
use crate::proxy::{ProxyNode, Route};
use crate::scheduler::Schedule;
use crate::shader::{ShaderNode, ShaderProgram};
use crate::source::{AssetNode, AssetSource, ConstantNode, LoadState};
use crate::uniforms::{GlobalUniforms, PointerState, UniformValue, U_TIME};

/// Uniform name a constant node answers to in [`Engine::update_uniform`].
pub const CONSTANT_COLOR: &str = "color";

/// What to build in [`Engine::create_node`].
#[derive(Debug, Clone)]
pub enum NodeSpec {
    Shader(ShaderProgram),
    Feedback(ShaderProgram),
    MultiOutput {
        program: ShaderProgram,
        targets: usize,
    },
    Constant([f32; 4]),
    Asset(AssetSource),
    /// `internal` must already be registered, unowned, and listed in dependency order.
    Proxy {
        internal: Vec<NodeId>,
        output: NodeId,
    },
}

impl NodeSpec {
    pub fn shader(fragment: impl Into<String>) -> Self {
        NodeSpec::Shader(ShaderProgram::fragment(fragment))
    }

    pub fn feedback(fragment: impl Into<String>) -> Self {
        NodeSpec::Feedback(ShaderProgram::fragment(fragment))
    }

    pub fn multi_output(fragment: impl Into<String>, targets: usize) -> Self {
        NodeSpec::MultiOutput {
            program: ShaderProgram::fragment(fragment),
            targets,
        }
    }
}

/// Outcome of one render tick. Node failures are isolated: they land here instead of
/// aborting the tick.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame: u64,
    /// Nodes visited in schedule order.
    pub executed: usize,
    pub failures: Vec<(NodeId, EngineError)>,
    pub presented: bool,
}

impl FrameReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct Engine<B: Backend> {
    backend: B,
    config: EngineConfig,
    nodes: HashMap<NodeId, Node<B>>,
    next_id: u32,
    output: Option<NodeId>,
    schedule: Schedule,
    frame: u64,
    time: f32,
    globals: GlobalUniforms,
    pointer: PointerState,
    surface: (u32, u32),
    /// 1x1 transparent texture bound for inputs whose source produced nothing.
    empty: TextureRef<B::Texture>,
    clock: Instant,
}

impl<B: Backend> Engine<B> {
    pub fn new(mut backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate(Path::new("<engine config>"))?;

        let empty = create_target(&mut backend, "minigl.empty", 1, 1, config.texture_format)?;
        backend.clear_texture(&empty.texture, [0.0; 4])?;
        backend.resize_surface(config.width, config.height);

        let surface = (config.width, config.height);
        let pointer = PointerState::default();
        let mut globals = GlobalUniforms::default();
        globals.advance(0.0, 0, surface, pointer);

        info!(
            width = config.width,
            height = config.height,
            format = ?config.texture_format,
            "engine created"
        );

        Ok(Self {
            backend,
            config,
            nodes: HashMap::new(),
            next_id: 1,
            output: None,
            schedule: Schedule::new(),
            frame: 0,
            time: 0.0,
            globals,
            pointer,
            surface,
            empty,
            clock: Instant::now(),
        })
    }

    // ---------------- accessors ----------------

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn globals(&self) -> &GlobalUniforms {
        &self.globals
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn output_node(&self) -> Option<NodeId> {
        self.output
    }

    pub fn node(&self, id: NodeId) -> Result<&Node<B>, EngineError> {
        self.nodes.get(&id).ok_or(EngineError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registered ids, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Execution order for the current output node, recomputed if the graph changed.
    pub fn order(&mut self) -> Vec<NodeId> {
        match self.output {
            Some(root) => {
                let nodes = &self.nodes;
                self.schedule
                    .ensure(root, |id| dependencies(nodes, id))
                    .to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn set_pointer(&mut self, x: f32, y: f32, down: bool) {
        self.pointer = PointerState {
            position: [x, y],
            down,
        };
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node<B>, EngineError> {
        self.nodes.get_mut(&id).ok_or(EngineError::NodeNotFound(id))
    }

    // ---------------- factory ----------------

    /// Build and register a node. Constants are filled and asset loads start here.
    pub fn create_node(
        &mut self,
        name: impl Into<String>,
        spec: NodeSpec,
    ) -> Result<NodeId, EngineError> {
        let kind = match spec {
            NodeSpec::Shader(program) => NodeKind::Shader(ShaderNode::new(program)),
            NodeSpec::Feedback(program) => NodeKind::Feedback(FeedbackNode::new(program)),
            NodeSpec::MultiOutput { program, targets } => NodeKind::MultiOutput(
                MultiOutputNode::new(program, targets, self.config.max_color_targets)?,
            ),
            NodeSpec::Constant(color) => NodeKind::Constant(ConstantNode::new(color)),
            NodeSpec::Asset(source) => NodeKind::Asset(AssetNode::new(source)),
            NodeSpec::Proxy { internal, output } => {
                self.check_proxy_members(&internal)?;
                NodeKind::Proxy(ProxyNode::new(internal, output)?)
            }
        };

        let id = NodeId(self.next_id);
        let mut node = Node::new(id, name.into(), self.surface, kind);

        let format = self.config.texture_format;
        let setup = match &mut node.kind {
            NodeKind::Constant(c) => {
                c.materialize(&mut self.backend, &node.name, node.width, node.height, format)
            }
            NodeKind::Asset(a) => {
                a.begin_load(&node.name);
                Ok(())
            }
            NodeKind::Proxy(p) => {
                for inner in p.internal() {
                    if let Some(n) = self.nodes.get_mut(inner) {
                        n.owner = Some(id);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = setup {
            node.kind.release(&mut self.backend);
            return Err(e);
        }

        self.next_id += 1;
        debug!(node = %id, name = %node.name, kind = node.kind.kind_name(), "node created");
        self.nodes.insert(id, node);
        self.schedule.invalidate();
        Ok(id)
    }

    /// [`create_node`](Self::create_node) with an explicit size override.
    pub fn create_node_sized(
        &mut self,
        name: impl Into<String>,
        spec: NodeSpec,
        width: u32,
        height: u32,
    ) -> Result<NodeId, EngineError> {
        let id = self.create_node(name, spec)?;
        if let Err(e) = self.resize_node(id, width, height) {
            let _ = self.dispose(id);
            return Err(e);
        }
        Ok(id)
    }

    fn check_proxy_members(&self, internal: &[NodeId]) -> Result<(), EngineError> {
        for id in internal {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| EngineError::InvalidProxy(format!("{id} is not registered")))?;
            if let Some(owner) = node.owner {
                return Err(EngineError::InvalidProxy(format!(
                    "{id} already belongs to proxy {owner}"
                )));
            }
        }
        Ok(())
    }

    // ---------------- structure ----------------

    /// Connect `source`'s default output to `target.input`.
    pub fn connect(&mut self, target: NodeId, input: &str, source: NodeId) -> Result<(), EngineError> {
        self.connect_output(target, input, source, DEFAULT_OUTPUT)
    }

    /// Connect a named output of `source` to `target.input`, replacing any edge
    /// already on that port. Proxies route the port onto an internal node.
    pub fn connect_output(
        &mut self,
        target: NodeId,
        input: &str,
        source: NodeId,
        output: &str,
    ) -> Result<(), EngineError> {
        let (target, input) = self.follow_routes(target, input, ProxyNode::route_input)?;

        if !self.nodes.contains_key(&source) {
            return Err(EngineError::MissingSource {
                target,
                input,
                source_node: source,
            });
        }
        // Structural: a bad output name fails now, not at render time.
        self.resolve_output(source, output)?;

        if input == FEEDBACK_INPUT && self.node(target)?.as_feedback().is_some() {
            return Err(EngineError::other(format!(
                "{target}: input '{FEEDBACK_INPUT}' is reserved for the feedback history"
            )));
        }
        if self.creates_cycle(target, source) {
            return Err(EngineError::CycleDetected {
                target,
                input,
                source_node: source,
            });
        }

        let previous = {
            let node = self.node_mut(target)?;
            node.touch();
            node.inputs.insert(
                input.clone(),
                InputEdge {
                    source,
                    output: output.to_string(),
                },
            )
        };
        if let Some(prev) = previous {
            self.drop_subscriber_if_unused(prev.source, target);
        }
        if let Some(src) = self.nodes.get_mut(&source) {
            src.subscribers.insert(target);
        }

        self.schedule.invalidate();
        debug!(target = %target, input = %input, source = %source, output, "connected");
        Ok(())
    }

    /// Remove the edge on `target.input`, if any.
    pub fn disconnect(&mut self, target: NodeId, input: &str) -> Result<(), EngineError> {
        let (target, input) = self.follow_routes(target, input, ProxyNode::route_input)?;
        let removed = {
            let node = self.node_mut(target)?;
            let removed = node.inputs.remove(&input);
            if removed.is_some() {
                node.touch();
            }
            removed
        };
        if let Some(edge) = removed {
            self.drop_subscriber_if_unused(edge.source, target);
            self.schedule.invalidate();
            debug!(target = %target, input = %input, source = %edge.source, "disconnected");
        }
        Ok(())
    }

    /// Designate the presented node. `None` makes the render tick a no-op.
    pub fn set_output(&mut self, id: Option<NodeId>) -> Result<(), EngineError> {
        if let Some(id) = id {
            self.node(id)?;
        }
        self.output = id;
        self.schedule.invalidate();
        Ok(())
    }

    fn drop_subscriber_if_unused(&mut self, source: NodeId, target: NodeId) {
        let still_used = self
            .nodes
            .get(&target)
            .is_some_and(|t| t.inputs.values().any(|e| e.source == source));
        if !still_used {
            if let Some(src) = self.nodes.get_mut(&source) {
                src.subscribers.remove(&target);
            }
        }
    }

    /// True when `source` already depends on `target` (or on a proxy containing it).
    fn creates_cycle(&self, target: NodeId, source: NodeId) -> bool {
        let mut guarded = vec![target];
        let mut cursor = target;
        while let Some(owner) = self.nodes.get(&cursor).and_then(|n| n.owner) {
            if guarded.contains(&owner) {
                break;
            }
            guarded.push(owner);
            cursor = owner;
        }

        let mut stack = vec![source];
        let mut seen = HashSet::new();
        while let Some(n) = stack.pop() {
            if guarded.contains(&n) {
                return true;
            }
            if seen.insert(n) {
                stack.extend(dependencies(&self.nodes, n));
            }
        }
        false
    }

    /// Follow proxy routing tables until a non-proxy node is reached.
    fn follow_routes(
        &self,
        mut node: NodeId,
        name: &str,
        route: fn(&ProxyNode, &str) -> Route,
    ) -> Result<(NodeId, String), EngineError> {
        let mut name = name.to_string();
        for _ in 0..=self.nodes.len() {
            match &self.node(node)?.kind {
                NodeKind::Proxy(p) => {
                    let next = route(p, &name);
                    node = next.node;
                    name = next.name;
                }
                _ => return Ok((node, name)),
            }
        }
        Err(EngineError::InvalidProxy(format!(
            "routing {node}.{name} does not terminate"
        )))
    }

    /// The non-proxy node that actually holds `id`'s outputs, with `name` validated.
    fn resolve_output(&self, id: NodeId, name: &str) -> Result<NodeId, EngineError> {
        let mut cursor = id;
        for _ in 0..=self.nodes.len() {
            let node = self.node(cursor)?;
            match &node.kind {
                NodeKind::Proxy(p) => cursor = p.output_node(),
                _ => {
                    node.output_index(name)?;
                    return Ok(cursor);
                }
            }
        }
        Err(EngineError::InvalidProxy(format!(
            "output of {id} does not resolve"
        )))
    }

    // ---------------- parameters ----------------

    /// Set a uniform. Proxies route the name; constants accept `color` as a vec4.
    pub fn update_uniform(
        &mut self,
        node: NodeId,
        name: &str,
        value: UniformValue,
    ) -> Result<(), EngineError> {
        let (id, name) = self.follow_routes(node, name, ProxyNode::route_uniform)?;
        let Self { nodes, backend, .. } = self;
        let n = nodes.get_mut(&id).ok_or(EngineError::NodeNotFound(id))?;

        let result = if let Some(core) = n.kind.shader_core_mut() {
            core.set_uniform(&name, value);
            Ok(())
        } else {
            match (&mut n.kind, value) {
                (NodeKind::Constant(c), UniformValue::Vec4(color)) if name == CONSTANT_COLOR => {
                    c.set_color(backend, color)
                }
                _ => Err(EngineError::UnsupportedUniform { node: id, name }),
            }
        };
        if result.is_ok() {
            n.touch();
        }
        result
    }

    /// Refill a constant node.
    pub fn set_color(&mut self, node: NodeId, color: [f32; 4]) -> Result<(), EngineError> {
        let Self { nodes, backend, .. } = self;
        let n = nodes.get_mut(&node).ok_or(EngineError::NodeNotFound(node))?;
        match &mut n.kind {
            NodeKind::Constant(c) => {
                c.set_color(backend, color)?;
                n.touch();
                Ok(())
            }
            _ => Err(EngineError::UnsupportedUniform {
                node,
                name: CONSTANT_COLOR.to_string(),
            }),
        }
    }

    /// Swap a shader-like node's program. The cached pipeline is dropped and the next
    /// production compiles the new one.
    pub fn set_program(&mut self, node: NodeId, program: ShaderProgram) -> Result<(), EngineError> {
        let id = self.resolve_output(node, DEFAULT_OUTPUT)?;
        let Self { nodes, backend, .. } = self;
        let n = nodes.get_mut(&id).ok_or(EngineError::NodeNotFound(id))?;
        let Some(core) = n.kind.shader_core_mut() else {
            return Err(EngineError::other(format!("{id} has no shader program")));
        };
        core.set_program(backend, program);
        n.touch();
        debug!(node = %id, "program replaced");
        Ok(())
    }

    // ---------------- sizing ----------------

    /// Give one node an explicit size. Proxies forward to their output node.
    pub fn resize_node(&mut self, node: NodeId, width: u32, height: u32) -> Result<(), EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::other(format!(
                "{node}: size must be > 0, got {width}x{height}"
            )));
        }
        let id = self.resolve_output(node, DEFAULT_OUTPUT)?;
        {
            let n = self.node_mut(id)?;
            n.sizing = Sizing::Fixed;
            n.touch();
        }
        self.apply_size(id, width, height)
    }

    /// Surface size changed. Every node is offered the new size; only
    /// surface-tracking nodes take it.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        if (width, height) == self.surface {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(EngineError::other(format!(
                "surface size must be > 0, got {width}x{height}"
            )));
        }
        self.surface = (width, height);
        self.backend.resize_surface(width, height);
        info!(width, height, "surface resized");

        let mut first_err = None;
        for id in self.node_ids() {
            let tracks_surface = self.nodes.get(&id).is_some_and(|n| {
                n.sizing == Sizing::Surface && !matches!(n.kind, NodeKind::Proxy(_))
            });
            if !tracks_surface {
                continue;
            }
            if let Err(e) = self.apply_size(id, width, height) {
                warn!(node = %id, error = %e, "resize failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn apply_size(&mut self, id: NodeId, width: u32, height: u32) -> Result<(), EngineError> {
        let format = self.config.texture_format;
        let Self { nodes, backend, .. } = self;
        let node = nodes.get_mut(&id).ok_or(EngineError::NodeNotFound(id))?;

        let is_asset = matches!(node.kind, NodeKind::Asset(_));
        if node.size() == (width, height) && !is_asset {
            return Ok(());
        }
        node.width = width;
        node.height = height;

        let result = match &mut node.kind {
            NodeKind::Shader(n) => {
                n.resize(backend);
                Ok(())
            }
            NodeKind::MultiOutput(n) => {
                n.resize(backend);
                Ok(())
            }
            NodeKind::Feedback(n) => n.resize(backend, &node.name, width, height, format),
            NodeKind::Constant(n) => n.materialize(backend, &node.name, width, height, format),
            NodeKind::Asset(n) => {
                n.set_size_override(Some((width, height)));
                Ok(())
            }
            NodeKind::Proxy(_) => Ok(()),
        };
        match &result {
            Ok(()) => debug!(node = %id, width, height, "node resized"),
            Err(e) => node.status = NodeStatus::Failed(e.to_string()),
        }
        result
    }

    // ---------------- assets ----------------

    pub fn load_state(&self, node: NodeId) -> Result<LoadState, EngineError> {
        self.node(node)?
            .as_asset()
            .map(|a| a.load_state().clone())
            .ok_or_else(|| EngineError::other(format!("{node} is not an asset node")))
    }

    /// Retry a failed (or never started) asset load. A source that fails before any
    /// decoding starts (bad video config) is reported here as `Asset`.
    pub fn reload_asset(&mut self, node: NodeId) -> Result<(), EngineError> {
        let n = self.node_mut(node)?;
        let state = match &mut n.kind {
            NodeKind::Asset(a) => {
                a.begin_load(&n.name);
                a.load_state().clone()
            }
            _ => return Err(EngineError::other(format!("{node} is not an asset node"))),
        };
        n.touch();
        state.error().map_or(Ok(()), Err)
    }

    // ---------------- proxies ----------------

    /// Route external input `external` to the same-named input of `node`.
    pub fn map_input(&mut self, proxy: NodeId, external: &str, node: NodeId) -> Result<(), EngineError> {
        self.map_input_as(proxy, external, node, external)
    }

    pub fn map_input_as(
        &mut self,
        proxy: NodeId,
        external: &str,
        node: NodeId,
        internal: &str,
    ) -> Result<(), EngineError> {
        let route = Route {
            node,
            name: internal.to_string(),
        };
        self.proxy_mut(proxy)?.map_input(external, route)
    }

    /// Route external uniform `external` to the same-named uniform of `node`.
    pub fn map_uniform(&mut self, proxy: NodeId, external: &str, node: NodeId) -> Result<(), EngineError> {
        self.map_uniform_as(proxy, external, node, external)
    }

    pub fn map_uniform_as(
        &mut self,
        proxy: NodeId,
        external: &str,
        node: NodeId,
        internal: &str,
    ) -> Result<(), EngineError> {
        let route = Route {
            node,
            name: internal.to_string(),
        };
        self.proxy_mut(proxy)?.map_uniform(external, route)
    }

    fn proxy_mut(&mut self, proxy: NodeId) -> Result<&mut ProxyNode, EngineError> {
        match &mut self.node_mut(proxy)?.kind {
            NodeKind::Proxy(p) => Ok(p),
            _ => Err(EngineError::InvalidProxy(format!("{proxy} is not a proxy"))),
        }
    }

    // ---------------- disposal ----------------

    /// Release the node's resources and remove it and its edges from the graph.
    /// Proxies take their internal nodes with them. Disposing an unknown id, including
    /// a second dispose of the same id, is `NodeNotFound`.
    pub fn dispose(&mut self, id: NodeId) -> Result<(), EngineError> {
        let mut node = self.nodes.remove(&id).ok_or(EngineError::NodeNotFound(id))?;
        node.kind.release(&mut self.backend);

        if let NodeKind::Proxy(p) = &node.kind {
            for inner in p.internal() {
                if self.nodes.contains_key(inner) {
                    self.dispose(*inner)?;
                }
            }
        }

        for edge in node.inputs.values() {
            if let Some(src) = self.nodes.get_mut(&edge.source) {
                src.subscribers.remove(&id);
            }
        }
        for sub in &node.subscribers {
            if let Some(s) = self.nodes.get_mut(sub) {
                s.inputs.retain(|_, e| e.source != id);
                s.touch();
            }
        }
        node.inputs.clear();
        node.subscribers.clear();

        if let Some(owner) = node.owner {
            if let Some(proxy) = self.nodes.get_mut(&owner) {
                if let NodeKind::Proxy(p) = &mut proxy.kind {
                    if !p.forget(id) {
                        warn!(proxy = %owner, node = %id, "proxy output node disposed; proxy produces nothing");
                        // Re-produced next frame, where it fails once.
                        proxy.last_frame = None;
                        proxy.touch();
                    }
                }
            }
        }
        if self.output == Some(id) {
            self.output = None;
        }

        self.schedule.invalidate();
        debug!(node = %id, name = %node.name, "node disposed");
        Ok(())
    }

    /// Dispose every node. The engine stays usable.
    pub fn dispose_all(&mut self) {
        for id in self.node_ids() {
            if self.nodes.contains_key(&id) {
                if let Err(e) = self.dispose(id) {
                    warn!(node = %id, error = %e, "dispose failed");
                }
            }
        }
        self.output = None;
        info!("all nodes disposed");
    }

    /// Dispose everything, release engine-owned textures and hand the backend back.
    pub fn shutdown(mut self) -> B {
        self.dispose_all();
        self.backend.destroy_texture(self.empty.texture.clone());
        self.backend
    }

    // ---------------- production ----------------

    /// The texture behind `node`'s output `name`. Produces lazily when nothing has
    /// been produced yet and the node is not already mid-production.
    pub fn output(
        &mut self,
        node: NodeId,
        name: &str,
    ) -> Result<Option<TextureRef<B::Texture>>, EngineError> {
        if self.node(node)?.status.is_failed() {
            return Ok(None);
        }
        let target = self.resolve_output(node, name)?;
        let idle = {
            let t = self.node(target)?;
            let n = self.node(node)?;
            !t.producing
                && !n.producing
                && !t.status.is_failed()
                && t.current_output(name)?.is_none()
        };
        if idle {
            if let Err(e) = self.update(node, self.time, self.frame) {
                debug!(node = %node, error = %e, "lazy production failed");
            }
        }
        self.current_output(node, name)
    }

    /// The texture behind `node`'s output `name`, without producing anything.
    pub fn current_output(
        &self,
        node: NodeId,
        name: &str,
    ) -> Result<Option<TextureRef<B::Texture>>, EngineError> {
        // Checked before resolving: a proxy whose output node is gone fails once
        // and then reads as empty.
        if self.node(node)?.status.is_failed() {
            return Ok(None);
        }
        let target = self.resolve_output(node, name)?;
        self.node(target)?.current_output(name)
    }

    /// Memoized per-frame production: sources first, then the node itself, at most
    /// once per `frame`. Failed nodes are skipped until a mutation resets them.
    pub fn update(
        &mut self,
        id: NodeId,
        time: f32,
        frame: u64,
    ) -> Result<Option<TextureRef<B::Texture>>, EngineError> {
        {
            let node = self.node(id)?;
            if node.last_frame == Some(frame) || node.producing || node.status.is_failed() {
                return self.current_output(id, DEFAULT_OUTPUT);
            }
        }

        self.node_mut(id)?.producing = true;
        for dep in dependencies(&self.nodes, id) {
            if let Err(e) = self.update(dep, time, frame) {
                debug!(node = %id, source = %dep, error = %e, "source failed; its input binds empty");
            }
        }
        let result = self.produce(id, time, frame);
        self.node_mut(id)?.producing = false;
        result?;

        self.current_output(id, DEFAULT_OUTPUT)
    }

    /// One frame at host-supplied `time` (seconds).
    pub fn render(&mut self, time: f32) -> Result<FrameReport, EngineError> {
        let Some(root) = self.output else {
            return Ok(FrameReport {
                frame: self.frame,
                ..FrameReport::default()
            });
        };

        self.frame += 1;
        let frame = self.frame;
        self.time = time;
        self.globals
            .advance(time, frame, self.surface, self.pointer);

        let order = self.order();
        let mut failures = Vec::new();
        for id in &order {
            if let Err(e) = self.update(*id, time, frame) {
                warn!(node = %id, frame, error = %e, "node failed; rest of the frame continues");
                failures.push((*id, e));
            }
        }

        self.backend.submit()?;

        let presented = match self.current_output(root, DEFAULT_OUTPUT) {
            Ok(Some(tex)) => {
                self.backend.present(&tex.texture, tex.width, tex.height)?;
                true
            }
            Ok(None) => false,
            Err(e) => {
                failures.push((root, e));
                false
            }
        };

        Ok(FrameReport {
            frame,
            executed: order.len(),
            failures,
            presented,
        })
    }

    /// One frame at the engine clock's time.
    pub fn tick(&mut self) -> Result<FrameReport, EngineError> {
        let time = self.clock.elapsed().as_secs_f32();
        self.render(time)
    }

    fn produce(&mut self, id: NodeId, time: f32, frame: u64) -> Result<(), EngineError> {
        let is_proxy = matches!(self.node(id)?.kind, NodeKind::Proxy(_));
        let result = if is_proxy {
            self.produce_proxy(id, time, frame)
        } else {
            self.process_node(id, time)
        };

        let node = self.node_mut(id)?;
        node.last_frame = Some(frame);
        node.status = match &result {
            Ok(()) => NodeStatus::Ready,
            Err(e) => NodeStatus::Failed(e.to_string()),
        };
        result
    }

    /// Run internal nodes in their stored order. Each still runs at most once per frame.
    fn produce_proxy(&mut self, id: NodeId, time: f32, frame: u64) -> Result<(), EngineError> {
        let (internal, output) = match &self.node(id)?.kind {
            NodeKind::Proxy(p) => (p.internal().to_vec(), p.output_node()),
            _ => return Ok(()),
        };
        if !self.nodes.contains_key(&output) {
            return Err(EngineError::InvalidProxy(format!(
                "output node {output} was disposed"
            )));
        }

        let mut first_err = None;
        for inner in internal {
            let Some(n) = self.nodes.get(&inner) else {
                continue;
            };
            if n.last_frame == Some(frame) || n.producing || n.status.is_failed() {
                continue;
            }
            self.node_mut(inner)?.producing = true;
            let result = self.produce(inner, time, frame);
            self.node_mut(inner)?.producing = false;
            if let Err(e) = result {
                warn!(proxy = %id, node = %inner, error = %e, "internal node failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn process_node(&mut self, id: NodeId, time: f32) -> Result<(), EngineError> {
        let inputs = self.bind_inputs(id)?;
        let (width, height) = self.target_size(id, &inputs)?;
        let mut globals = self.globals.to_block();
        globals.set(U_TIME, UniformValue::Float(time));
        let format = self.config.texture_format;
        let clear = self.config.clear_color;

        let Self { nodes, backend, .. } = self;
        let node = nodes.get_mut(&id).ok_or(EngineError::NodeNotFound(id))?;
        node.width = width;
        node.height = height;

        let ctx = ProcessCtx {
            label: &node.name,
            inputs: &inputs,
            globals: &globals,
            width,
            height,
            format,
            clear,
        };
        node.kind.process(backend, &ctx)?;

        if node.sizing == Sizing::Native {
            if let Some((w, h)) = node.as_asset().and_then(|a| a.native_size()) {
                node.width = w;
                node.height = h;
            }
        }
        Ok(())
    }

    fn bind_inputs(&self, id: NodeId) -> Result<Vec<BoundInput<B::Texture>>, EngineError> {
        let node = self.node(id)?;
        let mut bound = Vec::with_capacity(node.inputs.len());
        for (port, edge) in &node.inputs {
            let produced = match self.current_output(edge.source, &edge.output) {
                Ok(t) => t,
                Err(e) => {
                    warn!(node = %id, port = %port, source = %edge.source, error = %e, "input unreadable");
                    None
                }
            };
            let live = produced.is_some();
            bound.push(BoundInput {
                port: port.clone(),
                texture: produced.unwrap_or_else(|| self.empty.clone()),
                live,
            });
        }
        Ok(bound)
    }

    fn target_size(
        &self,
        id: NodeId,
        inputs: &[BoundInput<B::Texture>],
    ) -> Result<(u32, u32), EngineError> {
        let node = self.node(id)?;
        Ok(match node.sizing {
            Sizing::Surface => self.surface,
            Sizing::Fixed | Sizing::Native => node.size(),
            Sizing::Input => inputs
                .iter()
                .find(|i| i.live)
                .map(|i| i.texture.size())
                .unwrap_or(self.surface),
        })
    }
}

/// Nodes `id` reads from, in port order. A proxy depends on whatever its internal
/// nodes read from outside the proxy.
fn dependencies<B: Backend>(nodes: &HashMap<NodeId, Node<B>>, id: NodeId) -> Vec<NodeId> {
    let Some(node) = nodes.get(&id) else {
        return Vec::new();
    };
    let mut deps = Vec::new();
    match &node.kind {
        NodeKind::Proxy(p) => {
            for inner in p.internal() {
                for dep in dependencies(nodes, *inner) {
                    if dep != id && !p.contains(dep) && !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
            }
        }
        _ => {
            for edge in node.inputs.values() {
                if !deps.contains(&edge.source) {
                    deps.push(edge.source);
                }
            }
        }
    }
    deps
}
