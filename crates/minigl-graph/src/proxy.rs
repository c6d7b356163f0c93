//! Facade over an internal sub-graph.
//!
//! A proxy owns no GPU resources. It keeps the internal node ids in the order they
//! must run, names one of them as its output, and routes external input and
//! uniform names onto internal nodes. Unmapped names go to the output node under
//! the same name.

use std::collections::BTreeMap;

use minigl_core::{EngineError, NodeId};

/// An internal destination for an external name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub node: NodeId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProxyNode {
    internal: Vec<NodeId>,
    output: NodeId,
    input_routes: BTreeMap<String, Route>,
    uniform_routes: BTreeMap<String, Route>,
}

impl ProxyNode {
    /// `internal` must be in dependency order and contain `output`.
    pub(crate) fn new(internal: Vec<NodeId>, output: NodeId) -> Result<Self, EngineError> {
        if internal.is_empty() {
            return Err(EngineError::InvalidProxy("no internal nodes".into()));
        }
        if !internal.contains(&output) {
            return Err(EngineError::InvalidProxy(format!(
                "output node {output} is not one of the internal nodes"
            )));
        }
        let mut seen = internal.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != internal.len() {
            return Err(EngineError::InvalidProxy(
                "internal node listed twice".into(),
            ));
        }
        Ok(Self {
            internal,
            output,
            input_routes: BTreeMap::new(),
            uniform_routes: BTreeMap::new(),
        })
    }

    /// Internal nodes in execution order.
    pub fn internal(&self) -> &[NodeId] {
        &self.internal
    }

    pub fn output_node(&self) -> NodeId {
        self.output
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.internal.contains(&id)
    }

    pub fn input_routes(&self) -> &BTreeMap<String, Route> {
        &self.input_routes
    }

    pub fn uniform_routes(&self) -> &BTreeMap<String, Route> {
        &self.uniform_routes
    }

    /// Where an external input port lands.
    pub fn route_input(&self, external: &str) -> Route {
        resolve(&self.input_routes, self.output, external)
    }

    /// Where an external uniform name lands.
    pub fn route_uniform(&self, external: &str) -> Route {
        resolve(&self.uniform_routes, self.output, external)
    }

    pub(crate) fn map_input(&mut self, external: &str, route: Route) -> Result<(), EngineError> {
        self.check_member(route.node)?;
        self.input_routes.insert(external.to_string(), route);
        Ok(())
    }

    pub(crate) fn map_uniform(&mut self, external: &str, route: Route) -> Result<(), EngineError> {
        self.check_member(route.node)?;
        self.uniform_routes.insert(external.to_string(), route);
        Ok(())
    }

    /// An internal node went away: drop it and every route pointing at it.
    /// Returns false when the removed node was the output node.
    pub(crate) fn forget(&mut self, id: NodeId) -> bool {
        self.internal.retain(|n| *n != id);
        self.input_routes.retain(|_, r| r.node != id);
        self.uniform_routes.retain(|_, r| r.node != id);
        self.output != id
    }

    fn check_member(&self, node: NodeId) -> Result<(), EngineError> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(EngineError::InvalidProxy(format!(
                "{node} is not an internal node of this proxy"
            )))
        }
    }
}

fn resolve(routes: &BTreeMap<String, Route>, output: NodeId, external: &str) -> Route {
    routes.get(external).cloned().unwrap_or_else(|| Route {
        node: output,
        name: external.to_string(),
    })
}
