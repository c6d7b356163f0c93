use std::path::PathBuf;

use crate::NodeId;

/// Engine-level errors used across minigl crates.
///
/// Contract rule: this type lives in `minigl-core` and is re-exported by the graph
/// and backend crates, so hosts only ever match on one error type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ---- Structural (caller bugs, fail loudly) ----
    #[error("node {0} is not registered")]
    NodeNotFound(NodeId),

    #[error("connect {target}.{input}: source node {source_node} is not registered")]
    MissingSource {
        target: NodeId,
        input: String,
        source_node: NodeId,
    },

    #[error("node {node} has {count} output(s); '{output}' is out of range")]
    OutputOutOfRange {
        node: NodeId,
        output: String,
        count: usize,
    },

    #[error("node {node} has no output named '{output}'")]
    UnknownOutput { node: NodeId, output: String },

    #[error("connect {target}.{input} <- {source_node} would create a cycle")]
    CycleDetected {
        target: NodeId,
        input: String,
        source_node: NodeId,
    },

    #[error("invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("node {node} does not accept uniform '{name}'")]
    UnsupportedUniform { node: NodeId, name: String },

    #[error("{requested} color targets requested, at most {max} supported")]
    TooManyTargets { requested: usize, max: usize },

    // ---- Resource (backend) ----
    #[error("shader compile error: {0}")]
    ShaderCompile(String),

    #[error("backend object creation failed: {0}")]
    BackendCreate(String),

    #[error("backend error: {0}")]
    Backend(String),

    // ---- Assets ----
    #[error("asset error: {0}")]
    Asset(String),

    // ---- Config ----
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json parse error at {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config at {}: {msg}", .path.display())]
    InvalidConfig { path: PathBuf, msg: String },

    // ---- Fallback ----
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }

    /// True for errors that indicate a caller bug rather than a runtime failure.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::NodeNotFound(_)
                | EngineError::MissingSource { .. }
                | EngineError::OutputOutOfRange { .. }
                | EngineError::UnknownOutput { .. }
                | EngineError::CycleDetected { .. }
                | EngineError::InvalidProxy(_)
                | EngineError::UnsupportedUniform { .. }
                | EngineError::TooManyTargets { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_classified() {
        assert!(EngineError::NodeNotFound(NodeId(3)).is_structural());
        assert!(EngineError::OutputOutOfRange {
            node: NodeId(1),
            output: "4".into(),
            count: 4,
        }
        .is_structural());
        assert!(!EngineError::ShaderCompile("boom".into()).is_structural());
        assert!(!EngineError::Asset("missing".into()).is_structural());
    }

    #[test]
    fn messages_name_the_node() {
        let e = EngineError::MissingSource {
            target: NodeId(2),
            input: "glTexture".into(),
            source_node: NodeId(9),
        };
        let msg = e.to_string();
        assert!(msg.contains("#2"), "{msg}");
        assert!(msg.contains("glTexture"), "{msg}");
        assert!(msg.contains("#9"), "{msg}");
    }
}
