#![forbid(unsafe_code)]

//! minigl render graph.
//!
//! A graph of texture-producing nodes evaluated once per frame:
//! - nodes are created through [`Engine::create_node`] and owned by the engine;
//! - edges connect a node's named input port to another node's named output;
//! - [`Engine::render`] orders the nodes reachable from the output node, produces each
//!   at most once per frame, and presents the result.
//!
//! GPU work goes through the [`Backend`] trait. `minigl-runtime-glow` provides the
//! OpenGL backend; [`headless::HeadlessBackend`] records calls for tests.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod backend;
pub mod engine;
pub mod feedback;
pub mod headless;
pub mod multi_output;
pub mod node;
pub mod proxy;
pub mod scheduler;
pub mod shader;
pub mod source;
pub mod uniforms;

pub use backend::{
    Backend, ClearPolicy, PipelineDesc, RenderPass, Sampler, TextureBinding, TextureDesc,
    TextureRef,
};
pub use engine::{Engine, FrameReport, NodeSpec, CONSTANT_COLOR};
pub use feedback::{FeedbackNode, FEEDBACK_INPUT};
pub use multi_output::MultiOutputNode;
pub use node::{InputEdge, Node, NodeKind, NodeStatus, Sizing, DEFAULT_OUTPUT};
pub use proxy::{ProxyNode, Route};
pub use scheduler::{topological_order, Schedule};
pub use shader::{InputShape, ShaderCore, ShaderNode, ShaderProgram};
pub use source::{AssetNode, AssetSource, ConstantNode, LoadState};
pub use uniforms::{GlobalUniforms, PointerState, UniformBlock, UniformValue};

// Re-exported so hosts depend on one crate for the common vocabulary.
pub use minigl_core::{EngineConfig, EngineError, NodeId, TextureFormat};
pub use minigl_input_media::{RgbaFrame, VideoConfig};
