//! Shared vocabulary for the minigl dataflow engine: node ids, the engine error
//! taxonomy and configuration loading.
#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

use std::fmt;

pub mod config;
pub mod error;

pub use config::{
    load_engine_config_from, load_typed_json, parse_typed_json, EngineConfig, TextureFormat,
    MAX_COLOR_TARGETS,
};
pub use error::EngineError;

/// Process-unique node handle. Ids are never reused within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
