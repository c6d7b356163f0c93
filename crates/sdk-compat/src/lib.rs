//! Compile-only compatibility crate.
//!
//! This crate exists to ensure the public SDK surface remains usable by third-party
//! consumers. It is not shipped or run; it must only build.

use minigl_core::{EngineConfig, EngineError};
use minigl_graph::{
    Backend, Engine, NodeSpec, PipelineDesc, RenderPass, TextureBinding, TextureDesc,
    UniformBlock, UniformValue, DEFAULT_OUTPUT,
};

/// A backend written outside the graph crate: every type in the trait's signatures
/// must be reachable from the public API.
#[derive(Debug, Default)]
pub struct NullBackend {
    next: u32,
}

impl Backend for NullBackend {
    type Texture = u32;
    type Pipeline = ();
    type BindingSet = ();

    fn create_texture(&mut self, _desc: &TextureDesc<'_>) -> Result<u32, EngineError> {
        self.next += 1;
        Ok(self.next)
    }

    fn destroy_texture(&mut self, _texture: u32) {}

    fn clear_texture(&mut self, _texture: &u32, _rgba: [f32; 4]) -> Result<(), EngineError> {
        Ok(())
    }

    fn upload_rgba(&mut self, _t: &u32, _w: u32, _h: u32, _bytes: &[u8]) -> Result<(), EngineError> {
        Ok(())
    }

    fn compile_pipeline(&mut self, _desc: &PipelineDesc<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    fn destroy_pipeline(&mut self, _pipeline: ()) {}

    fn create_binding_set(
        &mut self,
        _pipeline: &(),
        _textures: &[TextureBinding<'_, u32>],
        _uniforms: &UniformBlock,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn destroy_binding_set(&mut self, _bindings: ()) {}

    fn render_pass(&mut self, _pass: &RenderPass<'_, Self>) -> Result<(), EngineError> {
        Ok(())
    }

    fn submit(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn present(&mut self, _texture: &u32, _w: u32, _h: u32) -> Result<(), EngineError> {
        Ok(())
    }
}

#[allow(dead_code)]
pub fn _compile_witness() -> Result<(), EngineError> {
    // A graph builds and renders using only public APIs.
    let mut e = Engine::new(NullBackend::default(), EngineConfig::default())?;

    let src = e.create_node("src", NodeSpec::Constant([0.0, 0.0, 0.0, 1.0]))?;
    let pass = e.create_node("pass", NodeSpec::shader("void main() {}"))?;
    let trail = e.create_node("trail", NodeSpec::feedback("void main() {}"))?;
    e.connect(pass, "u_src", src)?;
    e.connect(trail, "u_src", pass)?;
    e.update_uniform(pass, "uGain", UniformValue::Float(1.0))?;
    e.set_output(Some(trail))?;

    let _report = e.render(0.0)?;
    let _out = e.output(trail, DEFAULT_OUTPUT)?;
    let _backend: NullBackend = e.shutdown();
    Ok(())
}
