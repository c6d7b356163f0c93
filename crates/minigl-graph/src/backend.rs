//! The resource backend seam.
//!
//! The engine never touches a graphics API directly. Everything it needs from the
//! GPU goes through [`Backend`]: textures, compiled pipelines, binding sets, render
//! passes, submission and presentation. Handles are associated types so each backend
//! keeps its own object model (GL names, recorded ids, ...).

use std::fmt::Debug;

use minigl_core::{EngineError, TextureFormat};

use crate::shader::ShaderProgram;
use crate::uniforms::UniformBlock;

/// A backend texture plus the logical size the producing node assigns to it.
///
/// This is what `output()` hands out: a read-only view. The producing node stays the
/// only owner of the underlying texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRef<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
}

impl<T> TextureRef<T> {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub program: &'a ShaderProgram,
    /// Sampler names the pipeline must bind, sorted.
    pub texture_inputs: &'a [String],
    /// Number of simultaneous color outputs (1..=4).
    pub color_targets: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampler {
    #[default]
    Linear,
    Nearest,
}

/// One texture bound under a sampler name.
#[derive(Debug)]
pub struct TextureBinding<'a, T> {
    pub name: &'a str,
    pub texture: &'a T,
    pub sampler: Sampler,
}

/// What happens to the color targets before the draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearPolicy {
    Clear([f32; 4]),
    Load,
}

/// One draw into 1..=4 color targets, all the same size.
#[derive(Debug)]
pub struct RenderPass<'a, B: Backend + ?Sized> {
    pub label: &'a str,
    pub pipeline: &'a B::Pipeline,
    pub bindings: &'a B::BindingSet,
    pub targets: &'a [B::Texture],
    pub clear: ClearPolicy,
    pub width: u32,
    pub height: u32,
}

/// GPU capability the engine consumes.
///
/// Implementations must be usable from the single render thread only; the engine
/// never calls into a backend concurrently.
pub trait Backend {
    type Texture: Clone + PartialEq + Debug;
    type Pipeline: Debug;
    type BindingSet: Debug;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<Self::Texture, EngineError>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Fill the whole texture with one color.
    fn clear_texture(&mut self, texture: &Self::Texture, rgba: [f32; 4])
        -> Result<(), EngineError>;

    /// Replace the texture's contents with tightly packed RGBA8 rows.
    fn upload_rgba(
        &mut self,
        texture: &Self::Texture,
        width: u32,
        height: u32,
        bytes: &[u8],
    ) -> Result<(), EngineError>;

    fn compile_pipeline(&mut self, desc: &PipelineDesc<'_>)
        -> Result<Self::Pipeline, EngineError>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    fn create_binding_set(
        &mut self,
        pipeline: &Self::Pipeline,
        textures: &[TextureBinding<'_, Self::Texture>],
        uniforms: &UniformBlock,
    ) -> Result<Self::BindingSet, EngineError>;
    fn destroy_binding_set(&mut self, bindings: Self::BindingSet);

    fn render_pass(&mut self, pass: &RenderPass<'_, Self>) -> Result<(), EngineError>;

    /// Flush everything encoded this tick.
    fn submit(&mut self) -> Result<(), EngineError>;

    /// Show `texture` on the display surface.
    fn present(&mut self, texture: &Self::Texture, width: u32, height: u32)
        -> Result<(), EngineError>;

    /// The display surface changed size.
    fn resize_surface(&mut self, _width: u32, _height: u32) {}
}

pub(crate) fn create_target<B: Backend>(
    backend: &mut B,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> Result<TextureRef<B::Texture>, EngineError> {
    let texture = backend.create_texture(&TextureDesc {
        label,
        width,
        height,
        format,
    })?;
    Ok(TextureRef {
        texture,
        width,
        height,
    })
}
