//! Shader programs, the shape-keyed pipeline cache and the plain shader node.

use std::collections::BTreeMap;

use minigl_core::EngineError;
use tracing::debug;

use crate::backend::{
    create_target, Backend, ClearPolicy, PipelineDesc, RenderPass, Sampler, TextureBinding,
    TextureRef,
};
use crate::node::{BoundInput, ProcessCtx};
use crate::uniforms::{UniformBlock, UniformValue};

/// GLSL sources for one node. A missing vertex stage means the backend's
/// fullscreen-triangle vertex shader.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderProgram {
    #[cfg_attr(feature = "serde", serde(default))]
    pub label: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub vertex: Option<String>,
    pub fragment: String,
}

impl ShaderProgram {
    pub fn fragment(src: impl Into<String>) -> Self {
        Self {
            label: None,
            vertex: None,
            fragment: src.into(),
        }
    }

    pub fn with_vertex(mut self, src: impl Into<String>) -> Self {
        self.vertex = Some(src.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// What a compiled pipeline was built for: the sampler names it binds and how many
/// color targets it writes. A pipeline is reusable only while this stays equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputShape {
    pub textures: Vec<String>,
    pub color_targets: u32,
}

impl InputShape {
    pub(crate) fn new<'a>(names: impl IntoIterator<Item = &'a str>, color_targets: u32) -> Self {
        let mut textures: Vec<String> = names.into_iter().map(str::to_string).collect();
        textures.sort();
        textures.dedup();
        Self {
            textures,
            color_targets,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CachedPipeline<P> {
    shape: InputShape,
    pipeline: P,
}

impl<P> CachedPipeline<P> {
    fn is_stale(&self, shape: &InputShape) -> bool {
        &self.shape != shape
    }
}

/// One draw request for [`ShaderCore::draw`].
pub(crate) struct ShaderDraw<'a, T> {
    pub label: &'a str,
    pub inputs: &'a [BoundInput<T>],
    /// Out-of-band texture bound next to the connected inputs (feedback history).
    pub extra: Option<(&'a str, &'a T)>,
    pub globals: &'a UniformBlock,
    pub targets: &'a [T],
    pub width: u32,
    pub height: u32,
    pub clear: [f32; 4],
}

/// Program + uniforms + cached pipeline. Shared by every shader-like node kind.
#[derive(Debug)]
pub struct ShaderCore<B: Backend> {
    program: ShaderProgram,
    uniforms: BTreeMap<String, UniformValue>,
    pipeline: Option<CachedPipeline<B::Pipeline>>,
    bindings: Option<B::BindingSet>,
    compiles: u64,
}

impl<B: Backend> ShaderCore<B> {
    pub(crate) fn new(program: ShaderProgram) -> Self {
        Self {
            program,
            uniforms: BTreeMap::new(),
            pipeline: None,
            bindings: None,
            compiles: 0,
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn uniforms(&self) -> &BTreeMap<String, UniformValue> {
        &self.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    /// How many times this node has compiled a pipeline.
    pub fn compile_count(&self) -> u64 {
        self.compiles
    }

    /// Shape of the currently cached pipeline, if any.
    pub fn pipeline_shape(&self) -> Option<&InputShape> {
        self.pipeline.as_ref().map(|c| &c.shape)
    }

    pub(crate) fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_string(), value);
    }

    pub(crate) fn set_program(&mut self, backend: &mut B, program: ShaderProgram) {
        self.release(backend);
        self.program = program;
    }

    pub(crate) fn draw(
        &mut self,
        backend: &mut B,
        draw: ShaderDraw<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        let shape = InputShape::new(
            draw.inputs
                .iter()
                .map(|i| i.port.as_str())
                .chain(draw.extra.map(|(name, _)| name)),
            draw.targets.len() as u32,
        );

        if self.pipeline.as_ref().map_or(true, |c| c.is_stale(&shape)) {
            self.release(backend);
            let pipeline = backend.compile_pipeline(&PipelineDesc {
                label: draw.label,
                program: &self.program,
                texture_inputs: &shape.textures,
                color_targets: shape.color_targets,
            })?;
            self.compiles += 1;
            debug!(
                node = draw.label,
                inputs = ?shape.textures,
                targets = shape.color_targets,
                "compiled pipeline"
            );
            self.pipeline = Some(CachedPipeline { shape, pipeline });
        }

        let Some(cached) = self.pipeline.as_ref() else {
            return Err(EngineError::other("pipeline missing after compile"));
        };

        let mut textures: Vec<TextureBinding<'_, B::Texture>> = draw
            .inputs
            .iter()
            .map(|i| TextureBinding {
                name: i.port.as_str(),
                texture: &i.texture.texture,
                sampler: Sampler::Linear,
            })
            .collect();
        if let Some((name, texture)) = draw.extra {
            textures.push(TextureBinding {
                name,
                texture,
                sampler: Sampler::Linear,
            });
        }

        // Node uniforms shadow globals of the same name.
        let mut block = draw.globals.clone();
        for (name, value) in &self.uniforms {
            block.set(name, *value);
        }

        let set = backend.create_binding_set(&cached.pipeline, &textures, &block)?;
        if let Some(old) = self.bindings.replace(set) {
            backend.destroy_binding_set(old);
        }
        let Some(bindings) = self.bindings.as_ref() else {
            return Err(EngineError::other("binding set missing after rebuild"));
        };

        backend.render_pass(&RenderPass {
            label: draw.label,
            pipeline: &cached.pipeline,
            bindings,
            targets: draw.targets,
            clear: ClearPolicy::Clear(draw.clear),
            width: draw.width,
            height: draw.height,
        })
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        if let Some(old) = self.bindings.take() {
            backend.destroy_binding_set(old);
        }
        if let Some(old) = self.pipeline.take() {
            backend.destroy_pipeline(old.pipeline);
        }
    }
}

/// A program rendering into one backing texture.
#[derive(Debug)]
pub struct ShaderNode<B: Backend> {
    core: ShaderCore<B>,
    target: Option<TextureRef<B::Texture>>,
}

impl<B: Backend> ShaderNode<B> {
    pub(crate) fn new(program: ShaderProgram) -> Self {
        Self {
            core: ShaderCore::new(program),
            target: None,
        }
    }

    pub fn core(&self) -> &ShaderCore<B> {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut ShaderCore<B> {
        &mut self.core
    }

    pub(crate) fn output(&self) -> Option<TextureRef<B::Texture>> {
        self.target.clone()
    }

    pub(crate) fn process(
        &mut self,
        backend: &mut B,
        ctx: &ProcessCtx<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        let fits = self
            .target
            .as_ref()
            .is_some_and(|t| t.size() == (ctx.width, ctx.height));
        if !fits {
            self.release_target(backend);
            self.target = Some(create_target(
                backend, ctx.label, ctx.width, ctx.height, ctx.format,
            )?);
        }
        let Some(target) = self.target.as_ref() else {
            return Ok(());
        };

        self.core.draw(
            backend,
            ShaderDraw {
                label: ctx.label,
                inputs: ctx.inputs,
                extra: None,
                globals: ctx.globals,
                targets: std::slice::from_ref(&target.texture),
                width: ctx.width,
                height: ctx.height,
                clear: ctx.clear,
            },
        )
    }

    /// Drops the backing texture; the next `process` allocates at the new size.
    pub(crate) fn resize(&mut self, backend: &mut B) {
        self.release_target(backend);
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        self.release_target(backend);
        self.core.release(backend);
    }

    fn release_target(&mut self, backend: &mut B) {
        if let Some(old) = self.target.take() {
            backend.destroy_texture(old.texture);
        }
    }
}
