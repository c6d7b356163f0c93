//! A [`Backend`] that draws nothing and remembers everything.
//!
//! Used by tests and by hosts without a GPU context: every texture, compile, binding
//! set, pass, clear, upload and presentation is recorded so callers can assert on
//! what the engine asked for. Failures can be injected per operation.

use std::collections::BTreeMap;

use minigl_core::{EngineError, TextureFormat, MAX_COLOR_TARGETS};

use crate::backend::{Backend, ClearPolicy, PipelineDesc, RenderPass, TextureBinding, TextureDesc};
use crate::uniforms::UniformBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeadlessTexture(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub alive: bool,
    /// Color of the most recent clear (explicit or pass clear).
    pub last_clear: Option<[f32; 4]>,
    pub uploads: u32,
    /// Passes that wrote this texture.
    pub writes: u32,
}

#[derive(Debug)]
pub struct HeadlessPipeline {
    pub id: u32,
    pub label: String,
    pub texture_inputs: Vec<String>,
    pub color_targets: u32,
}

#[derive(Debug)]
pub struct HeadlessBindings {
    pub id: u32,
    pub textures: Vec<(String, HeadlessTexture)>,
    pub uniforms: UniformBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassRecord {
    pub label: String,
    pub pipeline: u32,
    pub targets: Vec<HeadlessTexture>,
    pub inputs: Vec<(String, HeadlessTexture)>,
    pub uniforms: UniformBlock,
    pub clear: ClearPolicy,
    pub width: u32,
    pub height: u32,
}

impl PassRecord {
    pub fn input(&self, name: &str) -> Option<HeadlessTexture> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u32,
    textures: BTreeMap<HeadlessTexture, TextureRecord>,
    compiles: u32,
    live_pipelines: u32,
    live_binding_sets: u32,
    passes: Vec<PassRecord>,
    submits: u32,
    presented: Vec<(HeadlessTexture, u32, u32)>,
    surface: Option<(u32, u32)>,
    fail_compile_marker: Option<String>,
    fail_textures: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles of any fragment source containing `marker` fail.
    pub fn fail_compiles_containing(&mut self, marker: impl Into<String>) {
        self.fail_compile_marker = Some(marker.into());
    }

    pub fn fail_texture_creation(&mut self, fail: bool) {
        self.fail_textures = fail;
    }

    pub fn texture(&self, texture: HeadlessTexture) -> Option<&TextureRecord> {
        self.textures.get(&texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.values().filter(|t| t.alive).count()
    }

    /// Total pipeline compiles so far.
    pub fn compile_count(&self) -> u32 {
        self.compiles
    }

    pub fn live_pipelines(&self) -> u32 {
        self.live_pipelines
    }

    pub fn live_binding_sets(&self) -> u32 {
        self.live_binding_sets
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    /// Passes recorded with this label (node name).
    pub fn passes_for(&self, label: &str) -> Vec<&PassRecord> {
        self.passes.iter().filter(|p| p.label == label).collect()
    }

    pub fn clear_passes(&mut self) {
        self.passes.clear();
    }

    pub fn submit_count(&self) -> u32 {
        self.submits
    }

    pub fn presented(&self) -> &[(HeadlessTexture, u32, u32)] {
        &self.presented
    }

    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.surface
    }

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn live(&mut self, texture: &HeadlessTexture) -> Result<&mut TextureRecord, EngineError> {
        match self.textures.get_mut(texture) {
            Some(t) if t.alive => Ok(t),
            _ => Err(EngineError::Backend(format!(
                "texture {} is not alive",
                texture.0
            ))),
        }
    }
}

impl Backend for HeadlessBackend {
    type Texture = HeadlessTexture;
    type Pipeline = HeadlessPipeline;
    type BindingSet = HeadlessBindings;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<HeadlessTexture, EngineError> {
        if self.fail_textures {
            return Err(EngineError::BackendCreate(format!(
                "texture '{}' refused (injected)",
                desc.label
            )));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(EngineError::BackendCreate(format!(
                "texture '{}' has zero size",
                desc.label
            )));
        }
        let id = HeadlessTexture(self.alloc_id());
        self.textures.insert(
            id,
            TextureRecord {
                label: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
                format: desc.format,
                alive: true,
                last_clear: None,
                uploads: 0,
                writes: 0,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        if let Some(t) = self.textures.get_mut(&texture) {
            t.alive = false;
        }
    }

    fn clear_texture(&mut self, texture: &HeadlessTexture, rgba: [f32; 4]) -> Result<(), EngineError> {
        self.live(texture)?.last_clear = Some(rgba);
        Ok(())
    }

    fn upload_rgba(
        &mut self,
        texture: &HeadlessTexture,
        width: u32,
        height: u32,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        let expected = (width as usize) * (height as usize) * 4;
        if bytes.len() != expected {
            return Err(EngineError::Backend(format!(
                "upload of {width}x{height} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let t = self.live(texture)?;
        if (t.width, t.height) != (width, height) {
            return Err(EngineError::Backend(format!(
                "upload {width}x{height} into {}x{} texture",
                t.width, t.height
            )));
        }
        t.uploads += 1;
        Ok(())
    }

    fn compile_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<HeadlessPipeline, EngineError> {
        if let Some(marker) = &self.fail_compile_marker {
            if desc.program.fragment.contains(marker.as_str()) {
                return Err(EngineError::ShaderCompile(format!(
                    "{}: injected failure",
                    desc.label
                )));
            }
        }
        if desc.color_targets == 0 || desc.color_targets > MAX_COLOR_TARGETS {
            return Err(EngineError::TooManyTargets {
                requested: desc.color_targets as usize,
                max: MAX_COLOR_TARGETS as usize,
            });
        }
        self.compiles += 1;
        self.live_pipelines += 1;
        Ok(HeadlessPipeline {
            id: self.alloc_id(),
            label: desc.label.to_string(),
            texture_inputs: desc.texture_inputs.to_vec(),
            color_targets: desc.color_targets,
        })
    }

    fn destroy_pipeline(&mut self, _pipeline: HeadlessPipeline) {
        self.live_pipelines = self.live_pipelines.saturating_sub(1);
    }

    fn create_binding_set(
        &mut self,
        pipeline: &HeadlessPipeline,
        textures: &[TextureBinding<'_, HeadlessTexture>],
        uniforms: &UniformBlock,
    ) -> Result<HeadlessBindings, EngineError> {
        for binding in textures {
            if !pipeline.texture_inputs.iter().any(|n| n == binding.name) {
                return Err(EngineError::Backend(format!(
                    "pipeline '{}' has no sampler '{}'",
                    pipeline.label, binding.name
                )));
            }
            self.live(binding.texture)?;
        }
        self.live_binding_sets += 1;
        Ok(HeadlessBindings {
            id: self.alloc_id(),
            textures: textures
                .iter()
                .map(|b| (b.name.to_string(), *b.texture))
                .collect(),
            uniforms: uniforms.clone(),
        })
    }

    fn destroy_binding_set(&mut self, _bindings: HeadlessBindings) {
        self.live_binding_sets = self.live_binding_sets.saturating_sub(1);
    }

    fn render_pass(&mut self, pass: &RenderPass<'_, Self>) -> Result<(), EngineError> {
        if pass.targets.len() as u32 != pass.pipeline.color_targets {
            return Err(EngineError::Backend(format!(
                "pass '{}' has {} targets, pipeline declares {}",
                pass.label,
                pass.targets.len(),
                pass.pipeline.color_targets
            )));
        }
        for target in pass.targets {
            if pass.bindings.textures.iter().any(|(_, t)| t == target) {
                return Err(EngineError::Backend(format!(
                    "pass '{}' samples texture {} while writing it",
                    pass.label, target.0
                )));
            }
            let record = self.live(target)?;
            if (record.width, record.height) != (pass.width, pass.height) {
                return Err(EngineError::Backend(format!(
                    "pass '{}' is {}x{} but target is {}x{}",
                    pass.label, pass.width, pass.height, record.width, record.height
                )));
            }
            record.writes += 1;
            if let ClearPolicy::Clear(rgba) = pass.clear {
                record.last_clear = Some(rgba);
            }
        }
        self.passes.push(PassRecord {
            label: pass.label.to_string(),
            pipeline: pass.pipeline.id,
            targets: pass.targets.to_vec(),
            inputs: pass.bindings.textures.clone(),
            uniforms: pass.bindings.uniforms.clone(),
            clear: pass.clear,
            width: pass.width,
            height: pass.height,
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<(), EngineError> {
        self.submits += 1;
        Ok(())
    }

    fn present(&mut self, texture: &HeadlessTexture, width: u32, height: u32) -> Result<(), EngineError> {
        self.live(texture)?;
        self.presented.push((*texture, width, height));
        Ok(())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = Some((width, height));
    }
}
