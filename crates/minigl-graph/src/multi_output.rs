//! Multi-render-target node: one pass, up to four color outputs.

use minigl_core::{EngineError, MAX_COLOR_TARGETS};

use crate::backend::{create_target, Backend, TextureRef};
use crate::node::ProcessCtx;
use crate::shader::{ShaderCore, ShaderDraw, ShaderProgram};

#[derive(Debug)]
pub struct MultiOutputNode<B: Backend> {
    core: ShaderCore<B>,
    count: usize,
    targets: Vec<TextureRef<B::Texture>>,
}

impl<B: Backend> MultiOutputNode<B> {
    /// `count` must be within `1..=max`; `max` never exceeds [`MAX_COLOR_TARGETS`].
    pub(crate) fn new(program: ShaderProgram, count: usize, max: u32) -> Result<Self, EngineError> {
        let max = max.min(MAX_COLOR_TARGETS) as usize;
        if count == 0 || count > max {
            return Err(EngineError::TooManyTargets {
                requested: count,
                max,
            });
        }
        Ok(Self {
            core: ShaderCore::new(program),
            count,
            targets: Vec::with_capacity(count),
        })
    }

    pub fn core(&self) -> &ShaderCore<B> {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut ShaderCore<B> {
        &mut self.core
    }

    pub fn target_count(&self) -> usize {
        self.count
    }

    pub(crate) fn output(&self, index: usize) -> Option<TextureRef<B::Texture>> {
        self.targets.get(index).cloned()
    }

    pub(crate) fn process(
        &mut self,
        backend: &mut B,
        ctx: &ProcessCtx<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        let fits = self.targets.len() == self.count
            && self
                .targets
                .iter()
                .all(|t| t.size() == (ctx.width, ctx.height));
        if !fits {
            self.release_targets(backend);
            for _ in 0..self.count {
                let target = create_target(backend, ctx.label, ctx.width, ctx.height, ctx.format)?;
                self.targets.push(target);
            }
        }

        let textures: Vec<B::Texture> = self.targets.iter().map(|t| t.texture.clone()).collect();
        self.core.draw(
            backend,
            ShaderDraw {
                label: ctx.label,
                inputs: ctx.inputs,
                extra: None,
                globals: ctx.globals,
                targets: &textures,
                width: ctx.width,
                height: ctx.height,
                clear: ctx.clear,
            },
        )
    }

    pub(crate) fn resize(&mut self, backend: &mut B) {
        self.release_targets(backend);
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        self.release_targets(backend);
        self.core.release(backend);
    }

    fn release_targets(&mut self, backend: &mut B) {
        for target in self.targets.drain(..) {
            backend.destroy_texture(target.texture);
        }
    }
}
