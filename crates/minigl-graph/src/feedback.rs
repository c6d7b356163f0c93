//! Ping-pong feedback node.
//!
//! Two buffers alternate roles every production: one is written, the other is
//! bound as [`FEEDBACK_INPUT`]. The history binding is out-of-band: it is not an
//! edge and the scheduler never sees it.
//!
//! Bootstrap policy: until a production completes, the history buffer is cleared
//! to transparent black before it is bound. Resizing recreates both buffers and
//! returns the node to that state.

use minigl_core::{EngineError, TextureFormat};
use tracing::debug;

use crate::backend::{create_target, Backend, TextureRef};
use crate::node::ProcessCtx;
use crate::shader::{ShaderCore, ShaderDraw, ShaderProgram};

/// Sampler name under which a feedback node sees its previous frame.
pub const FEEDBACK_INPUT: &str = "previous";

const TRANSPARENT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

#[derive(Debug)]
pub struct FeedbackNode<B: Backend> {
    core: ShaderCore<B>,
    buffers: Option<[TextureRef<B::Texture>; 2]>,
    initialized: bool,
    completed: Option<usize>,
}

impl<B: Backend> FeedbackNode<B> {
    pub(crate) fn new(program: ShaderProgram) -> Self {
        Self {
            core: ShaderCore::new(program),
            buffers: None,
            initialized: false,
            completed: None,
        }
    }

    pub fn core(&self) -> &ShaderCore<B> {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut ShaderCore<B> {
        &mut self.core
    }

    /// Index of the buffer the most recent completed production wrote.
    pub fn current_index(&self) -> Option<usize> {
        self.completed
    }

    /// False until the first production completes, and again after a resize.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Both buffers, if allocated.
    pub fn buffers(&self) -> Option<&[TextureRef<B::Texture>; 2]> {
        self.buffers.as_ref()
    }

    /// The buffer the last completed production wrote.
    pub(crate) fn output(&self) -> Option<TextureRef<B::Texture>> {
        let index = self.completed?;
        self.buffers.as_ref().map(|b| b[index].clone())
    }

    pub(crate) fn process(
        &mut self,
        backend: &mut B,
        ctx: &ProcessCtx<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        let fits = self
            .buffers
            .as_ref()
            .is_some_and(|b| b[0].size() == (ctx.width, ctx.height));
        if !fits {
            self.recreate(backend, ctx.label, ctx.width, ctx.height, ctx.format)?;
        }
        let Some(buffers) = self.buffers.as_ref() else {
            return Ok(());
        };

        // A failed draw leaves `completed` alone, so the next attempt writes the
        // same buffer and still reads the last good frame.
        let write = self.completed.map_or(0, |c| c ^ 1);
        let read = write ^ 1;

        if !self.initialized {
            backend.clear_texture(&buffers[read].texture, TRANSPARENT)?;
        }

        self.core.draw(
            backend,
            ShaderDraw {
                label: ctx.label,
                inputs: ctx.inputs,
                extra: Some((FEEDBACK_INPUT, &buffers[read].texture)),
                globals: ctx.globals,
                targets: std::slice::from_ref(&buffers[write].texture),
                width: ctx.width,
                height: ctx.height,
                clear: ctx.clear,
            },
        )?;

        self.initialized = true;
        self.completed = Some(write);
        Ok(())
    }

    /// Recreate both buffers at the new size, cleared, and restart the bootstrap.
    pub(crate) fn resize(
        &mut self,
        backend: &mut B,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(), EngineError> {
        self.recreate(backend, label, width, height, format)
    }

    fn recreate(
        &mut self,
        backend: &mut B,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(), EngineError> {
        self.release_buffers(backend);
        self.initialized = false;
        self.completed = None;

        let a = create_target(backend, label, width, height, format)?;
        let b = match create_target(backend, label, width, height, format) {
            Ok(b) => b,
            Err(e) => {
                backend.destroy_texture(a.texture);
                return Err(e);
            }
        };
        let buffers = self.buffers.insert([a, b]);
        for buffer in buffers.iter() {
            backend.clear_texture(&buffer.texture, TRANSPARENT)?;
        }
        debug!(node = label, width, height, "feedback buffers recreated");
        Ok(())
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        self.release_buffers(backend);
        self.core.release(backend);
    }

    fn release_buffers(&mut self, backend: &mut B) {
        if let Some([a, b]) = self.buffers.take() {
            backend.destroy_texture(a.texture);
            backend.destroy_texture(b.texture);
        }
    }
}
