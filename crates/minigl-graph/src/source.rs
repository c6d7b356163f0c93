//! Nodes without shader programs: constant colors and external assets.

use std::path::PathBuf;

use minigl_core::{EngineError, TextureFormat};
use minigl_input_media::{ImageLoad, LoadPoll, MediaError, RgbaFrame, VideoConfig, VideoDecoder};
use tracing::{info, warn};

use crate::backend::{create_target, Backend, TextureRef};
use crate::node::ProcessCtx;

/// A texture filled with one color. Static once materialized.
#[derive(Debug)]
pub struct ConstantNode<B: Backend> {
    color: [f32; 4],
    texture: Option<TextureRef<B::Texture>>,
}

impl<B: Backend> ConstantNode<B> {
    pub(crate) fn new(color: [f32; 4]) -> Self {
        Self {
            color,
            texture: None,
        }
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub(crate) fn output(&self) -> Option<TextureRef<B::Texture>> {
        self.texture.clone()
    }

    /// Allocate (if needed) and fill.
    pub(crate) fn materialize(
        &mut self,
        backend: &mut B,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(), EngineError> {
        let fits = self
            .texture
            .as_ref()
            .is_some_and(|t| t.size() == (width, height));
        if !fits {
            self.release(backend);
            self.texture = Some(create_target(backend, label, width, height, format)?);
        }
        self.fill(backend)
    }

    pub(crate) fn set_color(&mut self, backend: &mut B, color: [f32; 4]) -> Result<(), EngineError> {
        self.color = color;
        self.fill(backend)
    }

    pub(crate) fn process(
        &mut self,
        backend: &mut B,
        ctx: &ProcessCtx<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        let fits = self
            .texture
            .as_ref()
            .is_some_and(|t| t.size() == (ctx.width, ctx.height));
        if fits {
            return Ok(());
        }
        self.materialize(backend, ctx.label, ctx.width, ctx.height, ctx.format)
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        if let Some(old) = self.texture.take() {
            backend.destroy_texture(old.texture);
        }
    }

    fn fill(&mut self, backend: &mut B) -> Result<(), EngineError> {
        match &self.texture {
            Some(t) => backend.clear_texture(&t.texture, self.color),
            None => Ok(()),
        }
    }
}

/// Where an asset node gets its pixels.
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// PNG/JPEG file, decoded on a worker thread.
    Image(PathBuf),
    /// Pixels the host already has.
    Pixels(RgbaFrame),
    /// ffmpeg-decoded video; a new frame is uploaded every tick.
    Video(VideoConfig),
}

impl AssetSource {
    pub fn describe(&self) -> String {
        match self {
            AssetSource::Image(path) => path.display().to_string(),
            AssetSource::Pixels(frame) => format!("pixels {}x{}", frame.width, frame.height),
            AssetSource::Video(cfg) => cfg.file.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Error(String),
}

impl LoadState {
    /// The failure as an engine error, for callers that want to propagate it.
    pub fn error(&self) -> Option<EngineError> {
        match self {
            LoadState::Error(msg) => Some(EngineError::Asset(msg.clone())),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Pending {
    Image(ImageLoad),
    Video(VideoDecoder),
}

/// Image or video input. Decoding runs off the render tick; the tick only polls.
#[derive(Debug)]
pub struct AssetNode<B: Backend> {
    source: AssetSource,
    state: LoadState,
    pending: Option<Pending>,
    staged: Option<RgbaFrame>,
    texture: Option<TextureRef<B::Texture>>,
    /// Physical size of `texture`.
    allocated: Option<(u32, u32)>,
    native: Option<(u32, u32)>,
    /// Logical size reported by `output()` instead of the native size.
    size_override: Option<(u32, u32)>,
    dirty: bool,
    uploads: u64,
}

impl<B: Backend> AssetNode<B> {
    pub(crate) fn new(source: AssetSource) -> Self {
        Self {
            source,
            state: LoadState::Unloaded,
            pending: None,
            staged: None,
            texture: None,
            allocated: None,
            native: None,
            size_override: None,
            dirty: false,
            uploads: 0,
        }
    }

    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    pub fn load_state(&self) -> &LoadState {
        &self.state
    }

    /// Native size, known once loaded.
    pub fn native_size(&self) -> Option<(u32, u32)> {
        self.native
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of texture uploads performed.
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    /// `unloaded`/`error` -> `loading`. A no-op while loading or loaded.
    pub(crate) fn begin_load(&mut self, label: &str) {
        if matches!(self.state, LoadState::Loading | LoadState::Loaded) {
            return;
        }
        let pending = match &self.source {
            AssetSource::Image(path) => Ok(Pending::Image(ImageLoad::spawn(path.clone()))),
            AssetSource::Pixels(frame) => Ok(Pending::Image(ImageLoad::ready(label, frame.clone()))),
            AssetSource::Video(cfg) => VideoDecoder::from_config(cfg.clone()).map(Pending::Video),
        };
        match pending {
            Ok(p) => {
                self.pending = Some(p);
                self.state = LoadState::Loading;
                info!(node = label, source = %self.source.describe(), "asset loading");
            }
            Err(e) => self.fail(label, e),
        }
    }

    /// Pick up whatever the worker published since the last tick.
    pub(crate) fn poll(&mut self, label: &str) {
        let polled = match self.pending.as_mut() {
            None => return,
            Some(Pending::Image(load)) => match load.poll() {
                LoadPoll::Pending => return,
                LoadPoll::Ready(frame) => Ok(frame),
                LoadPoll::Failed(e) => Err(e),
            },
            Some(Pending::Video(decoder)) => match decoder.poll_rgba() {
                Err(MediaError::NoFrameYet) => return,
                other => other,
            },
        };

        match polled {
            Ok(frame) => {
                if !frame.is_well_formed() {
                    let err = MediaError::MalformedFrame {
                        width: frame.width,
                        height: frame.height,
                        len: frame.bytes.len(),
                    };
                    self.fail(label, err);
                    return;
                }
                if self.state == LoadState::Loading {
                    self.state = LoadState::Loaded;
                    info!(node = label, width = frame.width, height = frame.height, "asset loaded");
                }
                if matches!(self.pending, Some(Pending::Image(_))) {
                    self.pending = None;
                }
                self.native = Some((frame.width, frame.height));
                self.staged = Some(frame);
                self.dirty = true;
            }
            Err(e) => self.fail(label, e),
        }
    }

    /// Override the logical size; `None` returns to the native size.
    pub(crate) fn set_size_override(&mut self, size: Option<(u32, u32)>) {
        self.size_override = size;
        let logical = self.logical_size();
        if let (Some(t), Some((w, h))) = (self.texture.as_mut(), logical) {
            t.width = w;
            t.height = h;
        }
    }

    pub(crate) fn output(&self) -> Option<TextureRef<B::Texture>> {
        if self.state != LoadState::Loaded {
            return None;
        }
        self.texture.clone()
    }

    pub(crate) fn process(
        &mut self,
        backend: &mut B,
        ctx: &ProcessCtx<'_, B::Texture>,
    ) -> Result<(), EngineError> {
        self.poll(ctx.label);
        if self.state != LoadState::Loaded || !self.dirty {
            return Ok(());
        }
        let Some(frame) = self.staged.take() else {
            return Ok(());
        };

        let frame_size = (frame.width, frame.height);
        if self.texture.is_none() || self.allocated != Some(frame_size) {
            self.release(backend);
            let mut target = create_target(
                backend,
                ctx.label,
                frame.width,
                frame.height,
                TextureFormat::Rgba8,
            )?;
            if let Some((w, h)) = self.size_override {
                target.width = w;
                target.height = h;
            }
            self.allocated = Some(frame_size);
            self.texture = Some(target);
        }
        if let Some(t) = self.texture.as_ref() {
            backend.upload_rgba(&t.texture, frame.width, frame.height, &frame.bytes)?;
            self.uploads += 1;
        }

        // Videos stay dirty: the next tick uploads the next frame.
        self.dirty = matches!(self.pending, Some(Pending::Video(_)));
        Ok(())
    }

    pub(crate) fn release(&mut self, backend: &mut B) {
        if let Some(old) = self.texture.take() {
            backend.destroy_texture(old.texture);
        }
        self.allocated = None;
    }

    fn logical_size(&self) -> Option<(u32, u32)> {
        self.size_override.or(self.native)
    }

    fn fail(&mut self, label: &str, err: MediaError) {
        warn!(node = label, source = %self.source.describe(), error = %err, "asset failed to load");
        self.pending = None;
        self.staged = None;
        self.dirty = false;
        self.state = LoadState::Error(err.to_string());
    }
}
