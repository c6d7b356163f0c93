//! Asset decoding that runs off the render tick.
//!
//! Nothing here touches GPU state: loaders hand back tightly packed RGBA8 frames and
//! the graph crate decides when to upload them.
#![deny(missing_debug_implementations)]

use std::fmt;
use std::io;
use std::path::PathBuf;

mod image_load;
mod video;

pub use image_load::{ImageLoad, LoadPoll};
pub use video::{VideoConfig, VideoDecoder};

/// A decoded frame: RGBA8, row-major, tightly packed.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl RgbaFrame {
    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let texels = (width as usize) * (height as usize);
        let mut bytes = Vec::with_capacity(texels * 4);
        for _ in 0..texels {
            bytes.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            bytes,
        }
    }

    /// True when `bytes` matches `width * height * 4`.
    pub fn is_well_formed(&self) -> bool {
        self.bytes.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

impl fmt::Debug for RgbaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbaFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error(
        "ffmpeg not found (set MINIGL_FFMPEG, config.ffmpeg_path, or ensure bundled ffmpeg exists)"
    )]
    FfmpegNotFound,

    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[from] io::Error),

    #[error("ffmpeg exited early")]
    FfmpegExited,

    #[error("no frame available yet")]
    NoFrameYet,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {origin}: {msg}")]
    Decode { origin: String, msg: String },

    #[error("frame {width}x{height} has {len} bytes, expected width*height*4")]
    MalformedFrame { width: u32, height: u32, len: usize },

    #[error("load worker could not be started: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_frame_is_well_formed() {
        let f = RgbaFrame::solid(3, 2, [1, 2, 3, 4]);
        assert!(f.is_well_formed());
        assert_eq!(&f.bytes[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn debug_does_not_dump_pixels() {
        let f = RgbaFrame::solid(64, 64, [0; 4]);
        let s = format!("{f:?}");
        assert!(s.contains("16384 bytes"), "{s}");
    }
}
