use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{MediaError, RgbaFrame};

type Slot = Arc<Mutex<Option<Result<RgbaFrame, MediaError>>>>;

/// Result of polling a pending load.
#[derive(Debug)]
pub enum LoadPoll {
    Pending,
    Ready(RgbaFrame),
    Failed(MediaError),
}

/// A single image decode running on a worker thread.
///
/// The worker publishes its result into a shared slot; the render tick only ever
/// polls that slot. Dropping the handle cancels the load: the worker checks the
/// flag before publishing and discards its result.
#[derive(Debug)]
pub struct ImageLoad {
    origin: String,
    slot: Slot,
    cancelled: Arc<AtomicBool>,
}

impl ImageLoad {
    /// Decode an image file (PNG/JPEG) off the calling thread.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let origin = path.display().to_string();
        Self::spawn_with(origin, move || decode_file(&path))
    }

    /// Decode an encoded image already in memory off the calling thread.
    pub fn from_encoded(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        let origin = label.into();
        let origin_for_worker = origin.clone();
        Self::spawn_with(origin, move || decode_bytes(&origin_for_worker, &bytes))
    }

    /// A load that is already complete with `frame`.
    pub fn ready(label: impl Into<String>, frame: RgbaFrame) -> Self {
        let result = if frame.is_well_formed() {
            Ok(frame)
        } else {
            Err(MediaError::MalformedFrame {
                width: frame.width,
                height: frame.height,
                len: frame.bytes.len(),
            })
        };
        Self {
            origin: label.into(),
            slot: Arc::new(Mutex::new(Some(result))),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_with<F>(origin: String, job: F) -> Self
    where
        F: FnOnce() -> Result<RgbaFrame, MediaError> + Send + 'static,
    {
        let slot: Slot = Arc::new(Mutex::new(None));
        let cancelled = Arc::new(AtomicBool::new(false));

        let slot_for_thread = Arc::clone(&slot);
        let cancelled_for_thread = Arc::clone(&cancelled);
        let origin_for_thread = origin.clone();

        let spawned = thread::Builder::new()
            .name("minigl-image-load".to_string())
            .spawn(move || {
                let result = job();
                if cancelled_for_thread.load(Ordering::SeqCst) {
                    debug!(origin = %origin_for_thread, "image load finished after cancel; dropped");
                    return;
                }
                *lock(&slot_for_thread) = Some(result);
            });

        if let Err(e) = spawned {
            *lock(&slot) = Some(Err(MediaError::Worker(e.to_string())));
        }

        Self {
            origin,
            slot,
            cancelled,
        }
    }

    /// Human-readable origin (path or label) for logs.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Non-blocking. A finished result is handed out exactly once; later polls
    /// report `Pending`.
    pub fn poll(&mut self) -> LoadPoll {
        match lock(&self.slot).take() {
            Some(Ok(frame)) => LoadPoll::Ready(frame),
            Some(Err(e)) => LoadPoll::Failed(e),
            None => LoadPoll::Pending,
        }
    }

    /// Poll until the load finishes or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> LoadPoll {
        let deadline = Instant::now() + timeout;
        loop {
            match self.poll() {
                LoadPoll::Pending if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(2));
                }
                other => return other,
            }
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for ImageLoad {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Result<RgbaFrame, MediaError>>> {
    // A panicking worker cannot leave the slot half-written; take the data anyway.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn decode_file(path: &Path) -> Result<RgbaFrame, MediaError> {
    let bytes = std::fs::read(path).map_err(|source| MediaError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_bytes(&path.display().to_string(), &bytes)
}

fn decode_bytes(origin: &str, bytes: &[u8]) -> Result<RgbaFrame, MediaError> {
    let img = image::load_from_memory(bytes).map_err(|e| MediaError::Decode {
        origin: origin.to_string(),
        msg: e.to_string(),
    })?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(RgbaFrame {
        width,
        height,
        bytes: rgba.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_png(name: &str, w: u32, h: u32) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut p = std::env::temp_dir();
        p.push(format!("minigl_media_{name}_{ts}.png"));
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255]));
        img.save(&p).expect("write png fixture");
        p
    }

    #[test]
    fn png_file_decodes_at_native_size() {
        let path = temp_png("native", 7, 5);
        let mut load = ImageLoad::spawn(&path);
        match load.wait(Duration::from_secs(10)) {
            LoadPoll::Ready(frame) => {
                assert_eq!((frame.width, frame.height), (7, 5));
                assert!(frame.is_well_formed());
                assert_eq!(&frame.bytes[0..4], &[10, 20, 30, 255]);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_fails() {
        let mut load = ImageLoad::spawn("/no/such/minigl/image.png");
        match load.wait(Duration::from_secs(10)) {
            LoadPoll::Failed(MediaError::Read { .. }) => {}
            other => panic!("expected Read failure, got {other:?}"),
        }
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let mut load = ImageLoad::from_encoded("garbage", vec![1, 2, 3, 4]);
        match load.wait(Duration::from_secs(10)) {
            LoadPoll::Failed(MediaError::Decode { origin, .. }) => assert_eq!(origin, "garbage"),
            other => panic!("expected Decode failure, got {other:?}"),
        }
    }

    #[test]
    fn ready_result_is_handed_out_once() {
        let mut load = ImageLoad::ready("inline", RgbaFrame::solid(2, 2, [0; 4]));
        assert!(matches!(load.poll(), LoadPoll::Ready(_)));
        assert!(matches!(load.poll(), LoadPoll::Pending));
    }

    #[test]
    fn malformed_inline_frame_fails() {
        let frame = RgbaFrame {
            width: 4,
            height: 4,
            bytes: vec![0; 3],
        };
        let mut load = ImageLoad::ready("bad", frame);
        assert!(matches!(
            load.poll(),
            LoadPoll::Failed(MediaError::MalformedFrame { len: 3, .. })
        ));
    }

    #[test]
    fn drop_marks_cancelled() {
        let load = ImageLoad::from_encoded("x", vec![0; 8]);
        let flag = Arc::clone(&load.cancelled);
        drop(load);
        assert!(flag.load(Ordering::SeqCst));
    }
}
