use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use crate::{MediaError, RgbaFrame};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Output width (pixels). Also the node's native width.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height (pixels). Also the node's native height.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Nominal fps, used only for validation and logs; ffmpeg paces by source timestamps.
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Input file path.
    pub file: String,

    /// Whether to loop the video.
    #[serde(default = "default_loop", rename = "loop")]
    pub r#loop: bool,

    /// Optional explicit ffmpeg binary path.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    360
}
fn default_fps() -> u32 {
    30
}
fn default_loop() -> bool {
    true
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.file.trim().is_empty() {
            return Err(MediaError::InvalidConfig("file is empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(MediaError::InvalidConfig("width/height must be > 0".into()));
        }
        if self.fps == 0 {
            return Err(MediaError::InvalidConfig("fps must be > 0".into()));
        }
        Ok(())
    }
}

/// What the worker has published so far. `failure` is terminal: once set, the
/// worker has exited and no further frames arrive.
#[derive(Default)]
struct Feed {
    latest: Option<(u64, RgbaFrame)>,
    failure: Option<MediaError>,
}

type SharedFeed = Arc<Mutex<Feed>>;

/// Consecutive ffmpeg runs that may end without a frame before a looping
/// stream gives up.
const MAX_EMPTY_RUNS: u32 = 3;
const RESPAWN_BACKOFF: Duration = Duration::from_millis(250);
const STOP_POLL: Duration = Duration::from_millis(10);

/// Streams decoded RGBA frames from an ffmpeg child process on a worker thread.
pub struct VideoDecoder {
    cfg: VideoConfig,
    feed: SharedFeed,
    produced: Arc<AtomicU64>,
    taken: u64,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl fmt::Debug for VideoDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The worker owns an OS process; only report what the render tick can see.
        f.debug_struct("VideoDecoder")
            .field("cfg", &self.cfg)
            .field("produced", &self.produced.load(Ordering::SeqCst))
            .field("taken", &self.taken)
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl VideoDecoder {
    pub fn from_config(cfg: VideoConfig) -> Result<Self, MediaError> {
        cfg.validate()?;

        let feed = SharedFeed::default();
        let produced = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let stream = Stream {
            cfg: cfg.clone(),
            ffmpeg: locate_ffmpeg(cfg.ffmpeg_path.as_deref()),
            feed: Arc::clone(&feed),
            produced: Arc::clone(&produced),
            stop: Arc::clone(&stop),
        };

        let worker = thread::Builder::new()
            .name("minigl-video-decode".to_string())
            .spawn(move || stream.run())
            .map_err(|e| MediaError::Worker(e.to_string()))?;

        Ok(Self {
            cfg,
            feed,
            produced,
            taken: 0,
            stop,
            worker: Some(worker),
        })
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MediaError::InvalidConfig(format!("read json: {e}")))?;
        let cfg: VideoConfig = serde_json::from_str(&text)
            .map_err(|e| MediaError::InvalidConfig(format!("parse json: {e}")))?;
        Self::from_config(cfg)
    }

    pub fn config(&self) -> &VideoConfig {
        &self.cfg
    }

    /// Number of frames the worker has published so far.
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    /// Non-blocking. Returns a frame only when it is newer than the last one
    /// returned; otherwise `NoFrameYet`. A worker that stopped before producing
    /// anything reports why, once.
    pub fn poll_rgba(&mut self) -> Result<RgbaFrame, MediaError> {
        let mut feed = self.feed.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((seq, frame)) = feed.latest.as_ref() {
            if *seq > self.taken {
                self.taken = *seq;
                return Ok(frame.clone());
            }
            return Err(MediaError::NoFrameYet);
        }
        match feed.failure.take() {
            Some(e) => Err(e),
            None => Err(MediaError::NoFrameYet),
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

// ---------------- worker ----------------

/// How one ffmpeg run ended.
enum RunEnd {
    /// The decoder was dropped mid-run.
    Stopped,
    /// stdout closed after this many frames.
    Drained(u64),
}

struct Stream {
    cfg: VideoConfig,
    ffmpeg: PathBuf,
    feed: SharedFeed,
    produced: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

impl Stream {
    fn run(self) {
        let mut empty_runs = 0u32;
        loop {
            let frames = match self.run_once() {
                Ok(RunEnd::Stopped) => return,
                Ok(RunEnd::Drained(n)) => n,
                Err(e) => {
                    let err = if e.kind() == io::ErrorKind::NotFound {
                        MediaError::FfmpegNotFound
                    } else {
                        MediaError::Spawn(e)
                    };
                    warn!(ffmpeg = %self.ffmpeg.display(), error = %err, "video worker stopped");
                    self.publish_failure(err);
                    return;
                }
            };

            empty_runs = if frames == 0 { empty_runs + 1 } else { 0 };
            let gave_up = !self.cfg.r#loop || empty_runs >= MAX_EMPTY_RUNS;
            if gave_up {
                if self.produced.load(Ordering::SeqCst) == 0 {
                    warn!(file = %self.cfg.file, "ffmpeg exited before producing a frame");
                    self.publish_failure(MediaError::FfmpegExited);
                } else {
                    debug!(file = %self.cfg.file, "video stream ended; holding last frame");
                }
                return;
            }

            debug!(file = %self.cfg.file, frames, "video stream ended; respawning");
            if frames == 0 && !self.sleep(RESPAWN_BACKOFF) {
                return;
            }
        }
    }

    /// Spawn ffmpeg and read frames until stdout closes or a stop is requested.
    fn run_once(&self) -> io::Result<RunEnd> {
        let mut child = Command::new(&self.ffmpeg)
            .args(ffmpeg_args(&self.cfg))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let end = match child.stdout.take() {
            Some(stdout) => self.read_frames(stdout),
            None => RunEnd::Drained(0),
        };
        let _ = child.kill();
        let _ = child.wait();
        Ok(end)
    }

    fn read_frames(&self, mut stdout: impl Read) -> RunEnd {
        let (w, h) = (self.cfg.width, self.cfg.height);
        let mut buf = vec![0u8; (w as usize) * (h as usize) * 4];
        let mut frames = 0;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return RunEnd::Stopped;
            }
            if stdout.read_exact(&mut buf).is_err() {
                return RunEnd::Drained(frames);
            }
            frames += 1;
            let seq = self.produced.fetch_add(1, Ordering::SeqCst) + 1;
            let frame = RgbaFrame {
                width: w,
                height: h,
                bytes: buf.clone(),
            };
            self.lock().latest = Some((seq, frame));
        }
    }

    fn publish_failure(&self, err: MediaError) {
        self.lock().failure = Some(err);
    }

    /// Sleep in short steps; false when a stop arrived meanwhile.
    fn sleep(&self, total: Duration) -> bool {
        let mut left = total;
        while !left.is_zero() {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            let step = left.min(STOP_POLL);
            thread::sleep(step);
            left -= step;
        }
        !self.stop.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Feed> {
        self.feed.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// ffmpeg arguments: real-time pacing, scaled to the configured size, flipped
/// so rows come out bottom-up (GL texture origin), raw RGBA on stdout.
fn ffmpeg_args(cfg: &VideoConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-re"]
        .into_iter()
        .map(String::from)
        .collect();
    if cfg.r#loop {
        args.extend(["-stream_loop", "-1"].map(String::from));
    }
    args.extend([
        "-i".into(),
        cfg.file.clone(),
        "-vf".into(),
        format!("scale={}:{},vflip", cfg.width, cfg.height),
        "-pix_fmt".into(),
        "rgba".into(),
        "-f".into(),
        "rawvideo".into(),
        "pipe:1".into(),
    ]);
    args
}

/// The config's path, then `MINIGL_FFMPEG`, then a bundled binary at
/// `<exe>/../vendor/ffmpeg/`, then plain `ffmpeg` from `PATH`.
fn locate_ffmpeg(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }
    if let Some(p) = std::env::var_os("MINIGL_FFMPEG") {
        return PathBuf::from(p);
    }
    bundled_ffmpeg().unwrap_or_else(|| PathBuf::from(ffmpeg_filename()))
}

fn bundled_ffmpeg() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join("../vendor/ffmpeg").join(ffmpeg_filename());
    candidate.exists().then_some(candidate)
}

fn ffmpeg_filename() -> &'static OsStr {
    OsStr::new(if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" })
}
