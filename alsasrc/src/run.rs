//! CLI surface and wiring: builds the sample spec and buffer geometry
//! from the recognized configuration options, opens the ALSA
//! driver, constructs the capture engine, spawns the capture thread, and
//! drives the main-thread event-loop bridge until SIGINT or a fatal
//! unload request.

use std::os::fd::AsRawFd;
use std::sync::Arc;

use structopt::StructOpt;

use alsasrc_core::geometry::GeometryError;
use alsasrc_core::spec::{SampleFormat, SampleSpec};
use alsasrc_core::BufferGeometry;
use alsasrc_driver::{Driver, PollEvents};
use alsasrc_engine::downstream::{HeapPool, MemoryPool};
use alsasrc_engine::message::{channel, ControlMessage, RequestedState};
use alsasrc_engine::{CaptureConfig, CaptureEngine, EngineError};

use crate::event_loop::{EventLoop, PollEventLoop};
use crate::sink::{DemoDownstream, ProcessUnloadSink};
use crate::signal;

const MIN_SLEEP_MS: u64 = 10;
const MIN_WAKEUP_MS: u64 = 4;
const POOL_BLOCK_BYTES: usize = 64 * 1024;

#[derive(Debug, derive_more::From)]
pub enum RunError {
    Geometry(GeometryError),
    Engine(EngineError),
    Signal(nix::Error),
    #[cfg(target_os = "linux")]
    Open(alsasrc_driver::alsa::OpenError),
    UnsupportedPlatform,
    FatalCapture,
}

#[derive(StructOpt)]
pub struct Opt {
    /// Driver-level device identifier
    #[structopt(long, env = "ALSASRC_DEVICE", default_value = "default")]
    pub device: String,

    /// Source name, for collision-policy logging only in this demo
    #[structopt(long, env = "ALSASRC_SOURCE_NAME", default_value = "alsasrc")]
    pub source_name: String,

    #[structopt(long, env = "ALSASRC_RATE", default_value = "44100")]
    pub rate: u32,

    #[structopt(long, env = "ALSASRC_CHANNELS", default_value = "2")]
    pub channels: u16,

    #[structopt(long, env = "ALSASRC_FORMAT", default_value = "s16le")]
    pub format: String,

    /// Base hardware geometry: frames per fragment
    #[structopt(long, env = "ALSASRC_FRAGMENT_SIZE", default_value = "1024")]
    pub fragment_size: u64,

    /// Base hardware geometry: number of fragments
    #[structopt(long, env = "ALSASRC_FRAGMENTS", default_value = "4")]
    pub fragments: u64,

    /// Timer-scheduling tuning, milliseconds
    #[structopt(long, env = "ALSASRC_TSCHED_BUFFER_MS", default_value = "2000")]
    pub tsched_buffer_ms: u64,

    #[structopt(long, env = "ALSASRC_TSCHED_WATERMARK_MS", default_value = "20")]
    pub tsched_watermark_ms: u64,

    #[structopt(long, env = "ALSASRC_WATERMARK_STEP_MS", default_value = "10")]
    pub watermark_step_ms: u64,

    /// Request the zero-copy mmap path
    #[structopt(long, env = "ALSASRC_MMAP")]
    pub mmap: bool,

    /// Request timer scheduling (silently ignored if unavailable)
    #[structopt(long, env = "ALSASRC_TSCHED")]
    pub tsched: bool,

    /// Skip dB-scale volume negotiation
    #[structopt(long, env = "ALSASRC_IGNORE_DB")]
    pub ignore_db: bool,
}

impl Opt {
    fn sample_spec(&self) -> SampleSpec {
        let format = match self.format.to_lowercase().as_str() {
            "f32le" => SampleFormat::F32LE,
            _ => SampleFormat::S16LE,
        };

        SampleSpec { format, rate: self.rate, channels: self.channels }
    }
}

#[cfg(target_os = "linux")]
fn open_driver(opt: &Opt, spec: &SampleSpec) -> Result<Box<dyn Driver>, RunError> {
    use alsasrc_driver::alsa::{AlsaDriver, OpenOptions};

    let open_opts = OpenOptions {
        device: &opt.device,
        spec: *spec,
        fragment_frames: opt.fragment_size as i64,
        n_fragments: opt.fragments as i64,
        mmap: opt.mmap,
    };

    let driver: Box<dyn Driver> = match spec.format {
        SampleFormat::S16LE => Box::new(AlsaDriver::<i16>::open(&open_opts, spec)?),
        SampleFormat::F32LE => Box::new(AlsaDriver::<f32>::open(&open_opts, spec)?),
    };

    Ok(driver)
}

#[cfg(not(target_os = "linux"))]
fn open_driver(_opt: &Opt, _spec: &SampleSpec) -> Result<Box<dyn Driver>, RunError> {
    Err(RunError::UnsupportedPlatform)
}

pub fn run(opt: Opt) -> Result<(), RunError> {
    if opt.ignore_db {
        log::debug!("ignore_db set: skipping dB-scale volume negotiation (not implemented by this backend)");
    }

    let spec = opt.sample_spec();

    let fragment_size_bytes = spec.frame_align(opt.fragment_size * u64::from(spec.frame_size().0));
    let min_sleep_bytes = spec.usec_to_bytes(MIN_SLEEP_MS * 1_000);
    let min_wakeup_bytes = spec.usec_to_bytes(MIN_WAKEUP_MS * 1_000);
    let tsched_watermark_bytes = spec.usec_to_bytes(opt.tsched_watermark_ms * 1_000);

    let geometry = BufferGeometry::negotiate(
        &spec,
        fragment_size_bytes,
        opt.fragments,
        0,
        min_sleep_bytes,
        min_wakeup_bytes,
        tsched_watermark_bytes,
    )?;

    let driver = open_driver(&opt, &spec)?;

    let min_latency_usec = MIN_SLEEP_MS * 1_000;
    let max_latency_usec = opt.tsched_buffer_ms * 1_000;

    let downstream = Arc::new(DemoDownstream::new(min_latency_usec, max_latency_usec));
    let unload = Arc::new(ProcessUnloadSink::default());
    let pool: Arc<dyn MemoryPool> = Arc::new(HeapPool::new(POOL_BLOCK_BYTES));

    let (tx, rx) = channel()?;

    let config = CaptureConfig {
        mmap: opt.mmap,
        tsched: opt.tsched,
        watermark_step_usec: opt.watermark_step_ms * 1_000,
        min_latency_usec,
        max_latency_usec,
    };

    let engine = CaptureEngine::new(driver, spec, geometry, downstream, pool, rx, unload.clone(), config)?;

    log::info!("starting capture on {} ({} Hz, {} ch)", opt.device, spec.rate, spec.channels);
    tx.send(ControlMessage::SetState(RequestedState::Running));

    let handle = crate::sink::spawn(engine);

    let read_fd = signal::install()?;
    let mut event_loop = PollEventLoop::new();

    event_loop.watch_new(
        read_fd.as_raw_fd(),
        PollEvents::INPUT,
        Box::new(|_events| {
            log::info!("received SIGINT, shutting down");
        }),
    );

    while !signal::received() {
        event_loop.run_once()?;
    }
    drop(read_fd);

    tx.send(ControlMessage::Shutdown);
    let _ = handle.join();

    if unload.was_unloaded() {
        return Err(RunError::FatalCapture);
    }

    Ok(())
}
