//! Demonstration wiring for the downstream source and unload-sink
//! capability traits. A real deployment plugs in whatever owns
//! the outbound audio pipeline; this crate only needs to prove the
//! engine can be driven end to end.

use std::sync::atomic::{AtomicU64, AtomicBool, Ordering};
use std::sync::Mutex;

use alsasrc_engine::{CaptureEngine, EngineError, UnloadSink};
use alsasrc_engine::downstream::{DownstreamSource, MemoryChunk, SourceMsg, SourceReply};

/// Logs how many bytes have been captured, rate-limited to roughly once
/// a second, and otherwise just counts them. Latency range is fixed at
/// construction and never renegotiated by a real downstream consumer.
pub struct DemoDownstream {
    min_latency_usec: u64,
    max_latency_usec: AtomicU64,
    total_bytes: AtomicU64,
    last_logged_bytes: AtomicU64,
    volume: Mutex<Option<u32>>,
}

impl DemoDownstream {
    pub fn new(min_latency_usec: u64, max_latency_usec: u64) -> Self {
        DemoDownstream {
            min_latency_usec,
            max_latency_usec: AtomicU64::new(max_latency_usec),
            total_bytes: AtomicU64::new(0),
            last_logged_bytes: AtomicU64::new(0),
            volume: Mutex::new(None),
        }
    }
}

impl DownstreamSource for DemoDownstream {
    fn post(&self, chunk: MemoryChunk<'_>) {
        let total = self.total_bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
        let last = self.last_logged_bytes.load(Ordering::Relaxed);

        if total - last >= 176_400 {
            self.last_logged_bytes.store(total, Ordering::Relaxed);
            log::info!("captured {total} bytes total");
        }
    }

    fn assert_ref(&self) -> bool {
        true
    }

    fn requested_latency_within_thread(&self) -> Option<u64> {
        None
    }

    fn min_latency(&self) -> u64 {
        self.min_latency_usec
    }

    fn max_latency(&self) -> u64 {
        self.max_latency_usec.load(Ordering::Relaxed)
    }

    fn set_latency_range_within_thread(&self, _min_usec: u64, max_usec: u64) {
        self.max_latency_usec.store(max_usec, Ordering::Relaxed);
    }

    fn apply_volume(&self, volume: u32) {
        *self.volume.lock().unwrap() = Some(volume);
        log::info!("applied virtual volume {volume}");
    }

    fn process_msg(&self, msg: SourceMsg) -> SourceReply {
        match msg {
            SourceMsg::GetLatency => SourceReply::Latency(self.max_latency()),
            SourceMsg::SetState(_) => SourceReply::Ack,
        }
    }
}

/// Records that the capture thread exited fatally; `main` checks this
/// after joining the thread and exits non-zero if it was ever set.
#[derive(Default)]
pub struct ProcessUnloadSink {
    unloaded: AtomicBool,
}

impl ProcessUnloadSink {
    pub fn was_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Relaxed)
    }
}

impl UnloadSink for ProcessUnloadSink {
    fn request_unload(&self, reason: &EngineError) {
        log::error!("capture engine requested unload: {reason}");
        self.unloaded.store(true, Ordering::Relaxed);
    }
}

/// Spawn the capture thread, matching `CaptureEngine::run`'s own
/// realtime-priority elevation.
pub fn spawn(engine: CaptureEngine) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || engine.run())
}
