//! The capture engine.

use std::sync::Arc;
use std::time::Duration;

use alsasrc_core::geometry::BufferGeometry;
use alsasrc_core::overrun::{self, OverrunOutcome};
use alsasrc_core::smoother::Smoother;
use alsasrc_core::spec::SampleSpec;
use alsasrc_core::timer::WakeupBudget;
use alsasrc_driver::{Driver, DriverError, PollEvents};

use crate::downstream::{DownstreamSource, MemoryChunk, MemoryPool, PooledChunk};
use crate::error::EngineError;
use crate::message::{ControlMessage, MessageReceiver, ReservationEvent, RequestedState};
use crate::poll_core::{PollCore, PollOutcome};
use crate::state::EngineState;
use crate::thread_info::ThreadInfo;

const MAX_SUB_ITERATIONS: usize = 10;

/// Tunables recognized at engine construction.
pub struct CaptureConfig {
    pub mmap: bool,
    pub tsched: bool,
    pub watermark_step_usec: u64,
    pub min_latency_usec: u64,
    pub max_latency_usec: u64,
}

/// The tri-state result of one path invocation: a classic "`<0` fatal,
/// `0` nothing done, `>0` work done" tri-state, folded into
/// `Result<PathOutcome, EngineError>` — fatal is `Err`, the rest is
/// `Ok`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct PathOutcome {
    worked: bool,
    sleep_usec: u64,
}

/// Result of one `avail()` query plus the early-stop/nothing-to-read
/// checks shared by the mmap and copy paths, before either path's inner
/// drain loop runs.
enum AvailStep {
    /// A transient driver error was recovered; the caller should retry
    /// the sub-iteration rather than count it as progress.
    Retry,
    /// Too early to read, or nothing was available; the caller stops the
    /// sub-iteration loop entirely.
    Stop { left_to_record_bytes: u64 },
    /// `n_bytes` are available to drain this sub-iteration.
    Proceed { n_bytes: u64, left_to_record_bytes: u64 },
}

/// Told about a fatal exit so it can notify the main thread.
pub trait UnloadSink: Send + Sync {
    fn request_unload(&self, reason: &EngineError);
}

pub struct CaptureEngine {
    driver: Box<dyn Driver>,
    spec: SampleSpec,
    geometry: BufferGeometry,
    smoother: Smoother,
    downstream: Arc<dyn DownstreamSource>,
    pool: Arc<dyn MemoryPool>,
    msg_rx: MessageReceiver,
    poll_core: PollCore,
    unload: Arc<dyn UnloadSink>,
    config: CaptureConfig,
    thread_info: ThreadInfo,
    woke_with_nothing: alsasrc_util::rate_limit::RateLimiter,
    spurious_pollin: alsasrc_util::rate_limit::RateLimiter,
    reserved: bool,
}

impl CaptureEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Box<dyn Driver>,
        spec: SampleSpec,
        geometry: BufferGeometry,
        downstream: Arc<dyn DownstreamSource>,
        pool: Arc<dyn MemoryPool>,
        msg_rx: MessageReceiver,
        unload: Arc<dyn UnloadSink>,
        config: CaptureConfig,
    ) -> Result<Self, EngineError> {
        let poll_core = PollCore::new()?;

        Ok(CaptureEngine {
            driver,
            spec,
            geometry,
            smoother: Smoother::new(2_000_000, 4),
            downstream,
            pool,
            msg_rx,
            poll_core,
            unload,
            config,
            thread_info: ThreadInfo::new(),
            woke_with_nothing: alsasrc_core::diag::woke_with_nothing_limiter(),
            spurious_pollin: alsasrc_core::diag::spurious_pollin_limiter(),
            reserved: true,
        })
    }

    pub fn state(&self) -> EngineState {
        self.thread_info.state
    }

    pub fn stats(&self) -> &alsasrc_core::CaptureStats {
        &self.thread_info.stats
    }

    /// Elevate to realtime priority, then run the main loop until
    /// shutdown or a fatal error. Realtime elevation is
    /// best-effort (`alsasrc_util::thread::set_realtime_priority` logs
    /// and continues on failure).
    pub fn run(mut self) {
        alsasrc_util::thread::set_name("alsasrc/capture");
        alsasrc_util::thread::set_realtime_priority();

        loop {
            match self.run_iteration() {
                Ok(true) => continue,
                Ok(false) => return,
                Err(err) => {
                    log::error!("fatal capture engine error, unloading: {err}");
                    self.unload.request_unload(&err);
                    self.drain_until_shutdown();
                    return;
                }
            }
        }
    }

    /// Runs one iteration of the main loop. `Ok(true)` to continue,
    /// `Ok(false)` on a clean shutdown.
    fn run_iteration(&mut self) -> Result<bool, EngineError> {
        let mut sleep_usec = None;

        if self.thread_info.state.is_opened() {
            let outcome = if self.config.mmap {
                self.mmap_read(self.thread_info.polled)?
            } else {
                self.unix_read(self.thread_info.polled)?
            };

            if outcome.worked {
                self.feed_smoother()?;
            }

            if self.config.tsched {
                let now = alsasrc_util::time::now().0;
                let budget = WakeupBudget { sleep_usec: outcome.sleep_usec, process_usec: 0 };
                sleep_usec = Some(budget.arm_wakeup(&self.smoother, now));
            }
        }

        self.poll_core.arm(sleep_usec)?;

        let driver_fds = if self.thread_info.state.is_opened() {
            self.driver.poll_descriptors()?
        } else {
            Vec::new()
        };

        match self.poll_core.wait(&driver_fds, &self.msg_rx)? {
            PollOutcome::Message => {
                for message in self.msg_rx.drain() {
                    if message == ControlMessage::Shutdown {
                        return Ok(false);
                    }
                    self.apply_message(message)?;
                }
            }
            PollOutcome::TimerExpired => {
                self.thread_info.polled = false;
            }
            PollOutcome::DriverEvent => {
                if self.thread_info.state.is_opened() {
                    let raw: Vec<(std::os::unix::io::RawFd, i16)> = driver_fds
                        .iter()
                        .map(|d| (d.fd, libc::POLLIN))
                        .collect();
                    let revents = self.driver.poll_revents(&raw)?;

                    if revents.intersects(PollEvents::ERROR | PollEvents::HANGUP) {
                        let err = DriverError::Fatal(nix::errno::Errno::EIO);
                        self.recover_and_start(&err)?;
                        self.thread_info.polled = false;
                    } else {
                        self.thread_info.polled = revents.contains(PollEvents::INPUT);
                    }
                }
            }
        }

        Ok(true)
    }

    fn drain_until_shutdown(&self) {
        let _ = self.msg_rx.drain_until_shutdown(|| {
            self.poll_core.arm(Some(Duration::from_millis(100).as_micros() as u64))?;
            self.poll_core.wait(&[], &self.msg_rx).map(|_| ())
        });
    }

    /// Recompute `hwbuf_unused`/`avail_min` from the downstream's
    /// currently requested latency and push the result to the driver.
    /// Called on open and whenever the requested latency range changes.
    fn recompute_sw_params(&mut self) -> Result<(), EngineError> {
        let requested = self.downstream.requested_latency_within_thread();
        let budget = self.current_budget();

        let (next_geometry, params) = crate::sw_params::recompute(
            &self.spec,
            &self.geometry,
            requested,
            budget.sleep_usec,
        )?;

        self.geometry = next_geometry;
        let frame_size = u64::from(self.spec.frame_size().0).max(1);
        let hwbuf_unused_frames = params.hwbuf_unused / frame_size;
        self.driver.apply_sw_params(hwbuf_unused_frames, params.avail_min_frames)?;
        Ok(())
    }

    fn current_budget(&self) -> WakeupBudget {
        let requested = self.downstream.requested_latency_within_thread()
            .unwrap_or_else(|| self.spec.bytes_to_usec(self.geometry.hwbuf_size()));
        let watermark_usec = self.spec.bytes_to_usec(self.geometry.tsched_watermark);
        WakeupBudget::compute(requested, watermark_usec)
    }

    fn usable_capacity(&self) -> u64 {
        self.geometry.usable_capacity()
    }

    // ---- shared avail/overrun/early-stop logic for the mmap and copy paths ----

    /// Query `avail`, derive `left_to_record`, and decide whether this
    /// sub-iteration should proceed to drain, stop (too early, or nothing
    /// to read), or retry after a transient recovery.
    fn avail_step(&mut self, polled: bool, budget: &WakeupBudget) -> Result<AvailStep, EngineError> {
        let avail_frames = match self.driver.avail() {
            Ok(frames) => frames,
            Err(err) if err.is_recoverable() => {
                self.recover_and_start(&err)?;
                return Ok(AvailStep::Retry);
            }
            Err(err) => return Err(EngineError::Driver(err)),
        };

        let frame_size = u64::from(self.spec.frame_size().0);
        let n_bytes = avail_frames * frame_size;
        let usable = self.usable_capacity();

        let left_to_record_bytes = if n_bytes <= usable {
            usable - n_bytes
        } else {
            if self.config.tsched {
                self.handle_overrun()?;
            }
            0
        };

        let left_to_record_usec = self.spec.bytes_to_usec(left_to_record_bytes);

        if !polled && budget.is_too_early(left_to_record_usec) {
            return Ok(AvailStep::Stop { left_to_record_bytes });
        }

        if n_bytes == 0 {
            if polled {
                if self.woke_with_nothing.check() {
                    log::info!("driver woke us with nothing to read");
                }
                // Scenario-level "spurious POLLIN" warning: fires once per suspend/resume cycle,
                // distinct from the recurring info-level diagnostic above.
                if self.spurious_pollin.check() {
                    log::warn!("spurious POLLIN: avail() returned 0 frames");
                }
            }
            return Ok(AvailStep::Stop { left_to_record_bytes });
        }

        Ok(AvailStep::Proceed { n_bytes, left_to_record_bytes })
    }

    fn path_outcome(&self, budget: &WakeupBudget, worked: bool, left_to_record_bytes: u64) -> PathOutcome {
        let left_to_record_usec = self.spec.bytes_to_usec(left_to_record_bytes);
        let sleep_usec = left_to_record_usec.saturating_sub(budget.process_usec);
        PathOutcome { worked, sleep_usec }
    }

    // ---- mmap_read (zero-copy) ----

    fn mmap_read(&mut self, polled: bool) -> Result<PathOutcome, EngineError> {
        let budget = self.current_budget();
        let frame_size = u64::from(self.spec.frame_size().0);
        let mut worked = false;
        let mut last_left_to_record_bytes = self.usable_capacity();

        for _ in 0..MAX_SUB_ITERATIONS {
            let (mut n_bytes, left_to_record_bytes) = match self.avail_step(polled, &budget)? {
                AvailStep::Retry => continue,
                AvailStep::Stop { left_to_record_bytes } => {
                    last_left_to_record_bytes = left_to_record_bytes;
                    break;
                }
                AvailStep::Proceed { n_bytes, left_to_record_bytes } => (n_bytes, left_to_record_bytes),
            };
            last_left_to_record_bytes = left_to_record_bytes;

            while n_bytes >= frame_size {
                let want_frames = n_bytes / frame_size;

                let region = match self.driver.mmap_begin(want_frames) {
                    Ok(region) => region,
                    Err(err) if err.is_recoverable() => {
                        self.recover_and_start(&err)?;
                        break;
                    }
                    Err(err) => return Err(EngineError::Driver(err)),
                };

                region.assert_alignment((frame_size * 8) as u32);

                let pool_max_frames = (self.pool.max_block_size() as u64 / frame_size).max(1);
                let region = region.capped(pool_max_frames, frame_size as usize);
                let offset_frames = region.offset_frames();
                let frames_granted = region.frames_granted();

                if frames_granted == 0 {
                    break;
                }

                if self.downstream.assert_ref() {
                    self.downstream.post(MemoryChunk::Fixed(region.bytes()));
                }
                // The fixed chunk's borrow ends here, before commit — see
                // `MmapRegion`'s doc comment for why this must happen in
                // this order.
                drop(region);

                let committed = self.driver.mmap_commit(offset_frames, frames_granted)?;
                let committed_bytes = committed * frame_size;
                self.thread_info.stats.add_bytes(committed_bytes);
                worked = true;
                n_bytes = n_bytes.saturating_sub(committed_bytes);

                if committed == 0 {
                    break;
                }
            }
        }

        Ok(self.path_outcome(&budget, worked, last_left_to_record_bytes))
    }

    // ---- unix_read (copy-based) ----

    fn unix_read(&mut self, polled: bool) -> Result<PathOutcome, EngineError> {
        let budget = self.current_budget();
        let frame_size = u64::from(self.spec.frame_size().0);
        let mut worked = false;
        let mut last_left_to_record_bytes = self.usable_capacity();

        for _ in 0..MAX_SUB_ITERATIONS {
            let (mut n_bytes, left_to_record_bytes) = match self.avail_step(polled, &budget)? {
                AvailStep::Retry => continue,
                AvailStep::Stop { left_to_record_bytes } => {
                    last_left_to_record_bytes = left_to_record_bytes;
                    break;
                }
                AvailStep::Proceed { n_bytes, left_to_record_bytes } => (n_bytes, left_to_record_bytes),
            };
            last_left_to_record_bytes = left_to_record_bytes;

            while n_bytes >= frame_size {
                let pool_block_bytes = self.pool.max_block_size() as u64;
                let pool_block_frames = (pool_block_bytes / frame_size).max(1);
                let want_frames = (n_bytes / frame_size).min(pool_block_frames);
                let want_bytes = want_frames * frame_size;

                let mut buf = self.pool.alloc_buf(pool_block_bytes.max(want_bytes) as usize);

                let got_frames = match self.driver.read(&mut buf[..want_bytes as usize], want_frames) {
                    Ok(frames) => frames,
                    Err(err) if err.is_recoverable() => {
                        drop(buf);
                        self.recover_and_start(&err)?;
                        break;
                    }
                    Err(err) => return Err(EngineError::Driver(err)),
                };

                let got_bytes = got_frames * frame_size;
                let chunk = PooledChunk::from_vec(buf, got_bytes as usize);

                if self.downstream.assert_ref() {
                    self.downstream.post(MemoryChunk::Pooled(chunk));
                }

                self.thread_info.stats.add_bytes(got_bytes);
                worked = true;
                n_bytes = n_bytes.saturating_sub(got_bytes);

                if got_frames == 0 {
                    break;
                }
            }
        }

        Ok(self.path_outcome(&budget, worked, last_left_to_record_bytes))
    }

    // ---- State controller ----

    fn apply_message(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        match message {
            ControlMessage::SetState(requested) => self.handle_set_state(requested),
            ControlMessage::SetLatencyRange { min_usec, max_usec } => {
                self.config.min_latency_usec = min_usec;
                self.config.max_latency_usec = max_usec;
                if self.thread_info.state.is_opened() {
                    self.recompute_sw_params()?;
                }
                Ok(())
            }
            ControlMessage::SetVolume(volume) => {
                self.thread_info.last_virtual_volume = Some(volume);
                Ok(())
            }
            ControlMessage::Reservation(ReservationEvent::Released) => {
                self.reserved = false;
                self.handle_set_state(RequestedState::Suspended)
            }
            ControlMessage::Reservation(ReservationEvent::Reacquired) => {
                self.reserved = true;
                Ok(())
            }
            ControlMessage::Shutdown => unreachable!("handled by the caller"),
        }
    }

    fn handle_set_state(&mut self, requested: RequestedState) -> Result<(), EngineError> {
        use EngineState::*;

        let target = match requested {
            RequestedState::Running => Running,
            RequestedState::Idle => Idle,
            RequestedState::Suspended => Suspended,
        };

        match (self.thread_info.state, target) {
            (state, Suspended) => {
                if !state.is_opened() {
                    return Err(EngineError::IllegalStateTransition {
                        state,
                        message: "SUSPENDED requested while not opened",
                    });
                }
                self.smoother.pause();
                self.driver.close()?;
                self.thread_info.state = Suspended;
                Ok(())
            }
            (Init, opened) => {
                self.recompute_sw_params()?;
                self.driver.start()?;
                self.thread_info.state = opened;
                self.spurious_pollin.reset();
                Ok(())
            }
            (Suspended, opened) => {
                if !self.reserved {
                    return Err(EngineError::IllegalStateTransition {
                        state: Suspended,
                        message: "resume requested before reservation was reacquired",
                    });
                }

                let resumed_geometry = BufferGeometry::negotiate(
                    &self.spec,
                    self.geometry.fragment_size,
                    self.geometry.n_fragments,
                    self.geometry.hwbuf_unused,
                    self.geometry.min_sleep,
                    self.geometry.min_wakeup,
                    self.geometry.tsched_watermark,
                ).map_err(EngineError::GeometryMismatchOnResume)?;

                if resumed_geometry != self.geometry {
                    return Err(EngineError::GeometryMismatchOnResume(
                        alsasrc_core::geometry::GeometryError::InvariantViolated(
                            "post-resume geometry differs from pre-suspend geometry",
                        ),
                    ));
                }

                let frame_size = u64::from(self.spec.frame_size().0).max(1);
                let hwbuf_unused_frames = self.geometry.hwbuf_unused / frame_size;
                let avail_min_frames = 1 + self.geometry.min_wakeup / frame_size;
                self.driver.apply_sw_params(hwbuf_unused_frames, avail_min_frames)?;
                self.driver.start()?;
                self.smoother.resume();
                self.thread_info.state = opened;
                self.spurious_pollin.reset();

                if let Some(volume) = self.thread_info.last_virtual_volume {
                    log::info!("re-applying last known virtual volume {volume} on resume");
                    self.downstream.apply_volume(volume);
                }

                Ok(())
            }
            (current, opened) if current == opened => Ok(()),
            (current, opened) => {
                self.thread_info.state = opened;
                Ok(())
            }
        }
    }

    fn recover_and_start(&mut self, err: &DriverError) -> Result<(), EngineError> {
        if !err.is_recoverable() {
            return Err(EngineError::Driver(DriverError::Fatal(nix::errno::Errno::EIO)));
        }
        log::debug!("recovering from transient driver error: {err}");
        self.driver.recover(err, false)?;
        self.driver.start()?;
        Ok(())
    }

    fn handle_overrun(&mut self) -> Result<(), EngineError> {
        let outcome = overrun::adjust(
            &self.spec,
            &self.geometry,
            self.spec.usec_to_bytes(self.config.watermark_step_usec),
            self.config.min_latency_usec,
            self.config.max_latency_usec,
            self.config.watermark_step_usec,
        );

        match outcome {
            OverrunOutcome::WatermarkIncreased { geometry } => {
                log::info!("overrun: watermark increased to {} bytes", geometry.tsched_watermark);
                self.geometry = geometry;
            }
            OverrunOutcome::LatencyIncreased { min_latency_usec } => {
                log::info!("overrun: watermark saturated, min latency raised to {min_latency_usec}us");
                self.config.min_latency_usec = min_latency_usec;
                self.downstream.set_latency_range_within_thread(min_latency_usec, self.config.max_latency_usec);
            }
            OverrunOutcome::Saturated => {
                log::debug!("overrun: already at worst achievable quality, ignoring");
            }
        }

        Ok(())
    }

    fn feed_smoother(&mut self) -> Result<(), EngineError> {
        let delay_frames = self.driver.delay()?;
        let frame_size = u64::from(self.spec.frame_size().0);
        let position_bytes = self.thread_info.stats.read_count() + delay_frames * frame_size;
        let position_usec = self.spec.bytes_to_usec(position_bytes);

        let now_usec = self.driver.status_timestamp()
            .unwrap_or_else(|| alsasrc_util::time::now().0);

        self.smoother.put(now_usec, position_usec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::os::unix::io::RawFd;
    use std::sync::Mutex;

    use alsasrc_core::spec::SampleFormat;
    use alsasrc_driver::mmap::MmapRegion;

    use crate::downstream::{HeapPool, MemoryChunk, MemoryPool, SourceMsg, SourceReply};
    use crate::message::RequestedState;

    use super::*;

    fn cd_spec() -> SampleSpec {
        SampleSpec { format: SampleFormat::S16LE, rate: 44_100, channels: 2 }
    }

    /// Small hardware geometry so scenario math stays readable: 16384
    /// bytes usable capacity, with a 440/176/880 byte sleep/wakeup/
    /// watermark split.
    fn test_geometry(spec: &SampleSpec) -> BufferGeometry {
        BufferGeometry::negotiate(spec, 4096, 4, 0, 440, 176, 880).unwrap()
    }

    /// Every call returns the next scripted outcome, repeating `Frames(0)`
    /// once the script is exhausted (simulating a drained buffer).
    enum ScriptedAvail {
        Frames(u64),
        Error(DriverError),
    }

    struct FakeDriver {
        script: VecDeque<ScriptedAvail>,
        recovers: u32,
        starts: u32,
        closes: u32,
    }

    impl FakeDriver {
        fn new(script: Vec<ScriptedAvail>) -> Self {
            FakeDriver { script: script.into(), recovers: 0, starts: 0, closes: 0 }
        }
    }

    impl Driver for FakeDriver {
        fn avail(&mut self) -> Result<u64, DriverError> {
            match self.script.pop_front() {
                Some(ScriptedAvail::Frames(frames)) => Ok(frames),
                Some(ScriptedAvail::Error(err)) => Err(err),
                None => Ok(0),
            }
        }

        fn mmap_begin(&mut self, _max_frames: u64) -> Result<MmapRegion<'_>, DriverError> {
            Err(DriverError::Fatal(nix::errno::Errno::ENOSYS))
        }

        fn mmap_commit(&mut self, _offset_frames: u64, _frames: u64) -> Result<u64, DriverError> {
            Err(DriverError::Fatal(nix::errno::Errno::ENOSYS))
        }

        fn read(&mut self, _buf: &mut [u8], frames: u64) -> Result<u64, DriverError> {
            Ok(frames)
        }

        fn delay(&mut self) -> Result<u64, DriverError> {
            Ok(0)
        }

        fn status_timestamp(&mut self) -> Option<u64> {
            None
        }

        fn poll_descriptors(&self) -> Result<Vec<alsasrc_driver::PollDescriptor>, DriverError> {
            Ok(Vec::new())
        }

        fn poll_revents(&self, _ready: &[(RawFd, i16)]) -> Result<PollEvents, DriverError> {
            Ok(PollEvents::empty())
        }

        fn recover(&mut self, _err: &DriverError, _silent: bool) -> Result<(), DriverError> {
            self.recovers += 1;
            Ok(())
        }

        fn start(&mut self) -> Result<(), DriverError> {
            self.starts += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), DriverError> {
            self.closes += 1;
            Ok(())
        }

        fn apply_sw_params(&mut self, _hwbuf_unused_frames: u64, _avail_min_frames: u64) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDownstream {
        posted_lens: Mutex<Vec<usize>>,
        requested_latency_usec: Mutex<Option<u64>>,
        min_latency: Mutex<u64>,
        max_latency: Mutex<u64>,
        latency_ranges_set: Mutex<Vec<(u64, u64)>>,
        applied_volumes: Mutex<Vec<u32>>,
    }

    impl DownstreamSource for FakeDownstream {
        fn post(&self, chunk: MemoryChunk<'_>) {
            self.posted_lens.lock().unwrap().push(chunk.len());
        }

        fn assert_ref(&self) -> bool {
            true
        }

        fn requested_latency_within_thread(&self) -> Option<u64> {
            *self.requested_latency_usec.lock().unwrap()
        }

        fn min_latency(&self) -> u64 {
            *self.min_latency.lock().unwrap()
        }

        fn max_latency(&self) -> u64 {
            *self.max_latency.lock().unwrap()
        }

        fn set_latency_range_within_thread(&self, min_usec: u64, max_usec: u64) {
            *self.min_latency.lock().unwrap() = min_usec;
            *self.max_latency.lock().unwrap() = max_usec;
            self.latency_ranges_set.lock().unwrap().push((min_usec, max_usec));
        }

        fn apply_volume(&self, volume: u32) {
            self.applied_volumes.lock().unwrap().push(volume);
        }

        fn process_msg(&self, _msg: SourceMsg) -> SourceReply {
            SourceReply::Ack
        }
    }

    #[derive(Default)]
    struct FakeUnloadSink {
        unloaded: Mutex<bool>,
    }

    impl UnloadSink for FakeUnloadSink {
        fn request_unload(&self, _reason: &EngineError) {
            *self.unloaded.lock().unwrap() = true;
        }
    }

    fn build_engine(
        driver: FakeDriver,
        downstream: Arc<FakeDownstream>,
        config: CaptureConfig,
    ) -> CaptureEngine {
        let spec = cd_spec();
        let geometry = test_geometry(&spec);
        let pool: Arc<dyn MemoryPool> = Arc::new(HeapPool::new(64 * 1024));
        let (_tx, rx) = crate::message::channel().unwrap();
        let unload: Arc<dyn UnloadSink> = Arc::new(FakeUnloadSink::default());

        CaptureEngine::new(Box::new(driver), spec, geometry, downstream, pool, rx, unload, config)
            .unwrap()
    }

    fn default_config() -> CaptureConfig {
        CaptureConfig {
            mmap: false,
            tsched: true,
            watermark_step_usec: 10_000,
            min_latency_usec: 20_000,
            max_latency_usec: 2_000_000,
        }
    }

    // ---- scenario 1: nominal steady-state ----

    #[test]
    fn nominal_unix_read_posts_and_advances_read_count() {
        let driver = FakeDriver::new(vec![ScriptedAvail::Frames(1024), ScriptedAvail::Frames(0)]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream.clone(), default_config());
        engine.thread_info.state = EngineState::Running;

        let outcome = engine.unix_read(true).unwrap();

        assert!(outcome.worked);
        assert_eq!(engine.stats().read_count(), 1024 * 4);
        assert_eq!(downstream.posted_lens.lock().unwrap().iter().sum::<usize>(), 1024 * 4);
    }

    // ---- scenario 2: single overrun recovery ----

    #[test]
    fn overrun_increases_watermark() {
        // usable capacity is 16384 bytes (4096 frames); 5000 frames worth
        // of bytes overruns it.
        let driver = FakeDriver::new(vec![ScriptedAvail::Frames(5_000), ScriptedAvail::Frames(0)]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream, default_config());
        engine.thread_info.state = EngineState::Running;
        let watermark_before = engine.geometry.tsched_watermark;

        engine.unix_read(true).unwrap();

        assert!(engine.geometry.tsched_watermark > watermark_before);
    }

    // ---- scenario 3: suspend/resume cycle ----

    #[test]
    fn suspend_then_resume_preserves_geometry_and_pauses_smoother() {
        let driver = FakeDriver::new(vec![]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream, default_config());

        engine.handle_set_state(RequestedState::Running).unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        let geometry_before = engine.geometry;

        engine.handle_set_state(RequestedState::Suspended).unwrap();
        assert_eq!(engine.state(), EngineState::Suspended);

        engine.handle_set_state(RequestedState::Running).unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.geometry, geometry_before);
    }

    #[test]
    fn resume_reapplies_last_known_virtual_volume() {
        // A volume set before suspend must still be applied after resume,
        // not silently lost.
        let driver = FakeDriver::new(vec![]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream.clone(), default_config());

        engine.handle_set_state(RequestedState::Running).unwrap();
        engine.apply_message(ControlMessage::SetVolume(12345)).unwrap();
        engine.handle_set_state(RequestedState::Suspended).unwrap();
        engine.handle_set_state(RequestedState::Running).unwrap();

        assert_eq!(*downstream.applied_volumes.lock().unwrap(), vec![12345]);
    }

    #[test]
    fn suspend_while_not_opened_is_rejected() {
        let driver = FakeDriver::new(vec![]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream, default_config());

        assert!(engine.handle_set_state(RequestedState::Suspended).is_err());
    }

    // ---- scenario 4: early wakeup ----

    #[test]
    fn early_wakeup_posts_nothing_when_not_polled() {
        // small avail (100 frames = 400 bytes) leaves most of the buffer
        // still to record, which is more than the watermark band allows
        // when `polled` is false.
        let driver = FakeDriver::new(vec![ScriptedAvail::Frames(100); 10]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream.clone(), default_config());
        engine.thread_info.state = EngineState::Running;

        let outcome = engine.unix_read(false).unwrap();

        assert!(!outcome.worked);
        assert!(downstream.posted_lens.lock().unwrap().is_empty());
        assert_eq!(engine.stats().read_count(), 0);
    }

    // ---- scenario 5: fatal driver error ----

    #[test]
    fn fatal_driver_error_is_not_recovered() {
        let driver = FakeDriver::new(vec![ScriptedAvail::Error(DriverError::Fatal(nix::errno::Errno::EIO))]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream, default_config());
        engine.thread_info.state = EngineState::Running;

        assert!(engine.unix_read(true).is_err());
    }

    // ---- scenario 6: spurious POLLIN ----

    #[test]
    fn spurious_pollin_with_avail_zero_posts_nothing() {
        let driver = FakeDriver::new(vec![ScriptedAvail::Frames(0); 10]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream.clone(), default_config());
        engine.thread_info.state = EngineState::Running;

        let outcome = engine.unix_read(true).unwrap();

        assert!(!outcome.worked);
        assert!(downstream.posted_lens.lock().unwrap().is_empty());
    }

    // ---- main loop integration ----

    #[test]
    fn run_iteration_drains_and_feeds_smoother() {
        let driver = FakeDriver::new(vec![ScriptedAvail::Frames(1024); 5]);
        let downstream = Arc::new(FakeDownstream::default());
        let mut engine = build_engine(driver, downstream, default_config());
        engine.thread_info.state = EngineState::Running;
        engine.thread_info.polled = true;

        let continued = engine.run_iteration().unwrap();

        assert!(continued);
        assert!(engine.stats().read_count() > 0);
    }
}
