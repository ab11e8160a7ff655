mod config;

pub use config::{apply_sw_params, open_pcm, OpenError, OpenOptions};

use alsa::pcm::PCM;
use alsa::{PollDescriptors as AlsaPollDescriptors, direct::pcm::MmapCapture};
use alsasrc_core::SampleSpec;
use libc::pollfd;

use crate::error::DriverError;
use crate::mmap::MmapRegion;
use crate::poll::{PollDescriptor, PollEvents};
use crate::traits::Driver;

/// Concrete `Driver` backed by a real ALSA capture device: hw/sw-params
/// negotiation and EPIPE/ESTRPIPE recovery on top of the `alsa` crate,
/// using `alsa::direct::pcm::MmapCapture` for the mmap path.
pub struct AlsaDriver<S> {
    pcm: PCM,
    mmap: Option<MmapCapture<S>>,
    frame_size: usize,
    use_mmap: bool,
}

impl<S> AlsaDriver<S> {
    pub fn open(opt: &OpenOptions, spec: &SampleSpec) -> Result<Self, OpenError> {
        let pcm = open_pcm(opt)?;

        let mmap = if opt.mmap {
            Some(alsa::direct::pcm::new_mmap_capture(&pcm)?)
        } else {
            None
        };

        Ok(AlsaDriver {
            pcm,
            mmap,
            frame_size: spec.frame_size().0 as usize,
            use_mmap: opt.mmap,
        })
    }
}

impl<S: Copy> Driver for AlsaDriver<S> {
    fn avail(&mut self) -> Result<u64, DriverError> {
        match self.pcm.avail_update() {
            Ok(frames) => Ok(frames.max(0) as u64),
            Err(err) => Err(DriverError::from_alsa(err)),
        }
    }

    fn mmap_begin(&mut self, max_frames: u64) -> Result<MmapRegion<'_>, DriverError> {
        let mmap = self
            .mmap
            .as_ref()
            .expect("mmap_begin called on a driver opened without mmap access");

        let (ptr, frames) = mmap.data_ptr();
        let frames = (frames as u64).min(max_frames);
        let offset_frames = mmap.appl_ptr() as u64 % mmap.buffer_size().max(1) as u64;
        let len_bytes = frames as usize * self.frame_size;

        // SAFETY: `data_ptr` returns a pointer into the kernel-shared mmap
        // area valid until the next `commit`, which requires `&mut self`;
        // the `'_` lifetime here is tied to that borrow.
        let region = unsafe {
            MmapRegion::new(
                ptr as *const u8,
                len_bytes,
                offset_frames,
                frames,
                (self.frame_size * 8) as u32,
                0,
            )
        };

        Ok(region)
    }

    fn mmap_commit(&mut self, _offset_frames: u64, frames: u64) -> Result<u64, DriverError> {
        let mmap = self
            .mmap
            .as_ref()
            .expect("mmap_commit called on a driver opened without mmap access");
        mmap.commit(frames as alsa::pcm::Frames);
        Ok(frames)
    }

    fn read(&mut self, buf: &mut [u8], frames: u64) -> Result<u64, DriverError> {
        let want_bytes = frames as usize * self.frame_size;
        assert!(buf.len() >= want_bytes, "read buffer too small for requested frame count");

        // SAFETY: the caller-supplied byte buffer is sized and aligned by
        // the engine to hold `frames` frames of `S` (the negotiated sample
        // type); we only ever read `want` elements of it.
        let samples: &mut [S] = unsafe {
            std::slice::from_raw_parts_mut(
                buf.as_mut_ptr() as *mut S,
                want_bytes / std::mem::size_of::<S>(),
            )
        };

        // io_unchecked avoids an snd_pcm_hw_params_current malloc on every
        // call; format/access were already negotiated in `open_pcm`.
        let io = unsafe { self.pcm.io_unchecked::<S>() };

        match io.readi(samples) {
            Ok(got_frames) => Ok(got_frames as u64),
            Err(err) => Err(DriverError::from_alsa(err)),
        }
    }

    fn delay(&mut self) -> Result<u64, DriverError> {
        match self.pcm.delay() {
            Ok(frames) => Ok(frames.max(0) as u64),
            Err(err) => Err(DriverError::from_alsa(err)),
        }
    }

    fn status_timestamp(&mut self) -> Option<u64> {
        let status = self.pcm.status().ok()?;
        let ts = status.get_htstamp();
        Some(ts.tv_sec() as u64 * 1_000_000 + ts.tv_nsec() as u64 / 1_000)
    }

    fn poll_descriptors(&self) -> Result<Vec<PollDescriptor>, DriverError> {
        let fds: Vec<pollfd> = AlsaPollDescriptors::get(&self.pcm).map_err(DriverError::from_alsa)?;
        Ok(fds
            .into_iter()
            .map(|fd| PollDescriptor {
                fd: fd.fd,
                events: PollEvents::INPUT,
            })
            .collect())
    }

    fn poll_revents(&self, ready: &[(std::os::unix::io::RawFd, i16)]) -> Result<PollEvents, DriverError> {
        let fds: Vec<pollfd> = ready
            .iter()
            .map(|&(fd, revents)| pollfd { fd, events: 0, revents })
            .collect();
        let flags = AlsaPollDescriptors::revents(&self.pcm, &fds).map_err(DriverError::from_alsa)?;
        Ok(PollEvents::from_raw_revents(flags.bits()))
    }

    fn recover(&mut self, err: &DriverError, silent: bool) -> Result<(), DriverError> {
        if !err.is_recoverable() {
            return Err(DriverError::AlignmentViolation(
                "recover() called with a non-recoverable driver error",
            ));
        }

        let errno = match err {
            DriverError::Overrun => nix::errno::Errno::EPIPE,
            DriverError::Suspended => nix::errno::Errno::ESTRPIPE,
            DriverError::Interrupted => nix::errno::Errno::EINTR,
            _ => unreachable!("checked by is_recoverable above"),
        };

        self.pcm
            .recover(errno as i32, silent)
            .map_err(DriverError::from_alsa)
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.pcm.start().map_err(DriverError::from_alsa)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.mmap = None;
        self.pcm.drop().map_err(DriverError::from_alsa)
    }

    fn apply_sw_params(&mut self, hwbuf_unused_frames: u64, avail_min_frames: u64) -> Result<(), DriverError> {
        let hwp = self.pcm.hw_params_current().map_err(DriverError::from_alsa)?;
        let buffer_size = hwp.get_buffer_size().map_err(DriverError::from_alsa)?;
        config::apply_sw_params(
            &self.pcm,
            buffer_size,
            hwbuf_unused_frames as i64,
            avail_min_frames as i64,
        )
    }
}
