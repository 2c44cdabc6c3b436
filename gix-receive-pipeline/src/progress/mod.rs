// Progress adapters and sideband integration (blocking).
//
// Progress is best-effort: write failures are ignored so they never affect
// the outcome of a push. Everything here emits on sideband channel 2 only.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use gix_packetline_blocking as pkt;
use gix_packetline_blocking::encode as enc;

/// A minimal sink for progress messages.
pub trait ProgressSink {
    /// Emit a user-visible progress message.
    fn info(&mut self, message: &[u8]);
}

/// A sink dropping everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ProgressSink for Discard {
    fn info(&mut self, _message: &[u8]) {}
}

/// Collects messages as lossy UTF-8, mostly useful for tests and logging.
impl ProgressSink for Vec<String> {
    fn info(&mut self, message: &[u8]) {
        self.push(String::from_utf8_lossy(message).into_owned());
    }
}

/// A blocking sideband progress writer that emits progress on channel 2 exclusively.
#[derive(Debug)]
pub struct SidebandProgressWriter<W: Write> {
    out: W,
}

impl<W: Write> SidebandProgressWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Emit a progress payload over sideband channel 2.
    ///
    /// The payload is transmitted verbatim. Callers control formatting, e.g. adding
    /// trailing newlines or carriage returns if desired by clients.
    pub fn emit_progress(&mut self, message: &[u8]) -> io::Result<()> {
        enc::band_to_write(pkt::Channel::Progress, message, &mut self.out)?;
        self.out.flush()
    }

    /// Access the underlying writer by reference.
    pub fn inner(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressSink for SidebandProgressWriter<W> {
    fn info(&mut self, message: &[u8]) {
        if let Err(err) = self.emit_progress(message) {
            tracing::debug!(%err, "dropping progress message");
        }
    }
}

/// Default time a [`DelayedProgress`] stays silent.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(250);

/// Forwards messages to an inner sink only once `delay` has elapsed since creation,
/// so fast operations produce no progress output at all.
pub struct DelayedProgress<'a> {
    inner: &'a mut dyn ProgressSink,
    delay: Duration,
    started_at: Instant,
}

impl<'a> DelayedProgress<'a> {
    pub fn new(inner: &'a mut dyn ProgressSink, delay: Duration) -> Self {
        Self::started_at(inner, delay, Instant::now())
    }

    /// Like [`new()`](Self::new()), but with an explicit start time.
    pub fn started_at(inner: &'a mut dyn ProgressSink, delay: Duration, started_at: Instant) -> Self {
        Self {
            inner,
            delay,
            started_at,
        }
    }

    fn is_due(&self) -> bool {
        self.started_at.elapsed() >= self.delay
    }
}

impl ProgressSink for DelayedProgress<'_> {
    fn info(&mut self, message: &[u8]) {
        if self.is_due() {
            self.inner.info(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sideband_writer_frames_on_channel_two() {
        let mut sb = SidebandProgressWriter::new(Vec::<u8>::new());
        sb.info(b"updating refs\n");
        assert_eq!(sb.into_inner(), b"0013\x02updating refs\n".to_vec());
    }

    #[test]
    fn delayed_progress_is_silent_before_the_delay() {
        let mut seen = Vec::<String>::new();
        {
            let mut delayed = DelayedProgress::new(&mut seen, Duration::from_secs(3600));
            delayed.info(b"fast");
        }
        assert!(seen.is_empty());
    }

    #[test]
    fn delayed_progress_forwards_after_the_delay() {
        let mut seen = Vec::<String>::new();
        let long_ago = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .expect("monotonic clock is past one second");
        {
            let mut delayed = DelayedProgress::started_at(&mut seen, DEFAULT_DELAY, long_ago);
            delayed.info(b"slow");
        }
        assert_eq!(seen, vec!["slow".to_string()]);
    }
}
