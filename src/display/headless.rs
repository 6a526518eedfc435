use super::{DisplayBackend, InputEvent};
use crate::error::{ExperimentError, Result};
use crate::timer::HighPrecisionTimer;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;

/// Window-less backend: frames are discarded and key presses come from a
/// script.
///
/// Keys added with [`HeadlessBackend::with_queued_keys`] count as already
/// pending and are dropped by a flush; scripted keys arrive after it.
///
/// A blocking wait on an exhausted script fails with
/// [`ExperimentError::InputExhausted`] instead of hanging.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    queued: VecDeque<String>,
    /// Keys pressed while a given frame (1-based) is on screen.
    during_frame: Vec<(usize, String)>,
    script: VecDeque<String>,
    pointer: Option<(f32, f32)>,
    presented: usize,
    closed: bool,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Presses that are waiting in the queue before the next key wait.
    pub fn with_queued_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queued.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Presses made while frame `frame` (counting from 1) is on screen;
    /// they join the pending queue when that frame is presented.
    pub fn with_keys_during_frame<I, S>(mut self, frame: usize, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.during_frame
            .extend(keys.into_iter().map(|k| (frame, k.into())));
        self
    }

    pub fn with_pointer(mut self, x: f32, y: f32) -> Self {
        self.pointer = Some((x, y));
        self
    }
}

impl DisplayBackend for HeadlessBackend {
    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, frame: &Pixmap) -> Result<()> {
        if self.closed {
            return Err(ExperimentError::Display("headless surface is closed".into()));
        }
        self.presented += 1;
        let frame_no = self.presented;
        let (now, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.during_frame)
            .into_iter()
            .partition(|(frame, _)| *frame == frame_no);
        self.during_frame = later;
        self.queued.extend(now.into_iter().map(|(_, key)| key));
        log::trace!(
            "headless frame {} ({}x{})",
            self.presented,
            frame.width(),
            frame.height()
        );
        Ok(())
    }

    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<InputEvent>> {
        if let Some(name) = self.queued.pop_front().or_else(|| self.script.pop_front()) {
            return Ok(Some(InputEvent::Key {
                name,
                at: Instant::now(),
            }));
        }
        match timeout {
            Some(timeout) => {
                std::thread::sleep(timeout);
                Ok(None)
            }
            None => Err(ExperimentError::InputExhausted),
        }
    }

    fn wait(&mut self, duration: Duration, timer: &HighPrecisionTimer) -> Result<()> {
        timer.high_precision_sleep(duration);
        Ok(())
    }

    fn flush_events(&mut self) -> Result<()> {
        if !self.queued.is_empty() {
            log::trace!("flushing {} queued key(s)", self.queued.len());
            self.queued.clear();
        }
        Ok(())
    }

    fn pointer_position(&self) -> Option<(f32, f32)> {
        self.pointer
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
