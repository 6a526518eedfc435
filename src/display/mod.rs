//! Display surface: a back buffer the experiment draws into and a backend
//! that puts it on screen and reports keyboard input.

mod headless;
mod window;

pub use headless::HeadlessBackend;
pub use window::{key_name, WindowBackend};

use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::renderer::ExperimentRenderer;
use crate::screen::Screen;
use crate::timer::HighPrecisionTimer;
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;

/// Input delivered by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// A key went down; `name` uses lowercase names such as `space`, `a`,
    /// `return`, `escape`.
    Key { name: String, at: Instant },
    CloseRequested,
}

/// Something that can show a finished frame and report input
pub trait DisplayBackend {
    /// Current drawable size in physical pixels.
    fn surface_size(&self) -> (u32, u32);

    fn present(&mut self, frame: &Pixmap) -> Result<()>;

    /// Next input event, waiting at most `timeout` (`None` waits forever).
    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<InputEvent>>;

    /// Keeps the surface alive for `duration`; input is queued, not dropped.
    fn wait(&mut self, duration: Duration, timer: &HighPrecisionTimer) -> Result<()>;

    /// Drops queued key events.
    fn flush_events(&mut self) -> Result<()>;

    fn pointer_position(&self) -> Option<(f32, f32)>;

    fn close(&mut self);
}

pub struct Display {
    backend: Box<dyn DisplayBackend>,
    renderer: ExperimentRenderer,
    back_buffer: Pixmap,
    timer: HighPrecisionTimer,
    frames: usize,
    closed: bool,
}

fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width, height).ok_or_else(|| {
        ExperimentError::Display(format!("cannot allocate {width}x{height} back buffer"))
    })
}

impl Display {
    pub fn new(
        config: &ExperimentConfig,
        timer: HighPrecisionTimer,
        backend: Box<dyn DisplayBackend>,
    ) -> Result<Self> {
        let (width, height) = backend.surface_size();
        log::info!(
            "display {}x{} px, {:.1}x{:.1} cm ({:.1} px/cm) at {:.0} cm ({:.1} px/deg)",
            width,
            height,
            config.screen_size.0,
            config.screen_size.1,
            config.pixels_per_cm(),
            config.screen_dist,
            config.pixels_per_degree(),
        );

        Ok(Self {
            backend,
            renderer: ExperimentRenderer::new(width, height, config)?,
            back_buffer: new_pixmap(width, height)?,
            timer,
            frames: 0,
            closed: false,
        })
    }

    /// Renders `screen` into the back buffer. Nothing is visible until
    /// [`Display::show`].
    pub fn fill(&mut self, screen: &Screen) -> Result<()> {
        self.ensure_open()?;
        let (width, height) = self.backend.surface_size();
        if (width, height) != self.renderer.size() {
            log::debug!("back buffer resized to {}x{}", width, height);
            self.back_buffer = new_pixmap(width, height)?;
            self.renderer.resize(width, height);
        }
        self.renderer.render_screen(&mut self.back_buffer, screen)
    }

    /// Presents the back buffer and returns its onset time in milliseconds.
    pub fn show(&mut self) -> Result<f64> {
        self.ensure_open()?;
        let start = Instant::now();
        self.backend.present(&self.back_buffer)?;
        let onset = Instant::now();
        self.timer.record_frame_time(onset - start);
        self.frames += 1;
        Ok(self.timer.ms_at(onset))
    }

    /// Waits `ms` milliseconds with the current frame on screen
    pub fn pause(&mut self, ms: u64) -> Result<()> {
        self.ensure_open()?;
        self.backend.wait(Duration::from_millis(ms), &self.timer)
    }

    pub fn next_input(&mut self, timeout: Option<Duration>) -> Result<Option<InputEvent>> {
        self.ensure_open()?;
        self.backend.next_event(timeout)
    }

    pub fn flush_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.backend.flush_events()
    }

    pub fn pointer_position(&self) -> Option<(f32, f32)> {
        self.backend.pointer_position()
    }

    pub fn center(&self) -> (f32, f32) {
        self.renderer.center()
    }

    pub fn timer(&self) -> &HighPrecisionTimer {
        &self.timer
    }

    pub fn frames_presented(&self) -> usize {
        self.frames
    }

    pub fn back_buffer(&self) -> &Pixmap {
        &self.back_buffer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let info = self.timer.get_info();
        log::debug!(
            "display closed after {} frames (present {:.3} ms avg, {:.3} ms jitter, {:.3}-{:.3} ms)",
            self.frames,
            info.average_frame_time,
            info.jitter,
            info.min_frame_time,
            info.max_frame_time,
        );
        self.backend.close();
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ExperimentError::Display("display is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(w: u32, h: u32) -> Display {
        let config = ExperimentConfig::default();
        Display::new(
            &config,
            HighPrecisionTimer::new(),
            Box::new(HeadlessBackend::new(w, h)),
        )
        .unwrap()
    }

    #[test]
    fn fill_then_show_counts_frames() {
        let mut display = display(64, 32);
        display.fill(&Screen::with_background([1, 2, 3])).unwrap();
        let first = display.show().unwrap();
        let second = display.show().unwrap();

        assert_eq!(display.frames_presented(), 2);
        assert!(second >= first);
        let px = display.back_buffer().pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.green(), px.blue()), (1, 2, 3));
    }

    #[test]
    fn closed_display_refuses_to_show() {
        let mut display = display(8, 8);
        display.close();
        assert!(display.is_closed());
        assert!(matches!(display.show(), Err(ExperimentError::Display(_))));
        // closing twice is harmless
        display.close();
    }

    #[test]
    fn center_follows_surface() {
        let display = display(100, 50);
        assert_eq!(display.center(), (50.0, 25.0));
    }
}
