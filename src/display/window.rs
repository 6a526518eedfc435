use super::{DisplayBackend, InputEvent};
use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::timer::HighPrecisionTimer;
use pixels::{Pixels, SurfaceTexture};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowId},
};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
/// Tail of a timed wait handed to the high precision sleep instead of the
/// event loop.
const SLEEP_MARGIN: Duration = Duration::from_millis(2);

/// Maps a winit logical key to the lowercase name used in key lists.
pub fn key_name(key: &Key) -> Option<String> {
    match key {
        Key::Named(named) => {
            let name = match named {
                NamedKey::Space => "space",
                NamedKey::Enter => "return",
                NamedKey::Escape => "escape",
                NamedKey::Tab => "tab",
                NamedKey::Backspace => "backspace",
                NamedKey::ArrowLeft => "left",
                NamedKey::ArrowRight => "right",
                NamedKey::ArrowUp => "up",
                NamedKey::ArrowDown => "down",
                _ => return None,
            };
            Some(name.to_string())
        }
        Key::Character(c) if c.as_str() == " " => Some("space".to_string()),
        Key::Character(c) => Some(c.to_lowercase()),
        _ => None,
    }
}

struct WindowState {
    title: String,
    fullscreen: bool,
    requested_size: (u32, u32),
    show_cursor: bool,

    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    current_size: PhysicalSize<u32>,
    refresh_rate: Option<f64>,

    events: VecDeque<InputEvent>,
    pointer: Option<(f32, f32)>,
    error: Option<ExperimentError>,
}

impl WindowState {
    fn new(config: &ExperimentConfig) -> Self {
        Self {
            title: "Gaze Experiment".to_string(),
            fullscreen: config.fullscreen,
            requested_size: config.disp_size,
            // the dummy tracker reads gaze from the mouse
            show_cursor: config.dummy_mode,
            window: None,
            pixels: None,
            current_size: PhysicalSize::new(config.disp_size.0, config.disp_size.1),
            refresh_rate: None,
            events: VecDeque::new(),
            pointer: None,
            error: None,
        }
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| ExperimentError::Display("no monitor available".to_string()))?;

        self.refresh_rate = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let mut window_attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_resizable(false);
        window_attributes = if self.fullscreen {
            window_attributes.with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor))))
        } else {
            let (w, h) = self.requested_size;
            window_attributes.with_inner_size(PhysicalSize::new(w, h))
        };

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .map_err(|e| ExperimentError::Display(format!("failed to create window: {e}")))?,
        );
        let physical_size = window.inner_size();
        self.current_size = physical_size;

        log::info!(
            "window {}x{} (scale factor {:.2})",
            physical_size.width,
            physical_size.height,
            window.scale_factor()
        );
        if let Some(refresh_rate) = self.refresh_rate {
            log::info!("refresh rate {:.1} Hz", refresh_rate);
        }
        if physical_size != PhysicalSize::new(self.requested_size.0, self.requested_size.1) {
            log::warn!(
                "window size {}x{} differs from configured {}x{}",
                physical_size.width,
                physical_size.height,
                self.requested_size.0,
                self.requested_size.1
            );
        }

        let surface_texture =
            SurfaceTexture::new(physical_size.width, physical_size.height, Arc::clone(&window));
        let pixels = Pixels::new(physical_size.width, physical_size.height, surface_texture)
            .map_err(|e| ExperimentError::Display(format!("failed to create surface: {e}")))?;

        window.set_cursor_visible(self.show_cursor);
        window.request_redraw();

        self.pixels = Some(pixels);
        self.window = Some(window);
        Ok(())
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.current_size = new_size;
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                log::error!("failed to resize surface: {}", e);
            }
        }
        log::info!("display resized to {}x{}", new_size.width, new_size.height);
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.events.push_back(InputEvent::CloseRequested),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let Some(name) = key_name(&event.logical_key) {
                    self.events.push_back(InputEvent::Key {
                        name,
                        at: Instant::now(),
                    });
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.pointer = Some((position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => self.pointer = None,
            WindowEvent::Resized(size) => self.handle_resize(size),
            _ => {}
        }
    }
}

/// winit window with a pixels surface, driven synchronously by pumping the
/// event loop from inside each blocking call.
pub struct WindowBackend {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WindowBackend {
    pub fn open(config: &ExperimentConfig) -> Result<Self> {
        let event_loop = EventLoop::new()
            .map_err(|e| ExperimentError::Display(format!("failed to create event loop: {e}")))?;
        let mut backend = Self {
            event_loop,
            state: WindowState::new(config),
        };

        let deadline = Instant::now() + OPEN_TIMEOUT;
        while backend.state.pixels.is_none() {
            if Instant::now() >= deadline {
                return Err(ExperimentError::Display(
                    "window was not created in time".to_string(),
                ));
            }
            backend.pump(Some(Duration::from_millis(10)))?;
            if backend.state.events.contains(&InputEvent::CloseRequested) {
                return Err(ExperimentError::Display(
                    "event loop exited before the window opened".to_string(),
                ));
            }
        }
        Ok(backend)
    }

    fn pump(&mut self, timeout: Option<Duration>) -> Result<()> {
        let status = self.event_loop.pump_app_events(timeout, &mut self.state);
        if let Some(err) = self.state.error.take() {
            return Err(err);
        }
        if let PumpStatus::Exit(code) = status {
            log::debug!("event loop exited with code {}", code);
            if !self.state.events.contains(&InputEvent::CloseRequested) {
                self.state.events.push_back(InputEvent::CloseRequested);
            }
        }
        Ok(())
    }
}

impl DisplayBackend for WindowBackend {
    fn surface_size(&self) -> (u32, u32) {
        (self.state.current_size.width, self.state.current_size.height)
    }

    fn present(&mut self, frame: &Pixmap) -> Result<()> {
        self.pump(Some(Duration::ZERO))?;
        let pixels = self
            .state
            .pixels
            .as_mut()
            .ok_or_else(|| ExperimentError::Display("window is closed".to_string()))?;

        if pixels.frame().len() != frame.data().len() {
            pixels
                .resize_buffer(frame.width(), frame.height())
                .map_err(|e| ExperimentError::Display(format!("failed to resize buffer: {e}")))?;
        }
        pixels.frame_mut().copy_from_slice(frame.data());
        pixels
            .render()
            .map_err(|e| ExperimentError::Display(format!("render failed: {e}")))?;
        Ok(())
    }

    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<InputEvent>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(event) = self.state.events.pop_front() {
                return Ok(Some(event));
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.pump(remaining)?;
        }
    }

    fn wait(&mut self, duration: Duration, timer: &HighPrecisionTimer) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let remaining = deadline - now;
            if remaining <= SLEEP_MARGIN {
                timer.high_precision_sleep(remaining);
                return Ok(());
            }
            self.pump(Some(remaining - SLEEP_MARGIN))?;
        }
    }

    fn flush_events(&mut self) -> Result<()> {
        self.pump(Some(Duration::ZERO))?;
        self.state
            .events
            .retain(|e| matches!(e, InputEvent::CloseRequested));
        Ok(())
    }

    fn pointer_position(&self) -> Option<(f32, f32)> {
        self.state.pointer
    }

    fn close(&mut self) {
        self.state.pixels = None;
        if let Some(window) = self.state.window.take() {
            window.set_cursor_visible(true);
        }
        if let Err(e) = self.pump(Some(Duration::ZERO)) {
            log::warn!("error while closing window: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::keyboard::SmolStr;

    #[test]
    fn named_keys_use_lowercase_names() {
        assert_eq!(key_name(&Key::Named(NamedKey::Space)).as_deref(), Some("space"));
        assert_eq!(key_name(&Key::Named(NamedKey::Enter)).as_deref(), Some("return"));
        assert_eq!(key_name(&Key::Named(NamedKey::Escape)).as_deref(), Some("escape"));
        assert_eq!(key_name(&Key::Named(NamedKey::F1)), None);
    }

    #[test]
    fn characters_are_lowercased() {
        assert_eq!(key_name(&Key::Character(SmolStr::new("A"))).as_deref(), Some("a"));
        assert_eq!(key_name(&Key::Character(SmolStr::new(" "))).as_deref(), Some("space"));
    }
}
