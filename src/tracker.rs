//! Eye-tracker abstraction and the dummy driver used when no device is
//! attached.

use crate::config::{ExperimentConfig, TrackerType};
use crate::display::Display;
use crate::error::{ExperimentError, Result};
use crate::keyboard::Keyboard;
use crate::logfile::{LogFile, TrackerRow};
use crate::screen::{FixationType, Screen};
use crate::session::SessionContext;
use crate::timer::HighPrecisionTimer;

const DRIFT_TARGET_DIAMETER: f32 = 12.0;

pub trait EyeTracker {
    fn kind(&self) -> TrackerType;

    fn connected(&self) -> bool;

    /// Runs calibration and validation. Returns whether it succeeded.
    fn calibrate(&mut self, display: &mut Display) -> Result<bool>;

    /// Shows a target at `pos` (display center when `None`) and checks the
    /// participant's gaze against it.
    fn drift_correction(&mut self, display: &mut Display, pos: Option<(f32, f32)>)
        -> Result<bool>;

    fn start_recording(&mut self) -> Result<()>;

    fn stop_recording(&mut self) -> Result<()>;

    fn is_recording(&self) -> bool;

    /// Short status line for the operator.
    fn status_msg(&mut self, msg: &str) -> Result<()>;

    /// Message stored in the tracker's own log.
    fn log(&mut self, msg: &str) -> Result<()>;

    /// Most recent gaze position in display pixels.
    fn sample(&self, display: &Display) -> (f32, f32);

    fn close(&mut self) -> Result<()>;
}

/// Opens the tracker selected by `config`. Only the dummy driver ships with
/// this crate; any other type fails with a device error.
pub fn connect(
    config: &ExperimentConfig,
    session: &SessionContext,
    timer: HighPrecisionTimer,
) -> Result<Box<dyn EyeTracker>> {
    match config.effective_tracker() {
        TrackerType::Dummy => Ok(Box::new(DummyTracker::new(config, session, timer)?)),
        other => Err(ExperimentError::Device(format!(
            "no {} driver available{}; enable dummy_mode to run without a tracker",
            other,
            config
                .tracker_serial
                .as_deref()
                .map(|s| format!(" (serial {s})"))
                .unwrap_or_default()
        ))),
    }
}

/// Stand-in tracker: calibration is a no-op and the mouse pointer plays the
/// role of gaze.
pub struct DummyTracker {
    timer: HighPrecisionTimer,
    log_file: Option<LogFile<TrackerRow>>,
    keyboard: Keyboard,
    tolerance_px: f32,
    recording: bool,
}

impl DummyTracker {
    pub fn new(
        config: &ExperimentConfig,
        session: &SessionContext,
        timer: HighPrecisionTimer,
    ) -> Result<Self> {
        let log_file = LogFile::create(session.tracker_log_path())?;
        let mut tracker = Self {
            timer,
            log_file: Some(log_file),
            keyboard: Keyboard::new(Some(vec!["space".to_string()]), None),
            tolerance_px: config.drift_tolerance_px,
            recording: false,
        };
        log::info!("dummy eye tracker connected");
        tracker.record("connect", "dummy")?;
        Ok(tracker)
    }

    fn record(&mut self, event: &'static str, message: impl Into<String>) -> Result<()> {
        let timestamp = self.timer.get_time();
        let log_file = self
            .log_file
            .as_mut()
            .ok_or_else(|| ExperimentError::Device("tracker connection is closed".to_string()))?;
        log_file.write(&TrackerRow {
            timestamp,
            event,
            message: message.into(),
        })
    }
}

impl EyeTracker for DummyTracker {
    fn kind(&self) -> TrackerType {
        TrackerType::Dummy
    }

    fn connected(&self) -> bool {
        self.log_file.is_some()
    }

    fn calibrate(&mut self, _display: &mut Display) -> Result<bool> {
        log::info!("dummy mode: calibration skipped");
        self.record("calibrate", "skipped in dummy mode")?;
        Ok(true)
    }

    fn drift_correction(
        &mut self,
        display: &mut Display,
        pos: Option<(f32, f32)>,
    ) -> Result<bool> {
        let target = pos.unwrap_or(display.center());

        let mut screen = Screen::new();
        screen.draw_fixation(FixationType::Dot, Some(target), DRIFT_TARGET_DIAMETER, None);
        display.fill(&screen)?;
        display.show()?;
        self.record(
            "drift_correction",
            format!("target at ({:.0}, {:.0})", target.0, target.1),
        )?;

        let mut attempt = 0;
        loop {
            let flush = attempt == 0;
            attempt += 1;
            if self.keyboard.get_key(display, flush)?.is_none() {
                continue;
            }

            let (gx, gy) = self.sample(display);
            let error = ((gx - target.0).powi(2) + (gy - target.1).powi(2)).sqrt();
            if error < self.tolerance_px {
                self.record(
                    "drift_correction_ok",
                    format!("error {error:.1} px after {attempt} attempt(s)"),
                )?;
                return Ok(true);
            }

            log::warn!(
                "drift correction missed target by {:.1} px (tolerance {:.1} px)",
                error,
                self.tolerance_px
            );
            self.record("drift_correction_failed", format!("error {error:.1} px"))?;
        }
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            log::warn!("start_recording called while already recording");
        }
        self.recording = true;
        self.record("start_recording", "")
    }

    fn stop_recording(&mut self) -> Result<()> {
        if !self.recording {
            log::warn!("stop_recording called while not recording");
        }
        self.recording = false;
        self.record("stop_recording", "")
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn status_msg(&mut self, msg: &str) -> Result<()> {
        log::info!("tracker status: {}", msg);
        self.record("status", msg)
    }

    fn log(&mut self, msg: &str) -> Result<()> {
        self.record("message", msg)
    }

    fn sample(&self, display: &Display) -> (f32, f32) {
        display.pointer_position().unwrap_or(display.center())
    }

    fn close(&mut self) -> Result<()> {
        if self.recording {
            self.stop_recording()?;
        }
        if self.log_file.is_some() {
            self.record("close", "")?;
        }
        if let Some(log_file) = self.log_file.take() {
            log_file.close()?;
            log::info!("dummy eye tracker closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessBackend;

    fn session(root: &std::path::Path) -> SessionContext {
        SessionContext::prepare(root, 3, "2024-01-01", 42).unwrap()
    }

    fn display(backend: HeadlessBackend) -> Display {
        Display::new(
            &ExperimentConfig::default(),
            HighPrecisionTimer::new(),
            Box::new(backend),
        )
        .unwrap()
    }

    fn tracker_events(session: &SessionContext) -> Vec<String> {
        std::fs::read_to_string(session.tracker_log_path())
            .unwrap()
            .lines()
            .skip(1)
            .map(|l| l.split('\t').nth(1).unwrap().to_string())
            .collect()
    }

    #[test]
    fn real_driver_is_a_device_error() {
        let root = tempfile::tempdir().unwrap();
        let config = ExperimentConfig {
            dummy_mode: false,
            tracker_type: TrackerType::Tobii,
            tracker_serial: Some("TPFC2-010202524041".to_string()),
            ..Default::default()
        };
        let err = connect(&config, &session(root.path()), HighPrecisionTimer::new())
            .err()
            .unwrap();
        assert!(matches!(err, ExperimentError::Device(msg) if msg.contains("TPFC2")));
    }

    #[test]
    fn recording_lifecycle_is_logged() {
        let root = tempfile::tempdir().unwrap();
        let session = session(root.path());
        let mut tracker =
            connect(&ExperimentConfig::default(), &session, HighPrecisionTimer::new()).unwrap();
        assert_eq!(tracker.kind(), TrackerType::Dummy);

        tracker.start_recording().unwrap();
        assert!(tracker.is_recording());
        tracker.log("trial 1").unwrap();
        tracker.close().unwrap();
        assert!(!tracker.connected());

        assert_eq!(
            tracker_events(&session),
            ["connect", "start_recording", "message", "stop_recording", "close"]
        );
        assert!(matches!(
            tracker.log("late"),
            Err(ExperimentError::Device(_))
        ));
    }

    #[test]
    fn drift_correction_accepts_gaze_on_target() {
        let root = tempfile::tempdir().unwrap();
        let session = session(root.path());
        let mut display = display(
            HeadlessBackend::new(200, 100)
                .with_keys(["a", "space"])
                .with_pointer(105.0, 48.0),
        );
        let mut tracker =
            DummyTracker::new(&ExperimentConfig::default(), &session, HighPrecisionTimer::new())
                .unwrap();

        assert!(tracker.drift_correction(&mut display, None).unwrap());
        assert_eq!(display.frames_presented(), 1);
        tracker.close().unwrap();
        assert!(tracker_events(&session).contains(&"drift_correction_ok".to_string()));
    }

    #[test]
    fn drift_correction_retries_when_gaze_is_off_target() {
        let root = tempfile::tempdir().unwrap();
        let session = session(root.path());
        let mut display = display(
            HeadlessBackend::new(200, 100)
                .with_keys(["space", "space"])
                .with_pointer(0.0, 0.0),
        );
        let mut tracker =
            DummyTracker::new(&ExperimentConfig::default(), &session, HighPrecisionTimer::new())
                .unwrap();

        let err = tracker.drift_correction(&mut display, None).unwrap_err();
        assert!(matches!(err, ExperimentError::InputExhausted));
        drop(tracker);

        let failures = tracker_events(&session)
            .into_iter()
            .filter(|e| e == "drift_correction_failed")
            .count();
        assert_eq!(failures, 2);
    }
}
