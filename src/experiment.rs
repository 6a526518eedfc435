// experiment.rs

use crate::config::ExperimentConfig;
use crate::display::Display;
use crate::error::Result;
use crate::keyboard::{KeyPress, Keyboard};
use crate::logfile::{ExperimentRow, LogFile};
use crate::screen::Screen;
use crate::session::SessionContext;
use crate::timer::HighPrecisionTimer;
use crate::tracker::EyeTracker;
use std::path::PathBuf;

const INSTRUCTION_TEXT: &str = "This is a stimulus. The experiment will continue automatically. \
                                You don't have to press anything.";
const CONTINUE_TEXT: &str = "Press 'space', 'a', 'b' or 'c' to continue.";

/// One participant's run: owns the display, keyboard, tracker connection
/// and the experiment log for the whole session.
pub struct Experiment {
    welcome_screen_path: PathBuf,
    stimulus_text: String,
    config: ExperimentConfig,
    display: Display,
    keyboard: Keyboard,
    eye_tracker: Box<dyn EyeTracker>,
    log_file: LogFile<ExperimentRow>,
    timer: HighPrecisionTimer,
}

impl Experiment {
    pub fn new(
        config: &ExperimentConfig,
        session: &SessionContext,
        welcome_screen_path: impl Into<PathBuf>,
        stimulus_text: impl Into<String>,
        display: Display,
        eye_tracker: Box<dyn EyeTracker>,
    ) -> Result<Self> {
        let log_file = LogFile::create(session.experiment_log_path())?;
        let timer = display.timer().clone();

        Ok(Self {
            welcome_screen_path: welcome_screen_path.into(),
            stimulus_text: stimulus_text.into(),
            config: config.clone(),
            keyboard: Keyboard::new(Some(config.keylist.clone()), None),
            display,
            eye_tracker,
            log_file,
            timer,
        })
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn eye_tracker(&self) -> &dyn EyeTracker {
        self.eye_tracker.as_ref()
    }

    pub fn calibrate(&mut self) -> Result<bool> {
        let ok = self.eye_tracker.calibrate(&mut self.display)?;
        if !ok {
            log::warn!("calibration did not succeed");
        }
        Ok(ok)
    }

    /// Shows the welcome image for `ms` milliseconds.
    pub fn show_welcome_screen(&mut self, ms: u64) -> Result<()> {
        let mut image_screen = Screen::new();
        image_screen.draw_image(&self.welcome_screen_path);

        self.display.fill(&image_screen)?;
        self.display.show()?;
        self.display.pause(ms)
    }

    /// Runs the trial: instruction, blank, recorded stimulus with a response
    /// key, a color screen waiting for any accepted key, then drift
    /// correction.
    pub fn run_experiment(&mut self) -> Result<()> {
        let font_size = self.config.font_size;
        let font = self.config.font.clone();
        let timing = self.config.timing.clone();
        let quoted = format!("\"{}\"", self.stimulus_text);

        let mut stimulus_screen = Screen::new();
        stimulus_screen.draw_text_with(
            INSTRUCTION_TEXT,
            font_size,
            Some(font.as_str()),
            None,
            None,
        );
        self.display.fill(&stimulus_screen)?;
        self.display.show()?;
        self.display.pause(timing.stimulus_ms)?;

        stimulus_screen.clear();
        self.display.fill(&stimulus_screen)?;
        self.display.show()?;
        self.display.pause(timing.blank_ms)?;

        self.eye_tracker.status_msg("we have shown one stimulus screen")?;
        self.eye_tracker.log(&format!("stimulus screen 1 showing sentence {quoted}"))?;
        self.log_file.write(&ExperimentRow::message(
            self.timer.get_time(),
            format!("showing stimulus {quoted}"),
        ))?;

        self.eye_tracker.start_recording()?;
        let tracking = format!("tracking eye movements for stimulus {}", self.stimulus_text);
        self.eye_tracker.status_msg(&tracking)?;
        self.eye_tracker.log(&tracking)?;

        stimulus_screen.draw_text(self.stimulus_text.as_str(), font_size);
        self.display.fill(&stimulus_screen)?;
        let stimulus_timestamp = self.display.show()?;

        let response_keys = self.config.response_keys.clone();
        let response_keys: Vec<&str> = response_keys.iter().map(String::as_str).collect();
        let response = self.wait_for(Some(&response_keys), true)?;

        self.log_file.write(&ExperimentRow {
            timestamp: self.timer.get_time(),
            stimulus_timestamp: Some(stimulus_timestamp),
            keypress_timestamp: Some(response.timestamp),
            key_pressed: Some(response.key.clone()),
            message: format!("showing stimulus {quoted}"),
        })?;
        log::info!(
            "response `{}` after {:.3} ms",
            response.key,
            response.timestamp - stimulus_timestamp
        );

        self.eye_tracker.stop_recording()?;
        self.eye_tracker.log(&format!("stop recording of {quoted}"))?;

        let mut color_screen = Screen::with_background(self.config.color_screen_bgc);
        color_screen.draw_text(CONTINUE_TEXT, font_size);
        self.display.fill(&color_screen)?;
        let color_timestamp = self.display.show()?;

        // presses made while the color screen is up count
        let press = self.wait_for(None, false)?;
        self.log_file.write(&ExperimentRow {
            timestamp: self.timer.get_time(),
            stimulus_timestamp: Some(color_timestamp),
            keypress_timestamp: Some(press.timestamp),
            key_pressed: Some(press.key),
            message: "continue from color screen".to_string(),
        })?;

        self.eye_tracker.drift_correction(&mut self.display, None)?;
        Ok(())
    }

    /// Blocks until an accepted key; the wait itself has no timeout.
    fn wait_for(&mut self, keylist: Option<&[&str]>, flush: bool) -> Result<KeyPress> {
        let mut flush = flush;
        loop {
            if let Some(press) = self
                .keyboard
                .get_key_with(&mut self.display, keylist, None, flush)?
            {
                return Ok(press);
            }
            flush = false;
        }
    }

    /// Closes the experiment log, the tracker connection and the display.
    pub fn close(mut self) -> Result<()> {
        let rows = self.log_file.rows_written();
        let log_result = self.log_file.close();
        let tracker_result = self.eye_tracker.close();
        self.display.close();
        log::info!("experiment closed ({} log rows)", rows);

        log_result?;
        tracker_result?;
        Ok(())
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("welcome_screen_path", &self.welcome_screen_path)
            .field("tracker", &self.eye_tracker.kind())
            .field("keylist", &self.keyboard.keylist())
            .field("frames", &self.display.frames_presented())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::display::HeadlessBackend;
    use crate::error::ExperimentError;
    use crate::tracker;
    use std::path::Path;

    fn fast_config() -> ExperimentConfig {
        ExperimentConfig {
            timing: TimingConfig {
                welcome_ms: 1,
                stimulus_ms: 1,
                blank_ms: 1,
            },
            ..Default::default()
        }
    }

    fn experiment(root: &Path, keys: &[&str]) -> (Experiment, SessionContext) {
        experiment_on(
            root,
            HeadlessBackend::new(320, 240).with_keys(keys.iter().copied()),
        )
    }

    fn experiment_on(root: &Path, backend: HeadlessBackend) -> (Experiment, SessionContext) {
        let config = fast_config();
        let session = SessionContext::prepare(root, 7, "2024-05-06", 1000).unwrap();
        let timer = HighPrecisionTimer::new();
        let display = Display::new(&config, timer.clone(), Box::new(backend)).unwrap();
        let eye_tracker = tracker::connect(&config, &session, timer).unwrap();

        let welcome = root.join("welcome.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255]))
            .save(&welcome)
            .unwrap();

        let experiment = Experiment::new(
            &config,
            &session,
            welcome,
            "A short\tsentence.",
            display,
            eye_tracker,
        )
        .unwrap();
        (experiment, session)
    }

    fn rows(path: &Path) -> Vec<Vec<String>> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.split('\t').map(String::from).collect())
            .collect()
    }

    #[test]
    fn trial_logs_response_and_continue_key() {
        let root = tempfile::tempdir().unwrap();
        let (mut experiment, session) =
            experiment(root.path(), &["a", "space", "x", "b", "space"]);

        experiment.show_welcome_screen(1).unwrap();
        assert!(experiment.calibrate().unwrap());
        experiment.run_experiment().unwrap();
        assert!(!experiment.eye_tracker().is_recording());
        // welcome, instruction, blank, stimulus, color screen, drift target
        assert_eq!(experiment.display().frames_presented(), 6);
        experiment.close().unwrap();

        let rows = rows(&session.experiment_log_path());
        assert_eq!(rows[0][0], "timestamp");
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[1][3], "");
        assert_eq!(rows[1][4], "showing stimulus \"A short\\tsentence.\"");

        let response = &rows[2];
        assert_eq!(response[3], "space");
        let stimulus: f64 = response[1].parse().unwrap();
        let keypress: f64 = response[2].parse().unwrap();
        assert!(keypress >= stimulus);

        assert_eq!(rows[3][3], "b");
        assert_eq!(rows[3][4], "continue from color screen");
    }

    #[test]
    fn key_pressed_on_color_screen_is_kept() {
        let root = tempfile::tempdir().unwrap();
        // frames: instruction, blank, stimulus, color screen, drift target
        let backend = HeadlessBackend::new(320, 240)
            .with_keys_during_frame(4, ["c"])
            .with_keys(["space", "space"]);
        let (mut experiment, session) = experiment_on(root.path(), backend);

        experiment.run_experiment().unwrap();
        experiment.close().unwrap();

        let rows = rows(&session.experiment_log_path());
        assert_eq!(rows[2][3], "space");
        assert_eq!(rows[3][3], "c");
        assert_eq!(rows[3][4], "continue from color screen");
    }

    #[test]
    fn key_pressed_before_stimulus_wait_is_discarded() {
        let root = tempfile::tempdir().unwrap();
        let backend = HeadlessBackend::new(320, 240)
            .with_keys_during_frame(3, ["space"])
            .with_keys(["a"]);
        let (mut experiment, session) = experiment_on(root.path(), backend);

        let err = experiment.run_experiment().unwrap_err();
        assert!(matches!(err, ExperimentError::InputExhausted));
        drop(experiment);

        // only the pre-stimulus message row; no response was recorded
        assert_eq!(rows(&session.experiment_log_path()).len(), 2);
    }

    #[test]
    fn escape_during_stimulus_aborts_and_keeps_log_readable() {
        let root = tempfile::tempdir().unwrap();
        let (mut experiment, session) = experiment(root.path(), &["escape"]);

        let err = experiment.run_experiment().unwrap_err();
        assert!(matches!(err, ExperimentError::Aborted(_)));
        drop(experiment);

        let rows = rows(&session.experiment_log_path());
        assert_eq!(rows.len(), 2);
        assert!(rows[1][4].starts_with("showing stimulus"));
    }

    #[test]
    fn missing_welcome_image_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let (mut experiment, _session) = experiment(root.path(), &[]);
        experiment.welcome_screen_path = root.path().join("nope.png");

        assert!(matches!(
            experiment.show_welcome_screen(1),
            Err(ExperimentError::Image { .. })
        ));
    }
}
