use crate::config::ExperimentConfig;
use crate::display::{Display, DisplayBackend};
use crate::error::Result;
use crate::experiment::Experiment;
use crate::logfile::{GeneralRow, LogFile};
use crate::session::{SessionContext, SessionRecord};
use crate::timer::HighPrecisionTimer;
use crate::tracker;
use std::path::{Path, PathBuf};

/// What one run needs besides the configuration
#[derive(Debug, Clone)]
pub struct RunParams {
    pub welcome_screen_path: PathBuf,
    pub stimulus_text: String,
    pub participant_id: u32,
    pub date: String,
}

/// Runs one full session: result folder, general log, welcome, calibration,
/// trial, teardown.
///
/// `start_timestamp` is the wall-clock start in unix seconds and ends up in
/// every file name of the session. Whatever happens after the general log is
/// opened, the log is closed before this function returns; a failure is
/// recorded as an `ABORTED` row first.
pub fn run_experiment(
    config: &ExperimentConfig,
    params: &RunParams,
    start_timestamp: i64,
    timer: HighPrecisionTimer,
    backend: Box<dyn DisplayBackend>,
) -> Result<SessionContext> {
    let session = SessionContext::prepare(
        &config.result_folder,
        params.participant_id,
        params.date.clone(),
        start_timestamp,
    )?;

    let mut general_log = LogFile::<GeneralRow>::create(session.general_log_path())?;
    general_log.write(&GeneralRow::new(
        timer.get_time(),
        format!("EXP_START_TIMESTAMP_{start_timestamp}"),
    ))?;
    general_log.write(&GeneralRow::new(
        timer.get_time(),
        format!("PARTICIPANT_ID_{}", params.participant_id),
    ))?;
    general_log.write(&GeneralRow::new(timer.get_time(), "START"))?;
    log::info!(
        "session started for participant {} ({})",
        params.participant_id,
        general_log.path().display()
    );

    let record = SessionRecord::new(&session, config);
    let outcome = run_steps(config, params, &session, &timer, backend, &mut general_log);
    finish_session(general_log, record, &session.summary_path(), &timer, outcome)?;

    Ok(session)
}

/// Ends the general log with `END`, or `ABORTED: <error>` when the run or
/// the `END` row itself failed, then closes it and saves the summary.
fn finish_session(
    mut general_log: LogFile<GeneralRow>,
    mut record: SessionRecord,
    summary_path: &Path,
    timer: &HighPrecisionTimer,
    outcome: Result<()>,
) -> Result<()> {
    let outcome =
        outcome.and_then(|()| general_log.write(&GeneralRow::new(timer.get_time(), "END")));

    match &outcome {
        Ok(()) => record.completed = true,
        Err(e) => {
            log::error!("session aborted: {}", e);
            record.error = Some(e.to_string());
            if let Err(log_err) =
                general_log.write(&GeneralRow::new(timer.get_time(), format!("ABORTED: {e}")))
            {
                log::error!("could not record abort: {}", log_err);
            }
        }
    }
    let closed = general_log.close();
    record.save(summary_path)?;
    outcome?;
    closed
}

fn run_steps(
    config: &ExperimentConfig,
    params: &RunParams,
    session: &SessionContext,
    timer: &HighPrecisionTimer,
    backend: Box<dyn DisplayBackend>,
    general_log: &mut LogFile<GeneralRow>,
) -> Result<()> {
    let display = Display::new(config, timer.clone(), backend)?;
    let eye_tracker = tracker::connect(config, session, timer.clone())?;
    let mut experiment = Experiment::new(
        config,
        session,
        &params.welcome_screen_path,
        params.stimulus_text.clone(),
        display,
        eye_tracker,
    )?;

    general_log.write(&GeneralRow::new(timer.get_time(), "show welcome screen"))?;
    experiment.show_welcome_screen(config.timing.welcome_ms)?;

    experiment.calibrate()?;

    general_log.write(&GeneralRow::new(timer.get_time(), "start experiment"))?;
    experiment.run_experiment()?;
    general_log.write(&GeneralRow::new(timer.get_time(), "finished experiment"))?;

    experiment.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::display::HeadlessBackend;
    use crate::error::ExperimentError;

    fn setup(root: &Path) -> (ExperimentConfig, RunParams) {
        let welcome = root.join("welcome.png");
        image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]))
            .save(&welcome)
            .unwrap();
        let config = ExperimentConfig {
            result_folder: root.join("results"),
            timing: TimingConfig {
                welcome_ms: 1,
                stimulus_ms: 1,
                blank_ms: 1,
            },
            ..Default::default()
        };
        let params = RunParams {
            welcome_screen_path: welcome,
            stimulus_text: "Hello.".to_string(),
            participant_id: 12,
            date: "2024-03-01".to_string(),
        };
        (config, params)
    }

    fn messages(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(|l| l.split('\t').nth(1).unwrap().to_string())
            .collect()
    }

    #[test]
    fn completed_run_writes_general_log_in_order() {
        let root = tempfile::tempdir().unwrap();
        let (config, params) = setup(root.path());
        let backend = HeadlessBackend::new(64, 48).with_keys(["space", "c", "space"]);

        let session = run_experiment(
            &config,
            &params,
            1_700_000_000,
            HighPrecisionTimer::new(),
            Box::new(backend),
        )
        .unwrap();

        assert_eq!(session.exp_path, root.path().join("results").join("12"));
        assert_eq!(
            messages(&session.general_log_path()),
            [
                "EXP_START_TIMESTAMP_1700000000",
                "PARTICIPANT_ID_12",
                "START",
                "show welcome screen",
                "start experiment",
                "finished experiment",
                "END",
            ]
        );

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(session.summary_path()).unwrap())
                .unwrap();
        assert_eq!(summary["completed"], true);
        assert!(summary["error"].is_null());
    }

    #[test]
    fn failure_is_recorded_before_returning() {
        let root = tempfile::tempdir().unwrap();
        let (config, params) = setup(root.path());
        // stimulus wait never sees the response key
        let backend = HeadlessBackend::new(64, 48).with_keys(["a"]);

        let err = run_experiment(
            &config,
            &params,
            5,
            HighPrecisionTimer::new(),
            Box::new(backend),
        )
        .unwrap_err();
        assert!(matches!(err, ExperimentError::InputExhausted));

        let session = SessionContext::prepare(&config.result_folder, 12, "2024-03-01", 5).unwrap();
        assert!(!session.created_dir);
        let messages = messages(&session.general_log_path());
        assert_eq!(messages[messages.len() - 2], "start experiment");
        assert!(messages[messages.len() - 1].starts_with("ABORTED: "));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(session.summary_path()).unwrap())
                .unwrap();
        assert_eq!(summary["completed"], false);
        assert!(summary["error"].is_string());
    }

    #[test]
    fn failed_end_row_still_saves_summary() {
        let root = tempfile::tempdir().unwrap();
        let (config, _params) = setup(root.path());
        let session = SessionContext::prepare(&config.result_folder, 12, "2024-03-01", 7).unwrap();
        let mut general_log = LogFile::<GeneralRow>::create(session.general_log_path()).unwrap();
        general_log.lose_handle();

        let err = finish_session(
            general_log,
            SessionRecord::new(&session, &config),
            &session.summary_path(),
            &HighPrecisionTimer::new(),
            Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, ExperimentError::Io(_)));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(session.summary_path()).unwrap())
                .unwrap();
        assert_eq!(summary["completed"], false);
        assert!(summary["error"].as_str().unwrap().contains("closed"));
    }

    #[test]
    fn non_dummy_tracker_aborts_after_start() {
        let root = tempfile::tempdir().unwrap();
        let (mut config, params) = setup(root.path());
        config.dummy_mode = false;
        config.tracker_type = crate::config::TrackerType::EyeLink;

        let err = run_experiment(
            &config,
            &params,
            9,
            HighPrecisionTimer::new(),
            Box::new(HeadlessBackend::new(64, 48)),
        )
        .unwrap_err();
        assert!(matches!(err, ExperimentError::Device(_)));

        let session = SessionContext::prepare(&config.result_folder, 12, "2024-03-01", 9).unwrap();
        let messages = messages(&session.general_log_path());
        assert_eq!(messages[2], "START");
        assert_eq!(messages.len(), 4);
    }
}
