use crate::config::ExperimentConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Who is being tested, when, and where their files go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub participant_id: u32,
    pub date: String,
    /// Unix seconds at session start.
    pub start_timestamp: i64,
    pub exp_path: PathBuf,
    /// True when this session created `exp_path`.
    pub created_dir: bool,
}

impl SessionContext {
    /// Derives `<result_folder>/<participant_id>` and creates it if absent.
    pub fn prepare(
        result_folder: &Path,
        participant_id: u32,
        date: impl Into<String>,
        start_timestamp: i64,
    ) -> Result<Self> {
        let exp_path = result_folder.join(participant_id.to_string());
        let created_dir = if exp_path.is_dir() {
            false
        } else {
            fs::create_dir_all(&exp_path)?;
            log::info!("created result folder {}", exp_path.display());
            true
        };

        Ok(Self {
            participant_id,
            date: date.into(),
            start_timestamp,
            exp_path,
            created_dir,
        })
    }

    fn file_name(&self, kind: &str) -> PathBuf {
        self.exp_path.join(format!(
            "{}_{}_{}_{}.txt",
            kind, self.participant_id, self.date, self.start_timestamp
        ))
    }

    pub fn general_log_path(&self) -> PathBuf {
        self.file_name("GENERAL_LOGFILE")
    }

    pub fn experiment_log_path(&self) -> PathBuf {
        self.file_name("EXPERIMENT_LOGFILE")
    }

    pub fn tracker_log_path(&self) -> PathBuf {
        self.file_name("EYETRACKER_LOGFILE")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.exp_path
            .join(format!("session_{}_{}.json", self.date, self.start_timestamp))
    }
}

/// Summary written next to the logs when a session ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: SessionContext,
    pub general_log: PathBuf,
    pub experiment_log: PathBuf,
    pub tracker_log: PathBuf,
    pub completed: bool,
    pub error: Option<String>,
    pub config: ExperimentConfig,
}

impl SessionRecord {
    pub fn new(session: &SessionContext, config: &ExperimentConfig) -> Self {
        Self {
            session: session.clone(),
            general_log: session.general_log_path(),
            experiment_log: session.experiment_log_path(),
            tracker_log: session.tracker_log_path(),
            completed: false,
            error: None,
            config: config.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        log::info!("session summary saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_is_created_once_per_participant() {
        let root = tempfile::tempdir().unwrap();
        let first = SessionContext::prepare(root.path(), 12, "2024-01-02", 100).unwrap();
        assert!(first.created_dir);
        assert!(first.exp_path.is_dir());

        let second = SessionContext::prepare(root.path(), 12, "2024-01-02", 200).unwrap();
        assert!(!second.created_dir);
        assert_eq!(first.exp_path, second.exp_path);

        let other = SessionContext::prepare(root.path(), 13, "2024-01-02", 300).unwrap();
        assert!(other.created_dir);
    }

    #[test]
    fn file_names_follow_layout() {
        let root = tempfile::tempdir().unwrap();
        let session = SessionContext::prepare(root.path(), 7, "2024-05-06", 1700000000).unwrap();
        assert_eq!(
            session.general_log_path(),
            root.path()
                .join("7")
                .join("GENERAL_LOGFILE_7_2024-05-06_1700000000.txt")
        );
        assert_eq!(
            session.experiment_log_path().file_name().unwrap(),
            "EXPERIMENT_LOGFILE_7_2024-05-06_1700000000.txt"
        );
        assert_eq!(
            session.summary_path().file_name().unwrap(),
            "session_2024-05-06_1700000000.json"
        );
    }

    #[test]
    fn record_round_trips_through_json() {
        let root = tempfile::tempdir().unwrap();
        let session = SessionContext::prepare(root.path(), 1, "2024-01-01", 5).unwrap();
        let mut record = SessionRecord::new(&session, &ExperimentConfig::default());
        record.completed = true;
        let path = session.summary_path();
        record.save(&path).unwrap();

        let loaded: SessionRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(loaded.completed);
        assert_eq!(loaded.session, session);
        assert_eq!(loaded.config, ExperimentConfig::default());
    }
}
