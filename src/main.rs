use anyhow::{Context, Result};
use clap::Parser;
use gaze_experiment::display::{DisplayBackend, HeadlessBackend, WindowBackend};
use gaze_experiment::timer::HighPrecisionTimer;
use gaze_experiment::{run_experiment, ExperimentConfig, RunParams};
use std::path::PathBuf;

const DEFAULT_STIMULUS: &str = "This is an example stimulus. We can easily show text on the screen. \
                                We can change the font, the size and other settings.\n\n\
                                Press space to continue.";

#[derive(Parser, Debug)]
#[command(version, about = "Eye-tracking experiment demo", long_about = None)]
struct Args {
    /// JSON file overriding the default settings
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 12)]
    participant: u32,

    /// Session date (defaults to today, YYYY-MM-DD)
    #[arg(long)]
    date: Option<String>,

    /// Welcome image (defaults to welcome_screen.png under the data root)
    #[arg(long, value_name = "FILE")]
    welcome_image: Option<PathBuf>,

    /// Read the stimulus text from a file
    #[arg(long, value_name = "FILE")]
    stimulus_file: Option<PathBuf>,

    /// Override the result folder
    #[arg(long, value_name = "DIR")]
    results: Option<PathBuf>,

    /// Run in a window instead of fullscreen
    #[arg(long)]
    windowed: bool,

    /// Run without a window, feeding key presses from --keys
    #[arg(long)]
    headless: bool,

    /// Comma separated key presses for --headless
    #[arg(long, value_delimiter = ',', requires = "headless")]
    keys: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // the session clock starts before anything else happens
    let timer = HighPrecisionTimer::new();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };
    if let Some(results) = &args.results {
        config.result_folder = results.clone();
    }
    if args.windowed {
        config.fullscreen = false;
    }
    config.validate()?;

    let stimulus_text = match &args.stimulus_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading stimulus {}", path.display()))?
            .trim_end()
            .to_string(),
        None => DEFAULT_STIMULUS.to_string(),
    };

    let now = chrono::Local::now();
    let params = RunParams {
        welcome_screen_path: args
            .welcome_image
            .clone()
            .unwrap_or_else(|| config.welcome_screen_path()),
        stimulus_text,
        participant_id: args.participant,
        date: args
            .date
            .clone()
            .unwrap_or_else(|| now.date_naive().to_string()),
    };

    log::info!("platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
    log::info!(
        "tracker: {} (dummy mode {})",
        config.effective_tracker(),
        config.dummy_mode
    );

    let backend: Box<dyn DisplayBackend> = if args.headless {
        let (w, h) = config.disp_size;
        Box::new(HeadlessBackend::new(w, h).with_keys(args.keys.clone()))
    } else {
        Box::new(WindowBackend::open(&config).context("opening display")?)
    };

    let session = run_experiment(&config, &params, now.timestamp(), timer, backend)
        .context("experiment failed")?;

    log::info!("results saved to {}", session.exp_path.display());
    Ok(())
}
