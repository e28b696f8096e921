use clap::Parser;
use scriptops::app::App;
use scriptops::services::logger::{LogLevel, Logger};
use scriptops::services::settings::Settings;
use std::path::PathBuf;

/// Runs scripts on a remote host over SSH, driven by JSON lines on stdin.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for sessions.json and history.json
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// error, warn, info or debug
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut logger = Logger::new("scriptops");
    if let Some(raw) = cli.log_level.as_deref() {
        match LogLevel::parse(raw) {
            Some(level) => logger.set_level(level),
            None => {
                eprintln!("scriptops: unknown log level '{}'", raw);
                std::process::exit(2);
            }
        }
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("scriptops: {}", err);
            std::process::exit(2);
        }
    };
    let settings = match cli.state_dir {
        Some(dir) => settings.with_state_dir(dir),
        None => settings,
    };

    let result = match App::initialize(logger, settings) {
        Ok(app) => scriptops::server::run_stdio(&app).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        eprintln!("scriptops: {}", err);
        std::process::exit(1);
    }
}
