use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facekiosk_core::{evaluate, evaluator, CaptureConfig, FrameGeometry};
use facekiosk_hw::landmarks::parse_detection;
use facekiosk_hw::Camera;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facekiosk", about = "facekiosk capture kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a capture session
    Start {
        /// Name the stills are uploaded under
        label: String,
    },
    /// Stop the running session, discarding partial captures
    Stop,
    /// Start over with the last session's label
    Retry,
    /// Stop and clear the session
    Abort,
    /// Show daemon and session status
    Status,
    /// List URLs of the gallery photos matched to the last upload
    Matches,
    /// Save one matched gallery photo (watermarked when the daemon has a logo)
    Download {
        /// Photo file name, the last path segment of a `matches` URL
        photo: String,
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Evaluate a saved face-mesh record offline
    Evaluate {
        /// JSON file holding one face-mesh record (or a list of them)
        record: PathBuf,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Daemon config file whose `[capture]` table sets the thresholds
        /// (default: $FACEKIOSK_CONFIG); `FACEKIOSK_*` overrides apply on top
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

// `#[zbus::proxy]` generates `KioskProxy` (async) and `KioskProxyBlocking`.
#[zbus::proxy(
    interface = "org.facekiosk.Kiosk1",
    default_service = "org.facekiosk.Kiosk1",
    default_path = "/org/facekiosk/Kiosk1"
)]
trait Kiosk {
    async fn start_session(&self, label: &str) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<bool>;
    async fn retry(&self) -> zbus::Result<String>;
    async fn abort(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
    async fn matched_images(&self) -> zbus::Result<String>;
    async fn matched_image(&self, photo: &str) -> zbus::Result<Vec<u8>>;
}

async fn connect() -> Result<KioskProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    tracing::debug!("connected to session bus");
    KioskProxy::new(&conn)
        .await
        .context("facekioskd is not reachable (is the daemon running?)")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// The part of the daemon config file the offline evaluator needs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    capture: CaptureConfig,
}

/// Capture thresholds from an optional daemon config file plus env overrides.
fn capture_config(
    file: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CaptureConfig> {
    let mut capture = match file {
        Some(text) => toml::from_str::<ConfigFile>(text)?.capture,
        None => CaptureConfig::default(),
    };
    capture.apply_env(lookup)?;
    capture.validate()?;
    Ok(capture)
}

fn run_evaluate(record: &Path, width: u32, height: u32, config: Option<PathBuf>) -> Result<()> {
    let text = std::fs::read_to_string(record)
        .with_context(|| format!("failed to read {}", record.display()))?;
    let Some(snapshot) = parse_detection(&text)? else {
        bail!("no face in {}", record.display());
    };

    let config_path = config.or_else(|| std::env::var_os("FACEKIOSK_CONFIG").map(PathBuf::from));
    let file = config_path
        .as_deref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))
        })
        .transpose()?;
    let config = capture_config(file.as_deref(), |key| std::env::var(key).ok())?.evaluator();
    let position = evaluate(&snapshot, FrameGeometry::new(width, height), &config);
    let report = serde_json::json!({
        "confidence": snapshot.confidence,
        "distance": evaluator::face_distance(&snapshot),
        "cheek_difference": evaluator::cheek_difference(&snapshot),
        "position": position,
        "all_valid": position.all_valid(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { label } => {
            let id = connect().await?.start_session(&label).await?;
            println!("session {id} started for {label}");
        }
        Commands::Stop => {
            if connect().await?.stop_session().await? {
                println!("session stopped");
            } else {
                println!("no session running");
            }
        }
        Commands::Retry => {
            let id = connect().await?.retry().await?;
            println!("session {id} restarted");
        }
        Commands::Abort => {
            if connect().await?.abort().await? {
                println!("session aborted");
            } else {
                println!("no session to abort");
            }
        }
        Commands::Status => {
            let raw = connect().await?.status().await?;
            print_json(&raw)?;
        }
        Commands::Matches => {
            let raw = connect().await?.matched_images().await?;
            let images: Vec<String> = serde_json::from_str(&raw)?;
            if images.is_empty() {
                println!("no matched images");
            }
            for url in images {
                println!("{url}");
            }
        }
        Commands::Download { photo, out } => {
            let bytes = connect().await?.matched_image(&photo).await?;
            std::fs::write(&out, &bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("{} bytes written to {}", bytes.len(), out.display());
        }
        Commands::Evaluate {
            record,
            width,
            height,
            config,
        } => run_evaluate(&record, width, height, config)?,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_capture_config_defaults_without_file() {
        assert_eq!(capture_config(None, no_env).unwrap(), CaptureConfig::default());
    }

    #[test]
    fn test_capture_config_reads_daemon_file() {
        let file = r#"
            api_url = "http://10.0.0.2:5000/"
            tick_ms = 50

            [capture]
            angle_tolerance = 15
            confidence_threshold = 0.8
        "#;
        let cfg = capture_config(Some(file), no_env).unwrap().evaluator();
        assert_eq!(cfg.angle_tolerance, 15);
        assert!((cfg.confidence_threshold - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_capture_config_env_wins_over_file() {
        let file = "[capture]\nangle_tolerance = 15\n";
        let lookup = |key: &str| (key == "FACEKIOSK_ANGLE_TOLERANCE").then(|| "4".to_string());
        assert_eq!(capture_config(Some(file), lookup).unwrap().angle_tolerance, 4);
    }

    #[test]
    fn test_capture_config_rejects_invalid_thresholds() {
        let lookup = |key: &str| (key == "FACEKIOSK_CONFIDENCE_THRESHOLD").then(|| "2".to_string());
        assert!(capture_config(None, lookup).is_err());
    }
}
