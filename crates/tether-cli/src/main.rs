//! Tether CLI - lease-guarded light and sound routines.
//!
//! This is the entry point for the `tether` binary.

mod params;
mod routines;
mod target;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_control::{ActuatorClient, BehaviorStep, HttpActuatorClient, Session, SessionConfig};
use tether_core::{Color, SystemParams};
use tracing_subscriber::EnvFilter;

/// Tether CLI - lease-guarded light and sound routines.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Actuator address: host, host:port or URL.
    #[arg(env = "TETHER_HOSTNAME")]
    hostname: String,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Take the lease from its current holder instead of failing.
    #[arg(long, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play the scale Do to Si, one color per note.
    Scale {
        /// Duration of each note in seconds.
        #[arg(
            short = 'd',
            long,
            default_value = "0.7",
            value_parser = routines::parse_seconds
        )]
        note_duration: Duration,

        /// Buzzer volume ceiling in [0, 1].
        #[arg(long, default_value_t = 0.5)]
        volume: f64,
    },

    /// Show solid colors on every LED, one after another.
    Lights {
        /// Color as R,G,B; repeat for a sequence.
        #[arg(
            short,
            long = "color",
            value_parser = routines::parse_rgb,
            default_values = ["0,255,0", "0,0,255"]
        )]
        colors: Vec<Color>,

        /// Seconds each color is shown.
        #[arg(short, long, default_value = "3", value_parser = routines::parse_seconds)]
        seconds: Duration,
    },

    /// Print system params, updating them first if any value is given.
    Params {
        /// Enable or disable the audio/visual system.
        #[arg(long)]
        enabled: Option<bool>,

        /// LED brightness ceiling in [0, 1].
        #[arg(long)]
        max_brightness: Option<f64>,

        /// Buzzer volume ceiling in [0, 1].
        #[arg(long)]
        buzzer_volume: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let default_filter = if args.verbose {
        "tether=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Routine failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let base_url = target::base_url(&args.hostname)?;
    let client = Arc::new(HttpActuatorClient::new(&base_url)?);

    let mut config = SessionConfig::from_env();
    config.must_acquire = !args.force;
    tracing::debug!(
        base_url = %base_url,
        owner = %config.client_name,
        must_acquire = config.must_acquire,
        "Resolved actuator"
    );

    match args.command {
        Command::Scale {
            note_duration,
            volume,
        } => {
            config.system_params = Some(routines::scale_params(volume));
            let steps = routines::scale_steps(note_duration)?;
            run_session(client, config, &steps).await
        }
        Command::Lights { colors, seconds } => {
            let steps = routines::light_steps(&colors, seconds)?;
            run_session(client, config, &steps).await
        }
        Command::Params {
            enabled,
            max_brightness,
            buzzer_volume,
        } => {
            let change = SystemParams {
                enabled,
                max_brightness,
                buzzer_max_volume: buzzer_volume,
            };
            let current = if params::is_update(&change) {
                params::update(client, &config, &change).await?
            } else {
                client
                    .system_params()
                    .await
                    .context("could not read system params")?
            };
            println!("{}", serde_json::to_string_pretty(&current)?);
            Ok(())
        }
    }
}

async fn run_session(
    client: Arc<HttpActuatorClient>,
    config: SessionConfig,
    steps: &[BehaviorStep],
) -> Result<()> {
    let session = Session::new(client, config);
    let summary = session
        .run_until(steps, shutdown_signal())
        .await
        .with_context(|| format!("session {} failed", session.id()))?;

    tracing::info!(
        session_id = %summary.session_id,
        behaviors = summary.priorities.len(),
        "Routine complete"
    );
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the signal cannot be watched.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn scale_defaults() {
        let args = Args::try_parse_from(["tether", "spot.local", "scale"]).unwrap();
        match args.command {
            Command::Scale {
                note_duration,
                volume,
            } => {
                assert_eq!(note_duration, Duration::from_millis(700));
                assert!((volume - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("expected scale, got {other:?}"),
        }
        assert!(!args.force);
    }

    #[test]
    fn lights_accepts_repeated_colors() {
        let args = Args::try_parse_from([
            "tether", "spot.local", "lights", "--color", "255,0,0", "--color", "0,0,255", "-s",
            "1.5",
        ])
        .unwrap();
        match args.command {
            Command::Lights { colors, seconds } => {
                assert_eq!(colors, vec![Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)]);
                assert_eq!(seconds, Duration::from_millis(1500));
            }
            other => panic!("expected lights, got {other:?}"),
        }
    }

    #[test]
    fn lights_defaults_to_green_then_blue() {
        let args = Args::try_parse_from(["tether", "spot.local", "lights"]).unwrap();
        match args.command {
            Command::Lights { colors, seconds } => {
                assert_eq!(colors, vec![Color::rgb(0, 255, 0), Color::rgb(0, 0, 255)]);
                assert_eq!(seconds, Duration::from_secs(3));
            }
            other => panic!("expected lights, got {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args =
            Args::try_parse_from(["tether", "spot.local", "params", "-v", "--force"]).unwrap();
        assert!(args.verbose);
        assert!(args.force);
    }
}
