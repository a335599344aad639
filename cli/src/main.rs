use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use clap_derive::{Args, Parser, Subcommand};
use config::{load_env_file, Settings};

mod listen;
mod logging;
mod simulate;

#[derive(Parser, Debug)]
#[command(name = "murmur", author, version, about = "Turn detection and lip sync for voice assistants")]
struct Cli {
    /// Settings file (defaults to settings.toml in the platform config directory)
    #[arg(long, global = true, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Append logs to murmur.log instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment live microphone input into user turns
    Listen(VadArgs),
    /// Run a scripted conversation and print the mouth shapes it produces
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct VadArgs {
    /// RMS level above which a block counts as voiced (0.0 - 1.0)
    #[arg(long)]
    threshold: Option<f32>,

    /// Voiced audio needed to open a turn
    #[arg(long)]
    startup_ms: Option<u64>,

    /// Silence needed to close a turn
    #[arg(long)]
    shutdown_ms: Option<u64>,

    /// Forward only the block that confirmed the turn, not the whole onset
    #[arg(long)]
    no_preroll: bool,
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    /// Reply text to lip sync
    #[arg(long, default_value = "hello from murmur")]
    text: String,

    /// Output latency before audio is heard, in seconds
    #[arg(long)]
    lead_sec: Option<f64>,

    /// Length of the simulated user utterance
    #[arg(long, default_value_t = 400)]
    voiced_ms: u64,

    /// Have the user talk over the reply
    #[arg(long)]
    interrupt: bool,

    #[command(flatten)]
    vad: VadArgs,
}

impl VadArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(threshold) = self.threshold {
            settings.vad.energy_threshold = threshold;
        }
        if let Some(ms) = self.startup_ms {
            settings.vad.startup_ms = ms;
        }
        if let Some(ms) = self.shutdown_ms {
            settings.vad.shutdown_ms = ms;
        }
        if self.no_preroll {
            settings.vad.forward_preroll = false;
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path).map_err(|e| anyhow!(e)),
        None => Ok(Settings::load()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_ref())?;
    let _log_guard = logging::init_logging(settings.log_filter.as_deref(), cli.log_file);

    match cli.command {
        Command::Listen(args) => {
            args.apply(&mut settings);
            listen::run(&settings).await
        }
        Command::Simulate(args) => {
            args.vad.apply(&mut settings);
            if let Some(lead_sec) = args.lead_sec {
                settings.lipsync.lead_sec = lead_sec;
            }
            simulate::run(&settings, &args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::parse_from([
            "murmur",
            "simulate",
            "--threshold",
            "0.05",
            "--no-preroll",
            "--lead-sec",
            "0.2",
        ]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };

        let mut settings = Settings::default();
        args.vad.apply(&mut settings);
        assert_eq!(settings.vad.energy_threshold, 0.05);
        assert!(!settings.vad.forward_preroll);
        assert_eq!(settings.vad.startup_ms, 120);
        assert_eq!(args.lead_sec, Some(0.2));
        assert_eq!(args.text, "hello from murmur");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["murmur", "listen", "--log-file", "--config", "/tmp/m.toml"]);
        assert!(cli.log_file);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/m.toml")));
    }
}
