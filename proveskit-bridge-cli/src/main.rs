//! proveskit-bridge CLI - serial bridge to PROVESKit flight controllers.
//!
//! ## Features
//!
//! - Discover attached boards by USB identifiers or port pattern
//! - Keep one link open, reconnecting whenever the board comes back
//! - Expose a session over stdio as JSON lines (`bridge`)
//! - Interactive terminal with REPL toggles (`monitor`)
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;

mod commands;
mod config;

use config::Config;

/// proveskit-bridge - connect to a PROVESKit flight controller over USB serial.
///
/// Environment variables:
///   PROVESKIT_PORT      - Fixed serial port (disables discovery)
///   PROVESKIT_POLL_MS   - Discovery interval in milliseconds (default: 1000)
///   RUST_LOG            - Log filter override
#[derive(Parser)]
#[command(name = "proveskit-bridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (discovered if not specified).
    #[arg(short, long, global = true, env = "PROVESKIT_PORT")]
    port: Option<String>,

    /// Discovery interval in milliseconds.
    #[arg(long, global = true, value_name = "MS", env = "PROVESKIT_POLL_MS")]
    poll_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only warnings and errors are logged).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List serial ports, marking PROVESKit boards.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Include ports that are not PROVESKit boards.
        #[arg(long)]
        all: bool,
    },

    /// Check whether a board is attached.
    Status {
        /// Output status as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Serve one session over stdin/stdout as JSON lines.
    Bridge,

    /// Open an interactive terminal to the board.
    Monitor {
        /// Prefix each device line with the time it was printed.
        #[arg(short, long)]
        timestamp: bool,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "proveskit-bridge v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let manager_config = config.manager_config(cli.port.as_deref(), cli.poll_ms)?;

    match cli.command {
        Commands::ListPorts { json, all } => {
            commands::ports::cmd_list_ports(&manager_config.filter, json, all)?;
        },
        Commands::Status { json } => {
            commands::status::cmd_status(&manager_config.filter, json)?;
        },
        Commands::Bridge => {
            commands::bridge::cmd_bridge(manager_config)?;
        },
        Commands::Monitor { timestamp } => {
            commands::monitor::cmd_monitor(manager_config, timestamp)?;
        },
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["proveskit-bridge", "list-ports", "--json", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: true,
                all: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "proveskit-bridge",
            "bridge",
            "--port",
            "/dev/ttyACM0",
            "--poll-ms",
            "250",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.poll_ms, Some(250));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Bridge));
    }

    #[test]
    fn test_cli_parse_monitor_timestamp() {
        let cli = Cli::try_parse_from(["proveskit-bridge", "monitor", "-t"]).unwrap();
        assert!(matches!(cli.command, Commands::Monitor { timestamp: true }));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["proveskit-bridge"]).is_err());
    }

    #[test]
    fn test_cli_rejects_non_numeric_poll() {
        assert!(Cli::try_parse_from(["proveskit-bridge", "status", "--poll-ms", "soon"]).is_err());
    }
}
