//! bbfetch CLI - Command-line tool for fetching blackbox logs from flight controllers.
//!
//! ## Features
//!
//! - Copy blackbox logs off the onboard flash and erase it afterwards
//! - Serial port listing
//! - Board identification and flash usage
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    bbfetch::CancelToken,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::{
            OnceLock,
            atomic::{AtomicBool, Ordering},
        },
    },
};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Cancellation shared with the Ctrl-C handler.
static CANCEL: OnceLock<CancelToken> = OnceLock::new();

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Token cancelled by Ctrl-C.
pub(crate) fn cancel_token() -> CancelToken {
    CANCEL.get_or_init(CancelToken::new).clone()
}

/// Exit code for a cancelled run (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing prerequisite (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// bbfetch - Fetch blackbox logs from Betaflight flight controllers.
///
/// Environment variables:
///   BBFETCH_OUTPUT_DIR        - Default output directory
///   BBFETCH_PORT              - Serial port for `info`
///   BBFETCH_CONFIG            - Configuration file path
///   BBFETCH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "bbfetch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "BBFETCH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "BBFETCH_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Copy blackbox logs off the flight controller, then erase its flash.
    Fetch {
        /// Directory to copy logs into (default: current directory).
        #[arg(short, long, value_name = "DIR", env = "BBFETCH_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Erase without asking for confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Give up waiting for the board or its drive after SECS seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Show flight controller identification and flash usage.
    Info {
        /// Serial port (first MSP device found if not specified).
        #[arg(short, long, env = "BBFETCH_PORT")]
        port: Option<String>,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Send an MSP request to every port to find flight controllers.
        #[arg(long)]
        probe: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logger(&cli);

    if let Err(e) = ctrlc::set_handler(|| cancel_token().cancel()) {
        debug!("Could not install Ctrl-C handler: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

/// Setup logging based on verbosity. `RUST_LOG` takes precedence.
fn init_logger(cli: &Cli) {
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

    debug!(
        "bbfetch v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Fetch {
            output_dir,
            yes,
            timeout,
        } => commands::fetch::cmd_fetch(cli, &config, output_dir.as_deref(), *yes, *timeout),
        Commands::Info { port, json } => {
            commands::info::cmd_info(cli, &config, port.as_deref(), *json)
        },
        Commands::ListPorts { json, probe } => {
            commands::ports::cmd_list_ports(&config, *json, *probe)
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: bbfetch completions bash \
                         (or use --install to auto-install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => EXIT_CANCELLED,
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::try_parse_from(["bbfetch", "fetch", "-o", "/tmp/logs", "--yes"]).unwrap();
        match cli.command {
            Commands::Fetch {
                output_dir,
                yes,
                timeout,
            } => {
                assert_eq!(output_dir, Some(PathBuf::from("/tmp/logs")));
                assert!(yes);
                assert!(timeout.is_none());
            },
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_cli_parse_fetch_timeout() {
        let cli = Cli::try_parse_from(["bbfetch", "fetch", "--timeout", "30"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Fetch {
                timeout: Some(30),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parse_info() {
        let cli =
            Cli::try_parse_from(["bbfetch", "info", "--port", "/dev/ttyACM0", "--json"]).unwrap();
        match cli.command {
            Commands::Info { port, json } => {
                assert_eq!(port.as_deref(), Some("/dev/ttyACM0"));
                assert!(json);
            },
            _ => panic!("expected info"),
        }
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["bbfetch", "list-ports", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: true,
                probe: false
            }
        ));
        let cli = Cli::try_parse_from(["bbfetch", "list-ports", "--probe"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { probe: true, .. }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["bbfetch", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions {
                shell: Some(Shell::Zsh),
                install: false
            }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "bbfetch",
            "-vv",
            "--non-interactive",
            "--config",
            "my.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(cli.config_path, Some(PathBuf::from("my.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["bbfetch"]).is_err());
    }

    #[test]
    fn test_cli_invalid_timeout() {
        assert!(Cli::try_parse_from(["bbfetch", "fetch", "--timeout", "soon"]).is_err());
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
        let wrapped = anyhow::Error::from(CliError::Cancelled("x".into())).context("fetch");
        assert_eq!(exit_code(&wrapped), 130);
    }
}
