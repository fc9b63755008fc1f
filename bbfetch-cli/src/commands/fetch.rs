//! Fetch command: copy blackbox logs off the board and erase its flash.

use {
    crate::{Cli, CliError, cancel_token, config::Config, use_fancy_output},
    anyhow::{Context, Result, anyhow},
    bbfetch::{
        ChannelObserver, Event, Inventory, NativeOpener, NativePlatform, Outcome, OutputDir,
        Workflow, workflow::STATUS_RECONNECT,
    },
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::debug,
    std::{
        env,
        io::IsTerminal,
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
};

/// Fetch command implementation.
pub(crate) fn cmd_fetch(
    cli: &Cli,
    config: &Config,
    output_dir: Option<&Path>,
    yes: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let output = resolve_output_dir(output_dir, config)?;
    confirm_erase(cli, yes)?;

    let inventory = Inventory::new(Arc::new(NativePlatform), Arc::new(NativeOpener))
        .with_config(config.inventory_config());
    let mut workflow_config = config.workflow_config();
    if let Some(secs) = timeout {
        workflow_config.wait_timeout = Some(Duration::from_secs(secs));
    }

    if !cli.quiet {
        eprintln!(
            "{} Saving logs to {}",
            style("📂").cyan(),
            style(output.display()).yellow()
        );
    }

    let (observer, events) = ChannelObserver::new();
    let handle = Workflow::new(inventory, observer)
        .with_config(workflow_config)
        .with_output_dir(OutputDir::new(&output))
        .with_cancel_token(cancel_token())
        .spawn()
        .context("Failed to start worker thread")?;

    let pb = progress_bar(cli);
    let fancy = !pb.is_hidden();

    for event in events {
        match event {
            Event::Progress(value) => pb.set_position(u64::from(value)),
            Event::Status(message) => {
                if message == STATUS_RECONNECT && use_fancy_output() {
                    // Audible cue to replug the board
                    eprint!("\x07\x07\x07");
                }
                if fancy {
                    pb.set_message(message);
                } else if !cli.quiet {
                    eprintln!("{message}");
                }
            },
            Event::State(state) => debug!("State: {state}"),
            Event::Completed => break,
        }
    }

    let outcome = handle
        .join()
        .map_err(|_| anyhow!("Worker thread panicked"))?;

    match outcome {
        Outcome::Succeeded => {
            pb.finish();
            if !cli.quiet {
                eprintln!(
                    "\n{} Blackbox logs saved to {}",
                    style("🎉").green().bold(),
                    style(output.display()).yellow()
                );
            }
            Ok(())
        },
        Outcome::Cancelled => {
            pb.abandon();
            Err(CliError::Cancelled("Interrupted".to_string()).into())
        },
        Outcome::Failed(e) => {
            pb.abandon();
            Err(anyhow::Error::new(e).context("Fetch failed"))
        },
    }
}

/// Output directory from the command line, the config file, or the current directory.
fn resolve_output_dir(arg: Option<&Path>, config: &Config) -> Result<PathBuf> {
    if let Some(dir) = arg.or(config.output.directory.as_deref()) {
        return Ok(dir.to_path_buf());
    }
    env::current_dir().context("Could not determine current directory")
}

/// Ask before the destructive erase unless `--yes` was given.
fn confirm_erase(cli: &Cli, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    if cli.non_interactive || !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal())
    {
        return Err(CliError::Usage(
            "The flight controller's flash is erased after copying; pass --yes to confirm"
                .to_string(),
        )
        .into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Blackbox logs will be erased from the board after copying. Continue?")
        .default(true)
        .interact_opt()
        .map_err(|e| CliError::Usage(format!("Prompt failed: {e}")))?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Erase not confirmed".to_string()).into())
    }
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
