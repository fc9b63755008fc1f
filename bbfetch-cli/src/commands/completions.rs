//! Shell completion generation and installation.

use {
    crate::Cli,
    anyhow::{Context, Result, bail},
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    console::style,
    directories::BaseDirs,
    std::{
        env, fs, io,
        path::{Path, PathBuf},
    },
};

/// Binary name completions are generated for.
const BIN_NAME: &str = "bbfetch";

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    generate(shell, &mut Cli::command(), BIN_NAME, &mut io::stdout());
}

/// Install shell completions for the given or detected shell.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             bbfetch completions --install bash",
        )?,
    };

    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    let path = install_path(shell, &dirs)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, render(shell))
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(shell).cyan(),
        style(path.display()).yellow()
    );
    if let Some(hint) = activation_hint(shell, &path) {
        eprintln!("\n{hint}");
    }

    Ok(())
}

/// Completion script for `shell`.
fn render(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), BIN_NAME, &mut buf);
    buf
}

/// Detect the user's current shell from the environment.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Match a shell binary path by its file name.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let name = Path::new(shell_path).file_name()?.to_str()?;
    match name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Where the completion script for `shell` is installed.
fn install_path(shell: Shell, dirs: &BaseDirs) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data_dir()
            .join("bash-completion")
            .join("completions")
            .join(BIN_NAME),
        Shell::Zsh => dirs.home_dir().join(".zfunc").join(format!("_{BIN_NAME}")),
        Shell::Fish => dirs
            .config_dir()
            .join("fish")
            .join("completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::Elvish => dirs
            .config_dir()
            .join("elvish")
            .join("lib")
            .join(format!("{BIN_NAME}.elv")),
        Shell::PowerShell => dirs
            .config_dir()
            .join("powershell")
            .join("completions")
            .join(format!("{BIN_NAME}.ps1")),
        _ => bail!("Unsupported shell for auto-install"),
    };
    Ok(path)
}

/// What the user still has to do after installing.
fn activation_hint(shell: Shell, path: &Path) -> Option<String> {
    match shell {
        Shell::Bash => Some(format!(
            "To activate now: {}",
            style(format!("source {}", path.display())).cyan()
        )),
        Shell::Zsh => Some(format!(
            "Make sure your ~/.zshrc contains:\n  {}\n  {}",
            style("fpath=(~/.zfunc $fpath)").cyan(),
            style("autoload -Uz compinit && compinit").cyan()
        )),
        Shell::PowerShell => Some(format!(
            "Add this to your PowerShell profile:\n  {}",
            style(format!(". {}", path.display())).cyan()
        )),
        _ => None,
    }
}
