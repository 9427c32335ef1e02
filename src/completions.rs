use crate::Cli;
use anyhow::{Result, anyhow};
use clap::CommandFactory;
use clap_complete::{Shell, generate, generate_to};
use std::fs;
use std::path::PathBuf;

const BIN_NAME: &str = "minichain";

/// Shells we can generate for, paired with the user-level directory their
/// completion files conventionally live in (relative to $HOME).
fn resolve_shell(name: &str) -> Result<(Shell, &'static str)> {
    match name {
        "bash" => Ok((Shell::Bash, ".local/share/bash-completion/completions")),
        "zsh" => Ok((Shell::Zsh, ".local/share/zsh/site-functions")),
        "fish" => Ok((Shell::Fish, ".config/fish/completions")),
        "powershell" | "pwsh" => Ok((Shell::PowerShell, ".config/powershell/Completions")),
        s => Err(anyhow!("unsupported shell: {}", s)),
    }
}

pub fn print_to_stdout(shell: &str) -> Result<()> {
    let (shell, _) = resolve_shell(shell)?;
    generate(shell, &mut Cli::command(), BIN_NAME, &mut std::io::stdout());
    Ok(())
}

/// Install user-level completions and return the exact path written.
pub fn install_user_completion(shell: &str) -> Result<PathBuf> {
    let (shell, dir) = resolve_shell(shell)?;

    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("could not determine home directory"))?;
    let out_dir = home.join(dir);
    fs::create_dir_all(&out_dir)?;

    Ok(generate_to(shell, &mut Cli::command(), BIN_NAME, &out_dir)?)
}
