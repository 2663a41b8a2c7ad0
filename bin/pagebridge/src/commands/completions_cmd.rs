use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::Cli;

/// Generate shell completion scripts.
pub async fn run(shell: &str) -> anyhow::Result<()> {
    let shell = match shell.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" | "ps" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => {
            anyhow::bail!(
                "Unsupported shell: {}. Options: bash, zsh, fish, powershell, elvish",
                shell
            );
        }
    };

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "pagebridge", &mut std::io::stdout());

    eprintln!();
    eprintln!("# Usage:");
    match shell {
        Shell::Bash => {
            eprintln!("#   pagebridge completions bash > ~/.local/share/bash-completion/completions/pagebridge");
            eprintln!("#   or: eval \"$(pagebridge completions bash)\"");
        }
        Shell::Zsh => {
            eprintln!("#   pagebridge completions zsh > ~/.zfunc/_pagebridge");
        }
        Shell::Fish => {
            eprintln!("#   pagebridge completions fish > ~/.config/fish/completions/pagebridge.fish");
        }
        _ => {}
    }

    Ok(())
}
