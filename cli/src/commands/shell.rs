// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Namespace shell command
//!
//! Reads commands from a script file, or from stdin with a prompt when stdin
//! is a terminal. A script stops at the first failing line.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use anchorage_core::NamespaceConfig;

use crate::session::{Session, Step};

#[derive(Args)]
pub struct ShellArgs {
    /// Run commands from a file instead of stdin
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Print listings and trees as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: ShellArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = NamespaceConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let mut session = Session::new(&config, args.json)?;

    match args.script {
        Some(path) => {
            let script = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read script {:?}", path))?;
            info!(script = %path.display(), "Running namespace script");
            run_script(&mut session, &script).await
        }
        None => run_interactive(&mut session).await,
    }
}

async fn run_script(session: &mut Session, script: &str) -> Result<()> {
    for (number, line) in script.lines().enumerate() {
        let step = session
            .execute(line)
            .await
            .with_context(|| format!("line {}: {}", number + 1, line.trim()))?;
        match step {
            Step::Output(out) => print_output(&out),
            Step::Exit => break,
        }
    }
    Ok(())
}

async fn run_interactive(session: &mut Session) -> Result<()> {
    let interactive = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if interactive {
            print!("{}", session.prompt());
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match session.execute(&line).await {
            Ok(Step::Output(out)) => print_output(&out),
            Ok(Step::Exit) => break,
            Err(e) if interactive => eprintln!("{} {:#}", "error:".red().bold(), e),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn print_output(out: &str) {
    if !out.is_empty() {
        println!("{out}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_runs_to_exit() {
        let mut session = Session::new(&NamespaceConfig::default(), false).unwrap();
        let script = "# setup\ncd /a\nstore x\nexit\ncd /never\n";
        run_script(&mut session, script).await.unwrap();

        colored::control::set_override(false);
        let tree = session.execute("tree").await.unwrap();
        assert_eq!(tree, Step::Output("/\n  a".to_string()));
    }

    #[tokio::test]
    async fn test_script_reports_failing_line() {
        let mut session = Session::new(&NamespaceConfig::default(), false).unwrap();
        let err = run_script(&mut session, "pwd\nrelease /missing\n")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("line 2: release /missing"));
    }
}
