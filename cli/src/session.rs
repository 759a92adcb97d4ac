// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Namespace shell session
//!
//! One in-process namespace plus a current anchor. Each input line is parsed
//! with clap in multicall mode, so `ls --help` works like any other command.
//!
//! Absolute paths resolve from the root and relative paths from the current
//! anchor. Moving away from an anchor releases it; `hold` keeps one alive.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::sync::Arc;

use anchorage_cluster::{Membership, MembershipService, PeerId, PeerRecord};
use anchorage_core::infrastructure::event_bus::EventBusError;
use anchorage_core::infrastructure::stream::channel;
use anchorage_core::infrastructure::SubtreeEventReceiver;
use anchorage_core::{
    AnchorClient, CancellationToken, ListEntry, Namespace, NamespaceConfig, Path,
};

#[derive(Parser)]
#[command(multicall = true)]
struct Line {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    /// Make an anchor current, creating it if needed
    Cd { path: String },

    /// Print the current anchor
    Pwd,

    /// List the children of the current anchor
    Ls {
        /// Receive the listing in batches
        #[arg(long)]
        stream: bool,
    },

    /// Keep an anchor alive after moving away from it
    Hold { path: String },

    /// Drop a held anchor
    Release { path: String },

    /// Store a value on the current anchor
    Store {
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },

    /// Print the current anchor's value
    Load,

    /// Remove the current anchor's value
    Clear,

    /// Print every anchor in the namespace
    Tree,

    /// Print lifecycle events since the last call
    Events,

    /// Limit `events` to PATH and everything below it, from now on
    Watch {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Peer membership
    Peer {
        #[command(subcommand)]
        command: PeerCommand,
    },

    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}

#[derive(Subcommand)]
enum PeerCommand {
    /// Send a heartbeat, announcing a new peer unless --id is given
    Join {
        #[arg(long)]
        id: Option<PeerId>,
    },

    /// List live peers
    List,

    /// Forget expired peers
    Sweep,
}

/// Result of one shell line.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Output(String),
    Exit,
}

pub struct Session {
    ns: Namespace,
    membership: Membership,
    cwd: AnchorClient,
    held: HashMap<Path, AnchorClient>,
    events: SubtreeEventReceiver,
    ctx: CancellationToken,
    seq: u64,
    max_in_flight: usize,
    json: bool,
}

impl Session {
    pub fn new(config: &NamespaceConfig, json: bool) -> Result<Self> {
        let ns = Namespace::new(config).context("Failed to create namespace")?;
        let membership = Membership::new("default", ns.root(), config);
        let cwd = ns.root();
        let events = ns.event_bus().subscribe_subtree(Path::root());
        Ok(Self {
            ns,
            membership,
            cwd,
            held: HashMap::new(),
            events,
            ctx: CancellationToken::new(),
            seq: 0,
            max_in_flight: config.stream.max_in_flight,
            json,
        })
    }

    pub fn prompt(&self) -> String {
        format!("{}> ", self.cwd.path().as_str().cyan())
    }

    /// Run one line. Blank lines and `#` comments do nothing.
    pub async fn execute(&mut self, line: &str) -> Result<Step> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() || words[0].starts_with('#') {
            return Ok(Step::Output(String::new()));
        }

        let command = match Line::try_parse_from(words) {
            Ok(line) => line.command,
            Err(e) if !e.use_stderr() => return Ok(Step::Output(e.to_string())),
            Err(e) => return Err(anyhow!(e.render().to_string())),
        };

        let out = match command {
            ShellCommand::Cd { path } => {
                self.cwd = self.resolve(&path).await?;
                String::new()
            }
            ShellCommand::Pwd => self.cwd.path().to_string(),
            ShellCommand::Ls { stream } => self.ls(stream).await?,
            ShellCommand::Hold { path } => {
                let anchor = self.resolve(&path).await?;
                let path = anchor.path().clone();
                self.held.insert(path.clone(), anchor);
                format!("holding {path}")
            }
            ShellCommand::Release { path } => {
                let path = self.absolute(&path)?;
                self.held
                    .remove(&path)
                    .ok_or_else(|| anyhow!("{path} is not held"))?;
                format!("released {path}")
            }
            ShellCommand::Store { value } => {
                let value = bytes::Bytes::from(value.join(" "));
                self.cwd.store(&self.ctx, Some(value)).await?;
                String::new()
            }
            ShellCommand::Load => match self.cwd.load(&self.ctx).await? {
                Some(value) => String::from_utf8_lossy(&value).into_owned(),
                None => "(no value)".dimmed().to_string(),
            },
            ShellCommand::Clear => {
                self.cwd.store(&self.ctx, None).await?;
                String::new()
            }
            ShellCommand::Tree => self.tree()?,
            ShellCommand::Events => self.drain_events()?,
            ShellCommand::Watch { path } => {
                let root = self.absolute(&path)?;
                self.events = self.ns.event_bus().subscribe_subtree(root);
                format!("watching {}", self.events.root())
            }
            ShellCommand::Peer { command } => self.peer(command).await?,
            ShellCommand::Exit => return Ok(Step::Exit),
        };
        Ok(Step::Output(out))
    }

    fn absolute(&self, path: &str) -> Result<Path> {
        let path = if path.starts_with('/') {
            Path::new(path)
        } else {
            let rel = Path::new(path);
            rel.parts()
                .fold(self.cwd.path().clone(), |path, part| path.with_child(part))
        };
        Ok(path.validated()?)
    }

    async fn resolve(&self, path: &str) -> Result<AnchorClient> {
        let anchor = if path.starts_with('/') {
            self.ns.walk(&self.ctx, path).await?
        } else {
            self.cwd.walk(&self.ctx, path).await?
        };
        Ok(anchor)
    }

    async fn ls(&self, stream: bool) -> Result<String> {
        let mut names: Vec<String> = if stream {
            let (handler, iter) = channel::<ListEntry>(self.max_in_flight);
            let producer = {
                let anchor = self.cwd.clone();
                let ctx = self.ctx.clone();
                tokio::spawn(async move { anchor.ls_stream(&ctx, Arc::new(handler)).await })
            };
            let entries = iter.collect().await?;
            producer.await??;
            entries.into_iter().map(|(name, _)| name).collect()
        } else {
            self.cwd.ls(&self.ctx).await?.names
        };
        names.sort();

        if self.json {
            return Ok(serde_json::to_string(&names)?);
        }
        Ok(names.join("\n"))
    }

    fn tree(&self) -> Result<String> {
        let paths = self.ns.snapshot().paths()?;
        if self.json {
            return Ok(serde_json::to_string(&paths)?);
        }

        let lines: Vec<String> = paths
            .iter()
            .map(|path| {
                if path.is_root() {
                    return "/".to_string();
                }
                let indent = "  ".repeat(path.depth());
                let name = path.name();
                if self.held.contains_key(path) {
                    format!("{indent}{} {}", name, "(held)".dimmed())
                } else {
                    format!("{indent}{name}")
                }
            })
            .collect();
        Ok(lines.join("\n"))
    }

    fn drain_events(&mut self) -> Result<String> {
        let mut lines = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => lines.push(serde_json::to_string(&event)?),
                Err(EventBusError::Empty) => break,
                Err(EventBusError::Lagged(n)) => {
                    lines.push(format!("{} {n} events dropped", "!".yellow()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(lines.join("\n"))
    }

    async fn peer(&mut self, command: PeerCommand) -> Result<String> {
        match command {
            PeerCommand::Join { id } => {
                let peer = id.unwrap_or_default();
                self.seq += 1;
                let record = self.membership.announce(peer, self.seq);
                let outcome = self.membership.heartbeat(&self.ctx, record).await?;
                Ok(format!("{peer} {outcome:?}"))
            }
            PeerCommand::List => {
                let (handler, iter) = channel::<PeerRecord>(self.max_in_flight);
                self.membership.peers(&self.ctx, Arc::new(handler)).await?;
                let mut records = iter.collect().await?;
                records.sort_by_key(|record| record.peer);

                if self.json {
                    return Ok(serde_json::to_string(&records)?);
                }
                Ok(records
                    .iter()
                    .map(|r| format!("{} seq={} ttl={}s", r.peer, r.seq, r.ttl.as_secs()))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            PeerCommand::Sweep => {
                let swept = self.membership.sweep().await;
                Ok(format!("swept {swept}"))
            }
        }
    }
}
