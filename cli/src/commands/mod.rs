// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the anchorage CLI

pub mod config;
pub mod shell;

pub use self::config::ConfigCommand;
pub use self::shell::ShellArgs;
