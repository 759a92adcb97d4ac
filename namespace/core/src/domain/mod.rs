// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anchor addressing, the in-process node tree, anchor rows and events

pub mod anchor;
pub mod config;
pub mod node;
pub mod path;
