// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Anchor Path Value Object
//!
//! A [`Path`] is the canonical, slash-separated address of an anchor in the
//! namespace. Paths are always absolute in form (`/a/b/c`) but relative in
//! meaning: a capability holder resolves paths *below* the anchor it holds and
//! can never name that anchor's parent.
//!
//! Construction never panics. Invalid input yields a *failed* path whose
//! [`Path::err`] is `Some` and whose [`Path::as_str`] is empty, so callers can
//! compose paths freely and check for failure once, before any mutation.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Canonicalization, validation and lexical relations for anchor paths

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Path separator.
pub const SEPARATOR: char = '/';

/// Path validation errors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum PathError {
    #[error("invalid character {ch:?} at offset {offset}")]
    InvalidChar { ch: char, offset: usize },

    #[error("invalid child name: {0:?}")]
    InvalidName(String),
}

/// Anything that can report its own anchor address.
pub trait PathProvider {
    fn path(&self) -> String;
}

#[derive(Debug, Clone)]
enum Repr {
    /// Zero value; behaves as root.
    Zero,
    Valid(String),
    Failed(PathError),
}

/// Validated, canonical anchor path.
///
/// # Invariants
///
/// - A valid path begins with exactly one separator, contains no `.`/`..`
///   components and no doubled separators.
/// - Every byte is printable ASCII other than backslash.
/// - The empty string, `"/"` and [`Path::default`] are all the root path.
#[derive(Clone)]
pub struct Path {
    repr: Repr,
}

impl Path {
    /// Clean and validate `raw`.
    pub fn new(raw: &str) -> Self {
        if let Err(e) = validate_chars(raw) {
            tracing::debug!(path = %raw.escape_debug(), error = %e, "Rejected anchor path");
            return Self::failed(e);
        }
        Self::valid(clean(raw))
    }

    /// The root path.
    pub fn root() -> Self {
        Self::valid(SEPARATOR.to_string())
    }

    /// Build a path from individual components. Each component is validated
    /// as a child name, so `["a", "b/c"]` fails.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        parts
            .into_iter()
            .fold(Self::root(), |path, part| path.with_child(part.as_ref()))
    }

    /// Build a path from a [`PathProvider`].
    pub fn from_provider(provider: &impl PathProvider) -> Self {
        Self::new(&provider.path())
    }

    fn valid(s: String) -> Self {
        Self { repr: Repr::Valid(s) }
    }

    fn failed(err: PathError) -> Self {
        Self {
            repr: Repr::Failed(err),
        }
    }

    /// Append a single separator-free component.
    ///
    /// A failed receiver stays failed; an invalid name fails the result.
    pub fn with_child(&self, name: &str) -> Self {
        let base = match &self.repr {
            Repr::Failed(_) => return self.clone(),
            Repr::Zero => SEPARATOR.to_string(),
            Repr::Valid(s) => s.clone(),
        };

        if let Err(e) = validate_name(name) {
            return Self::failed(e);
        }

        if base.len() == 1 {
            Self::valid(format!("{SEPARATOR}{name}"))
        } else {
            Self::valid(format!("{base}{SEPARATOR}{name}"))
        }
    }

    /// Pop the left-most component.
    ///
    /// Returns the remainder and the head component. On root (or a failed
    /// path) the head is empty and the remainder is `self`.
    pub fn next(&self) -> (Path, String) {
        let s = match &self.repr {
            Repr::Valid(s) if s.len() > 1 => s,
            _ => return (self.clone(), String::new()),
        };

        let trimmed = &s[1..];
        match trimmed.find(SEPARATOR) {
            Some(i) => (
                Self::valid(trimmed[i..].to_string()),
                trimmed[..i].to_string(),
            ),
            None => (Self::root(), trimmed.to_string()),
        }
    }

    /// Iterate over the components left to right.
    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.as_str()
            .split(SEPARATOR)
            .filter(|part| !part.is_empty())
    }

    /// Number of components. Root has depth zero.
    pub fn depth(&self) -> usize {
        self.parts().count()
    }

    /// The right-most component, or empty for root.
    pub fn name(&self) -> &str {
        self.parts().last().unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        match &self.repr {
            Repr::Zero => true,
            Repr::Valid(s) => s.len() == 1,
            Repr::Failed(_) => false,
        }
    }

    /// Reports whether this is the uninitialized zero value.
    pub fn is_zero(&self) -> bool {
        matches!(self.repr, Repr::Zero)
    }

    /// Reports whether `other` is an immediate child of `self`.
    ///
    /// The relation is lexical and component-aware: `/foo` is not the parent
    /// of `/foobar`.
    pub fn is_child(&self, other: &Path) -> bool {
        match self.strip(other) {
            Some(rest) => !rest.is_empty() && !rest.contains(SEPARATOR),
            None => false,
        }
    }

    /// Reports whether `other` is `self` or lies anywhere below it.
    pub fn is_subpath(&self, other: &Path) -> bool {
        if self.err().is_some() || other.err().is_some() {
            return false;
        }
        self == other || self.strip(other).is_some_and(|rest| !rest.is_empty())
    }

    /// Remainder of `other` below `self`, without the leading separator.
    fn strip<'a>(&self, other: &'a Path) -> Option<&'a str> {
        if self.err().is_some() || other.err().is_some() {
            return None;
        }
        let prefix = self.as_str();
        let candidate = other.as_str();
        if self.is_root() {
            return candidate.strip_prefix(SEPARATOR);
        }
        candidate
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
    }

    pub fn err(&self) -> Option<&PathError> {
        match &self.repr {
            Repr::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Convert into a `Result`, surfacing the validation error.
    pub fn validated(self) -> Result<Self, PathError> {
        match self.repr {
            Repr::Failed(e) => Err(e),
            _ => Ok(self),
        }
    }

    /// Canonical string; empty for a failed path.
    pub fn as_str(&self) -> &str {
        match &self.repr {
            Repr::Zero => "/",
            Repr::Valid(s) => s,
            Repr::Failed(_) => "",
        }
    }

    /// Binary index key. Root indexes as the empty key so that prefix
    /// searches for `"/"` cover the whole namespace.
    pub fn index_key(&self) -> &[u8] {
        if self.is_root() {
            &[]
        } else {
            self.as_str().as_bytes()
        }
    }

    /// Prefix shared by the index keys of every descendant.
    pub fn children_prefix(&self) -> Vec<u8> {
        let mut prefix = self.index_key().to_vec();
        prefix.push(SEPARATOR as u8);
        prefix
    }
}

fn validate_chars(raw: &str) -> Result<(), PathError> {
    for (offset, ch) in raw.char_indices() {
        if !is_valid_char(ch) {
            return Err(PathError::InvalidChar { ch, offset });
        }
    }
    Ok(())
}

fn is_valid_char(ch: char) -> bool {
    ch.is_ascii() && !ch.is_ascii_control() && ch != '\\'
}

fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(SEPARATOR) {
        return Err(PathError::InvalidName(name.to_string()));
    }
    validate_chars(name).map_err(|_| PathError::InvalidName(name.to_string()))
}

/// Lexical clean, rooted at `/`. `..` above root stays at root.
fn clean(raw: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in raw.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    let mut out = String::with_capacity(raw.len() + 1);
    for part in &stack {
        out.push(SEPARATOR);
        out.push_str(part);
    }
    if out.is_empty() {
        out.push(SEPARATOR);
    }
    out
}

impl Default for Path {
    fn default() -> Self {
        Self { repr: Repr::Zero }
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        match (self.err(), other.err()) {
            (None, None) => self.as_str() == other.as_str(),
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.err() {
            None => self.as_str().hash(state),
            Some(e) => e.hash(state),
        }
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.err() {
            None => write!(f, "Path({})", self.as_str()),
            Some(e) => write!(f, "Path(<{e}>)"),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::new(s).validated()
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::new(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Path::new(&raw).validated().map_err(serde::de::Error::custom)
    }
}
