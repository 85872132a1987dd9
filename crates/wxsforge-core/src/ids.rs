//! Deterministic, human-readable identifier allocation.
//!
//! The first element of a kind named `index.html` gets `index.html`, the next
//! one `index.html.1`, and so on. Collision detection is case-insensitive but the
//! first-seen casing is what ends up in the identifier.

use std::collections::{BTreeMap, BTreeSet};

use crate::consts::{expand_env_consts, is_path_rooted, path_leaf};
use crate::doc::NodeKind;

/// Generated identifiers share a 62 character stream-name budget with table
/// prefixes and index suffixes added later by the toolchain.
pub const MAX_RAW_ID_LEN: usize = 30;

const TRUNCATION_MARKER: &str = "_...";

#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: BTreeMap<(String, String), u32>,
    taken: BTreeSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next identifier for an element of `kind` named `name`.
    pub fn allocate(&mut self, kind: &NodeKind, name: &str) -> String {
        let raw = raw_name_for(kind, name);
        let key = (kind.as_str().to_string(), raw.to_lowercase());

        let mut id = match self.counters.get_mut(&key) {
            None => {
                self.counters.insert(key, 0);
                let mut id = raw.clone();
                // `Name1` would be indistinguishable from an indexed `Name.1` sibling
                if id.ends_with(|c: char| c.is_ascii_digit()) {
                    id.push('_');
                }
                id
            }
            Some(index) => {
                *index += 1;
                format!("{raw}.{index}")
            }
        };

        if id.starts_with(|c: char| c.is_ascii_digit()) {
            id.insert(0, '_');
        }
        while self.taken.contains(&id) {
            id.push('_');
        }
        self.taken.insert(id.clone());
        id
    }

    /// Registers an explicitly assigned identifier so generated ones avoid it.
    /// Returns `false` if it was already taken.
    pub fn reserve(&mut self, id: &str) -> bool {
        self.taken.insert(id.to_string())
    }

    pub fn is_taken(&self, id: &str) -> bool {
        self.taken.contains(id)
    }

    pub fn has_allocations(&self) -> bool {
        !self.counters.is_empty()
    }

    pub fn reset(&mut self) {
        self.counters.clear();
        self.taken.clear();
    }

    /// Per-build reset. Returns a warning when identifiers were generated
    /// before the build started: those elements may now collide with ids the
    /// build hands out.
    pub fn reset_for_build(&mut self, do_not_reset: bool, suppress_warning: bool) -> Option<String> {
        if do_not_reset {
            return None;
        }
        let warning = (self.has_allocations() && !suppress_warning).then(|| {
            "identifiers were auto-generated before the build started; consecutive builds may \
             produce duplicated ids. Avoid evaluating generated ids before the build, assign \
             them explicitly, or disable the per-build reset"
                .to_string()
        });
        self.reset();
        warning
    }
}

/// Derives the raw identifier text for an element name.
///
/// Directories keep their whole logical path (`a\b` -> `a.b`) unless the name is
/// rooted; every other kind only uses the leaf segment.
pub fn raw_name_for(kind: &NodeKind, name: &str) -> String {
    let use_leaf = !matches!(kind, NodeKind::Directory) || is_path_rooted(name);
    let source = if use_leaf { path_leaf(name) } else { name };

    let mut raw = expand_id(source);
    if raw.is_empty() {
        raw = kind.as_str().to_string();
    }

    let len = raw.chars().count();
    if len > MAX_RAW_ID_LEN {
        let tail: String = raw.chars().skip(len - MAX_RAW_ID_LEN).collect();
        raw = format!("{TRUNCATION_MARKER}{tail}");
    }
    raw
}

/// Turns arbitrary text into identifier syntax: environment constants are
/// expanded, `\` becomes `.`, characters outside `[._0-9A-Za-z]` are replaced by
/// their hex code point and a leading digit or dot is escaped with `_`.
pub fn expand_id(text: &str) -> String {
    let expanded = expand_env_consts(text).replace('\\', ".");
    let mut out = String::with_capacity(expanded.len());
    for c in expanded.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            out.push(c);
        } else {
            out.push_str(&format!("{:x}", c as u32));
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        out.insert(0, '_');
    }
    out
}
