//! Include preprocessing
//!
//! Kernel source may contain `#include <name>` lines. Names are looked up in
//! an [`IncludeLibrary`] and spliced in textually before the build step.
//! A registered value is either inline source or a path to a file that is
//! read at every resolution.
//!
//! ```
//! use shader_dispatch::IncludeLibrary;
//!
//! let library = IncludeLibrary::new();
//! library.add_include("math", "float square(float x) { return x * x; }");
//! let expanded = library.expand("#include <math>\n__kernel void k(void) {}");
//! assert!(expanded.contains("square"));
//! ```

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

const DIRECTIVE: &str = "#include <";

static GLOBAL: LazyLock<Arc<IncludeLibrary>> = LazyLock::new(|| Arc::new(IncludeLibrary::new()));

/// Name-keyed table of include snippets
#[derive(Debug, Default)]
pub struct IncludeLibrary {
    entries: RwLock<FxHashMap<String, String>>,
}

impl IncludeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide library, created on first use and never torn down
    pub fn global() -> Arc<IncludeLibrary> {
        Arc::clone(&GLOBAL)
    }

    /// Normalizes an include name: strips `#include`, `<` and `>`, trims and lower-cases
    pub fn normalize(name: &str) -> String {
        name.trim()
            .to_lowercase()
            .replace("#include", "")
            .replace(['<', '>'], "")
            .trim()
            .to_string()
    }

    /// Registers `source` (inline text or a file path) under `name`
    ///
    /// Returns `false` and stores nothing when the normalized name is empty.
    /// A later registration under the same name replaces the earlier one.
    pub fn add_include(&self, name: &str, source: impl Into<String>) -> bool {
        let key = Self::normalize(name);
        if key.is_empty() {
            return false;
        }
        debug!("Registering include '{}'", key);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, source.into());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&Self::normalize(name))
    }

    /// Returns the snippet for `name`, or an empty string if unknown
    ///
    /// If the stored value names an existing file, the file's current
    /// contents are returned instead.
    pub fn resolve(&self, name: &str) -> String {
        let key = Self::normalize(name);
        let value = match self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            Some(value) => value.clone(),
            None => return String::new(),
        };

        if looks_like_path(&value) && Path::new(&value).is_file() {
            match std::fs::read_to_string(&value) {
                Ok(contents) => {
                    trace!("Include '{}' loaded from {}", key, value);
                    return contents;
                }
                Err(e) => debug!("Include '{}' path {} unreadable: {}", key, value, e),
            }
        }
        value
    }

    /// Expands every `#include <name>` directive in `source`
    pub fn expand(&self, source: &str) -> String {
        let mut seen = FxHashSet::default();
        self.expand_with(source, &mut seen)
    }

    /// Expands with an explicit set of already-expanded directives
    ///
    /// A directive line whose trimmed text is already in `seen` is dropped,
    /// so each distinct directive contributes its snippet once. Directives
    /// that resolve to nothing are dropped as well.
    pub fn expand_with(&self, source: &str, seen: &mut FxHashSet<String>) -> String {
        let mut out = String::with_capacity(source.len());
        for line in source.lines() {
            let trimmed = line.trim();
            if !trimmed.starts_with(DIRECTIVE) {
                out.push_str(line);
                out.push('\n');
                continue;
            }
            if !seen.insert(trimmed.to_string()) {
                trace!("Skipping repeated directive '{}'", trimmed);
                continue;
            }

            let snippet = self.resolve(trimmed);
            if snippet.is_empty() {
                debug!("Unresolved include directive '{}' dropped", trimmed);
                continue;
            }
            let snippet = if snippet.contains(DIRECTIVE) {
                self.expand_with(&snippet, seen)
            } else {
                snippet
            };
            out.push_str(&snippet);
            if !snippet.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// True when `value` contains no character that is invalid in a path
fn looks_like_path(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_control() || matches!(c, '<' | '>' | '"' | '|'))
}
