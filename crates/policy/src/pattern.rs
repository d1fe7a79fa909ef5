//! Compiled MATCHES patterns, shared across evaluations.
//!
//! Validation compiles a pattern once and leaves it here; evaluation looks it
//! up instead of recompiling. Patterns resolved from templates at evaluation
//! time go through the same cache.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

/// Entries kept before the cache is emptied and refilled.
const MAX_PATTERNS: usize = 1024;

/// Invalid patterns are remembered as `None` so they are not recompiled either.
type Compiled = Option<Regex>;

fn cache() -> &'static RwLock<HashMap<String, Compiled>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Compiled>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Compile `pattern`, or return the cached result.
pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    if let Ok(cached) = cache().read() {
        match cached.get(pattern) {
            Some(Some(re)) => return Ok(re.clone()),
            // Recompile only to recover the error message.
            Some(None) => return Regex::new(pattern),
            None => {}
        }
    }

    let compiled = Regex::new(pattern);
    if let Ok(mut cached) = cache().write() {
        if cached.len() >= MAX_PATTERNS {
            cached.clear();
        }
        cached.insert(pattern.to_string(), compiled.as_ref().ok().cloned());
    }
    compiled
}

/// Cached lookup for the evaluation path; `None` for an invalid pattern.
pub fn compiled(pattern: &str) -> Option<Regex> {
    let hit = cache().read().ok().and_then(|cached| cached.get(pattern).cloned());
    match hit {
        Some(entry) => entry,
        None => compile(pattern).ok(),
    }
}

#[cfg(test)]
fn is_cached(pattern: &str) -> bool {
    cache().read().map(|c| c.contains_key(pattern)).unwrap_or(false)
}
