//! Shared atomic key-value store
//!
//! One abstraction backs the rate limiter (fixed-window counters), the read
//! cache (byte values with TTL and wildcard deletion) and the scheduler lease.
//! Correct multi-instance behavior requires the Redis backend; the in-memory
//! backend is for single-instance development and tests.

pub mod memory;
pub mod redis_store;

pub use memory::{spawn_cleanup_task, MemoryCounterStore};
pub use redis_store::RedisCounterStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::Result;

/// Result of one fixed-window increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after this increment (1 for the first hit in a window)
    pub count: u64,
    /// Time until the window closes
    pub reset_in: Duration,
}

/// Atomic increment-with-expiry store shared by all instances
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Increment `key` and, on the first increment of a window, set its expiry
    /// to `window`. Both effects happen in one atomic step; later increments
    /// inside the window never extend it.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount>;

    /// Read a byte value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a byte value with TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Delete every key matching a glob pattern (`*` and `?`), returning the count
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;

    /// Acquire `key` for `owner` if nobody holds it
    async fn try_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release `key` only if `owner` still holds it
    async fn release_lease(&self, key: &str, owner: &str) -> Result<bool>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// Glob match with the subset of Redis syntax the key builders emit:
/// `*`, `?` and backslash escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p = glob_tokens(pattern);
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ki < k.len() {
        match p.get(pi) {
            Some(Glob::One) => {
                pi += 1;
                ki += 1;
            }
            Some(Glob::Literal(c)) if *c == k[ki] => {
                pi += 1;
                ki += 1;
            }
            Some(Glob::Any) => {
                star = Some(pi);
                mark = ki;
                pi += 1;
            }
            _ => match star {
                Some(s) => {
                    pi = s + 1;
                    mark += 1;
                    ki = mark;
                }
                None => return false,
            },
        }
    }

    while let Some(Glob::Any) = p.get(pi) {
        pi += 1;
    }
    pi == p.len()
}

/// Escape glob metacharacters so `value` matches only itself
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

enum Glob {
    Literal(char),
    One,
    Any,
}

fn glob_tokens(pattern: &str) -> Vec<Glob> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Glob::Any,
            '?' => Glob::One,
            '\\' => Glob::Literal(chars.next().unwrap_or('\\')),
            c => Glob::Literal(c),
        });
    }
    tokens
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::GrievanceError;

    /// Store whose every call fails, for degradation tests
    pub struct DownStore;

    fn down<T>() -> Result<T> {
        Err(GrievanceError::UpstreamUnavailable("connection refused".into()))
    }

    #[async_trait]
    impl CounterStore for DownStore {
        fn backend(&self) -> &'static str {
            "down"
        }
        async fn incr_window(&self, _key: &str, _window: Duration) -> Result<WindowCount> {
            down()
        }
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            down()
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
            down()
        }
        async fn delete_matching(&self, _pattern: &str) -> Result<usize> {
            down()
        }
        async fn try_lease(&self, _key: &str, _owner: &str, _ttl: Duration) -> Result<bool> {
            down()
        }
        async fn release_lease(&self, _key: &str, _owner: &str) -> Result<bool> {
            down()
        }
        async fn ping(&self) -> Result<()> {
            down()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_prefix() {
        assert!(glob_match("complaints:staff:*", "complaints:staff:all:1:10"));
        assert!(!glob_match("complaints:staff:*", "complaints:citizen:u1:all"));
    }

    #[test]
    fn test_glob_does_not_match_sibling_ids() {
        assert!(glob_match("complaints:citizen:u1:*", "complaints:citizen:u1:all"));
        assert!(!glob_match("complaints:citizen:u1:*", "complaints:citizen:u12:all"));
    }

    #[test]
    fn test_glob_exact_and_single() {
        assert!(glob_match("complaint:COMP-1", "complaint:COMP-1"));
        assert!(!glob_match("complaint:COMP-1", "complaint:COMP-12"));
        assert!(glob_match("complaint:COMP-?", "complaint:COMP-7"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_escaped_metacharacters_are_literal() {
        let pattern = format!("complaints:citizen:{}:*", escape_glob("a*[b]?\\c"));
        assert_eq!(pattern, "complaints:citizen:a\\*\\[b\\]\\?\\\\c:*");
        assert!(glob_match(&pattern, "complaints:citizen:a*[b]?\\c:all"));
        assert!(!glob_match(&pattern, "complaints:citizen:axx[b]?\\c:all"));
        assert!(!glob_match(&pattern, "complaints:citizen:a*[b]z\\c:all"));
    }
}
