//! Minimal `~/.ssh/config` resolution.
//!
//! Only what connecting needs is understood: `Host` blocks with `*`/`?`
//! patterns, `HostName` (with `%h` substitution), and `User`. Per OpenSSH
//! semantics the first obtained value wins, so earlier blocks take precedence
//! over later ones and an unmatched alias falls through to itself.

use std::env;
use std::path::PathBuf;

use tracing::debug;

use crate::tunnel::error::TunnelError;

/// Host name and user resolved for one alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub host: String,
    pub username: String,
}

/// Resolve `alias` against the user's SSH configuration file.
///
/// A missing config file is not an error as long as a username can still be
/// found in the environment; the alias is then used as the host name
/// directly.
pub fn resolve_host(alias: &str) -> Result<ResolvedHost, TunnelError> {
    let contents = match config_path() {
        Some(path) => std::fs::read_to_string(&path).unwrap_or_default(),
        None => String::new(),
    };
    resolve_from(&contents, alias)
}

fn config_path() -> Option<PathBuf> {
    let home = env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".ssh").join("config"))
}

fn resolve_from(contents: &str, alias: &str) -> Result<ResolvedHost, TunnelError> {
    let mut host: Option<String> = None;
    let mut username: Option<String> = None;
    let mut in_matching_block = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((keyword, value)) = split_directive(line) else {
            continue;
        };

        if keyword.eq_ignore_ascii_case("host") {
            in_matching_block = value
                .split_whitespace()
                .any(|pattern| pattern_matches(pattern, alias));
            continue;
        }
        if !in_matching_block {
            continue;
        }

        // First obtained value wins.
        if keyword.eq_ignore_ascii_case("hostname") && host.is_none() {
            host = Some(value.replace("%h", alias));
        } else if keyword.eq_ignore_ascii_case("user") && username.is_none() {
            username = Some(value.to_string());
        }
    }

    let host = host.unwrap_or_else(|| alias.to_string());
    let username = match username {
        Some(user) => user,
        None => env::var("USER").map_err(|_| {
            TunnelError::Configuration(format!(
                "no User for {alias} in SSH config and USER is not set"
            ))
        })?,
    };

    debug!(alias, host = %host, user = %username, "resolved login host");
    Ok(ResolvedHost { host, username })
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    // OpenSSH accepts both `Key value` and `Key=value`.
    let (keyword, value) = line.split_once([' ', '\t', '='])?;
    let value = value.trim_start_matches(['=', ' ', '\t']).trim();
    if value.is_empty() {
        return None;
    }
    Some((keyword.trim(), value))
}

/// `*` matches any run of characters, `?` exactly one.
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    matches_at(&pattern, &candidate)
}

fn matches_at(pattern: &[char], candidate: &[char]) -> bool {
    match pattern.first() {
        None => candidate.is_empty(),
        Some('*') => {
            (0..=candidate.len()).any(|skip| matches_at(&pattern[1..], &candidate[skip..]))
        }
        Some('?') => !candidate.is_empty() && matches_at(&pattern[1..], &candidate[1..]),
        Some(c) => candidate.first() == Some(c) && matches_at(&pattern[1..], &candidate[1..]),
    }
}
