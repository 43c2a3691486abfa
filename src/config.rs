//! Runtime configuration from environment variables, optionally seeded from a `.env` file.
//!
//! The refresh cadence is fixed (`coordinator::UPDATE_INTERVAL`) and deliberately absent here.

use std::fmt;
use std::path::Path;
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

use crate::client::DEFAULT_BASE_URL;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    EnvFile { path: String, line: usize, reason: String },
}

#[derive(Clone)]
pub struct Config {
    /// Termoweb account email.
    pub email: String,
    pub password: String,
    pub base_url: String,
    pub http_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let email = non_empty("TERMOWEB_EMAIL").ok_or(ConfigError::Missing("TERMOWEB_EMAIL"))?;

        // Prefer the variable; fall back to a file holding only the password
        let password = match lookup("TERMOWEB_PASSWORD").filter(|v| !v.is_empty()) {
            Some(v) => v,
            None => {
                let path = non_empty("TERMOWEB_PASSWORD_FILE")
                    .ok_or(ConfigError::Missing("TERMOWEB_PASSWORD or TERMOWEB_PASSWORD_FILE"))?;
                let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let trimmed = contents.trim_end_matches(['\r', '\n']).to_string();
                if trimmed.is_empty() {
                    return Err(ConfigError::Invalid {
                        name: "TERMOWEB_PASSWORD_FILE",
                        reason: format!("{} is empty", path),
                    });
                }
                trimmed
            }
        };

        let base_url = non_empty("TERMOWEB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                name: "TERMOWEB_BASE_URL",
                reason: format!("expected an http(s) URL, got {}", base_url),
            });
        }

        let http_timeout_secs = match non_empty("TERMOWEB_HTTP_TIMEOUT_SECS") {
            Some(s) => s
                .parse::<u64>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "TERMOWEB_HTTP_TIMEOUT_SECS",
                    reason: format!("expected a positive number of seconds, got {}", s),
                })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Config {
            email,
            password,
            base_url,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

/// Parse a `.env` file into key/value pairs.
///
/// Supports `KEY=value`, an optional `export ` prefix, `#` comments, and single or double
/// quoted values (double quotes honour `\n`, `\t`, `\\` and `\"`).
pub fn parse_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let display = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;

    let mut vars = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let parsed = parse_env_line(line).map_err(|reason| ConfigError::EnvFile {
            path: display.clone(),
            line: index + 1,
            reason,
        })?;
        vars.extend(parsed);
    }
    Ok(vars)
}

/// Load a `.env` file into the process environment. Variables already set win.
///
/// Must run before the async runtime starts other threads.
pub fn load_env_file(path: &Path) -> Result<usize, ConfigError> {
    let mut applied = 0;
    for (key, value) in parse_env_file(path)? {
        if env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                env::set_var(&key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("variable name contains whitespace: {}", key));
    }

    let raw = raw.trim();
    let value = if let Some(rest) = raw.strip_prefix('"') {
        unquote(rest, '"', true)?
    } else if let Some(rest) = raw.strip_prefix('\'') {
        unquote(rest, '\'', false)?
    } else {
        raw.split('#').next().unwrap_or_default().trim_end().to_string()
    };
    Ok(Some((key.to_string(), value)))
}

fn unquote(input: &str, quote: char, escapes: bool) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if escapes => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => return Err("unterminated escape sequence".to_string()),
            },
            c if c == quote => {
                let rest = chars.as_str().trim();
                return if rest.is_empty() || rest.starts_with('#') {
                    Ok(out)
                } else {
                    Err(format!("unexpected characters after closing {}", quote))
                };
            }
            c => out.push(c),
        }
    }
    Err(format!("unterminated {}-quoted value", quote))
}
