//! Proxy list loading from import files

use crate::Result;
use anyhow::bail;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Loader for raw `host:port` lines spread over several import files
pub struct ProxyLoader;

impl ProxyLoader {
    /// Keep a line if it is non-empty and has a `:` separator.
    ///
    /// Further format checks happen per proxy during validation.
    pub fn parse_line(line: &str) -> Option<&str> {
        let line = line.trim();
        if line.is_empty() || !line.contains(':') {
            return None;
        }
        Some(line)
    }

    /// Collect candidate lines from a string (multiple lines)
    pub fn parse_string(content: &str) -> Vec<String> {
        content
            .lines()
            .filter_map(Self::parse_line)
            .map(str::to_string)
            .collect()
    }

    /// Load every import file and merge them into one list without
    /// duplicates, keeping the first-seen order.
    ///
    /// Unreadable files are reported and skipped. An empty result is an
    /// error: there is nothing to dispatch.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut proxies = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable import file");
                    continue;
                }
            };

            let before = proxies.len();
            for line in Self::parse_string(&content) {
                if seen.insert(line.clone()) {
                    proxies.push(line);
                }
            }
            info!(
                path = %path.display(),
                added = proxies.len() - before,
                "loaded import file"
            );
        }

        if proxies.is_empty() {
            bail!("no proxies found in import files");
        }

        Ok(proxies)
    }
}
