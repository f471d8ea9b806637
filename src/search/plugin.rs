//! Strategies backed by an external program.
//!
//! A plugin is invoked as `<command> <args...> <query> <limit>` from the
//! content root and prints one result path per line. Relative paths are
//! taken relative to the content root.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{SearchError, Searcher};
use crate::config::PluginConfig;

const PLUGIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PluginSearcher {
    config: PluginConfig,
    root: PathBuf,
    timeout: Duration,
}

impl PluginSearcher {
    pub fn new(config: PluginConfig, root: &Path) -> Self {
        Self {
            config,
            root: root.to_path_buf(),
            timeout: PLUGIN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failed(&self, reason: impl Into<String>) -> SearchError {
        SearchError::Plugin {
            name: self.config.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Searcher for PluginSearcher {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn brief(&self) -> &str {
        &self.config.brief
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(query)
            .arg(limit.to_string())
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| self.failed(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed(format!("{}: {}", output.status, stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let paths = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let path = Path::new(line);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.root.join(path)
                }
            })
            .take(limit)
            .collect();
        Ok(paths)
    }
}
