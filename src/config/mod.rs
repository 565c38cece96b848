use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, Result};
use crate::matcher::DEFAULT_TAG;

const CONFIG_FILENAME: &str = "harness.toml";
const CONFIG_DIR: &str = ".runmon";

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([("TERM".to_string(), "mono".to_string())])
}

fn default_exit_command() -> String {
    "exit".to_string()
}

fn default_stop_step_timeout_millis() -> u64 {
    5000
}

fn default_expect_timeout_millis() -> u64 {
    5000
}

/// How a controller spawns, talks to, and stops its child.
///
/// ```toml
/// shell = "/bin/sh"
/// tag = "runmon"
/// exit_command = "exit"
/// stop_step_timeout_millis = 5000
///
/// [env]
/// TERM = "mono"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Shell that runs the command line (`<shell> -c "<line>"`).
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Tag every expected line starts with, without brackets.
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Complete child environment. The parent's environment is not inherited.
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Input line that asks the child to terminate itself.
    #[serde(default = "default_exit_command")]
    pub exit_command: String,
    #[serde(default = "default_stop_step_timeout_millis")]
    pub stop_step_timeout_millis: u64,
    #[serde(default = "default_expect_timeout_millis")]
    pub default_expect_timeout_millis: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            tag: default_tag(),
            env: default_env(),
            work_dir: None,
            exit_command: default_exit_command(),
            stop_step_timeout_millis: default_stop_step_timeout_millis(),
            default_expect_timeout_millis: default_expect_timeout_millis(),
        }
    }
}

impl ControllerConfig {
    pub fn stop_step_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_step_timeout_millis)
    }

    pub fn default_expect_timeout(&self) -> Duration {
        Duration::from_millis(self.default_expect_timeout_millis)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Read and parse one config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| HarnessError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Search upward from `start` for a `.runmon/harness.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let config = Self::from_file(&path)?;
            Ok((config, Some(path)))
        } else {
            Ok((ControllerConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
