//! Locates the external scan tool and probes its version.

use crate::error::{EngineError, Result};
use netsweep_core::ToolConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Nn]map version (\S+)").expect("valid regex"));

/// A resolved, version-probed tool binary.
#[derive(Debug, Clone)]
pub struct ToolHandle {
    /// Absolute path to the binary.
    pub path: PathBuf,
    /// Version string reported by `--version`, or "unknown".
    pub version: String,
}

/// Resolves the scan tool from the execution environment.
///
/// Resolution failures surface before any scan is attempted and are
/// never silently retried.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    binary: String,
    explicit_path: Option<PathBuf>,
    minimum_version: Option<String>,
}

impl ToolLocator {
    /// Locator for the named binary, resolved via `PATH`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            explicit_path: None,
            minimum_version: None,
        }
    }

    /// Locator configured from the tool section of the app config.
    #[must_use]
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            explicit_path: config.path.clone(),
            minimum_version: config.minimum_version.clone(),
        }
    }

    /// Require at least the given tool version.
    #[must_use]
    pub fn with_minimum_version(mut self, version: impl Into<String>) -> Self {
        self.minimum_version = Some(version.into());
        self
    }

    /// Resolve the binary and verify it runs.
    ///
    /// Searches the `PATH` (unless an explicit path was configured),
    /// invokes the version subcommand, and extracts the version string.
    pub async fn locate(&self) -> Result<ToolHandle> {
        let path = match &self.explicit_path {
            Some(path) if path.is_file() => path.clone(),
            Some(_) | None => {
                search_path(&self.binary).ok_or_else(|| EngineError::ToolNotFound {
                    binary: self.binary.clone(),
                })?
            }
        };

        let output = Command::new(&path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| EngineError::ToolNotFound {
                binary: self.binary.clone(),
            })?;

        if !output.status.success() {
            return Err(EngineError::ToolNotFound {
                binary: self.binary.clone(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = extract_version(&stdout).unwrap_or_else(|| "unknown".to_string());
        debug!(path = %path.display(), version = %version, "located scan tool");

        if let Some(minimum) = &self.minimum_version {
            if version_lt(&version, minimum) {
                return Err(EngineError::ToolVersionUnsupported {
                    found: version,
                    minimum: minimum.clone(),
                });
            }
        }

        Ok(ToolHandle { path, version })
    }
}

/// Search the environment's `PATH` for the binary.
fn search_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = dir.join(format!("{binary}.exe"));
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Extract the version string from the tool's `--version` output.
fn extract_version(output: &str) -> Option<String> {
    VERSION_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// Numeric-prefix version comparison: `7.80 < 7.95`, `6.49BETA1 < 7.0`.
fn version_lt(found: &str, minimum: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let found = parse(found);
    let minimum = parse(minimum);
    found < minimum
}
