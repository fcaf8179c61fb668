//! External converter detection.
//!
//! The [`ConverterTools`] registry discovers and caches the location of the
//! LibreOffice command-line converter and reports its availability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use docforge_common::config::ConverterConfig;

/// Registry key for the converter.
pub const SOFFICE: &str = "soffice";

/// Executable names tried, in order, when no explicit path is configured.
const SOFFICE_CANDIDATES: &[&str] = &["soffice", "libreoffice"];

/// A discovered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Registry name (e.g. "soffice").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ConverterTools::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `--version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ConverterTools {
    tools: HashMap<String, ToolConfig>,
}

impl ConverterTools {
    /// Discover the converter by searching `PATH` (or using the configured
    /// override).
    ///
    /// A configured `soffice_path` is used directly when it exists; otherwise
    /// [`which::which`] is tried for `soffice`, then `libreoffice`. A tool
    /// that is not found is omitted from the registry.
    pub fn discover(config: &ConverterConfig) -> Self {
        let resolved = config
            .soffice_path
            .as_deref()
            .filter(|p| p.exists())
            .map(Path::to_path_buf)
            .or_else(|| {
                SOFFICE_CANDIDATES
                    .iter()
                    .find_map(|name| which::which(name).ok())
            });

        let mut tools = HashMap::new();
        if let Some(path) = resolved {
            tools.insert(
                SOFFICE.to_string(),
                ToolConfig {
                    name: SOFFICE.to_string(),
                    path,
                },
            );
        }

        Self { tools }
    }

    /// Register a tool at an explicit path, bypassing discovery.
    pub fn with_tool(mut self, name: &str, path: PathBuf) -> Self {
        self.tools.insert(
            name.to_string(),
            ToolConfig {
                name: name.to_string(),
                path,
            },
        );
        self
    }

    /// Return the [`ToolConfig`] for `name`, or an [`docforge_common::Error::Tool`]
    /// if it was not found during discovery.
    pub fn require(&self, name: &str) -> docforge_common::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            docforge_common::Error::tool(
                name,
                format!("{name} not found; is LibreOffice installed and in PATH?"),
            )
        })
    }

    /// Check the converter and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        [SOFFICE]
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> --version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("--version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.trim().to_string())
}
