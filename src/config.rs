//! Server configuration.
//!
//! Read from the client's `initializationOptions` (camelCase JSON, every
//! field optional) and then overridden by command line flags.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::distribution::NameMode;
use crate::distribution::{bridge, node_name};
use crate::index::KindPriority;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub providers: ProvidersConfig,
    pub docs: DocsConfig,
    /// POI kind name to priority, overriding the built-in table.
    pub kind_priority: HashMap<String, u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub node_name: String,
    pub name_mode: NameMode,
    pub cookie: Option<String>,
    pub port: u16,
    pub start_command: String,
    /// `None` means the default for `name_mode`.
    pub start_args: Option<Vec<String>>,
    pub start_path: Option<PathBuf>,
    /// Where the bridge source is installed. `None` means the user cache dir.
    pub bridge_dir: Option<PathBuf>,
    pub connect_attempts: u32,
    pub connect_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_name: "els_runtime".to_string(),
            name_mode: NameMode::Short,
            cookie: None,
            port: 9_000,
            start_command: "erl".to_string(),
            start_args: None,
            start_path: None,
            bridge_dir: None,
            connect_attempts: 20,
            connect_interval_ms: 250,
            rpc_timeout_ms: 5_000,
            enabled: true,
        }
    }
}

impl RuntimeConfig {
    pub fn start_args(&self) -> Vec<String> {
        match &self.start_args {
            Some(args) => args.clone(),
            None => vec![
                self.name_mode.flag().to_string(),
                "{node}".to_string(),
                "-setcookie".to_string(),
                "{cookie}".to_string(),
                "-noshell".to_string(),
                "-eval".to_string(),
                bridge::start_expression(),
            ],
        }
    }

    /// Bridge source path the start command refers to as `{bridge}`.
    pub fn bridge_source(&self) -> Option<PathBuf> {
        self.bridge_dir
            .clone()
            .or_else(bridge::default_dir)
            .map(|dir| bridge::source_path(&dir))
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Runtime node name with the host part filled in.
    pub fn target_node(&self) -> String {
        node_name::qualify(&self.node_name, self.name_mode)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvidersConfig {
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocsConfig {
    pub renderer_module: String,
    pub renderer_function: String,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            renderer_module: bridge::MODULE.to_string(),
            renderer_function: bridge::RENDER_FUNCTION.to_string(),
        }
    }
}

/// Command line values that take precedence over client options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub node_name: Option<String>,
    pub cookie: Option<String>,
    pub no_runtime: bool,
}

impl Config {
    /// Parses `initializationOptions`. Malformed options are logged and
    /// replaced by defaults rather than failing initialization.
    pub fn from_initialization_options(options: Option<&Value>) -> Self {
        match options {
            None | Some(Value::Null) => Self::default(),
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!("Ignoring malformed initializationOptions: {}", e);
                Self::default()
            }),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(node_name) = &overrides.node_name {
            self.runtime.node_name = node_name.clone();
        }
        if let Some(cookie) = &overrides.cookie {
            self.runtime.cookie = Some(cookie.clone());
        }
        if overrides.no_runtime {
            self.runtime.enabled = false;
        }
    }

    pub fn priority_table(&self) -> KindPriority {
        KindPriority::from_names(
            self.kind_priority
                .iter()
                .map(|(name, priority)| (name.as_str(), *priority)),
        )
    }
}
