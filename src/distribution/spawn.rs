//! Starting the external runtime process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::bridge;
use super::error::DistributionError;

/// Placeholder in start arguments replaced by the node name.
pub const NODE_PLACEHOLDER: &str = "{node}";
/// Placeholder in start arguments replaced by the cookie.
pub const COOKIE_PLACEHOLDER: &str = "{cookie}";
/// Placeholder replaced by the bridge's TCP port.
pub const PORT_PLACEHOLDER: &str = "{port}";
/// Placeholder replaced by the bridge source path, escaped for an Erlang
/// string literal.
pub const BRIDGE_PLACEHOLDER: &str = "{bridge}";

/// Values substituted into a start argument template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub node: &'a str,
    pub cookie: Option<&'a str>,
    pub port: u16,
    pub bridge: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Bridge source to install before the process starts.
    pub bridge: Option<PathBuf>,
}

impl SpawnSpec {
    /// Builds a spec from an argument template.
    ///
    /// Arguments that mention `{cookie}` or `{bridge}` are dropped together
    /// with the flag right before them when that value is absent.
    pub fn from_template(
        command: impl Into<String>,
        template: &[String],
        cwd: Option<PathBuf>,
        vars: &TemplateVars<'_>,
    ) -> Self {
        let bridge = vars.bridge.map(bridge::erlang_string);
        let port = vars.port.to_string();
        let mut uses_bridge = false;
        let mut args: Vec<String> = Vec::with_capacity(template.len());
        for arg in template {
            let optional = [
                (COOKIE_PLACEHOLDER, vars.cookie),
                (BRIDGE_PLACEHOLDER, bridge.as_deref()),
            ];
            let mut arg = arg.clone();
            let mut dropped = false;
            for (placeholder, value) in optional {
                if !arg.contains(placeholder) {
                    continue;
                }
                match value {
                    Some(value) => {
                        uses_bridge |= placeholder == BRIDGE_PLACEHOLDER;
                        arg = arg.replace(placeholder, value);
                    }
                    None => dropped = true,
                }
            }
            if dropped {
                if args.last().is_some_and(|prev| prev.starts_with('-')) {
                    args.pop();
                }
                continue;
            }
            args.push(
                arg.replace(NODE_PLACEHOLDER, vars.node)
                    .replace(PORT_PLACEHOLDER, &port),
            );
        }
        Self {
            command: command.into(),
            args,
            cwd,
            bridge: vars.bridge.filter(|_| uses_bridge).map(Path::to_path_buf),
        }
    }
}

#[async_trait]
pub trait RuntimeProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Whether the process is still alive.
    fn is_running(&mut self) -> bool;

    async fn kill(&mut self) -> Result<(), DistributionError>;
}

#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn RuntimeProcess>, DistributionError>;
}

/// Spawns real OS processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn RuntimeProcess>, DistributionError> {
        if let Some(path) = &spec.bridge {
            bridge::install(path).await?;
        }
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        debug!("Spawning runtime: {} {}", spec.command, spec.args.join(" "));
        let child = command.spawn().map_err(|source| DistributionError::Spawn {
            command: spec.command.clone(),
            source,
        })?;
        info!("Spawned runtime process (pid {:?})", child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl RuntimeProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("Runtime process exited with {}", status);
                false
            }
            Err(_) => false,
        }
    }

    async fn kill(&mut self) -> Result<(), DistributionError> {
        if !self.is_running() {
            return Ok(());
        }
        self.child.kill().await?;
        info!("Stopped runtime process");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Vec<String> {
        ["-sname", "{node}", "-setcookie", "{cookie}", "-noshell"]
            .map(String::from)
            .to_vec()
    }

    fn vars(cookie: Option<&str>) -> TemplateVars<'_> {
        TemplateVars {
            node: "rt@box",
            cookie,
            port: 9_000,
            bridge: None,
        }
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let spec = SpawnSpec::from_template("erl", &template(), None, &vars(Some("secret")));
        assert_eq!(spec.args, vec!["-sname", "rt@box", "-setcookie", "secret", "-noshell"]);
        assert_eq!(spec.bridge, None);
    }

    #[test]
    fn test_missing_cookie_drops_flag() {
        let spec = SpawnSpec::from_template("erl", &template(), None, &vars(None));
        assert_eq!(spec.args, vec!["-sname", "rt@box", "-noshell"]);
    }

    #[test]
    fn test_bridge_and_port_fill_the_eval_argument() {
        let template: Vec<String> = ["-noshell", "-eval", "start(\"{bridge}\", {port})"]
            .map(String::from)
            .to_vec();
        let path = Path::new("/cache/a\"b/els_bridge.erl");
        let spec = SpawnSpec::from_template(
            "erl",
            &template,
            None,
            &TemplateVars {
                bridge: Some(path),
                port: 9_100,
                ..vars(None)
            },
        );
        assert_eq!(spec.args[2], "start(\"/cache/a\\\"b/els_bridge.erl\", 9100)");
        assert_eq!(spec.bridge.as_deref(), Some(path));

        let spec = SpawnSpec::from_template("erl", &template, None, &vars(None));
        assert_eq!(spec.args, vec!["-noshell"]);
        assert_eq!(spec.bridge, None);
    }

    #[tokio::test]
    async fn test_spawn_installs_bridge_before_starting() {
        let dir = tempfile::tempdir().unwrap();
        let path = bridge::source_path(dir.path());
        let spec = SpawnSpec {
            command: "/nonexistent/erl-binary".into(),
            args: vec![],
            cwd: None,
            bridge: Some(path.clone()),
        };
        assert!(ProcessSpawner.spawn(&spec).await.is_err());
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_spawn_failure_names_command() {
        let spec = SpawnSpec::from_template("/nonexistent/erl-binary", &[], None, &vars(None));
        let err = match ProcessSpawner.spawn(&spec).await {
            Ok(_) => panic!("spawn should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, DistributionError::Spawn { ref command, .. } if command == "/nonexistent/erl-binary"));
    }
}
