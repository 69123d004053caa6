//! Subprocess transport for tool servers.
//!
//! Spawns the manifest's command with piped stdio. Stderr is discarded:
//! tool servers log through `$/progress` if they want to be heard.

use crate::error::{BusError, Result};
use atelier_core::ToolServerManifest;
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

/// The pieces of a freshly spawned server process.
pub struct SpawnedServer {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawn the subprocess described by a manifest entry.
pub fn spawn_server(manifest: &ToolServerManifest) -> Result<SpawnedServer> {
    let mut command = Command::new(&manifest.command);
    command
        .args(&manifest.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &manifest.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in &manifest.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|e| BusError::Spawn {
        server: manifest.name.clone(),
        reason: format!("`{}`: {}", manifest.command, e),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| BusError::Spawn {
        server: manifest.name.clone(),
        reason: "no stdin handle".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| BusError::Spawn {
        server: manifest.name.clone(),
        reason: "no stdout handle".to_string(),
    })?;

    info!(server = %manifest.name, command = %manifest.command, "tool server spawned");
    Ok(SpawnedServer {
        child,
        stdin,
        stdout,
    })
}
