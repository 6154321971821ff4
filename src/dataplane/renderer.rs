//! Configuration rendering and checks.

use std::collections::HashSet;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{ControllerError, Result};
use crate::model::Configuration;

/// Render the configuration as the document handed to the data plane.
pub fn render(config: &Configuration) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(config)
        .map_err(|e| ControllerError::BuildFailure(format!("render failed: {}", e)))
}

/// Structural checks the data plane would otherwise fail on at load time.
pub fn check_structure(config: &Configuration) -> Result<()> {
    let mut hostnames = HashSet::new();
    for server in &config.servers {
        if !hostnames.insert(server.hostname.as_str()) {
            return Err(ControllerError::BuildFailure(format!(
                "duplicate server {}",
                server.hostname
            )));
        }
        let mut keys = HashSet::new();
        for location in &server.locations {
            if !keys.insert((location.path.as_str(), location.path_type)) {
                return Err(ControllerError::BuildFailure(format!(
                    "duplicate {} location {} in server {}",
                    location.path_type, location.path, server.hostname
                )));
            }
            if config.backend(&location.backend).is_none() {
                return Err(ControllerError::BuildFailure(format!(
                    "location {}{} references unknown backend {}",
                    server.hostname, location.path, location.backend
                )));
            }
        }
    }

    let mut names = HashSet::new();
    for backend in &config.backends {
        if !names.insert(backend.name.as_str()) {
            return Err(ControllerError::BuildFailure(format!(
                "duplicate backend {}",
                backend.name
            )));
        }
    }

    let mut ports = HashSet::new();
    for stream in config.tcp_streams.iter().chain(config.udp_streams.iter()) {
        if !ports.insert((stream.port, stream.backend.protocol)) {
            return Err(ControllerError::BuildFailure(format!(
                "duplicate stream port {}",
                stream.port
            )));
        }
    }
    Ok(())
}

/// Pipe the rendered document into an external checker.
///
/// The first element of `command` is the program, the rest its arguments.
/// A non-zero exit status fails the check with the checker's stderr.
pub async fn run_test_command(command: &[String], rendered: &[u8], timeout: Duration) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ControllerError::BuildFailure(format!("failed to start {}: {}", program, e)))?;

    let stdin = child.stdin.take();
    let run = async move {
        if let Some(mut stdin) = stdin {
            // A checker may exit without reading its input.
            match stdin.write_all(rendered).await {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
        child.wait_with_output().await
    };

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| ControllerError::BuildFailure(format!("{} timed out after {:?}", program, timeout)))??;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ControllerError::BuildFailure(format!(
            "configuration test failed ({}): {}",
            output.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Backend, Location, Server};

    fn config() -> Configuration {
        let mut server = Server::new("foo.com");
        server.locations.push(Location::root("upstream-default-backend"));
        Configuration {
            backends: vec![Backend::new("upstream-default-backend")],
            servers: vec![server],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(check_structure(&config()).is_ok());
        assert!(!render(&config()).unwrap().is_empty());
    }

    #[test]
    fn test_dangling_backend_fails() {
        let mut c = config();
        c.backends.clear();
        assert!(matches!(check_structure(&c), Err(ControllerError::BuildFailure(_))));
    }

    #[test]
    fn test_duplicate_location_fails() {
        let mut c = config();
        let dup = c.servers[0].locations[0].clone();
        c.servers[0].locations.push(dup);
        assert!(check_structure(&c).is_err());
    }

    #[tokio::test]
    async fn test_empty_command_is_noop() {
        assert!(run_test_command(&[], b"{}", Duration::from_secs(1)).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_rejects() {
        let cmd = vec!["sh".to_string(), "-c".to_string(), "cat >/dev/null; echo bad >&2; exit 1".to_string()];
        let err = run_test_command(&cmd, b"{}", Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("bad"));

        let ok = vec!["sh".to_string(), "-c".to_string(), "cat >/dev/null".to_string()];
        assert!(run_test_command(&ok, b"{}", Duration::from_secs(5)).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_checker_ignoring_stdin_passes() {
        // Large enough to overflow the pipe buffer once the reader is gone.
        let rendered = vec![b' '; 1 << 20];
        let cmd = vec!["true".to_string()];
        assert!(run_test_command(&cmd, &rendered, Duration::from_secs(5)).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_checker_times_out() {
        // Never reads, so writing a large document blocks until the deadline.
        let rendered = vec![b' '; 1 << 20];
        let cmd = vec!["sleep".to_string(), "5".to_string()];
        let err = run_test_command(&cmd, &rendered, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
