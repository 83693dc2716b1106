//! Hooks dispatcher (C7): runs the `runOn*` shell commands the config
//! associates with path lifecycle events, with an environment block
//! describing the event.
//!
//! Grounded in the teacher's hook-spawning pattern, generalized to the full
//! event set the data model names (`init`, `demand`, `unDemand`, `connect`,
//! `disconnect`, `ready`, `notReady`, `read`, `unread`,
//! `recordSegmentCreate`, `recordSegmentComplete`). Long-lived hooks
//! (`runOnInit`, `runOnDemand`) get a restart-with-backoff policy when their
//! `*Restart` flag is set; the rest are fire-and-forget.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::HookError;
use crate::util::backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Init,
    Demand,
    UnDemand,
    Connect,
    Disconnect,
    Ready,
    NotReady,
    Read,
    Unread,
    RecordSegmentCreate,
    RecordSegmentComplete,
}

impl HookEvent {
    #[must_use]
    pub fn env_name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Demand => "demand",
            Self::UnDemand => "unDemand",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Ready => "ready",
            Self::NotReady => "notReady",
            Self::Read => "read",
            Self::Unread => "unread",
            Self::RecordSegmentCreate => "recordSegmentCreate",
            Self::RecordSegmentComplete => "recordSegmentComplete",
        }
    }
}

/// Runs one fire-and-forget hook command to completion and reports whether
/// it exited zero. The caller decides what a non-zero exit means for that
/// event (most events just log it).
pub async fn run_once(command: &str, event: HookEvent, env: &HashMap<String, String>) -> Result<(), HookError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env("MTX_HOOK", event.env_name())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }

    let status = cmd
        .status()
        .await
        .map_err(|source| HookError::Spawn { command: command.to_string(), source })?;

    if status.success() {
        Ok(())
    } else {
        Err(HookError::NonZeroExit {
            command: command.to_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

/// Runs a long-lived hook (`runOnInit`, `runOnDemand`) under a restart
/// policy: if `restart` is set, a non-zero exit or spawn failure triggers a
/// backoff-then-retry loop until `cancellation` fires.
pub async fn run_supervised(
    command: &str,
    event: HookEvent,
    env: &HashMap<String, String>,
    restart: bool,
    cancellation: CancellationToken,
) {
    let mut attempt = 0u32;
    loop {
        if cancellation.is_cancelled() {
            return;
        }
        let result = tokio::select! {
            result = run_once(command, event, env) => result,
            () = cancellation.cancelled() => return,
        };
        if let Err(e) = result {
            warn!(%command, error = %e, "hook exited abnormally");
        }
        if !restart {
            return;
        }
        attempt += 1;
        backoff(attempt, 250, 5_000).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reports_ok() {
        run_once("true", HookEvent::Ready, &HashMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_non_zero_exit() {
        let err = run_once("exit 7", HookEvent::NotReady, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, HookError::NonZeroExit { code: 7, .. }));
    }

    #[tokio::test]
    async fn env_block_reaches_the_child_process() {
        let mut env = HashMap::new();
        env.insert("MTX_PATH".to_string(), "cam1".to_string());
        run_once(r#"test "$MTX_PATH" = "cam1""#, HookEvent::Connect, &env).await.unwrap();
    }

    #[tokio::test]
    async fn supervised_hook_stops_immediately_once_cancelled() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        run_supervised("true", HookEvent::Demand, &HashMap::new(), true, cancellation).await;
    }
}
