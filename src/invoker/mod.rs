//! Assistant CLI invoker: spawns the external assistant as a child process,
//! streams its output, and normalizes the result.

pub mod parse;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::{AssistantClient, InvokeError, InvokeRequest, InvokeResponse, InvokeResult};
use crate::config::RumpbotConfig;

/// Grace period between SIGTERM and SIGKILL when stopping a child.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Production `AssistantClient` shelling out to the configured CLI binary.
pub struct CliInvoker {
    config: Arc<RumpbotConfig>,
}

impl CliInvoker {
    pub fn new(config: Arc<RumpbotConfig>) -> Self {
        CliInvoker { config }
    }

    /// Assemble CLI arguments in the order the assistant expects.
    fn build_args(&self, request: &InvokeRequest, session: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "json".to_string(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
            "--verbose".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if let Some(system_prompt) = &request.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        if let Some(model) = &request.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(tools) = &request.allowed_tools {
            args.push("--tools".to_string());
            args.push(tools.clone());
        }
        if let Some(session_id) = session {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
        args
    }

    async fn run(&self, request: &InvokeRequest, session: Option<&str>) -> InvokeResult {
        let mut cmd = Command::new(&self.config.assistant_bin);
        cmd.args(self.build_args(request, session))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| InvokeError::Spawn(e.to_string()))?;
        debug!(tier = %request.tier, pid = ?child.id(), "spawned assistant");

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let stdout_task = drain(
            child.stdout.take().expect("stdout piped"),
            stdout_buf.clone(),
            request,
        );
        let stderr_task = drain(
            child.stderr.take().expect("stderr piped"),
            stderr_buf.clone(),
            request,
        );

        let timeout = request.timeout;
        let timeout_fired = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };

        enum Exit {
            Done(std::process::ExitStatus),
            Cancelled,
            TimedOut,
        }

        let exit = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Exit::Cancelled,
            _ = timeout_fired => Exit::TimedOut,
            status = child.wait() => {
                Exit::Done(status.map_err(|e| InvokeError::Process(e.to_string()))?)
            }
        };

        let status = match exit {
            Exit::Cancelled => {
                terminate(&mut child).await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Err(InvokeError::Cancelled);
            }
            Exit::TimedOut => {
                terminate(&mut child).await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Err(InvokeError::Timeout(timeout.unwrap_or_default()));
            }
            Exit::Done(status) => status,
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let stdout = stdout_buf.lock().await.clone();
        let stderr = stderr_buf.lock().await.clone();
        normalize_exit(&stdout, &stderr, status)
    }
}

#[async_trait]
impl AssistantClient for CliInvoker {
    async fn invoke(&self, request: InvokeRequest) -> InvokeResult {
        let session = request.resume_session.clone();
        let outcome = self.run(&request, session.as_deref()).await;

        // A dead resume handle gets exactly one retry without the session.
        if session.is_some() && should_drop_session(&outcome) {
            warn!(tier = %request.tier, "session resume failed, retrying without session");
            return self.run(&request, None).await;
        }
        outcome
    }
}

fn should_drop_session(outcome: &InvokeResult) -> bool {
    match outcome {
        Ok(response) => response.is_error && parse::is_session_error(&response.text),
        Err(InvokeError::Process(message)) => parse::is_session_error(message),
        _ => false,
    }
}

/// Read a pipe to EOF, accumulating text and firing the activity/output
/// sinks on every chunk.
fn drain<R>(
    mut pipe: R,
    buf: Arc<Mutex<String>>,
    request: &InvokeRequest,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    let on_activity = request.on_activity.clone();
    let on_output = request.on_output.clone();
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    if let Some(activity) = &on_activity {
                        activity();
                    }
                    if let Some(output) = &on_output {
                        output(&text);
                    }
                    buf.lock().await.push_str(&text);
                }
            }
        }
    })
}

/// SIGTERM, short grace, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Map captured output + exit status to the call outcome.
fn normalize_exit(
    stdout: &str,
    stderr: &str,
    status: std::process::ExitStatus,
) -> InvokeResult {
    if let Some(payload) = parse::parse_payload(stdout) {
        return Ok(parse::response_from_payload(&payload));
    }

    let trimmed = stdout.trim();
    if !trimmed.is_empty() {
        // Unparseable but present output is still an answer.
        return Ok(InvokeResponse {
            text: trimmed.to_string(),
            ..Default::default()
        });
    }

    if !status.success() {
        let message = stderr.trim();
        if parse::is_rate_limited(message) {
            return Err(InvokeError::RateLimited(message.to_string()));
        }
        let message = if message.is_empty() {
            format!("assistant exited with {status}")
        } else {
            message.to_string()
        };
        return Err(InvokeError::Process(message));
    }

    Ok(InvokeResponse::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tier;
    use std::os::unix::process::ExitStatusExt;

    fn exit(code: i32) -> std::process::ExitStatus {
        std::process::ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_normalize_parsed_json() {
        let out = r#"{"type":"result","result":"hello","session_id":"s"}"#;
        let response = normalize_exit(out, "", exit(0)).unwrap();
        assert_eq!(response.text, "hello");
    }

    #[test]
    fn test_normalize_raw_stdout_is_not_an_error() {
        let response = normalize_exit("plain answer", "", exit(1)).unwrap();
        assert_eq!(response.text, "plain answer");
        assert!(!response.is_error);
    }

    #[test]
    fn test_normalize_empty_stdout_nonzero_exit() {
        let err = normalize_exit("", "boom", exit(1)).unwrap_err();
        assert!(matches!(err, InvokeError::Process(m) if m == "boom"));
    }

    #[test]
    fn test_normalize_rate_limit_classified() {
        let err = normalize_exit("", "429 too many requests", exit(1)).unwrap_err();
        assert!(matches!(err, InvokeError::RateLimited(_)));
    }

    #[test]
    fn test_should_drop_session_on_matching_error() {
        let err: InvokeResult = Err(InvokeError::Process("session not found".into()));
        assert!(should_drop_session(&err));

        let ok: InvokeResult = Ok(InvokeResponse {
            text: "No conversation found to resume".into(),
            is_error: true,
            ..Default::default()
        });
        assert!(should_drop_session(&ok));

        let unrelated: InvokeResult = Err(InvokeError::Cancelled);
        assert!(!should_drop_session(&unrelated));
    }

    #[test]
    fn test_build_args_order() {
        let config = Arc::new(RumpbotConfig::default());
        let invoker = CliInvoker::new(config);
        let mut request = InvokeRequest::new("do it", Tier::Worker);
        request.max_turns = 5;
        request.system_prompt = Some("sys".into());
        request.model = Some("sonnet".into());
        request.allowed_tools = Some(String::new());
        let args = invoker.build_args(&request, Some("sess-1"));
        assert_eq!(
            args,
            vec![
                "-p",
                "do it",
                "--output-format",
                "json",
                "--max-turns",
                "5",
                "--verbose",
                "--dangerously-skip-permissions",
                "--system-prompt",
                "sys",
                "--model",
                "sonnet",
                "--tools",
                "",
                "--resume",
                "sess-1",
            ]
        );
    }
}
