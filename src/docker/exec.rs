use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::ExecConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::docker::EngineError;

/// Wrap a command so it runs under a login shell; puppet's binaries are only
/// on the PATH once the profile has been sourced.
pub fn login_shell(command: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-l".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]
}

/// Execute a command in a container and return its exit code. Output lines go
/// to the debug log. The stream is abandoned as soon as `cancel` fires.
pub async fn exec_in_container(
    docker: &Docker,
    container: &str,
    cmd: Vec<String>,
    cancel: &CancellationToken,
) -> Result<i64, EngineError> {
    let config = ExecConfig {
        cmd: Some(cmd),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    };

    let exec = docker.create_exec(container, config).await?;

    let start_options = StartExecOptions {
        detach: false,
        ..Default::default()
    };
    if let StartExecResults::Attached {
        output: mut stream, ..
    } = docker.start_exec(&exec.id, Some(start_options)).await?
    {
        while let Some(msg) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match msg {
                Ok(log) => {
                    tracing::debug!(container = %container, "{}", log.to_string().trim_end())
                }
                Err(e) => tracing::warn!(container = %container, "exec stream error: {}", e),
            }
        }
    }

    let inspect = docker.inspect_exec(&exec.id).await?;
    Ok(inspect.exit_code.unwrap_or(-1))
}
