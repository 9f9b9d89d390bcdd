//! Helpers for CLI-backed providers (`op`, `bw`, `bws`, `gcloud`, `az`).

use tokio::process::Command;

use crate::ProviderError;

/// Run a command and capture stdout as UTF-8.
///
/// A missing binary, a non-zero exit, or non-UTF-8 output all map to
/// [`ProviderError::Backend`] with the tool's stderr attached, since that
/// is where these CLIs put their diagnostics.
pub async fn capture_stdout(command: &mut Command) -> Result<String, ProviderError> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProviderError::Backend(format!("cannot run command: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::Backend(format!(
            "command failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|_| ProviderError::Backend("command produced non-UTF-8 output".into()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let mut command = Command::new("sh");
        command.args(["-c", "printf hello"]);
        assert_eq!(capture_stdout(&mut command).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_backend_error_with_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo boom >&2; exit 3"]);
        let err = capture_stdout(&mut command).await.unwrap_err();
        assert!(matches!(err, ProviderError::Backend(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn missing_binary_is_a_backend_error() {
        let mut command = Command::new("definitely-not-a-real-binary-sstart");
        assert!(matches!(
            capture_stdout(&mut command).await,
            Err(ProviderError::Backend(_))
        ));
    }
}
