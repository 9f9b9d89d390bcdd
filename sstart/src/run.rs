//! `run` mode: launch a child process with collected secrets injected.

use std::process::Stdio;

use sstart_types::Secrets;
use tokio::process::Command;

/// Spawn `command` with the merged secrets in its environment and wait
/// for it. Returns the child's exit code (`1` when killed by a signal).
///
/// With `inherit` the parent environment stays underneath the injected
/// secrets; without it the child sees only the secrets.
pub async fn run_command(
    command: &str,
    args: &[String],
    secrets: &Secrets,
    inherit: bool,
) -> anyhow::Result<i32> {
    let mut child = Command::new(command);
    child
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if !inherit {
        child.env_clear();
    }
    child.envs(secrets.iter());

    tracing::debug!(command = %command, secrets = secrets.len(), "launching");
    let mut child = child
        .spawn()
        .map_err(|e| anyhow::anyhow!("cannot launch {command}: {e}"))?;

    let status = child.wait().await?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> Secrets {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_sees_injected_secrets() {
        let code = run_command(
            "sh",
            &["-c".into(), "test \"$INJECTED\" = yes".into()],
            &secrets(&[("INJECTED", "yes")]),
            true,
        )
        .await
        .unwrap();
        assert_eq!(code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_is_propagated() {
        let code = run_command("sh", &["-c".into(), "exit 7".into()], &Secrets::new(), true)
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn without_inherit_the_parent_env_is_hidden() {
        unsafe { std::env::set_var("SSTART_RUN_TEST_PARENT", "visible") };
        let code = run_command(
            "/bin/sh",
            &["-c".into(), "test -z \"$SSTART_RUN_TEST_PARENT\"".into()],
            &Secrets::new(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        assert!(
            run_command("definitely-not-a-binary-sstart", &[], &Secrets::new(), true)
                .await
                .is_err()
        );
    }
}
