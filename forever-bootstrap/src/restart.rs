//! Deliberate self-restart.
//!
//! The caller gets the spawned child back and is expected to exit right
//! after; the child classifies itself as a restart of self.

use std::process::{Child, Command};

use crate::error::RestartError;
use crate::identity::RestartSignal;

/// Issue a token and build the relaunch command for `program` with `args`.
pub fn restart_command<I, S>(
    signal: &RestartSignal,
    program: &std::path::Path,
    args: I,
) -> Result<Command, RestartError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let token = signal.issue().map_err(|source| RestartError::Token {
        path: signal.token_path().display().to_string(),
        source,
    })?;
    let mut cmd = Command::new(program);
    cmd.args(args).env(signal.env_key(), token);
    Ok(cmd)
}

/// Relaunch the current executable with the current arguments.
pub fn trigger_restart(signal: &RestartSignal) -> Result<Child, RestartError> {
    let exe = std::env::current_exe().map_err(RestartError::CurrentExe)?;
    let mut cmd = restart_command(signal, &exe, std::env::args_os().skip(1))?;
    tracing::info!(exe = %exe.display(), "Restarting process");
    cmd.spawn().map_err(RestartError::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProcessClassifier;

    #[test]
    fn command_carries_the_issued_token() {
        let dir = tempfile::tempdir().unwrap();
        let signal = RestartSignal::new(dir.path()).with_env_key("FOREVER_TEST_RESTART_TOKEN");
        let cmd = restart_command(&signal, std::path::Path::new("/bin/app"), ["--flag"]).unwrap();

        let token = cmd
            .get_envs()
            .find(|(k, _)| *k == "FOREVER_TEST_RESTART_TOKEN")
            .and_then(|(_, v)| v)
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap();
        assert!(signal.classify_token(Some(&token)).is_restart_of_self);
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["--flag"]);

        signal.consume();
        assert!(!signal.classify_token(Some(&token)).is_restart_of_self);
    }
}
