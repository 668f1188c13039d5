//! OS and Samba account provisioning

use crate::domain::ports::CommandRunner;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

const ALREADY_PRESENT: [&str; 2] = ["already exists", "in use"];

/// Creates the system user backing a Samba account and registers its
/// Samba password
pub struct AccountProvisioner {
    runner: Arc<dyn CommandRunner>,
}

impl AccountProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Ensure `username` exists as a login-less OS user and set its Samba
    /// password. An OS user that already exists is not an error.
    pub fn create_account(&self, username: &str, password: &str) -> Result<()> {
        validate_username(username)?;

        let output = self
            .runner
            .run("adduser", &["-D", "-H", "-s", "/sbin/nologin", username])
            .map_err(|e| command_failed("adduser", e.to_string()))?;
        if output.success() {
            info!("Created system user {}", username);
        } else {
            let diagnostic = output.diagnostic();
            if ALREADY_PRESENT.iter().any(|m| diagnostic.contains(m)) {
                debug!("System user {} already present", username);
            } else {
                return Err(command_failed("adduser", diagnostic.to_string()));
            }
        }

        let input = format!("{password}\n{password}\n");
        let output = self
            .runner
            .run_with_input("smbpasswd", &["-a", "-s", username], &input)
            .map_err(|e| command_failed("smbpasswd", e.to_string()))?;
        if !output.success() {
            return Err(command_failed("smbpasswd", output.diagnostic().to_string()));
        }
        debug!("Samba password set for {}", username);
        Ok(())
    }
}

fn command_failed(command: &str, reason: String) -> Error {
    Error::CommandFailed {
        command: command.to_string(),
        reason,
    }
}

/// Names `adduser` and smb.conf user lists both accept
pub(crate) fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && !username.starts_with('-')
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Configuration(format!("invalid username '{}'", username)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;

    /// Per-program canned results; records command lines and stdin
    #[derive(Default)]
    struct AccountRunner {
        results: HashMap<&'static str, CommandOutput>,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl AccountRunner {
        fn with(mut self, program: &'static str, status: i32, stderr: &str) -> Self {
            self.results.insert(
                program,
                CommandOutput {
                    status: Some(status),
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            );
            self
        }

        fn respond(&self, program: &str, args: &[&str], input: Option<&str>) -> io::Result<CommandOutput> {
            self.calls
                .lock()
                .push((format!("{} {}", program, args.join(" ")), input.map(str::to_string)));
            Ok(self.results.get(program).cloned().unwrap_or(CommandOutput {
                status: Some(0),
                ..Default::default()
            }))
        }
    }

    impl CommandRunner for AccountRunner {
        fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            self.respond(program, args, None)
        }

        fn run_with_input(&self, program: &str, args: &[&str], input: &str) -> io::Result<CommandOutput> {
            self.respond(program, args, Some(input))
        }
    }

    #[test]
    fn test_create_account_commands() {
        let runner = Arc::new(AccountRunner::default());
        AccountProvisioner::new(runner.clone()).create_account("alice", "pw").unwrap();

        let calls = runner.calls.lock();
        assert_eq!(calls[0].0, "adduser -D -H -s /sbin/nologin alice");
        assert_eq!(calls[1].0, "smbpasswd -a -s alice");
        assert_eq!(calls[1].1.as_deref(), Some("pw\npw\n"));
    }

    #[test]
    fn test_existing_user_tolerated() {
        let runner = Arc::new(AccountRunner::default().with("adduser", 1, "adduser: user 'alice' in use"));
        AccountProvisioner::new(runner.clone()).create_account("alice", "pw").unwrap();
        assert_eq!(runner.calls.lock().len(), 2);
    }

    #[test]
    fn test_adduser_failure() {
        let runner = Arc::new(AccountRunner::default().with("adduser", 1, "permission denied"));
        let err = AccountProvisioner::new(runner.clone()).create_account("alice", "pw").unwrap_err();
        assert_matches!(err, Error::CommandFailed { ref command, .. } if command == "adduser");
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[test]
    fn test_smbpasswd_failure() {
        let runner = Arc::new(AccountRunner::default().with("smbpasswd", 1, "Failed to add entry"));
        assert_matches!(
            AccountProvisioner::new(runner).create_account("bob", "pw"),
            Err(Error::CommandFailed { command, .. }) if command == "smbpasswd"
        );
    }

    #[test]
    fn test_rejects_bad_usernames() {
        let runner = Arc::new(AccountRunner::default());
        let provisioner = AccountProvisioner::new(runner.clone());
        for name in ["", "-rf", "a b", "x;y"] {
            assert_matches!(provisioner.create_account(name, "pw"), Err(Error::Configuration(_)));
        }
        assert!(runner.calls.lock().is_empty());
        provisioner.create_account("_ha_mount_user_", "pw").unwrap();
    }
}
