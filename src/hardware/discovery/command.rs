//! External Command Runner
//!
//! Thin wrapper over `std::process::Command` capturing exit status and
//! both output streams as text.

use crate::domain::ports::{CommandOutput, CommandRunner};
use std::io::{self, Write};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Runs programs on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

fn capture(output: Output) -> CommandOutput {
    CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output()?;
        Ok(capture(output))
    }

    fn run_with_input(&self, program: &str, args: &[&str], input: &str) -> io::Result<CommandOutput> {
        debug!("Running {} {} (with stdin)", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }

        Ok(capture(child.wait_with_output()?))
    }
}
