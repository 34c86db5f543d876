//! Runs one external step and records its outcome.

use crate::error::Result;
use crate::ledger::{HistoryEntry, HistoryLedger};
use crate::steps::StepCommand;
use std::path::PathBuf;
use std::process::Command;
use tracing::{error, info, warn};

/// Exit code recorded when the program could not be started.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;
/// Exit code recorded when the program was killed by a signal.
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// What happened to one step invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The program ran; its exit code.
    Exited(i32),
    /// The program could not be found or spawned.
    LaunchFailed { reason: String },
}

impl StepOutcome {
    /// Exit code written to the ledger for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            StepOutcome::Exited(code) => *code,
            StepOutcome::LaunchFailed { .. } => LAUNCH_FAILURE_EXIT_CODE,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Exited(0))
    }
}

/// Executes steps for one run, appending every outcome to its ledger.
#[derive(Debug)]
pub struct RunStepExecutor {
    run_id: String,
    ledger: HistoryLedger,
    working_dir: Option<PathBuf>,
}

impl RunStepExecutor {
    pub fn new(run_id: impl Into<String>, ledger: HistoryLedger) -> Self {
        Self {
            run_id: run_id.into(),
            ledger,
            working_dir: None,
        }
    }

    /// Run steps with `dir` as current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Run `cmd` to completion.
    ///
    /// Non-zero exits and launch failures are returned as outcomes, never as
    /// errors. The only error is failing to append the history entry.
    pub fn execute(&mut self, cmd: &StepCommand) -> Result<StepOutcome> {
        info!(run_id = %self.run_id, step = %cmd.step, "Executing {}", cmd.display_line());

        let outcome = match self.spawn(cmd) {
            Ok(code) => StepOutcome::Exited(code),
            Err(reason) => {
                error!(run_id = %self.run_id, step = %cmd.step, program = %cmd.program, "Cannot launch: {}", reason);
                StepOutcome::LaunchFailed { reason }
            }
        };

        if let StepOutcome::Exited(code) = outcome {
            if code != 0 {
                warn!(run_id = %self.run_id, step = %cmd.step, exit_code = code, "Step failed");
            }
        }

        self.ledger.record(HistoryEntry::now(
            &self.run_id,
            &cmd.step,
            &cmd.product_id,
            &cmd.input_ref,
            &cmd.config_ref,
            outcome.exit_code(),
        ))?;
        Ok(outcome)
    }

    fn spawn(&self, cmd: &StepCommand) -> std::result::Result<i32, String> {
        if cmd.program.trim().is_empty() {
            return Err("no program configured".to_string());
        }
        let program = which::which(&cmd.program)
            .map_err(|e| format!("{} not found: {}", cmd.program, e))?;

        let mut command = Command::new(&program);
        command.args(&cmd.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let status = command
            .status()
            .map_err(|e| format!("failed to spawn {}: {}", program.display(), e))?;
        Ok(status.code().unwrap_or(SIGNALED_EXIT_CODE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(step: &str, program: &str, args: &[&str]) -> StepCommand {
        StepCommand {
            step: step.to_string(),
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            product_id: "v1".to_string(),
            input_ref: "in.h5".to_string(),
            config_ref: "cfg.json".to_string(),
        }
    }

    fn executor(tmp: &tempfile::TempDir) -> RunStepExecutor {
        let ledger = HistoryLedger::open(tmp.path().join("sequence_LST1_01805.history")).unwrap();
        RunStepExecutor::new("01805", ledger)
    }

    #[test]
    fn exit_code_is_returned_and_recorded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut exec = executor(&tmp);

        let outcome = exec.execute(&command("CALIB", "sh", &["-c", "exit 3"])).unwrap();
        assert_eq!(outcome, StepOutcome::Exited(3));

        let (_, entry) = exec.ledger().last_entry("01805", "CALIB").unwrap();
        assert_eq!(entry.exit_code, 3);
        assert_eq!(entry.input_ref, "in.h5");
    }

    #[test]
    fn missing_program_is_a_launch_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut exec = executor(&tmp);

        let outcome = exec
            .execute(&command("CALIB", "nightfall-no-such-program", &[]))
            .unwrap();
        assert!(matches!(outcome, StepOutcome::LaunchFailed { .. }));

        let (_, entry) = exec.ledger().last_entry("01805", "CALIB").unwrap();
        assert_eq!(entry.exit_code, LAUNCH_FAILURE_EXIT_CODE);
    }

    #[test]
    fn runs_in_working_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut exec = executor(&tmp).with_working_dir(tmp.path());

        let outcome = exec
            .execute(&command("TOUCH", "sh", &["-c", "touch marker"]))
            .unwrap();
        assert!(outcome.succeeded());
        assert!(tmp.path().join("marker").exists());
    }
}
