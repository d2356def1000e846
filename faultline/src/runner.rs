//! Spawning the target once per campaign phase and classifying how it
//! died.
//!
//! The orchestrator is strictly sequential: one child at a time, parent
//! blocked in `waitpid` until it is gone. Anything else would race on
//! the settings/table/crash file set, which is overwritten whole per run.

use std::env;
use std::ffi::CString;

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, execvpe, fork};

use faultline_protocol::SHIM_FILE;
use faultline_protocol::settings::Settings;

/// How one target execution ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Normal exit with a status code. Codes at or above 128 usually
    /// come from the interception runtime's crash handler.
    Exited(i32),
    /// Killed by a signal the crash handler could not intercept.
    Signaled(i32),
    /// Stopped by job control; observed and left alone.
    Stopped(i32),
}

impl RunOutcome {
    /// The fatal signal this outcome encodes, if any: a direct signaled
    /// termination, or an exit status following the `128 + signo`
    /// convention the crash handler uses.
    pub fn derived_signal(&self) -> Option<i32> {
        match *self {
            RunOutcome::Exited(code) if code >= 128 => Some(code - 128),
            RunOutcome::Signaled(signo) => Some(signo),
            _ => None,
        }
    }

    /// Whether the process was killed outright. A handled crash exits
    /// normally with `128 + signo` instead and is counted through its
    /// crash record.
    pub fn killed(&self) -> bool {
        matches!(self, RunOutcome::Signaled(_))
    }
}

/// Best-effort symbolic name for a signal number.
pub fn signal_name(signo: i32) -> String {
    Signal::try_from(signo)
        .map(|signal| signal.as_str().to_owned())
        .unwrap_or_else(|_| format!("signal {signo}"))
}

pub fn classify(status: WaitStatus) -> Option<RunOutcome> {
    match status {
        WaitStatus::Exited(_, code) => Some(RunOutcome::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(RunOutcome::Signaled(signal as i32)),
        WaitStatus::Stopped(_, signal) => Some(RunOutcome::Stopped(signal as i32)),
        _ => None,
    }
}

/// One spawn of the target under the current settings record. A trait so
/// the campaign loop can be driven by a scripted stand-in under test.
pub trait Runner {
    fn run(&mut self, settings: &Settings) -> Result<RunOutcome>;
}

/// The production runner: `fork`, preload the interception library via
/// the environment, `exec` the target (optionally under an external
/// analysis wrapper), and wait.
pub struct ForkRunner {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl ForkRunner {
    pub fn new(target: &str, args: &[String], wrapper: Option<&str>) -> Result<ForkRunner> {
        let mut argv_strings: Vec<&str> = Vec::new();
        if let Some(wrapper) = wrapper {
            argv_strings.push(wrapper);
        }
        argv_strings.push(target);
        argv_strings.extend(args.iter().map(String::as_str));

        let argv = argv_strings
            .iter()
            .map(|arg| CString::new(*arg).context("argument contains a NUL byte"))
            .collect::<Result<Vec<_>>>()?;
        let program = argv[0].clone();

        // The child inherits our environment with the preload slot
        // pointing at the staged interception library.
        let mut envp = vec![CString::new(format!("LD_PRELOAD=./{SHIM_FILE}"))?];
        for (key, value) in env::vars() {
            if key != "LD_PRELOAD" {
                envp.push(CString::new(format!("{key}={value}"))?);
            }
        }

        Ok(ForkRunner {
            program,
            argv,
            envp,
        })
    }
}

impl Runner for ForkRunner {
    fn run(&mut self, _settings: &Settings) -> Result<RunOutcome> {
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => {
                let _ = execvpe(&self.program, &self.argv, &self.envp);
                // Still the child: exec failed, nothing of ours to clean up.
                eprintln!("could not execute {}", self.program.to_string_lossy());
                std::process::exit(127);
            }
            ForkResult::Parent { child } => loop {
                let status = waitpid(child, Some(WaitPidFlag::WUNTRACED))
                    .context("waitpid on the target failed")?;
                if let Some(outcome) = classify(status) {
                    return Ok(outcome);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn classification_covers_the_wait_taxonomy() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            classify(WaitStatus::Exited(pid, 3)),
            Some(RunOutcome::Exited(3))
        );
        assert_eq!(
            classify(WaitStatus::Signaled(pid, Signal::SIGSEGV, false)),
            Some(RunOutcome::Signaled(libc_signo(Signal::SIGSEGV)))
        );
        assert_eq!(
            classify(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some(RunOutcome::Stopped(libc_signo(Signal::SIGTSTP)))
        );
        assert_eq!(classify(WaitStatus::StillAlive), None);
    }

    fn libc_signo(signal: Signal) -> i32 {
        signal as i32
    }

    #[test]
    fn high_exit_statuses_are_signal_derived() {
        assert_eq!(RunOutcome::Exited(0).derived_signal(), None);
        assert_eq!(RunOutcome::Exited(1).derived_signal(), None);
        assert_eq!(RunOutcome::Exited(139).derived_signal(), Some(11));
        assert_eq!(RunOutcome::Signaled(6).derived_signal(), Some(6));
        assert_eq!(RunOutcome::Stopped(19).derived_signal(), None);
    }

    #[test]
    fn only_signaled_terminations_count_as_killed() {
        assert!(RunOutcome::Signaled(9).killed());
        assert!(!RunOutcome::Exited(139).killed());
        assert!(!RunOutcome::Stopped(19).killed());
    }
}
