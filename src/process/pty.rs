// src/process/pty.rs

//! Launching processes on a pseudo terminal
//!
//! emerge reports progress through the terminal window title and colours its
//! output only when attached to a tty, so every job gets a fresh pty. The
//! child leads its own process group so job control signals reach the whole
//! build tree.

use super::{ChildProcess, CommandSpec, GroupSignal, Launched, ProcessExit, ProcessLauncher};
use crate::error::{Error, Result};
use nix::pty::{Winsize, openpty};
use nix::sys::signal::killpg;
use nix::sys::termios::Termios;
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

/// Launcher binding stdin, stdout and stderr to a new pty
#[derive(Debug, Clone, Copy, Default)]
pub struct PtyLauncher;

impl ProcessLauncher for PtyLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<Launched> {
        let pty = openpty(None::<&Winsize>, None::<&Termios>)
            .map_err(|e| Error::Terminal(format!("openpty failed: {}", e)))?;

        let stdin = pty.slave.try_clone()?;
        let stdout = pty.slave.try_clone()?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(pty.slave))
            .process_group(0);

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // The reader only sees EOF once no slave descriptor is left open here
        drop(cmd);

        Ok(Launched {
            process: Box::new(PtyChild { child }),
            terminal: Some(pty.master),
        })
    }
}

struct PtyChild {
    child: Child,
}

impl ChildProcess for PtyChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn signal_group(&mut self, signal: GroupSignal) -> Result<()> {
        let pgid = self.child.id() as i32;
        killpg(Pid::from_raw(pgid), signal.as_signal()).map_err(|source| Error::Signal { pgid, source })
    }

    fn try_exit(&mut self) -> Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(ProcessExit::from))
    }
}
