//! Host process management for shared-host execution.
//!
//! Provides `HostSession` for spawning and talking to the long-lived host
//! bridge, and `HostKillHandle` for killing it from another thread.

use std::io::{BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::protocol::{HostCommand, HostResponse, read_message, write_message};

/// Program run inside the host interpreter.
pub const BRIDGE_PROGRAM: &str = include_str!("bridge.py");

/// How long a freshly spawned host gets to answer the first ping.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a running host bridge process.
pub struct HostSession {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    /// Frames decoded by the reader thread.
    responses: Receiver<Result<HostResponse>>,
    /// Kept alive for as long as the host may read it.
    _bridge: NamedTempFile,
    killed: bool,
}

impl HostSession {
    /// Spawn `host_command` running the bridge program and wait for its pong.
    pub fn spawn(host_command: &[String]) -> Result<Self> {
        let (program, args) = host_command
            .split_first()
            .ok_or_else(|| Error::Config("host_command must not be empty".to_string()))?;
        let program_path = which::which(program)
            .map_err(|e| Error::Interpreter(format!("{}: {}", program, e)))?;

        let mut bridge = tempfile::Builder::new()
            .prefix("forgebox-bridge-")
            .suffix(".py")
            .tempfile()?;
        bridge.write_all(BRIDGE_PROGRAM.as_bytes())?;
        bridge.flush()?;

        let mut child = Command::new(&program_path)
            .args(args)
            .arg(bridge.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program_path.display().to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get host stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get host stdout".to_string()))?;

        // Blocking reads happen on a dedicated thread so callers can wait
        // with a deadline.
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let message = read_message::<_, HostResponse>(&mut reader);
                let failed = message.is_err();
                if tx.send(message).is_err() || failed {
                    break;
                }
            }
        });

        let mut session = Self {
            child,
            stdin: BufWriter::new(stdin),
            responses: rx,
            _bridge: bridge,
            killed: false,
        };

        session.send_command(&HostCommand::Ping)?;
        match session.recv_response(HANDSHAKE_TIMEOUT)? {
            Some(HostResponse::Pong) => {
                debug!(pid = session.pid(), "host bridge ready");
                Ok(session)
            }
            Some(other) => Err(Error::Ipc(format!(
                "Unexpected response from host: {:?}",
                other
            ))),
            None => Err(Error::Ipc(format!(
                "Host did not answer ping within {}s",
                HANDSHAKE_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Send a command to the host.
    pub fn send_command(&mut self, cmd: &HostCommand) -> Result<()> {
        if self.killed {
            return Err(Error::Ipc("Host has been killed".to_string()));
        }
        write_message(&mut self.stdin, cmd)
    }

    /// Wait up to `timeout` for the next response. `None` means the deadline
    /// passed.
    pub fn recv_response(&mut self, timeout: Duration) -> Result<Option<HostResponse>> {
        if self.killed {
            return Err(Error::Ipc("Host has been killed".to_string()));
        }
        match self.responses.recv_timeout(timeout) {
            Ok(message) => message.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Ipc("Host closed its output stream".to_string()))
            }
        }
    }

    /// Kill the host process immediately.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        // Give the bridge a chance to exit on its own first.
        let _ = write_message(&mut self.stdin, &HostCommand::Shutdown);
        thread::sleep(Duration::from_millis(10));

        if let Err(e) = self.child.kill() {
            // InvalidInput means the process already exited.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to kill host: {}", e);
            }
        }
        let _ = self.child.wait();
    }

    /// Check if the host process is still running.
    pub fn is_alive(&mut self) -> bool {
        if self.killed {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn kill_handle(&self) -> HostKillHandle {
        HostKillHandle::new(self.pid())
    }

    /// Ask the host to exit and wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        self.send_command(&HostCommand::Shutdown)?;
        let acknowledged = matches!(
            self.recv_response(Duration::from_secs(5)),
            Ok(Some(HostResponse::ShuttingDown))
        );
        self.killed = true;
        let status = self
            .child
            .wait()
            .map_err(|e| Error::Ipc(format!("Failed to wait for host: {}", e)))?;

        if acknowledged && status.success() {
            Ok(())
        } else {
            Err(Error::Ipc(format!("Host exited with status: {}", status)))
        }
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Thread-safe handle for killing a host from another thread.
#[derive(Debug, Clone)]
pub struct HostKillHandle {
    pid: u32,
    killed: Arc<AtomicBool>,
}

impl HostKillHandle {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// SIGKILL the host. Only the first call has an effect.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        #[cfg(unix)]
        unsafe {
            libc::kill(self.pid as i32, libc::SIGKILL);
        }

        #[cfg(not(unix))]
        warn!(pid = self.pid, "killing a host by pid is only supported on unix");
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}
