//! Oracle backend that runs an external program per request.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};

use crate::oracle::{Oracle, OracleRequest};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pipes each request as JSON to `program` and reads the code from stdout.
///
/// A non-zero exit status is a transport failure; stderr is carried in the
/// error. With a timeout set, a child still running at the deadline is
/// killed and the call fails.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Kill the child if it has not exited after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn wait(&self, child: &mut Child) -> anyhow::Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return child.wait().context("failed to wait for oracle command");
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().context("failed to poll oracle command")? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                // Best effort: the child may exit between the poll and the kill
                let _ = child.kill();
                let _ = child.wait();
                bail!("oracle command '{}' killed after {:?}", self.program, timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read a pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn join(handle: JoinHandle<Vec<u8>>) -> anyhow::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("oracle command reader panicked"))
}

impl Oracle for CommandOracle {
    fn translate(&self, request: &OracleRequest) -> anyhow::Result<String> {
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start oracle command '{}'", self.program))?;

        let stdin = child.stdin.take();
        let writer = thread::spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(&payload),
            None => Ok(()),
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child)?;
        let stdout = join(stdout)?;
        let stderr = join(stderr)?;

        if !status.success() {
            bail!(
                "oracle command exited with {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            );
        }
        writer
            .join()
            .map_err(|_| anyhow!("oracle command writer panicked"))?
            .context("failed to send request to oracle command")?;

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}
