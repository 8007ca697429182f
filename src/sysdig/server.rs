use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{Error, Event, Result};

/// Output format handed to `sysdig -p`; every field ends up as a JSON key with `-j`.
pub const FORMAT: &str = "%evt.num %evt.outputtime %evt.cpu %thread.tid %thread.vtid %proc.name \
%evt.dir %evt.type %evt.info %container.name %container.id \
%fd.name %fd.type %evt.is_io_write %evt.is_io_read %evt.buffer %evt.buflen \
%evt.latency %evt.rawres %syscall.type";

/// Only container events that complete a call, plus process exits.
pub const FILTER: &str = "container.id!=host and (evt.dir=< or evt.type=procexit)";

/// How the tracer process is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerCommand {
    pub binary: PathBuf,
    pub args: Vec<String>,
}

impl TracerCommand {
    /// The regular `sysdig` invocation producing one JSON event per line.
    pub fn sysdig(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: vec![
                "-j".to_owned(),
                "-p".to_owned(),
                FORMAT.to_owned(),
                FILTER.to_owned(),
            ],
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Event>,
    closed: bool,
}

impl Subscriber {
    fn close(&mut self) {
        self.closed = true;
    }

    fn is_open(&mut self) -> bool {
        if !self.closed && self.tx.is_closed() {
            self.close();
        }
        !self.closed
    }
}

/// Runs the tracer and dispatches its events to subscribers.
///
/// A failure of the tracer is not retried: it is reported once on the channel
/// returned by [`Server::start`] and the owner is expected to shut everything down.
#[derive(Debug)]
pub struct Server {
    command: TracerCommand,
    buffer_size: usize,
    subscribers: Vec<Subscriber>,
    shutdown: CancellationToken,
    started: bool,
}

impl Server {
    pub fn new(command: TracerCommand, buffer_size: usize) -> Self {
        Self {
            command,
            buffer_size,
            subscribers: Vec::new(),
            shutdown: CancellationToken::new(),
            started: false,
        }
    }

    /// Registers a new bounded queue that receives every decoded event.
    ///
    /// Subscribing after [`Server::start`] returns a queue that is already closed.
    /// Sends block while the queue is full, so a slow subscriber slows down all of them.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        if self.started {
            // Dropping the sender closes the queue right away.
            log::warn!("subscriber registered after the tracer was started");
            return rx;
        }
        self.subscribers.push(Subscriber { tx, closed: false });
        rx
    }

    /// Checks that the tracer can be run and starts it.
    ///
    /// # Returns
    ///
    /// A channel that receives the error that stopped the event stream. It is
    /// closed without a value if the stream was stopped by [`Server::shutdown`].
    ///
    /// # Errors
    ///
    /// - [`Error::Preflight`] if the tracer binary cannot be started or waited on.
    /// - [`Error::Spawn`] if the traced invocation cannot be started.
    /// - [`Error::AlreadyStarted`] on a second call.
    pub async fn start(&mut self) -> Result<oneshot::Receiver<Error>> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        preflight_check(&self.command.binary).await?;

        let mut child = Command::new(&self.command.binary)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                binary: self.command.binary.clone(),
                source,
            })?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                release(child).await;
                return Err(Error::MissingStdout);
            }
        };
        self.started = true;
        log::info!(
            "started tracer `{}` (pid={:?})",
            self.command.binary.display(),
            child.id()
        );

        let (error_tx, error_rx) = oneshot::channel();
        let subscribers = std::mem::take(&mut self.subscribers);
        tokio::spawn(decode_loop(
            child,
            stdout,
            subscribers,
            self.shutdown.clone(),
            error_tx,
        ));

        Ok(error_rx)
    }

    /// Stops the tracer. Calling it more than once has no further effect.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            log::debug!("shutting down tracer `{}`", self.command.binary.display());
        }
        self.shutdown.cancel();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The binary has to be runnable at all before the filtered invocation is attempted.
async fn preflight_check(binary: &Path) -> Result<()> {
    let to_error = |source| Error::Preflight {
        binary: binary.to_path_buf(),
        source,
    };
    let mut child = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(to_error)?;
    let status = child.wait().await.map_err(to_error)?;
    log::debug!("tracer preflight `{}` exited with {}", binary.display(), status);
    Ok(())
}

enum Stop {
    Shutdown,
    EndOfStream,
    Failed(Error),
}

async fn decode_loop(
    child: Child,
    stdout: ChildStdout,
    mut subscribers: Vec<Subscriber>,
    shutdown: CancellationToken,
    error_tx: oneshot::Sender<Error>,
) {
    // Lines are read as bytes: `evt.buffer` carries raw I/O contents.
    let mut lines = BufReader::new(stdout).split(b'\n');
    let stop = loop {
        let segment = tokio::select! {
            _ = shutdown.cancelled() => break Stop::Shutdown,
            segment = lines.next_segment() => segment,
        };
        let segment = match segment {
            Ok(Some(segment)) => segment,
            Ok(None) => break Stop::EndOfStream,
            Err(err) => break Stop::Failed(Error::Read(err)),
        };
        let line = String::from_utf8_lossy(&segment);
        if line.trim().is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<Event>(&line) {
            Ok(event) => event,
            Err(source) => {
                break Stop::Failed(Error::Decode {
                    line: line.trim_end().to_owned(),
                    source,
                });
            }
        };
        if !fan_out(&mut subscribers, event, &shutdown).await {
            break Stop::Shutdown;
        }
    };

    drop(lines);
    let status = release(child).await;
    for subscriber in subscribers.iter_mut() {
        subscriber.close();
    }

    let err = match stop {
        Stop::Shutdown => {
            log::info!("tracer stopped");
            return;
        }
        Stop::EndOfStream => Error::StreamEnded { status },
        Stop::Failed(err) => err,
    };
    log::error!("tracer event stream failed: {}", err);
    if error_tx.send(err).is_err() {
        log::debug!("nobody is listening for tracer errors");
    }
}

/// Delivers `event` to every open subscriber.
///
/// Returns `false` if shutdown was requested while waiting for a full queue.
async fn fan_out(
    subscribers: &mut [Subscriber],
    event: Event,
    shutdown: &CancellationToken,
) -> bool {
    for subscriber in subscribers.iter_mut() {
        if !subscriber.is_open() {
            continue;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            res = subscriber.tx.send(event.clone()) => {
                if res.is_err() {
                    subscriber.close();
                }
            }
        }
    }
    true
}

/// Kills the tracer if it is still running and reaps it.
async fn release(mut child: Child) -> Option<std::process::ExitStatus> {
    if let Ok(None) = child.try_wait() {
        if let Err(err) = child.start_kill() {
            log::warn!("failed to kill tracer: {}", err);
        }
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(err) => {
            log::warn!("failed to wait for tracer: {}", err);
            None
        }
    }
}
