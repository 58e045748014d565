//! External process supervised through a pseudo-terminal.
//!
//! # Threads
//!
//! ```text
//!              ┌──────────── send loop ─────────────┐
//!   PTY master ─read─► Output envelope ─publish─► terminal channel
//!
//!              ┌────────── receive loop ────────────┐
//!   cmd_out mailbox ─recv─► line + '\n' ─write (PTY write mutex)─► PTY master
//!
//!              ┌─────────── supervisor ─────────────┐
//!   loop exit or child exit ─► close PTY ─► SIGHUP ─► wait ─► join loops ─► ProcessExited
//! ```
//!
//! Either loop ending (EOF, read error, write error, closed mailbox) counts
//! as the command exiting, and so does the child itself exiting while a
//! descendant still holds the PTY open. A scope guard in each loop reports
//! its exit to the supervisor on every path, panics included. Loops still
//! blocked after [`LOOP_JOIN_TIMEOUT`] are detached rather than joined.
//!
//! The tick path never blocks on the OS command: [`ExternalProcess::tick`]
//! only moves envelopes from the inbound mailbox to the outbound one.

// Rust guideline compliant 2026-02

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use portable_pty::{Child, ExitStatus, MasterPty};

use super::spawn::{build_command, open_pty, ExternalSpawnConfig};
use super::ProcessError;
use crate::broker::{ChannelId, SharedBroker};
use crate::ids::ProcessId;
use crate::mailbox::{Delivery, Mailbox, MailboxConfig, MailboxError};
use crate::msg::{Envelope, ProcessExited};

/// Bytes read from the PTY per chunk.
const READ_BUFFER_SIZE: usize = 2048;

/// How often the supervisor checks whether the child has exited.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long teardown waits for each I/O loop before detaching it.
pub const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Writer half of the PTY, `None` once teardown has closed it.
type PtyWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Held while publishing on the output channel so chunks and the exit
/// notice reach subscribers one at a time.
type BroadcastLock = Arc<Mutex<()>>;

/// Which loop finished first.
#[derive(Debug, Clone, Copy)]
enum LoopExit {
    Send,
    Receive,
}

/// An OS command running on a PTY.
pub struct ExternalProcess {
    id: ProcessId,
    label: String,
    pid: Option<u32>,
    in_mailbox: Mailbox,
    cmd_out: Mailbox,
    running: Arc<AtomicBool>,
    deleted: bool,
    supervisor: Option<JoinHandle<Option<i32>>>,
    exit_code: Option<Option<i32>>,
}

impl std::fmt::Debug for ExternalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalProcess")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

impl ExternalProcess {
    /// Start `config.command` on a fresh PTY.
    ///
    /// Output is published as [`Envelope::Output`] on `out_channel`, and a
    /// [`Envelope::ProcessExited`] follows once the command is gone.
    ///
    /// # Errors
    ///
    /// Fails without starting any thread if the command is blank, the PTY
    /// cannot be opened, or the command cannot be spawned.
    pub fn spawn(
        id: ProcessId,
        config: &ExternalSpawnConfig,
        broker: SharedBroker,
        out_channel: ChannelId,
        mailbox_config: MailboxConfig,
    ) -> Result<Self> {
        let cmd = build_command(config)?;
        let pair = open_pty(config.rows, config.cols)?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;
        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn '{}'", config.command))?;
        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let pid = child.process_id();
        log::info!(
            "[external] process {id} spawned '{}' (pid {pid:?})",
            config.command
        );

        let in_mailbox = Mailbox::new(mailbox_config);
        let cmd_out = Mailbox::new(mailbox_config);
        let writer: PtyWriter = Arc::new(Mutex::new(Some(writer)));
        let running = Arc::new(AtomicBool::new(true));
        let broadcast_lock: BroadcastLock = Arc::new(Mutex::new(()));
        let (exit_tx, exit_rx) = mpsc::channel::<LoopExit>();

        let send_handle = {
            let exit_tx = exit_tx.clone();
            let broker = Arc::clone(&broker);
            let broadcast_lock = Arc::clone(&broadcast_lock);
            thread::spawn(move || {
                scopeguard::defer! {
                    // The supervisor is gone once it has torn down.
                    exit_tx.send(LoopExit::Send).ok();
                }
                send_loop(id, reader, &broker, out_channel, &broadcast_lock);
            })
        };

        let receive_handle = {
            let cmd_out = cmd_out.clone();
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                scopeguard::defer! {
                    exit_tx.send(LoopExit::Receive).ok();
                }
                receive_loop(id, &cmd_out, &writer);
            })
        };

        let supervisor = {
            let teardown = Teardown {
                id,
                master: pair.master,
                writer,
                cmd_out: cmd_out.clone(),
                child,
                loops: [send_handle, receive_handle],
                running: Arc::clone(&running),
                broker,
                out_channel,
                broadcast_lock,
            };
            thread::spawn(move || teardown.supervise(&exit_rx))
        };

        Ok(Self {
            id,
            label: config.command.clone(),
            pid,
            in_mailbox,
            cmd_out,
            running,
            deleted: false,
            supervisor: Some(supervisor),
            exit_code: None,
        })
    }

    /// Process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Command line this process was started with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, when the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Inbound mailbox (envelopes destined for the command).
    pub fn incoming_channel(&self) -> &Mailbox {
        &self.in_mailbox
    }

    /// Whether the supervisor has not yet finished teardown.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether [`ExternalProcess::delete`] has been called.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Forward queued command text to the PTY writer loop.
    pub fn tick(&mut self) {
        if self.deleted {
            return;
        }
        for bytes in self.in_mailbox.drain() {
            match Envelope::decode(&bytes) {
                Ok(Envelope::CommandLine(_) | Envelope::TokenizedCommand(_)) => {
                    match self.cmd_out.send(bytes) {
                        Ok(Delivery::Delivered) => {}
                        Ok(Delivery::Backpressure) => {
                            log::warn!("[external] process {}: PTY input backlog, line dropped", self.id);
                        }
                        Err(MailboxError::Closed | MailboxError::AlreadyClosed) => {
                            log::debug!("[external] process {}: command gone, line dropped", self.id);
                        }
                    }
                }
                Ok(other) => {
                    log::debug!(
                        "[external] process {}: ignoring envelope 0x{:04x}",
                        self.id,
                        other.type_tag()
                    );
                }
                Err(e) => log::warn!("[external] process {}: bad envelope: {e}", self.id),
            }
        }
    }

    /// Close both mailboxes, which starts teardown of the command.
    ///
    /// Returns immediately; use [`ExternalProcess::wait`] to join.
    pub fn delete(&mut self) -> Result<(), ProcessError> {
        if self.deleted || self.in_mailbox.close().is_err() {
            log::error!("[external] process {} deleted twice", self.id);
            return Err(ProcessError::AlreadyDeleted(self.id));
        }
        self.deleted = true;
        if let Err(e) = self.cmd_out.close() {
            log::debug!("[external] process {}: outbound queue already closed by teardown: {e}", self.id);
        }
        log::info!("[external] process {} deleted", self.id);
        Ok(())
    }

    /// Block until teardown completes and return the exit code.
    ///
    /// Does not itself stop the command; call [`ExternalProcess::delete`]
    /// first unless the command is expected to exit on its own.
    pub fn wait(&mut self) -> Option<i32> {
        if let Some(handle) = self.supervisor.take() {
            self.exit_code = Some(handle.join().unwrap_or_else(|_| {
                log::error!("[external] process {} supervisor panicked", self.id);
                None
            }));
        }
        self.exit_code.flatten()
    }
}

impl Drop for ExternalProcess {
    fn drop(&mut self) {
        if !self.deleted {
            let closed = self.in_mailbox.close().and(self.cmd_out.close());
            if let Err(e) = closed {
                log::debug!("[external] process {} dropped after teardown: {e}", self.id);
            }
        }
    }
}

/// Everything the supervisor releases, in order.
struct Teardown {
    id: ProcessId,
    master: Box<dyn MasterPty + Send>,
    writer: PtyWriter,
    cmd_out: Mailbox,
    child: Box<dyn Child + Send + Sync>,
    loops: [JoinHandle<()>; 2],
    running: Arc<AtomicBool>,
    broker: SharedBroker,
    out_channel: ChannelId,
    broadcast_lock: BroadcastLock,
}

impl Teardown {
    /// Wait for either loop to end or the child to exit, then tear down.
    fn supervise(mut self, exit_rx: &mpsc::Receiver<LoopExit>) -> Option<i32> {
        let id = self.id;
        let exited = loop {
            match exit_rx.recv_timeout(CHILD_POLL_INTERVAL) {
                Ok(first) => {
                    log::debug!("[external] process {id}: {first:?} loop ended, tearing down");
                    break None;
                }
                Err(RecvTimeoutError::Disconnected) => break None,
                Err(RecvTimeoutError::Timeout) => match self.child.try_wait() {
                    Ok(Some(status)) => {
                        log::debug!("[external] process {id}: child exited, tearing down");
                        break Some(status);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("[external] process {id}: try_wait failed: {e}");
                        break None;
                    }
                },
            }
        };
        self.run(exited)
    }

    fn run(self, exited: Option<ExitStatus>) -> Option<i32> {
        let Self {
            id,
            master,
            writer,
            cmd_out,
            mut child,
            loops,
            running,
            broker,
            out_channel,
            broadcast_lock,
        } = self;

        // Close the PTY: master handle, writer, and the queue feeding it.
        drop(master);
        drop(writer.lock().unwrap_or_else(|e| e.into_inner()).take());
        if let Err(e) = cmd_out.close() {
            log::debug!("[external] process {id}: outbound queue already closed: {e}");
        }

        let status = match exited {
            Some(status) => Ok(status),
            None => {
                // SIGHUP, escalating to SIGKILL if the command lingers.
                if let Err(e) = child.kill() {
                    log::debug!("[external] process {id}: kill failed (already exited?): {e}");
                }
                child.wait()
            }
        };
        let exit_code = match status {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                log::warn!("[external] process {id}: wait failed: {e}");
                None
            }
        };

        let deadline = Instant::now() + LOOP_JOIN_TIMEOUT;
        for handle in loops {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                log::warn!("[external] process {id}: I/O loop still blocked on the PTY, detaching it");
                continue;
            }
            if handle.join().is_err() {
                log::error!("[external] process {id}: I/O loop panicked");
            }
        }

        running.store(false, Ordering::Release);
        log::info!("[external] process {id} exited with {exit_code:?}");

        let notice = Envelope::ProcessExited(ProcessExited {
            process_id: id.0,
            exit_code,
        });
        let _guard = broadcast_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = broker.publish_to(out_channel, &notice.encode()) {
            log::debug!("[external] process {id}: exit notice not delivered: {e}");
        }
        exit_code
    }
}

/// Read PTY output and publish each chunk as an `Output` envelope.
fn send_loop(
    id: ProcessId,
    mut reader: Box<dyn Read + Send>,
    broker: &SharedBroker,
    out_channel: ChannelId,
    broadcast_lock: &Mutex<()>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                log::debug!("[external] process {id}: PTY EOF");
                break;
            }
            Ok(n) => {
                let envelope = Envelope::Output(buf[..n].to_vec()).encode();
                let _guard = broadcast_lock.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = broker.publish_to(out_channel, &envelope) {
                    log::debug!("[external] process {id}: output not delivered: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("[external] process {id}: PTY read ended: {e}");
                break;
            }
        }
    }
}

/// Write each queued command line, newline-terminated, to the PTY.
fn receive_loop(id: ProcessId, cmd_out: &Mailbox, writer: &PtyWriter) {
    while let Some(bytes) = cmd_out.recv() {
        let Some(mut line) = command_text(&bytes) else {
            continue;
        };
        line.push('\n');

        let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pty) = guard.as_mut() else {
            break;
        };
        if let Err(e) = pty.write_all(line.as_bytes()).and_then(|()| pty.flush()) {
            log::debug!("[external] process {id}: PTY write failed: {e}");
            break;
        }
    }
}

/// Text to type into the command for a forwarded envelope.
fn command_text(bytes: &[u8]) -> Option<String> {
    match Envelope::decode(bytes).ok()? {
        Envelope::CommandLine(c) => Some(c.command_line),
        Envelope::TokenizedCommand(t) => {
            let mut parts = vec![t.command];
            parts.extend(t.args);
            Some(parts.join(" "))
        }
        _ => None,
    }
}
