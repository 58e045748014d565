//! The hypervisor: owner of every terminal, process, and channel.
//!
//! One [`Hypervisor::tick`] advances the whole system cooperatively:
//!
//! 1. every terminal drains its mailbox (relaying input to its task and
//!    applying output published for it),
//! 2. commands the tasks issued are executed: `start`/`stop` here, the
//!    rest by the [`TerminalStack`],
//! 3. every process drains its mailbox,
//! 4. external processes whose command has exited are reaped.
//!
//! Input from the windowing layer enters through
//! [`Hypervisor::dispatch_input`]. Nothing on the tick path blocks; only
//! external processes run their own threads.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broker::{Broker, ResourceId, ResourceType, SharedBroker};
use crate::config::Config;
use crate::ids::{IdAllocator, ProcessId, TerminalId, TerminalIdSource};
use crate::input::{Pointer, Windowing};
use crate::msg::{key, Envelope, TokenizedCommand};
use crate::process::task::key_press;
use crate::process::{ExternalProcess, ExternalSpawnConfig, Process, ProcessRegistry};
use crate::terminal::{StackError, StackLayout, TerminalStack, PROMPT_LINES};

/// Top-level state of a running hypervisor.
#[derive(Debug)]
pub struct Hypervisor {
    config: Config,
    ids: IdAllocator,
    broker: SharedBroker,
    processes: ProcessRegistry,
    stack: TerminalStack,
    pointer: Pointer,
    shutdown: Arc<AtomicBool>,
}

impl Hypervisor {
    /// Create a hypervisor with OS-seeded terminal ids.
    pub fn new(config: Config) -> Self {
        Self::with_id_source(config, TerminalIdSource::from_os())
    }

    /// Create a hypervisor drawing terminal ids from `id_source`.
    pub fn with_id_source(config: Config, id_source: TerminalIdSource) -> Self {
        let broker = Broker::shared();
        let stack = TerminalStack::new(
            Arc::clone(&broker),
            StackLayout::new(config.canvas_extents()),
            id_source,
            config.mailbox_config(),
        );
        Self {
            pointer: Pointer::new(config.near_threshold),
            config,
            ids: IdAllocator::new(),
            broker,
            processes: ProcessRegistry::new(),
            stack,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the first, resizable terminal.
    pub fn init(&mut self) -> Result<TerminalId, StackError> {
        let id = self.stack.add_terminal(&self.ids, &mut self.processes, false)?;
        log::info!("[hypervisor] initialised with terminal {id}");
        Ok(id)
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Terminal stack.
    pub fn stack(&self) -> &TerminalStack {
        &self.stack
    }

    /// Terminal stack, mutably.
    pub fn stack_mut(&mut self) -> &mut TerminalStack {
        &mut self.stack
    }

    /// Process registry.
    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Shared broker.
    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Flag raised when the hypervisor should stop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Whether shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // ─── Input ─────────────────────────────────────────────────────────────

    /// Route one encoded input envelope.
    ///
    /// Pointer envelopes drive focus and geometry; every input envelope is
    /// then delivered to the focused terminal.
    pub fn dispatch_input(&mut self, message: &[u8], windowing: &mut dyn Windowing) {
        let envelope = match Envelope::decode(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[hypervisor] dropping bad input envelope: {e}");
                return;
            }
        };
        if !envelope.is_input() {
            log::debug!(
                "[hypervisor] 0x{:04x} is not an input envelope",
                envelope.type_tag()
            );
            return;
        }

        match &envelope {
            Envelope::MousePos(pos) => self.pointer.on_mouse_pos(pos, &mut self.stack, windowing),
            Envelope::MouseButton(button) => {
                self.pointer.on_mouse_button(button, &mut self.stack, windowing);
            }
            _ => {}
        }

        match self.stack.deliver_to_focused(message.to_vec()) {
            Ok(delivery) => log::trace!("[hypervisor] input {delivery:?}"),
            Err(StackError::NoFocus) => {}
            Err(e) => log::debug!("[hypervisor] input not delivered: {e}"),
        }
    }

    /// Type `line` into the focused terminal followed by Enter.
    pub fn type_line(&mut self, line: &str, windowing: &mut dyn Windowing) {
        for ch in line.chars() {
            self.dispatch_input(&Envelope::Character(ch as u32).encode(), windowing);
        }
        self.dispatch_input(&key_press(key::ENTER).encode(), windowing);
    }

    // ─── Tick ──────────────────────────────────────────────────────────────

    /// Advance everything once.
    pub fn tick(&mut self) {
        for (receiver, cmd) in self.stack.tick() {
            self.execute(receiver, &cmd);
        }
        self.processes.tick_all();
        for (id, code) in self.processes.reap_exited() {
            log::debug!("[hypervisor] process {id} finished with {code:?}");
            self.release_channel(id);
        }
    }

    fn execute(&mut self, receiver: TerminalId, cmd: &TokenizedCommand) {
        log::debug!("[hypervisor] terminal {receiver}: {} {:?}", cmd.command, cmd.args);
        match cmd.command.as_str() {
            "start" => self.start_external(receiver, &cmd.args),
            "stop" => self.stop_external(receiver),
            _ => {
                // Feedback for failures is already printed by the stack.
                if let Err(e) = self
                    .stack
                    .on_user_command(receiver, cmd, &self.ids, &mut self.processes)
                {
                    log::warn!("[hypervisor] terminal {receiver}: {} failed: {e}", cmd.command);
                }
            }
        }
    }

    /// Run a command on a PTY and forward the receiver's lines to it.
    fn start_external(&mut self, receiver: TerminalId, args: &[String]) {
        let Some(task_id) = self.stack.process_of(receiver) else {
            return;
        };
        let (out_channel, attached) = match self.processes.task_mut(task_id) {
            Ok(task) => (task.out_channel(), task.attached_external()),
            Err(e) => {
                log::error!("[hypervisor] terminal {receiver}: {e}");
                return;
            }
        };
        if let Some(running) = attached {
            self.stack
                .print_feedback(receiver, &format!("start: process {running} is already running"));
            return;
        }
        let Some(out_channel) = out_channel else {
            return;
        };

        let command = if args.is_empty() {
            self.config.default_shell.clone()
        } else {
            args.join(" ")
        };
        let grid = self
            .stack
            .get(receiver)
            .map(|t| t.grid_size())
            .unwrap_or_default();
        let spawn_config = ExternalSpawnConfig::new(command.clone()).with_size(
            (grid.y - PROMPT_LINES).clamp(1, i32::from(u16::MAX)) as u16,
            grid.x.clamp(1, i32::from(u16::MAX)) as u16,
        );

        let external = match ExternalProcess::spawn(
            self.ids.next_process_id(),
            &spawn_config,
            Arc::clone(&self.broker),
            out_channel,
            self.config.mailbox_config(),
        ) {
            Ok(external) => external,
            Err(e) => {
                log::error!("[hypervisor] start '{command}' failed: {e:#}");
                self.stack.print_feedback(receiver, &format!("start: {e:#}"));
                return;
            }
        };

        let ext_id = external.id();
        let channel = self.broker.create_channel(
            ResourceId(ext_id.0),
            ResourceType::Process,
            format!("viscript.pubsub.process-{ext_id}"),
        );
        let inbox = external.incoming_channel().clone();
        self.processes.add(Process::External(external));
        let attached = self
            .broker
            .add_subscriber(channel, ResourceId(ext_id.0), ResourceType::Process, inbox)
            .map_err(StackError::from)
            .and_then(|()| {
                self.processes
                    .task_mut(task_id)
                    .and_then(|task| task.attach_external(ext_id, channel))
                    .map_err(StackError::from)
            });
        if let Err(e) = attached {
            log::error!("[hypervisor] attaching {ext_id}: {e}");
            self.release_channel(ext_id);
            if let Some(p) = self.processes.get_mut(ext_id) {
                if let Err(e) = p.delete() {
                    log::warn!("[hypervisor] rolling back {ext_id}: {e}");
                }
            }
            self.stack.print_feedback(receiver, &format!("start: {e}"));
            return;
        }
        self.stack
            .print_feedback(receiver, &format!("started process {ext_id}: {command}"));
    }

    /// Stop the external process the receiver's task forwards to.
    fn stop_external(&mut self, receiver: TerminalId) {
        let Some(task_id) = self.stack.process_of(receiver) else {
            return;
        };
        let detached = self
            .processes
            .task_mut(task_id)
            .ok()
            .and_then(|task| task.detach_external());
        let Some(ext_id) = detached else {
            self.stack.print_feedback(receiver, "stop: no process is running");
            return;
        };
        if let Some(p) = self.processes.get_mut(ext_id) {
            if !p.is_deleted() {
                if let Err(e) = p.delete() {
                    log::warn!("[hypervisor] stopping {ext_id}: {e}");
                }
            }
        }
        self.stack.print_feedback(receiver, &format!("stopping process {ext_id}"));
    }

    /// Drop the channel that carries lines to external process `id`.
    fn release_channel(&self, id: ProcessId) {
        let removed = self.broker.remove_resource(ResourceId(id.0), ResourceType::Process);
        log::debug!("[hypervisor] process {id}: released {removed} channel(s)");
    }

    // ─── Shutdown ──────────────────────────────────────────────────────────

    /// Remove every terminal and wait for every external process to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for id in self.stack.ids() {
            if let Err(e) = self.stack.remove_terminal(id, &mut self.processes) {
                log::warn!("[hypervisor] removing terminal {id}: {e}");
            }
        }
        for id in self.processes.ids() {
            if let Some(Process::External(mut ext)) = self.processes.remove(id) {
                if !ext.is_deleted() {
                    if let Err(e) = ext.delete() {
                        log::warn!("[hypervisor] stopping {id}: {e}");
                    }
                }
                let code = ext.wait();
                self.release_channel(id);
                log::info!("[hypervisor] process {id} exited with {code:?}");
            }
        }
        log::info!(
            "[hypervisor] shut down ({} channels left)",
            self.broker.channel_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Headless;

    fn hypervisor() -> Hypervisor {
        let mut hv = Hypervisor::with_id_source(Config::default(), TerminalIdSource::seeded(11));
        hv.init().unwrap();
        hv
    }

    fn settle(hv: &mut Hypervisor) {
        for _ in 0..4 {
            hv.tick();
        }
    }

    fn focused_screen(hv: &Hypervisor) -> String {
        hv.stack().focused_terminal().unwrap().screen_text()
    }

    #[test]
    fn test_init_spawns_dynamic_focused_terminal() {
        let hv = hypervisor();
        let term = hv.stack().focused_terminal().unwrap();
        assert!(!term.is_fixed_size());
        assert_eq!(hv.processes().len(), 1);
        assert_eq!(hv.broker().channel_count(), 2);
    }

    #[test]
    fn test_typed_echo_appears_on_screen() {
        let mut hv = hypervisor();
        hv.type_line("echo hello", &mut Headless);
        settle(&mut hv);
        let screen = focused_screen(&hv);
        assert!(screen.contains(">echo hello"));
        assert!(screen.contains("\nhello"));
    }

    #[test]
    fn test_new_term_then_close_it() {
        let mut hv = hypervisor();
        let first = hv.stack().focused().unwrap();
        hv.type_line("new_term", &mut Headless);
        settle(&mut hv);
        assert_eq!(hv.stack().len(), 2);
        let second = hv.stack().focused().unwrap();
        assert_ne!(first, second);
        assert_eq!(hv.processes().len(), 2);

        hv.type_line(&format!("close_term {first}"), &mut Headless);
        settle(&mut hv);
        assert_eq!(hv.stack().ids(), vec![second]);
        assert_eq!(hv.processes().len(), 1);
        assert_eq!(hv.broker().channel_count(), 2);
    }

    #[test]
    fn test_stop_without_process_reports() {
        let mut hv = hypervisor();
        hv.type_line("stop", &mut Headless);
        settle(&mut hv);
        assert!(focused_screen(&hv).contains("stop: no process is running"));
    }

    #[test]
    fn test_non_input_envelopes_are_not_dispatched() {
        let mut hv = hypervisor();
        hv.dispatch_input(&Envelope::ClearTerminal.encode(), &mut Headless);
        hv.dispatch_input(&[1, 2, 3], &mut Headless);
        assert!(hv.stack().focused_terminal().unwrap().in_mailbox().is_empty());
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let mut hv = hypervisor();
        hv.type_line("new_term", &mut Headless);
        settle(&mut hv);
        hv.shutdown();
        assert!(hv.is_shutting_down());
        assert!(hv.stack().is_empty());
        assert!(hv.processes().is_empty());
        assert_eq!(hv.broker().channel_count(), 0);
    }
}
