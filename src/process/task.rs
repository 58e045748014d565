//! In-process task backing a terminal.
//!
//! The task is a small line-editing shell. It reads raw input relayed by
//! its terminal, keeps the command line and history, and publishes what the
//! terminal should show on the terminal channel:
//!
//! - [`Envelope::CommandLine`] after every edit (prompt included),
//! - [`Envelope::Output`] for echoed lines and command output,
//! - [`Envelope::TokenizedCommand`] for commands the hypervisor executes,
//! - [`Envelope::ClearTerminal`] for `clear`.
//!
//! When an external process is attached, lines that are not shell or
//! hypervisor commands are forwarded to it instead.

// Rust guideline compliant 2026-02

use tui_input::{Input, InputRequest};

use crate::broker::{ChannelId, SharedBroker};
use crate::ids::{ProcessId, TaskId};
use crate::mailbox::{Mailbox, MailboxConfig};
use crate::msg::{self, action, key, CommandLine, Envelope, TerminalIds, TokenizedCommand, VisualInfo};

use super::ProcessError;

/// Prompt drawn in front of the command line.
pub const PROMPT: &str = ">";

/// Commands executed by the terminal stack or hypervisor.
pub const HYPERVISOR_COMMANDS: &[&str] = &[
    "close_term",
    "focus",
    "defocus",
    "list_terms",
    "new_term",
    "start",
    "stop",
];

/// Maximum remembered history entries.
const HISTORY_LIMIT: usize = 100;

const HELP_TEXT: &[&str] = &[
    "commands:",
    "  help                  show this list",
    "  clear                 clear the terminal",
    "  echo <text...>        print text",
    "  new_term              open a fixed-size terminal",
    "  list_terms            list terminal ids",
    "  focus <id prefix>     focus a terminal",
    "  defocus               clear focus",
    "  close_term <id prefix> close a terminal",
    "  start [command...]    run a command on a pty",
    "  stop                  stop the running command",
];

/// Process attached to this task for line forwarding.
#[derive(Debug, Clone, Copy)]
struct AttachedExternal {
    id: ProcessId,
    channel: ChannelId,
}

/// Command line editor: a headless [`Input`] plus history.
#[derive(Debug, Default)]
struct LineEditor {
    input: Input,
    history: Vec<String>,
    /// Position while browsing history, `None` when editing a fresh line.
    browsing: Option<usize>,
}

impl LineEditor {
    fn text(&self) -> &str {
        self.input.value()
    }

    /// Cursor position in characters.
    fn cursor(&self) -> usize {
        self.input.cursor()
    }

    /// Apply an edit. Returns whether the line or cursor changed.
    fn handle(&mut self, req: InputRequest) -> bool {
        self.input.handle(req).is_some()
    }

    fn set_line(&mut self, text: &str) {
        self.input = Input::new(text.to_string());
    }

    fn history_prev(&mut self) -> bool {
        if self.history.is_empty() {
            return false;
        }
        let index = match self.browsing {
            Some(0) => return false,
            Some(i) => i - 1,
            None => self.history.len() - 1,
        };
        self.browsing = Some(index);
        let entry = self.history[index].clone();
        self.set_line(&entry);
        true
    }

    fn history_next(&mut self) -> bool {
        let Some(i) = self.browsing else {
            return false;
        };
        if i + 1 < self.history.len() {
            self.browsing = Some(i + 1);
            let entry = self.history[i + 1].clone();
            self.set_line(&entry);
        } else {
            self.browsing = None;
            self.input.reset();
        }
        true
    }

    /// Take the line, remembering it in history.
    fn submit(&mut self) -> String {
        let text = self.input.value().to_string();
        self.input.reset();
        self.browsing = None;
        if !text.trim().is_empty() && self.history.last() != Some(&text) {
            self.history.push(text.clone());
            if self.history.len() > HISTORY_LIMIT {
                self.history.remove(0);
            }
        }
        text
    }
}

/// Message-driven task process.
#[derive(Debug)]
pub struct TaskProcess {
    id: ProcessId,
    task_id: TaskId,
    in_mailbox: Mailbox,
    broker: SharedBroker,
    out_channel: Option<ChannelId>,
    editor: LineEditor,
    visual: Option<VisualInfo>,
    attached: Option<AttachedExternal>,
    deleted: bool,
}

impl TaskProcess {
    /// Create a task with an empty inbound mailbox and no output channel.
    pub fn new(id: ProcessId, task_id: TaskId, broker: SharedBroker, mailbox_config: MailboxConfig) -> Self {
        Self {
            id,
            task_id,
            in_mailbox: Mailbox::new(mailbox_config),
            broker,
            out_channel: None,
            editor: LineEditor::default(),
            visual: None,
            attached: None,
            deleted: false,
        }
    }

    /// Process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Task id.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Inbound mailbox.
    pub fn incoming_channel(&self) -> &Mailbox {
        &self.in_mailbox
    }

    /// Channel this task publishes terminal updates on.
    pub fn out_channel(&self) -> Option<ChannelId> {
        self.out_channel
    }

    /// Wire the channel the terminal listens on.
    pub fn set_out_channel(&mut self, channel: ChannelId) {
        self.out_channel = Some(channel);
    }

    /// Last geometry reported by the terminal.
    pub fn visual_info(&self) -> Option<VisualInfo> {
        self.visual
    }

    /// Current command line without the prompt.
    pub fn command_line(&self) -> &str {
        self.editor.text()
    }

    /// External process receiving forwarded lines, if any.
    pub fn attached_external(&self) -> Option<ProcessId> {
        self.attached.as_ref().map(|a| a.id)
    }

    /// Forward non-command lines to process `id` on `channel`.
    pub fn attach_external(&mut self, id: ProcessId, channel: ChannelId) -> Result<(), ProcessError> {
        if let Some(current) = &self.attached {
            return Err(ProcessError::AlreadyAttached {
                task: self.id,
                external: current.id,
            });
        }
        log::debug!("[task] process {} attached external {id}", self.id);
        self.attached = Some(AttachedExternal { id, channel });
        Ok(())
    }

    /// Stop forwarding. Returns the process that was attached.
    pub fn detach_external(&mut self) -> Option<ProcessId> {
        let detached = self.attached.take().map(|a| a.id);
        if let Some(id) = detached {
            log::debug!("[task] process {} detached external {id}", self.id);
        }
        detached
    }

    /// Whether [`TaskProcess::delete`] has been called.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Handle every envelope queued at call time.
    pub fn tick(&mut self) {
        if self.deleted {
            return;
        }
        for bytes in self.in_mailbox.drain() {
            match Envelope::decode(&bytes) {
                Ok(envelope) => self.handle(envelope),
                Err(e) => log::warn!("[task] process {}: bad envelope: {e}", self.id),
            }
        }
    }

    /// Close the mailbox. Valid once.
    pub fn delete(&mut self) -> Result<(), ProcessError> {
        if self.deleted || self.in_mailbox.close().is_err() {
            log::error!("[task] process {} deleted twice", self.id);
            return Err(ProcessError::AlreadyDeleted(self.id));
        }
        self.deleted = true;
        self.attached = None;
        log::debug!("[task] process {} deleted", self.id);
        Ok(())
    }

    fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Character(code) => {
                if let Some(ch) = char::from_u32(code).filter(|c| !c.is_control()) {
                    self.editor.handle(InputRequest::InsertChar(ch));
                    self.publish_command_line();
                }
            }
            Envelope::Key(k) => {
                if k.action == action::PRESS || k.action == action::REPEAT {
                    self.on_key(k.key);
                }
            }
            Envelope::VisualInfo(info) => {
                self.visual = Some(info);
                self.publish_command_line();
            }
            Envelope::TerminalIds(ids) => self.print_terminal_ids(&ids),
            Envelope::MousePos(_) | Envelope::MouseButton(_) | Envelope::MouseScroll(_) => {}
            other => {
                log::debug!(
                    "[task] process {}: ignoring envelope 0x{:04x}",
                    self.id,
                    other.type_tag()
                );
            }
        }
    }

    fn on_key(&mut self, code: u32) {
        let changed = match code {
            key::ENTER => {
                self.on_enter();
                return;
            }
            key::BACKSPACE => self.editor.handle(InputRequest::DeletePrevChar),
            key::DELETE => self.editor.handle(InputRequest::DeleteNextChar),
            key::LEFT => self.editor.handle(InputRequest::GoToPrevChar),
            key::RIGHT => self.editor.handle(InputRequest::GoToNextChar),
            key::HOME => self.editor.handle(InputRequest::GoToStart),
            key::END => self.editor.handle(InputRequest::GoToEnd),
            key::UP => self.editor.history_prev(),
            key::DOWN => self.editor.history_next(),
            _ => false,
        };
        if changed {
            self.publish_command_line();
        }
    }

    fn on_enter(&mut self) {
        let line = self.editor.submit();
        self.publish(&Envelope::Output(format!("{PROMPT}{line}\n").into_bytes()));

        if let Some(cmd) = TokenizedCommand::parse(&line) {
            self.run(cmd, &line);
        }
        self.publish_command_line();
    }

    fn run(&mut self, cmd: TokenizedCommand, line: &str) {
        match cmd.command.as_str() {
            "help" => {
                for text in HELP_TEXT {
                    self.print_line(text);
                }
            }
            "clear" => self.publish(&Envelope::ClearTerminal),
            "echo" => self.print_line(&cmd.args.join(" ")),
            name if HYPERVISOR_COMMANDS.contains(&name) => {
                self.publish(&Envelope::TokenizedCommand(cmd));
            }
            name => {
                if let Some(attached) = self.attached {
                    let forward = Envelope::CommandLine(CommandLine {
                        task_id: self.task_id.0,
                        command_line: line.to_string(),
                        cursor_offset: line.chars().count() as u32,
                    });
                    match self.broker.publish_to(attached.channel, &forward.encode()) {
                        Ok(0) => self.print_line("attached process is not accepting input"),
                        Ok(_) => {}
                        Err(e) => {
                            log::debug!("[task] process {}: attached process gone: {e}", self.id);
                            self.print_line("attached process is not accepting input");
                        }
                    }
                } else {
                    self.print_line(&format!("unknown command: {name} (try help)"));
                }
            }
        }
    }

    fn print_terminal_ids(&self, ids: &TerminalIds) {
        self.print_line("terminals:");
        for id in &ids.term_ids {
            let marker = if *id == ids.focused { " *" } else { "" };
            self.print_line(&format!("  {id}{marker}"));
        }
    }

    fn print_line(&self, text: &str) {
        self.publish(&Envelope::Output(format!("{text}\n").into_bytes()));
    }

    fn publish_command_line(&self) {
        let envelope = Envelope::CommandLine(CommandLine {
            task_id: self.task_id.0,
            command_line: format!("{PROMPT}{}", self.editor.text()),
            cursor_offset: (PROMPT.chars().count() + self.editor.cursor()) as u32,
        });
        self.publish(&envelope);
    }

    fn publish(&self, envelope: &Envelope) {
        let Some(channel) = self.out_channel else {
            log::debug!("[task] process {}: no output channel yet", self.id);
            return;
        };
        if let Err(e) = self.broker.publish_to(channel, &envelope.encode()) {
            log::debug!("[task] process {}: publish failed: {e}", self.id);
        }
    }
}

/// Encode a raw key press as the terminal would relay it.
pub fn key_press(code: u32) -> Envelope {
    Envelope::Key(msg::Key {
        key: code,
        scan: 0,
        action: action::PRESS,
        mods: 0,
    })
}
