//! User commands executed by the terminal stack.
//!
//! Task processes publish these as [`TokenizedCommand`] envelopes; the
//! terminal that received one hands it to [`TerminalStack::on_user_command`].
//! Commands that name a terminal take a prefix of its decimal id. Every
//! failure is reported as a line of feedback in the requesting terminal.

// Rust guideline compliant 2026-02

use thiserror::Error;

use crate::broker::BrokerError;
use crate::ids::{IdAllocator, TerminalId};
use crate::mailbox::MailboxError;
use crate::msg::{Envelope, TokenizedCommand};
use crate::process::{ProcessError, ProcessRegistry};

use super::TerminalStack;

/// Terminal stack addressing and policy errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// No terminal with this id.
    #[error("no terminal {0}")]
    UnknownTerminal(TerminalId),
    /// A terminal with this id already exists.
    #[error("terminal {0} already exists")]
    DuplicateTerminal(TerminalId),
    /// No terminal id starts with the prefix.
    #[error("no terminal matches '{0}'")]
    NoMatch(String),
    /// More than one terminal id starts with the prefix.
    #[error("'{prefix}' matches {candidates} terminals, type more digits")]
    Ambiguous {
        /// Prefix as typed.
        prefix: String,
        /// Number of matching ids.
        candidates: usize,
    },
    /// Closing would leave no terminal.
    #[error("cannot close the last terminal")]
    LastTerminal,
    /// The command needs an argument.
    #[error("missing terminal id")]
    MissingArgument(&'static str),
    /// The terminal cannot be resized.
    #[error("terminal {0} has a fixed size")]
    FixedSize(TerminalId),
    /// No terminal has focus.
    #[error("no terminal has focus")]
    NoFocus,
    /// The stack does not execute this command.
    #[error("unhandled command: {0}")]
    UnhandledCommand(String),
    /// Broker wiring failed.
    #[error("wiring failed: {0}")]
    Wiring(#[from] BrokerError),
    /// Delivery into a terminal mailbox failed.
    #[error("delivery failed: {0}")]
    Mailbox(#[from] MailboxError),
    /// Process teardown failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Resolve a decimal id prefix against `ids`.
///
/// The prefix must start exactly one id. A complete id that also starts a
/// longer id is ambiguous.
pub fn match_prefix<I>(ids: I, prefix: &str) -> Result<TerminalId, StackError>
where
    I: IntoIterator<Item = TerminalId>,
{
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StackError::NoMatch(prefix.to_string()));
    }

    let mut candidates = Vec::new();
    for id in ids {
        if id.to_string().starts_with(prefix) {
            candidates.push(id);
        }
    }

    match candidates.as_slice() {
        [] => Err(StackError::NoMatch(prefix.to_string())),
        [id] => Ok(*id),
        _ => Err(StackError::Ambiguous {
            prefix: prefix.to_string(),
            candidates: candidates.len(),
        }),
    }
}

impl TerminalStack {
    /// Execute `cmd` on behalf of terminal `receiver`, printing any error
    /// there.
    pub fn on_user_command(
        &mut self,
        receiver: TerminalId,
        cmd: &TokenizedCommand,
        ids: &IdAllocator,
        processes: &mut ProcessRegistry,
    ) -> Result<(), StackError> {
        let result = self.execute(receiver, cmd, ids, processes);
        if let Err(e) = &result {
            log::debug!("[stack] {} from terminal {receiver}: {e}", cmd.command);
            self.print_feedback(receiver, &format!("{}: {e}", cmd.command));
        }
        result
    }

    fn execute(
        &mut self,
        receiver: TerminalId,
        cmd: &TokenizedCommand,
        ids: &IdAllocator,
        processes: &mut ProcessRegistry,
    ) -> Result<(), StackError> {
        match cmd.command.as_str() {
            "close_term" => {
                let prefix = cmd.args.first().ok_or(StackError::MissingArgument("close_term"))?;
                let id = match_prefix(self.ids(), prefix)?;
                if self.len() < 2 {
                    return Err(StackError::LastTerminal);
                }
                self.remove_terminal(id, processes)?;
                self.print_feedback(receiver, &format!("closed terminal {id}"));
            }
            "focus" => {
                let prefix = cmd.args.first().ok_or(StackError::MissingArgument("focus"))?;
                let id = match_prefix(self.ids(), prefix)?;
                self.set_focused(id)?;
                self.print_feedback(receiver, &format!("focused terminal {id}"));
            }
            "defocus" => self.defocus(),
            "list_terms" => {
                let target = self.focused().unwrap_or(receiver);
                self.relay(target, &Envelope::TerminalIds(self.terminal_ids()))?;
            }
            "new_term" => {
                let id = self.add_terminal(ids, processes, true)?;
                self.print_feedback(receiver, &format!("opened terminal {id}"));
            }
            other => return Err(StackError::UnhandledCommand(other.to_string())),
        }
        Ok(())
    }
}
