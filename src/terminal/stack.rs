//! Terminal stack: the registry of all terminals.
//!
//! The stack owns every [`Terminal`], tracks which one is focused, and
//! places new terminals with a cascading layout. Spawning a terminal also
//! spawns its backing [`TaskProcess`] and wires the pair through the broker:
//!
//! ```text
//! TaskProcess ──publish──▶ terminal channel ──▶ Terminal mailbox
//! Terminal    ──publish──▶ process channel  ──▶ TaskProcess mailbox
//! ```
//!
//! Wiring is all-or-nothing: if any step fails the channels created so far
//! are removed and nothing is registered. Removal is the mirror image.
//!
//! # Focus
//!
//! Focus is `None` or the id of a registered terminal. Geometry requests
//! (move, resize) only ever act on the focused terminal.

// Rust guideline compliant 2026-02

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::broker::{ChannelId, ResourceId, ResourceType, SharedBroker};
use crate::geometry::{Rect, Vec2F};
use crate::ids::{IdAllocator, ProcessId, TerminalId, TerminalIdSource};
use crate::mailbox::{Delivery, MailboxConfig};
use crate::msg::{Envelope, TerminalIds, TokenizedCommand};
use crate::process::{Process, ProcessRegistry, TaskProcess};

use super::{ResizeMode, StackError, Terminal};

/// Default canvas half-extents (x is the 16:9 aspect).
pub const DEFAULT_CANVAS_EXTENTS: Vec2F = Vec2F::new(1.777, 1.0);

/// Cascading placement cursor for new terminals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackLayout {
    next_rect: Rect,
    next_depth: f32,
    next_offset: f32,
}

impl StackLayout {
    /// Layout for a canvas spanning `-extents..extents` on both axes.
    ///
    /// The first terminal covers the top-left quarter-and-a-half of the
    /// canvas; each later one is shifted right and down by a third of the
    /// canvas height.
    pub fn new(extents: Vec2F) -> Self {
        Self {
            next_rect: Rect::new(extents.y, extents.x / 2.0, -extents.y / 2.0, -extents.x),
            next_depth: 0.0,
            next_offset: extents.y / 3.0,
        }
    }

    /// Take the next placement and advance the cursor.
    pub fn next_placement(&mut self) -> (Rect, f32) {
        self.next_depth += self.next_offset / 10.0;
        let placement = (self.next_rect, self.next_depth);
        self.next_rect.translate(Vec2F::new(self.next_offset, -self.next_offset));
        placement
    }
}

impl Default for StackLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS_EXTENTS)
    }
}

/// All terminals, their focus, and their placement.
#[derive(Debug)]
pub struct TerminalStack {
    terms: BTreeMap<TerminalId, Terminal>,
    focused: Option<TerminalId>,
    layout: StackLayout,
    broker: SharedBroker,
    id_source: TerminalIdSource,
    mailbox_config: MailboxConfig,
}

impl TerminalStack {
    /// Create an empty stack.
    pub fn new(
        broker: SharedBroker,
        layout: StackLayout,
        id_source: TerminalIdSource,
        mailbox_config: MailboxConfig,
    ) -> Self {
        Self {
            terms: BTreeMap::new(),
            focused: None,
            layout,
            broker,
            id_source,
            mailbox_config,
        }
    }

    // ─── Lookup ────────────────────────────────────────────────────────────

    /// Number of terminals.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether no terminal exists.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terminal ids in ascending order.
    pub fn ids(&self) -> Vec<TerminalId> {
        self.terms.keys().copied().collect()
    }

    /// Look up a terminal.
    pub fn get(&self, id: TerminalId) -> Option<&Terminal> {
        self.terms.get(&id)
    }

    /// Look up a terminal mutably.
    pub fn get_mut(&mut self, id: TerminalId) -> Option<&mut Terminal> {
        self.terms.get_mut(&id)
    }

    /// Shared broker.
    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Mailbox configuration used for new terminals and tasks.
    pub fn mailbox_config(&self) -> MailboxConfig {
        self.mailbox_config
    }

    // ─── Spawn / remove ────────────────────────────────────────────────────

    /// Spawn a terminal with a fresh random id and focus it.
    ///
    /// A drawn id that is already in use is discarded and redrawn.
    pub fn add_terminal(
        &mut self,
        ids: &IdAllocator,
        processes: &mut ProcessRegistry,
        fixed_size: bool,
    ) -> Result<TerminalId, StackError> {
        let mut id = self.id_source.next_terminal_id();
        while self.terms.contains_key(&id) {
            log::warn!("[stack] terminal id {id} collided, drawing again");
            id = self.id_source.next_terminal_id();
        }
        self.add_terminal_with_id(id, ids, processes, fixed_size)
    }

    /// Spawn a terminal under `id` and focus it.
    pub fn add_terminal_with_id(
        &mut self,
        id: TerminalId,
        ids: &IdAllocator,
        processes: &mut ProcessRegistry,
        fixed_size: bool,
    ) -> Result<TerminalId, StackError> {
        if self.terms.contains_key(&id) {
            return Err(StackError::DuplicateTerminal(id));
        }

        let (bounds, depth) = self.layout.next_placement();
        let mut term = Terminal::new(
            id,
            bounds,
            depth,
            fixed_size,
            Arc::clone(&self.broker),
            self.mailbox_config,
        );
        let mut task = TaskProcess::new(
            ids.next_process_id(),
            ids.next_task_id(),
            Arc::clone(&self.broker),
            self.mailbox_config,
        );

        let (term_channel, proc_channel) = self.wire(&term, &task)?;
        task.set_out_channel(term_channel);
        term.attach(task.id(), term_channel, proc_channel);

        let pid = processes.add(Process::Task(task));
        self.terms.insert(id, term);
        self.focused = Some(id);
        log::info!(
            "[stack] spawned terminal {id} ({}) with task process {pid}",
            if fixed_size { "fixed" } else { "dynamic" }
        );
        Ok(id)
    }

    /// Create both channels and cross-subscribe the mailboxes. Rolls back on
    /// failure.
    fn wire(&self, term: &Terminal, task: &TaskProcess) -> Result<(ChannelId, ChannelId), StackError> {
        let term_res = ResourceId(term.id().0);
        let proc_res = ResourceId(task.id().0);

        let term_channel = self.broker.create_channel(
            term_res,
            ResourceType::Terminal,
            format!("viscript.pubsub.terminal-{}", term.id()),
        );
        let proc_channel = self.broker.create_channel(
            proc_res,
            ResourceType::Process,
            format!("viscript.pubsub.process-{}", task.id()),
        );

        let subscribed = self
            .broker
            .add_subscriber(
                term_channel,
                term_res,
                ResourceType::Terminal,
                term.in_mailbox().clone(),
            )
            .and_then(|()| {
                self.broker.add_subscriber(
                    proc_channel,
                    proc_res,
                    ResourceType::Process,
                    task.incoming_channel().clone(),
                )
            });

        if let Err(e) = subscribed {
            log::error!("[stack] wiring terminal {} failed: {e}", term.id());
            self.broker.remove_resource(term_res, ResourceType::Terminal);
            self.broker.remove_resource(proc_res, ResourceType::Process);
            return Err(StackError::Wiring(e));
        }
        Ok((term_channel, proc_channel))
    }

    /// Remove a terminal, delete its process, and drop both channels.
    ///
    /// When the focused terminal is removed, focus moves to the topmost
    /// remaining terminal.
    pub fn remove_terminal(
        &mut self,
        id: TerminalId,
        processes: &mut ProcessRegistry,
    ) -> Result<(), StackError> {
        let mut term = self.terms.remove(&id).ok_or(StackError::UnknownTerminal(id))?;

        if let Some(pid) = term.attached_process() {
            if let Err(e) = processes.delete_task(pid) {
                log::error!("[stack] deleting process {pid} of terminal {id}: {e}");
            }
            self.broker.remove_resource(ResourceId(pid.0), ResourceType::Process);
        }
        self.broker.remove_resource(ResourceId(id.0), ResourceType::Terminal);
        term.detach();

        if self.focused == Some(id) {
            self.focused = self.topmost(|_| true);
        }
        log::info!("[stack] removed terminal {id}");
        Ok(())
    }

    // ─── Focus ─────────────────────────────────────────────────────────────

    /// Focused terminal id.
    pub fn focused(&self) -> Option<TerminalId> {
        self.focused
    }

    /// Focused terminal.
    pub fn focused_terminal(&self) -> Option<&Terminal> {
        self.focused.and_then(|id| self.terms.get(&id))
    }

    /// Focus `id`. Unknown ids are rejected and focus is unchanged.
    pub fn set_focused(&mut self, id: TerminalId) -> Result<(), StackError> {
        if !self.terms.contains_key(&id) {
            return Err(StackError::UnknownTerminal(id));
        }
        self.focused = Some(id);
        Ok(())
    }

    /// Clear focus.
    pub fn defocus(&mut self) {
        self.focused = None;
    }

    /// Topmost terminal containing `point`, without changing focus.
    pub fn terminal_at(&self, point: Vec2F) -> Option<TerminalId> {
        self.topmost(|t| t.bounds().contains(point))
    }

    /// Focus the topmost terminal containing `point`, if any.
    pub fn focus_topmost_at(&mut self, point: Vec2F) -> Option<TerminalId> {
        let hit = self.terminal_at(point)?;
        self.focused = Some(hit);
        Some(hit)
    }

    fn topmost(&self, filter: impl Fn(&Terminal) -> bool) -> Option<TerminalId> {
        self.terms
            .values()
            .filter(|t| filter(t))
            .max_by(|a, b| a.depth().total_cmp(&b.depth()))
            .map(Terminal::id)
    }

    // ─── Input and tick ────────────────────────────────────────────────────

    /// Queue an encoded envelope on the focused terminal's mailbox.
    pub fn deliver_to_focused(&self, message: Vec<u8>) -> Result<Delivery, StackError> {
        let term = self.focused_terminal().ok_or(StackError::NoFocus)?;
        term.in_mailbox().send(message).map_err(StackError::Mailbox)
    }

    /// Tick every terminal and collect the commands their processes issued.
    pub fn tick(&mut self) -> Vec<(TerminalId, TokenizedCommand)> {
        let mut commands = Vec::new();
        for (id, term) in &mut self.terms {
            term.tick();
            commands.extend(term.take_pending_commands().into_iter().map(|c| (*id, c)));
        }
        commands
    }

    /// Current ids plus focus, as relayed for `list_terms`.
    pub fn terminal_ids(&self) -> TerminalIds {
        TerminalIds {
            focused: self.focused.map_or(0, |id| id.0),
            term_ids: self.terms.keys().map(|id| id.0).collect(),
        }
    }

    /// Process backing `id`.
    pub fn process_of(&self, id: TerminalId) -> Option<ProcessId> {
        self.terms.get(&id).and_then(Terminal::attached_process)
    }

    /// Print a line of feedback in terminal `id`. Unknown ids are ignored.
    pub fn print_feedback(&mut self, id: TerminalId, text: &str) {
        if let Some(term) = self.terms.get_mut(&id) {
            term.print_line(text);
        }
    }

    /// Relay `envelope` to the process behind terminal `id`.
    pub(crate) fn relay(&self, id: TerminalId, envelope: &Envelope) -> Result<(), StackError> {
        let term = self.terms.get(&id).ok_or(StackError::UnknownTerminal(id))?;
        term.relay_to_task(&envelope.encode());
        Ok(())
    }

    // ─── Geometry ──────────────────────────────────────────────────────────

    /// Translate the focused terminal.
    pub fn move_focused(&mut self, delta: Vec2F) -> Result<(), StackError> {
        self.focused_mut()?.move_by(delta);
        Ok(())
    }

    /// Move the focused terminal's right edge.
    pub fn resize_focused_right(&mut self, new_right: f32, mode: ResizeMode) -> Result<bool, StackError> {
        Ok(self.focused_resizable()?.resize_horizontally(new_right, mode))
    }

    /// Move the focused terminal's bottom edge.
    pub fn resize_focused_bottom(&mut self, new_bottom: f32, mode: ResizeMode) -> Result<bool, StackError> {
        Ok(self.focused_resizable()?.resize_vertically(new_bottom, mode))
    }

    fn focused_mut(&mut self) -> Result<&mut Terminal, StackError> {
        let id = self.focused.ok_or(StackError::NoFocus)?;
        self.terms.get_mut(&id).ok_or(StackError::UnknownTerminal(id))
    }

    fn focused_resizable(&mut self) -> Result<&mut Terminal, StackError> {
        let term = self.focused_mut()?;
        if term.is_fixed_size() {
            return Err(StackError::FixedSize(term.id()));
        }
        Ok(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;

    fn stack() -> (TerminalStack, IdAllocator, ProcessRegistry) {
        let stack = TerminalStack::new(
            Broker::shared(),
            StackLayout::default(),
            TerminalIdSource::seeded(42),
            MailboxConfig::default(),
        );
        (stack, IdAllocator::new(), ProcessRegistry::new())
    }

    #[test]
    fn test_layout_cascades_right_down_and_up_the_stack() {
        let mut layout = StackLayout::new(Vec2F::new(1.5, 0.9));
        let (first, d1) = layout.next_placement();
        let (second, d2) = layout.next_placement();
        assert_eq!(first, Rect::new(0.9, 0.75, -0.45, -1.5));
        assert!((second.left - (first.left + 0.3)).abs() < 1e-6);
        assert!((second.top - (first.top - 0.3)).abs() < 1e-6);
        assert!((second.width() - first.width()).abs() < 1e-6);
        assert!(d2 > d1);
        assert!(d1 > 0.0);
    }

    #[test]
    fn test_spawn_wires_both_channels_and_focuses() {
        let (mut stack, ids, mut procs) = stack();
        let id = stack.add_terminal(&ids, &mut procs, false).unwrap();

        assert_eq!(stack.focused(), Some(id));
        assert_eq!(stack.broker().channel_count(), 2);
        assert_eq!(procs.len(), 1);

        let term = stack.get(id).unwrap();
        let pid = term.attached_process().unwrap();
        let in_ch = term.in_channel().unwrap();
        let out_ch = term.out_channel().unwrap();
        assert_eq!(
            stack.broker().channel_owner(in_ch),
            Some((ResourceId(id.0), ResourceType::Terminal))
        );
        assert_eq!(
            stack.broker().channel_owner(out_ch),
            Some((ResourceId(pid.0), ResourceType::Process))
        );
        assert_eq!(stack.broker().subscriber_count(in_ch), Some(1));
        assert_eq!(stack.broker().subscriber_count(out_ch), Some(1));
        assert_eq!(
            stack.broker().channel_name(in_ch).unwrap(),
            format!("viscript.pubsub.terminal-{id}")
        );
    }

    #[test]
    fn test_typed_input_round_trips_through_task() {
        let (mut stack, ids, mut procs) = stack();
        let id = stack.add_terminal(&ids, &mut procs, false).unwrap();

        for ch in "hey".chars() {
            stack.deliver_to_focused(Envelope::Character(ch as u32).encode()).unwrap();
        }
        stack.tick(); // terminal relays to task
        procs.tick_all(); // task publishes command line
        stack.tick(); // terminal draws it

        let term = stack.get(id).unwrap();
        assert_eq!(term.row_text(0), ">hey");
        assert_eq!(term.cursor().x, 4);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (mut stack, ids, mut procs) = stack();
        stack.add_terminal_with_id(TerminalId(5), &ids, &mut procs, false).unwrap();
        assert_eq!(
            stack.add_terminal_with_id(TerminalId(5), &ids, &mut procs, false),
            Err(StackError::DuplicateTerminal(TerminalId(5)))
        );
        assert_eq!(stack.len(), 1);
        assert_eq!(procs.len(), 1);
    }

    #[test]
    fn test_remove_tears_down_channels_and_process() {
        let (mut stack, ids, mut procs) = stack();
        let a = stack.add_terminal_with_id(TerminalId(1), &ids, &mut procs, false).unwrap();
        let b = stack.add_terminal_with_id(TerminalId(2), &ids, &mut procs, true).unwrap();
        let inbox = procs.get(stack.process_of(b).unwrap()).unwrap().incoming_channel().clone();

        stack.remove_terminal(b, &mut procs).unwrap();
        assert!(inbox.is_closed());
        assert_eq!(procs.len(), 1);
        assert_eq!(stack.broker().channel_count(), 2);
        assert_eq!(stack.focused(), Some(a));

        stack.remove_terminal(a, &mut procs).unwrap();
        assert_eq!(stack.broker().channel_count(), 0);
        assert!(procs.is_empty());
        assert_eq!(stack.focused(), None);
        assert_eq!(
            stack.remove_terminal(a, &mut procs),
            Err(StackError::UnknownTerminal(a))
        );
    }

    #[test]
    fn test_focus_rules() {
        let (mut stack, ids, mut procs) = stack();
        let a = stack.add_terminal_with_id(TerminalId(1), &ids, &mut procs, false).unwrap();
        let b = stack.add_terminal_with_id(TerminalId(2), &ids, &mut procs, false).unwrap();
        assert_eq!(stack.focused(), Some(b));

        assert_eq!(
            stack.set_focused(TerminalId(77)),
            Err(StackError::UnknownTerminal(TerminalId(77)))
        );
        assert_eq!(stack.focused(), Some(b));

        stack.set_focused(a).unwrap();
        assert_eq!(stack.focused(), Some(a));
        stack.defocus();
        assert_eq!(stack.focused(), None);
        assert_eq!(stack.move_focused(Vec2F::new(0.1, 0.0)), Err(StackError::NoFocus));
    }

    #[test]
    fn test_focus_topmost_at_prefers_deepest() {
        let (mut stack, ids, mut procs) = stack();
        let a = stack.add_terminal_with_id(TerminalId(1), &ids, &mut procs, false).unwrap();
        let b = stack.add_terminal_with_id(TerminalId(2), &ids, &mut procs, false).unwrap();
        stack.defocus();

        // Inside both: the later terminal is on top.
        let overlap = Vec2F::new(0.0, 0.0);
        assert_eq!(stack.focus_topmost_at(overlap), Some(b));

        // Top-left corner belongs to the first terminal only.
        let bounds = stack.get(a).unwrap().bounds();
        let corner = Vec2F::new(bounds.left + 0.01, bounds.top - 0.01);
        assert_eq!(stack.focus_topmost_at(corner), Some(a));

        assert_eq!(stack.focus_topmost_at(Vec2F::new(50.0, 50.0)), None);
        assert_eq!(stack.focused(), Some(a));
    }

    #[test]
    fn test_geometry_acts_on_focused_only() {
        let (mut stack, ids, mut procs) = stack();
        let a = stack.add_terminal_with_id(TerminalId(1), &ids, &mut procs, false).unwrap();
        let b = stack.add_terminal_with_id(TerminalId(2), &ids, &mut procs, false).unwrap();
        let a_before = stack.get(a).unwrap().bounds();
        let b_before = stack.get(b).unwrap().bounds();

        stack.move_focused(Vec2F::new(0.1, -0.2)).unwrap();
        assert_eq!(stack.get(a).unwrap().bounds(), a_before);
        let moved = stack.get(b).unwrap().bounds();
        assert!((moved.left - (b_before.left + 0.1)).abs() < 1e-6);
        assert!((moved.top - (b_before.top - 0.2)).abs() < 1e-6);

        let cols = stack.get(b).unwrap().grid_size().x;
        let cell = stack.get(b).unwrap().char_size().x;
        assert!(stack
            .resize_focused_right(moved.right + cell, ResizeMode::Discrete)
            .unwrap());
        assert_eq!(stack.get(b).unwrap().grid_size().x, cols + 1);
    }

    #[test]
    fn test_fixed_size_terminal_refuses_resize() {
        let (mut stack, ids, mut procs) = stack();
        let id = stack.add_terminal_with_id(TerminalId(3), &ids, &mut procs, true).unwrap();
        assert_eq!(
            stack.resize_focused_bottom(-5.0, ResizeMode::Discrete),
            Err(StackError::FixedSize(id))
        );
        assert!(stack.move_focused(Vec2F::new(0.1, 0.1)).is_ok());
    }

    #[test]
    fn test_removing_process_side_leaves_no_orphans() {
        let broker = Broker::shared();
        let mut stack = TerminalStack::new(
            Arc::clone(&broker),
            StackLayout::default(),
            TerminalIdSource::seeded(1),
            MailboxConfig::default(),
        );
        let ids = IdAllocator::new();
        let mut procs = ProcessRegistry::new();
        for _ in 0..4 {
            stack.add_terminal(&ids, &mut procs, false).unwrap();
        }
        assert_eq!(broker.channel_count(), 8);
        for id in stack.ids() {
            stack.remove_terminal(id, &mut procs).unwrap();
        }
        assert_eq!(broker.channel_count(), 0);
        assert!(procs.is_empty());
    }
}
