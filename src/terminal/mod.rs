//! Character-grid terminal.
//!
//! A terminal owns a `rows × columns` grid of Unicode scalar values (0 is an
//! empty cell) and two positions on it:
//!
//! - `curr`, the insertion cursor where flowing output is placed,
//! - `cursor`, the display cursor shown inside the command line.
//!
//! The bottom [`PROMPT_LINES`] rows are reserved for the command line. When
//! flowing output would move `curr` into that region the whole grid scrolls
//! up one row instead and `curr` stays pinned on the first reserved row.
//!
//! # Geometry
//!
//! `bounds` is in y-up canvas space. The cell size always satisfies
//! `char_size * grid_size == bounds_size - 2 * border_size` on each axis.
//! Resizing moves the right or bottom edge:
//!
//! - *discrete* (default): the edge walks one cell at a time, adding or
//!   removing a column/row per whole cell crossed. Any dimension change
//!   reallocates an empty grid.
//! - *precise*: the edge lands exactly where requested and the grid keeps
//!   its dimensions; only the cell size changes.
//!
//! Every geometry change is reported to the attached process as
//! [`Envelope::VisualInfo`].

// Rust guideline compliant 2026-02

pub mod commands;
pub mod stack;

pub use commands::StackError;
pub use stack::{StackLayout, TerminalStack};

use crate::broker::{ChannelId, SharedBroker};
use crate::geometry::{Rect, Vec2F, Vec2I};
use crate::ids::{ProcessId, TerminalId};
use crate::mailbox::{Mailbox, MailboxConfig};
use crate::msg::{CommandLine, Envelope, ProcessExited, TokenizedCommand, VisualInfo};

/// Columns of a new terminal.
pub const DEFAULT_COLUMNS: i32 = 64;
/// Rows of a new terminal.
pub const DEFAULT_ROWS: i32 = 32;
/// Rows reserved at the bottom for the command line.
pub const PROMPT_LINES: i32 = 2;
/// Border thickness in canvas units.
pub const BORDER_SIZE: f32 = 0.013;
/// Upper bound on either grid dimension.
pub const MAX_GRID_DIMENSION: i32 = 4096;

/// Fraction of a cell an edge may fall short and still count as crossed.
const STEP_TOLERANCE: f32 = 1e-3;

/// Resize edge movement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Walk the edge in whole cells, changing the grid dimension.
    Discrete,
    /// Place the edge exactly, keeping the grid dimension.
    Precise,
}

/// A character-grid terminal surface.
#[derive(Debug)]
pub struct Terminal {
    id: TerminalId,
    grid: Vec<Vec<u32>>,
    grid_size: Vec2I,
    curr: Vec2I,
    cursor: Vec2I,
    bounds: Rect,
    border_size: f32,
    char_size: Vec2F,
    depth: f32,
    fixed_size: bool,

    broker: SharedBroker,
    in_mailbox: Mailbox,
    /// Channel the attached process publishes to (this terminal subscribes).
    in_channel: Option<ChannelId>,
    /// Channel this terminal relays to the attached process on.
    out_channel: Option<ChannelId>,
    attached_process: Option<ProcessId>,

    /// Last command line drawn, redrawn after flowing output.
    command_line: Option<(String, u32)>,
    pending_commands: Vec<TokenizedCommand>,
    oob_writes: u64,
}

impl Terminal {
    /// Create a terminal with the default grid and the initial prompt.
    pub fn new(
        id: TerminalId,
        bounds: Rect,
        depth: f32,
        fixed_size: bool,
        broker: SharedBroker,
        mailbox_config: MailboxConfig,
    ) -> Self {
        let mut term = Self {
            id,
            grid: Vec::new(),
            grid_size: Vec2I::new(DEFAULT_COLUMNS, DEFAULT_ROWS),
            curr: Vec2I::default(),
            cursor: Vec2I::default(),
            bounds,
            border_size: BORDER_SIZE,
            char_size: Vec2F::default(),
            depth,
            fixed_size,
            broker,
            in_mailbox: Mailbox::new(mailbox_config),
            in_channel: None,
            out_channel: None,
            attached_process: None,
            command_line: None,
            pending_commands: Vec::new(),
            oob_writes: 0,
        };
        term.resize_grid();
        term.set_string_at(0, 0, ">");
        term.set_cursor(1, 0);
        term
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    /// Terminal id.
    pub fn id(&self) -> TerminalId {
        self.id
    }

    /// Grid dimensions (`x` columns, `y` rows).
    pub fn grid_size(&self) -> Vec2I {
        self.grid_size
    }

    /// Insertion cursor.
    pub fn curr(&self) -> Vec2I {
        self.curr
    }

    /// Display cursor.
    pub fn cursor(&self) -> Vec2I {
        self.cursor
    }

    /// Geometric bounds.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Border thickness.
    pub fn border_size(&self) -> f32 {
        self.border_size
    }

    /// Size of one character cell.
    pub fn char_size(&self) -> Vec2F {
        self.char_size
    }

    /// Stacking depth (higher is on top).
    pub fn depth(&self) -> f32 {
        self.depth
    }

    /// Whether resizing is disallowed.
    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size
    }

    /// Inbound mailbox.
    pub fn in_mailbox(&self) -> &Mailbox {
        &self.in_mailbox
    }

    /// Channel the attached process publishes to.
    pub fn in_channel(&self) -> Option<ChannelId> {
        self.in_channel
    }

    /// Channel used to relay to the attached process.
    pub fn out_channel(&self) -> Option<ChannelId> {
        self.out_channel
    }

    /// Attached process.
    pub fn attached_process(&self) -> Option<ProcessId> {
        self.attached_process
    }

    /// Number of rejected out-of-grid placements so far.
    pub fn out_of_bounds_writes(&self) -> u64 {
        self.oob_writes
    }

    /// Cell contents, `None` outside the grid.
    pub fn char_at(&self, x: i32, y: i32) -> Option<u32> {
        if !self.in_grid(x, y) {
            return None;
        }
        Some(self.grid[y as usize][x as usize])
    }

    /// Row as text, empty cells as spaces, trailing blanks trimmed.
    pub fn row_text(&self, y: i32) -> String {
        if y < 0 || y >= self.grid_size.y {
            return String::new();
        }
        let text: String = self.grid[y as usize]
            .iter()
            .map(|&c| if c == 0 { ' ' } else { char::from_u32(c).unwrap_or('?') })
            .collect();
        text.trim_end().to_string()
    }

    /// Whole grid as text, one line per row.
    pub fn screen_text(&self) -> String {
        (0..self.grid_size.y)
            .map(|y| self.row_text(y))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Geometry summary as sent to the attached process.
    pub fn visual_info(&self) -> VisualInfo {
        VisualInfo {
            num_columns: self.grid_size.x as u32,
            num_rows: self.grid_size.y as u32,
            prompt_lines: PROMPT_LINES as u32,
            curr_row: self.curr.y as u32,
        }
    }

    // ─── Wiring ────────────────────────────────────────────────────────────

    /// Record the broker wiring and announce the geometry to the process.
    pub fn attach(&mut self, process: ProcessId, in_channel: ChannelId, out_channel: ChannelId) {
        self.attached_process = Some(process);
        self.in_channel = Some(in_channel);
        self.out_channel = Some(out_channel);
        self.set_size();
    }

    /// Forget the wiring and close the inbound mailbox.
    pub fn detach(&mut self) {
        self.attached_process = None;
        self.in_channel = None;
        self.out_channel = None;
        if let Err(e) = self.in_mailbox.close() {
            log::warn!("[terminal] {}: detaching: {e}", self.id);
        }
    }

    /// Publish `message` to the attached process.
    pub fn relay_to_task(&self, message: &[u8]) {
        let Some(channel) = self.out_channel else {
            log::debug!("[terminal] {}: no process wired, relay dropped", self.id);
            return;
        };
        if let Err(e) = self.broker.publish_to(channel, message) {
            log::debug!("[terminal] {}: relay failed: {e}", self.id);
        }
    }

    /// Commands received from the process since the last call.
    pub fn take_pending_commands(&mut self) -> Vec<TokenizedCommand> {
        std::mem::take(&mut self.pending_commands)
    }

    // ─── Tick ──────────────────────────────────────────────────────────────

    /// Apply every envelope queued at call time.
    pub fn tick(&mut self) {
        for bytes in self.in_mailbox.drain() {
            self.unpack_message(&bytes);
        }
    }

    /// Apply one encoded envelope.
    pub fn unpack_message(&mut self, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[terminal] {}: bad envelope: {e}", self.id);
                return;
            }
        };

        match envelope {
            e if e.is_input() => self.relay_to_task(bytes),
            Envelope::TerminalIds(_) => self.relay_to_task(bytes),
            Envelope::CommandLine(CommandLine {
                command_line,
                cursor_offset,
                ..
            }) => {
                self.update_command_line(&command_line, cursor_offset);
                self.command_line = Some((command_line, cursor_offset));
            }
            Envelope::PutChar(ch) => self.put_character(ch),
            Envelope::SetCharAt(s) => {
                self.set_character_at(s.x as i32, s.y as i32, s.ch);
            }
            Envelope::ClearTerminal => self.clear(),
            Envelope::Output(data) => {
                self.write_output(&String::from_utf8_lossy(&data));
                self.redraw_command_line();
            }
            Envelope::TokenizedCommand(cmd) => self.pending_commands.push(cmd),
            Envelope::ProcessExited(ProcessExited {
                process_id,
                exit_code,
            }) => {
                let status = exit_code.map_or_else(|| "unknown status".to_string(), |c| format!("code {c}"));
                self.print_line(&format!("[process {process_id} exited with {status}]"));
            }
            other => {
                log::debug!(
                    "[terminal] {}: ignoring envelope 0x{:04x}",
                    self.id,
                    other.type_tag()
                );
            }
        }
    }

    // ─── Content ───────────────────────────────────────────────────────────

    /// Place `ch` at the insertion cursor and advance.
    pub fn put_character(&mut self, ch: u32) {
        if self.pos_is_valid(self.curr.x, self.curr.y) {
            self.grid[self.curr.y as usize][self.curr.x as usize] = ch;
            self.move_right();
        }
    }

    /// Place every character of `s` through [`Terminal::put_character`].
    pub fn put_string(&mut self, s: &str) {
        for ch in s.chars() {
            self.put_character(ch as u32);
        }
    }

    /// Advance the insertion cursor, wrapping to a new line at the edge.
    pub fn move_right(&mut self) {
        self.curr.x += 1;
        if self.curr.x >= self.grid_size.x {
            self.new_line();
        }
    }

    /// Move the insertion cursor to the start of the next row, scrolling
    /// when that row belongs to the prompt region.
    pub fn new_line(&mut self) {
        self.curr.x = 0;
        self.curr.y += 1;

        let pinned = (self.grid_size.y - PROMPT_LINES).max(0);
        if self.curr.y > pinned {
            self.curr.y = pinned;
            self.grid.remove(0);
            self.grid.push(vec![0; self.grid_size.x as usize]);
        }
    }

    /// Place `ch` at `(x, y)` without moving the insertion cursor.
    ///
    /// Returns `false` (and changes nothing) outside the grid.
    pub fn set_character_at(&mut self, x: i32, y: i32, ch: u32) -> bool {
        if !self.pos_is_valid(x, y) {
            return false;
        }
        self.grid[y as usize][x as usize] = ch;
        true
    }

    /// Place `s` left to right from `(x, y)` without moving the insertion
    /// cursor. Characters falling outside the grid are rejected.
    ///
    /// Returns how many characters were placed.
    pub fn set_string_at(&mut self, x: i32, y: i32, s: &str) -> usize {
        let mut placed = 0;
        for (i, ch) in s.chars().enumerate() {
            if self.set_character_at(x + i as i32, y, ch as u32) {
                placed += 1;
            }
        }
        placed
    }

    /// Move the display cursor. Rejected outside the grid.
    pub fn set_cursor(&mut self, x: i32, y: i32) -> bool {
        if !self.pos_is_valid(x, y) {
            return false;
        }
        self.cursor = Vec2I::new(x, y);
        true
    }

    /// Empty every cell and home both cursors.
    pub fn clear(&mut self) {
        for row in &mut self.grid {
            row.fill(0);
        }
        self.curr = Vec2I::default();
        self.cursor = Vec2I::default();
    }

    /// Flow `text` into the grid at the insertion cursor.
    ///
    /// `\n` blanks the rest of the row and starts a new line, `\r` returns
    /// to column 0, and other control characters are dropped.
    pub fn write_output(&mut self, text: &str) {
        for ch in text.chars() {
            match ch {
                '\n' => {
                    let y = self.curr.y as usize;
                    let x = self.curr.x.clamp(0, self.grid_size.x) as usize;
                    self.grid[y][x..].fill(0);
                    self.new_line();
                }
                '\r' => self.curr.x = 0,
                c if c.is_control() => {}
                c => self.put_character(c as u32),
            }
        }
    }

    /// Write a full line of feedback and restore the command line below it.
    pub fn print_line(&mut self, text: &str) {
        if self.curr.x != 0 {
            self.write_output("\n");
        }
        self.write_output(text);
        self.write_output("\n");
        self.redraw_command_line();
    }

    /// Rewrite the two command-line rows starting at the insertion row and
    /// place the display cursor at `cursor_offset`.
    pub fn update_command_line(&mut self, line: &str, cursor_offset: u32) {
        let cols = self.grid_size.x;
        let chars: Vec<char> = line.chars().collect();
        for i in 0..cols * PROMPT_LINES {
            let x = i % cols;
            let y = self.curr.y + i / cols;
            if i as u32 == cursor_offset {
                self.set_cursor(x, y);
            }
            let ch = chars.get(i as usize).map_or(0, |&c| c as u32);
            self.set_character_at(x, y, ch);
        }
    }

    fn redraw_command_line(&mut self) {
        if self.curr.x != 0 {
            return;
        }
        if let Some((line, offset)) = self.command_line.clone() {
            self.update_command_line(&line, offset);
        }
    }

    // ─── Geometry ──────────────────────────────────────────────────────────

    /// Translate the bounds.
    pub fn move_by(&mut self, delta: Vec2F) {
        self.bounds.translate(delta);
    }

    /// Move the right edge towards `new_right`. Returns whether anything changed.
    pub fn resize_horizontally(&mut self, new_right: f32, mode: ResizeMode) -> bool {
        let cell = self.char_size.x;
        match mode {
            ResizeMode::Precise => {
                if new_right - self.bounds.left <= 2.0 * self.border_size {
                    return false;
                }
                self.bounds.right = new_right;
                self.set_size();
                true
            }
            ResizeMode::Discrete => {
                if cell <= 0.0 {
                    return false;
                }
                let tolerance = cell * STEP_TOLERANCE;
                let mut right = self.bounds.right;
                let mut cols = self.grid_size.x;
                while new_right - right >= cell - tolerance && cols < MAX_GRID_DIMENSION {
                    right += cell;
                    cols += 1;
                }
                while right - new_right >= cell - tolerance && cols > 1 {
                    right -= cell;
                    cols -= 1;
                }
                if cols == self.grid_size.x {
                    return false;
                }
                self.bounds.right = right;
                self.grid_size.x = cols;
                self.resize_grid();
                true
            }
        }
    }

    /// Move the bottom edge towards `new_bottom`. Returns whether anything
    /// changed. Lowering the edge (smaller y) adds rows.
    pub fn resize_vertically(&mut self, new_bottom: f32, mode: ResizeMode) -> bool {
        let cell = self.char_size.y;
        match mode {
            ResizeMode::Precise => {
                if self.bounds.top - new_bottom <= 2.0 * self.border_size {
                    return false;
                }
                self.bounds.bottom = new_bottom;
                self.set_size();
                true
            }
            ResizeMode::Discrete => {
                if cell <= 0.0 {
                    return false;
                }
                let tolerance = cell * STEP_TOLERANCE;
                let mut bottom = self.bounds.bottom;
                let mut rows = self.grid_size.y;
                while bottom - new_bottom >= cell - tolerance && rows < MAX_GRID_DIMENSION {
                    bottom -= cell;
                    rows += 1;
                }
                while new_bottom - bottom >= cell - tolerance && rows > 1 {
                    bottom += cell;
                    rows -= 1;
                }
                if rows == self.grid_size.y {
                    return false;
                }
                self.bounds.bottom = bottom;
                self.grid_size.y = rows;
                self.resize_grid();
                true
            }
        }
    }

    /// Recompute the cell size and report the geometry to the process.
    pub fn set_size(&mut self) {
        self.char_size = Vec2F::new(
            (self.bounds.width() - self.border_size * 2.0) / self.grid_size.x as f32,
            (self.bounds.height() - self.border_size * 2.0) / self.grid_size.y as f32,
        );
        if self.out_channel.is_some() {
            self.relay_to_task(&Envelope::VisualInfo(self.visual_info()).encode());
        }
    }

    /// Reallocate an empty grid at the current dimensions.
    fn resize_grid(&mut self) {
        self.grid_size.x = self.grid_size.x.max(1);
        self.grid_size.y = self.grid_size.y.max(1);
        self.grid = vec![vec![0; self.grid_size.x as usize]; self.grid_size.y as usize];
        self.curr = Vec2I::default();
        self.cursor = Vec2I::default();
        self.set_size();
    }

    fn in_grid(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.grid_size.x && y >= 0 && y < self.grid_size.y
    }

    fn pos_is_valid(&mut self, x: i32, y: i32) -> bool {
        if self.in_grid(x, y) {
            return true;
        }
        self.oob_writes += 1;
        if self.oob_writes == 1 {
            log::warn!(
                "[terminal] {}: out-of-grid placement at ({x}, {y}) on {}x{} grid (further ones counted silently)",
                self.id,
                self.grid_size.x,
                self.grid_size.y
            );
        }
        false
    }
}
