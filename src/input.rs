//! Pointer handling: focus, move and resize gestures, cursor glyphs.
//!
//! The windowing collaborator reports pointer positions in canvas space and
//! button transitions. A left press focuses the topmost terminal under the
//! pointer and picks a gesture from where the press landed:
//!
//! | Press position                        | Gesture        |
//! |---------------------------------------|----------------|
//! | near the right and bottom edges       | `ResizingBoth` |
//! | near the right edge                   | `ResizingX`    |
//! | near the bottom edge                  | `ResizingY`    |
//! | inside the terminal                   | `Moving`       |
//!
//! Resize gestures are only offered for terminals that are not fixed-size.
//! Holding Control at press time makes the resize precise. While no gesture
//! is active, pointer motion only updates the cursor glyph.

// Rust guideline compliant 2026-02

use crate::geometry::{Rect, Vec2F};
use crate::msg::{action, modifier, mouse_button, MouseButton, MousePos};
use crate::terminal::{ResizeMode, Terminal, TerminalStack};

/// Default distance within which the pointer counts as "on" an edge.
pub const DEFAULT_NEAR_THRESHOLD: f32 = 0.05;

/// Cursor shapes the windowing layer can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorGlyph {
    /// Default pointer.
    Arrow,
    /// Over a terminal's interior.
    Hand,
    /// On a right edge.
    HorizontalResize,
    /// On a bottom edge.
    VerticalResize,
    /// On the bottom-right corner.
    CornerResize,
}

/// Requests from the hypervisor to the windowing layer.
pub trait Windowing {
    /// Show `glyph` as the pointer cursor.
    fn set_cursor_glyph(&mut self, glyph: CursorGlyph);
}

/// Windowing layer that ignores every request (headless runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Windowing for Headless {
    fn set_cursor_glyph(&mut self, _glyph: CursorGlyph) {}
}

/// Gesture in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalModification {
    /// No button held.
    #[default]
    None,
    /// Dragging the focused terminal.
    Moving,
    /// Dragging the right edge.
    ResizingX,
    /// Dragging the bottom edge.
    ResizingY,
    /// Dragging the bottom-right corner.
    ResizingBoth,
}

/// Pointer state machine.
#[derive(Debug)]
pub struct Pointer {
    position: Vec2F,
    near_threshold: f32,
    modification: TerminalModification,
    mode: ResizeMode,
    glyph: Option<CursorGlyph>,
}

impl Default for Pointer {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_THRESHOLD)
    }
}

impl Pointer {
    /// Pointer with the given edge nearness threshold.
    pub fn new(near_threshold: f32) -> Self {
        Self {
            position: Vec2F::default(),
            near_threshold: near_threshold.abs(),
            modification: TerminalModification::None,
            mode: ResizeMode::Discrete,
            glyph: None,
        }
    }

    /// Last reported position.
    pub fn position(&self) -> Vec2F {
        self.position
    }

    /// Gesture in progress.
    pub fn modification(&self) -> TerminalModification {
        self.modification
    }

    /// Resize mode chosen at the last press.
    pub fn resize_mode(&self) -> ResizeMode {
        self.mode
    }

    /// Track motion and continue the active gesture.
    pub fn on_mouse_pos(&mut self, pos: &MousePos, stack: &mut TerminalStack, windowing: &mut dyn Windowing) {
        let point = Vec2F::new(pos.x as f32, pos.y as f32);
        let delta = point - self.position;
        self.position = point;

        let result = match self.modification {
            TerminalModification::None => {
                self.refresh_glyph(stack, windowing);
                return;
            }
            TerminalModification::Moving => stack.move_focused(delta),
            TerminalModification::ResizingX => stack.resize_focused_right(point.x, self.mode).map(drop),
            TerminalModification::ResizingY => stack.resize_focused_bottom(point.y, self.mode).map(drop),
            TerminalModification::ResizingBoth => stack
                .resize_focused_right(point.x, self.mode)
                .and_then(|_| stack.resize_focused_bottom(point.y, self.mode))
                .map(drop),
        };
        if let Err(e) = result {
            log::debug!("[pointer] {:?} dropped: {e}", self.modification);
            self.modification = TerminalModification::None;
        }
    }

    /// Start or end a gesture.
    pub fn on_mouse_button(&mut self, button: &MouseButton, stack: &mut TerminalStack, windowing: &mut dyn Windowing) {
        if button.button != mouse_button::LEFT {
            return;
        }
        match button.action {
            action::PRESS => {
                self.mode = if button.mods & modifier::CONTROL == 0 {
                    ResizeMode::Discrete
                } else {
                    ResizeMode::Precise
                };
                stack.focus_topmost_at(self.position);
                self.modification = stack
                    .focused_terminal()
                    .map_or(TerminalModification::None, |t| self.zone(t));
                log::debug!("[pointer] press at {:?}: {:?}", self.position, self.modification);
            }
            action::RELEASE => {
                self.modification = TerminalModification::None;
                self.refresh_glyph(stack, windowing);
            }
            _ => {}
        }
    }

    fn zone(&self, term: &Terminal) -> TerminalModification {
        let bounds = term.bounds();
        if !term.is_fixed_size() {
            match (self.near_right(&bounds), self.near_bottom(&bounds)) {
                (true, true) => return TerminalModification::ResizingBoth,
                (true, false) => return TerminalModification::ResizingX,
                (false, true) => return TerminalModification::ResizingY,
                (false, false) => {}
            }
        }
        if bounds.contains(self.position) {
            TerminalModification::Moving
        } else {
            TerminalModification::None
        }
    }

    /// Glyph for the current position relative to the focused terminal.
    pub fn glyph_for(&self, stack: &TerminalStack) -> CursorGlyph {
        let Some(term) = stack.focused_terminal() else {
            return CursorGlyph::Arrow;
        };
        let bounds = term.bounds();
        if !term.is_fixed_size() {
            match (self.near_right(&bounds), self.near_bottom(&bounds)) {
                (true, true) => return CursorGlyph::CornerResize,
                (true, false) => return CursorGlyph::HorizontalResize,
                (false, true) => return CursorGlyph::VerticalResize,
                (false, false) => {}
            }
        }
        if bounds.contains(self.position) {
            CursorGlyph::Hand
        } else {
            CursorGlyph::Arrow
        }
    }

    fn refresh_glyph(&mut self, stack: &TerminalStack, windowing: &mut dyn Windowing) {
        let glyph = self.glyph_for(stack);
        if self.glyph != Some(glyph) {
            self.glyph = Some(glyph);
            windowing.set_cursor_glyph(glyph);
        }
    }

    fn near_right(&self, b: &Rect) -> bool {
        let p = self.position;
        (p.x - b.right).abs() <= self.near_threshold
            && p.y <= b.top
            && p.y >= b.bottom - self.near_threshold
    }

    fn near_bottom(&self, b: &Rect) -> bool {
        let p = self.position;
        (p.y - b.bottom).abs() <= self.near_threshold
            && p.x >= b.left
            && p.x <= b.right + self.near_threshold
    }
}
