//! Property-based invariant tests for the terminal grid.
//!
//! 1. Placement below the prompt region never scrolls and lands in raster order.
//! 2. One row past the region scrolls exactly once and clears the bottom row.
//! 3. Out-of-grid placement never mutates the grid or moves the insertion cursor.
//! 4. Discrete resize changes the dimension by the number of whole cells crossed.
//! 5. Precise resize keeps the grid and the cell-size identity.

use proptest::prelude::*;
use viscript::broker::Broker;
use viscript::geometry::Rect;
use viscript::ids::TerminalId;
use viscript::mailbox::MailboxConfig;
use viscript::terminal::{ResizeMode, Terminal, PROMPT_LINES};

fn terminal() -> Terminal {
    let mut term = Terminal::new(
        TerminalId(1),
        Rect::new(1.0, 1.0, -1.0, -1.0),
        0.1,
        false,
        Broker::shared(),
        MailboxConfig::default(),
    );
    term.clear();
    term
}

fn cell_size_consistent(term: &Terminal) -> bool {
    let b = term.bounds();
    let inner_w = b.width() - 2.0 * term.border_size();
    let inner_h = b.height() - 2.0 * term.border_size();
    (term.char_size().x * term.grid_size().x as f32 - inner_w).abs() < 1e-3
        && (term.char_size().y * term.grid_size().y as f32 - inner_h).abs() < 1e-3
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Raster placement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn placement_is_raster_ordered(fraction in 0.0f64..=1.0) {
        let mut term = terminal();
        let cols = term.grid_size().x;
        let body = (term.grid_size().y - PROMPT_LINES) * cols;
        let n = (f64::from(body) * fraction) as i32;

        for i in 0..n {
            term.put_character(0x4e00 + i as u32);
        }
        for i in 0..n {
            prop_assert_eq!(term.char_at(i % cols, i / cols), Some(0x4e00 + i as u32));
        }
        prop_assert!(term.curr().y <= term.grid_size().y - PROMPT_LINES);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Scroll by exactly one row
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn one_extra_line_scrolls_once(seed in any::<u16>()) {
        let mut term = terminal();
        let cols = term.grid_size().x;
        let rows = term.grid_size().y;
        let pinned = rows - PROMPT_LINES;

        let glyph = |y: i32| 0x100 + u32::from(seed % 512) + y as u32;
        for y in 0..=pinned {
            for _ in 0..cols {
                term.put_character(glyph(y));
            }
        }
        for y in 0..pinned {
            prop_assert_eq!(term.char_at(0, y), Some(glyph(y + 1)));
        }
        for x in 0..cols {
            prop_assert_eq!(term.char_at(x, rows - 1), Some(0));
        }
        prop_assert_eq!(term.curr().y, pinned);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Out-of-grid rejection
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn out_of_grid_writes_are_rejected(
        x in prop_oneof![-1000i32..0, 64i32..1000],
        y in -1000i32..1000,
        text in "[a-z]{1,8}",
    ) {
        let mut term = terminal();
        term.put_string("seed");
        let before = term.screen_text();
        let curr = term.curr();

        prop_assert!(!term.set_character_at(x, y, 'q' as u32));
        if x < 0 {
            prop_assert_eq!(term.set_string_at(x - 8, y, &text), 0);
        }
        prop_assert_eq!(term.screen_text(), before);
        prop_assert_eq!(term.curr(), curr);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Discrete resize
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn discrete_resize_counts_whole_cells(dx in -20i32..=20, dy in -20i32..=20) {
        let mut term = terminal();
        let size = term.grid_size();
        let cell = term.char_size();
        let b = term.bounds();

        term.resize_horizontally(b.right + dx as f32 * cell.x, ResizeMode::Discrete);
        term.resize_vertically(b.bottom - dy as f32 * cell.y, ResizeMode::Discrete);

        prop_assert_eq!(term.grid_size().x, size.x + dx);
        prop_assert_eq!(term.grid_size().y, size.y + dy);
        prop_assert!(cell_size_consistent(&term));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Precise resize
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn precise_resize_keeps_grid(right in -0.9f32..3.0, bottom in -3.0f32..0.9) {
        let mut term = terminal();
        let size = term.grid_size();

        prop_assert!(term.resize_horizontally(right, ResizeMode::Precise));
        prop_assert!(term.resize_vertically(bottom, ResizeMode::Precise));
        prop_assert_eq!(term.grid_size(), size);
        prop_assert_eq!(term.bounds().right, right);
        prop_assert_eq!(term.bounds().bottom, bottom);
        prop_assert!(cell_size_consistent(&term));
    }
}
