//! Message envelope codec.
//!
//! Every message on every channel (terminal ↔ process mailboxes, broker
//! channels, and the network monitor socket) is one envelope:
//!
//! ```text
//! [u16 LE type tag] [u32 LE payload length] [payload bytes]
//! ```
//!
//! Payload fields are little-endian. `f64` is encoded as its IEEE-754 bits,
//! `bool` as a single `0`/`1` byte, strings as a `u32` byte length followed
//! by UTF-8, lists as a `u32` count followed by the items, and a nested
//! envelope as its complete encoding.
//!
//! Decoding never panics: truncated input, unknown tags, trailing bytes,
//! invalid UTF-8 and out-of-range booleans all return a [`DecodeError`].
//!
//! Type tags (see [`type_tag`]) are stable and shared with every producer
//! and consumer, including the network monitor.

// Rust guideline compliant 2026-02

pub mod framing;

use thiserror::Error;

/// Size of the envelope header (`u16` tag + `u32` length).
pub const HEADER_LEN: usize = 6;

/// Stable envelope type tags.
pub mod type_tag {
    /// Pointer position in canvas space.
    pub const MOUSE_POS: u16 = 0x0001;
    /// Pointer button press/release.
    pub const MOUSE_BUTTON: u16 = 0x0002;
    /// Scroll delta.
    pub const MOUSE_SCROLL: u16 = 0x0003;
    /// Typed character (text input).
    pub const CHARACTER: u16 = 0x0004;
    /// Raw key event.
    pub const KEY: u16 = 0x0005;
    /// Terminal geometry summary sent to the attached process.
    pub const VISUAL_INFO: u16 = 0x0010;
    /// Command line contents plus cursor offset.
    pub const COMMAND_LINE: u16 = 0x0011;
    /// Tokenized command (name + arguments).
    pub const TOKENIZED_COMMAND: u16 = 0x0012;
    /// Terminal id enumeration reply.
    pub const TERMINAL_IDS: u16 = 0x0013;
    /// Place one character at the insertion cursor.
    pub const PUT_CHAR: u16 = 0x0014;
    /// Place one character at explicit coordinates.
    pub const SET_CHAR_AT: u16 = 0x0015;
    /// Clear the whole grid.
    pub const CLEAR_TERMINAL: u16 = 0x0016;
    /// Raw process output bytes.
    pub const OUTPUT: u16 = 0x0017;
    /// A process exited.
    pub const PROCESS_EXITED: u16 = 0x0018;
    /// Network monitor: liveness check.
    pub const PING: u16 = 0x0100;
    /// Network monitor: liveness reply.
    pub const PONG: u16 = 0x0101;
    /// Network monitor: shut the application down.
    pub const SHUTDOWN: u16 = 0x0102;
    /// Network monitor: resource usage request.
    pub const RES_USAGE: u16 = 0x0103;
    /// Network monitor: resource usage reply.
    pub const RES_USAGE_REPORT: u16 = 0x0104;
    /// Network monitor: command wrapper with sequence and target app.
    pub const USER_COMMAND: u16 = 0x0105;
    /// Network monitor: reply wrapper with sequence and source app.
    pub const USER_COMMAND_ACK: u16 = 0x0106;
}

/// Button action values carried by [`MouseButton`] and [`Key`].
pub mod action {
    /// Button or key released.
    pub const RELEASE: u8 = 0;
    /// Button or key pressed.
    pub const PRESS: u8 = 1;
    /// Key held down and auto-repeating.
    pub const REPEAT: u8 = 2;
}

/// Modifier mask bits carried by [`MouseButton`] and [`Key`].
pub mod modifier {
    /// Shift held.
    pub const SHIFT: u8 = 0x01;
    /// Control held. Switches terminal resizing to precise mode.
    pub const CONTROL: u8 = 0x02;
    /// Alt held.
    pub const ALT: u8 = 0x04;
    /// Super/command held.
    pub const SUPER: u8 = 0x08;
}

/// Pointer button ids.
pub mod mouse_button {
    /// Primary button.
    pub const LEFT: u8 = 0;
    /// Secondary button.
    pub const RIGHT: u8 = 1;
    /// Middle button.
    pub const MIDDLE: u8 = 2;
}

/// Key codes understood by the task shell.
pub mod key {
    /// Escape.
    pub const ESCAPE: u32 = 256;
    /// Enter / return.
    pub const ENTER: u32 = 257;
    /// Tab.
    pub const TAB: u32 = 258;
    /// Backspace.
    pub const BACKSPACE: u32 = 259;
    /// Forward delete.
    pub const DELETE: u32 = 261;
    /// Right arrow.
    pub const RIGHT: u32 = 262;
    /// Left arrow.
    pub const LEFT: u32 = 263;
    /// Down arrow.
    pub const DOWN: u32 = 264;
    /// Up arrow.
    pub const UP: u32 = 265;
    /// Home.
    pub const HOME: u32 = 268;
    /// End.
    pub const END: u32 = 269;
}

/// Errors produced while decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before a field could be read.
    #[error("truncated envelope: needed {needed} more bytes, {remaining} left")]
    Truncated {
        /// Bytes the next field needs.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// The type tag is not one of [`type_tag`].
    #[error("unknown envelope type: 0x{0:04x}")]
    UnknownType(u16),
    /// Bytes remained after the envelope or its payload was consumed.
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
    /// A string field was not UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
    /// A boolean field was neither 0 nor 1.
    #[error("invalid boolean byte: {0}")]
    InvalidBool(u8),
    /// A user command wrapped another user command or ack.
    #[error("user command nested inside a user command")]
    NestedCommand,
}

/// Pointer position in canvas space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MousePos {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate (y grows upwards).
    pub y: f64,
}

/// Pointer button press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButton {
    /// Button id, see [`mouse_button`].
    pub button: u8,
    /// Press or release, see [`action`].
    pub action: u8,
    /// Modifier mask, see [`modifier`].
    pub mods: u8,
}

/// Scroll delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseScroll {
    /// Horizontal offset.
    pub x: f64,
    /// Vertical offset.
    pub y: f64,
    /// Alt held while scrolling.
    pub holding_alt: bool,
    /// Control held while scrolling.
    pub holding_control: bool,
}

/// Raw key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    /// Key code, see [`key`].
    pub key: u32,
    /// Platform scan code.
    pub scan: u32,
    /// Press, release or repeat, see [`action`].
    pub action: u8,
    /// Modifier mask, see [`modifier`].
    pub mods: u8,
}

/// Terminal geometry summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualInfo {
    /// Grid width in characters.
    pub num_columns: u32,
    /// Grid height in characters.
    pub num_rows: u32,
    /// Rows reserved at the bottom for the prompt.
    pub prompt_lines: u32,
    /// Row of the insertion cursor.
    pub curr_row: u32,
}

/// Command line text with cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Task that owns the line.
    pub task_id: u64,
    /// Full line, prompt included.
    pub command_line: String,
    /// Cursor offset in characters from the start of the line.
    pub cursor_offset: u32,
}

/// Command name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedCommand {
    /// Command name.
    pub command: String,
    /// Arguments in order.
    pub args: Vec<String>,
}

impl TokenizedCommand {
    /// Split a line on whitespace. Returns `None` for blank lines.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let command = parts.next()?.to_string();
        Some(Self {
            command,
            args: parts.map(str::to_string).collect(),
        })
    }
}

/// Terminal id enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalIds {
    /// Focused terminal id, 0 when nothing is focused.
    pub focused: u64,
    /// Every known terminal id.
    pub term_ids: Vec<u64>,
}

/// Character at explicit coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCharAt {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Unicode scalar value.
    pub ch: u32,
}

/// Exit notification for a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExited {
    /// Id of the process that exited.
    pub process_id: u64,
    /// Exit code, `None` when it was not available.
    pub exit_code: Option<i32>,
}

/// Resource usage of the responding application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResUsageReport {
    /// User plus system CPU time in seconds.
    pub cpu_seconds: f64,
    /// Peak resident set size in KiB.
    pub max_rss_kib: u64,
}

/// Network monitor command or reply wrapping an inner envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCommand {
    /// Monitor-assigned sequence number, echoed in the reply.
    pub sequence: u32,
    /// Target (or replying) application id.
    pub app_id: u64,
    /// Wrapped request or reply. Never itself a user command or ack.
    pub inner: Box<Envelope>,
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Pointer position.
    MousePos(MousePos),
    /// Pointer button.
    MouseButton(MouseButton),
    /// Scroll delta.
    MouseScroll(MouseScroll),
    /// Typed character.
    Character(u32),
    /// Raw key event.
    Key(Key),
    /// Terminal geometry summary.
    VisualInfo(VisualInfo),
    /// Command line update.
    CommandLine(CommandLine),
    /// Tokenized command.
    TokenizedCommand(TokenizedCommand),
    /// Terminal id enumeration.
    TerminalIds(TerminalIds),
    /// Character at the insertion cursor.
    PutChar(u32),
    /// Character at explicit coordinates.
    SetCharAt(SetCharAt),
    /// Clear the grid.
    ClearTerminal,
    /// Raw output bytes.
    Output(Vec<u8>),
    /// Process exit notification.
    ProcessExited(ProcessExited),
    /// Liveness check.
    Ping,
    /// Liveness reply.
    Pong,
    /// Shutdown request (and its acknowledgement).
    Shutdown,
    /// Resource usage request.
    ResUsage,
    /// Resource usage reply.
    ResUsageReport(ResUsageReport),
    /// Monitor command.
    UserCommand(UserCommand),
    /// Monitor command reply.
    UserCommandAck(UserCommand),
}

impl Envelope {
    /// Stable type tag of this envelope.
    #[must_use]
    pub fn type_tag(&self) -> u16 {
        match self {
            Self::MousePos(_) => type_tag::MOUSE_POS,
            Self::MouseButton(_) => type_tag::MOUSE_BUTTON,
            Self::MouseScroll(_) => type_tag::MOUSE_SCROLL,
            Self::Character(_) => type_tag::CHARACTER,
            Self::Key(_) => type_tag::KEY,
            Self::VisualInfo(_) => type_tag::VISUAL_INFO,
            Self::CommandLine(_) => type_tag::COMMAND_LINE,
            Self::TokenizedCommand(_) => type_tag::TOKENIZED_COMMAND,
            Self::TerminalIds(_) => type_tag::TERMINAL_IDS,
            Self::PutChar(_) => type_tag::PUT_CHAR,
            Self::SetCharAt(_) => type_tag::SET_CHAR_AT,
            Self::ClearTerminal => type_tag::CLEAR_TERMINAL,
            Self::Output(_) => type_tag::OUTPUT,
            Self::ProcessExited(_) => type_tag::PROCESS_EXITED,
            Self::Ping => type_tag::PING,
            Self::Pong => type_tag::PONG,
            Self::Shutdown => type_tag::SHUTDOWN,
            Self::ResUsage => type_tag::RES_USAGE,
            Self::ResUsageReport(_) => type_tag::RES_USAGE_REPORT,
            Self::UserCommand(_) => type_tag::USER_COMMAND,
            Self::UserCommandAck(_) => type_tag::USER_COMMAND_ACK,
        }
    }

    /// Whether this envelope is raw user input (pointer, scroll, keyboard).
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::MousePos(_)
                | Self::MouseButton(_)
                | Self::MouseScroll(_)
                | Self::Character(_)
                | Self::Key(_)
        )
    }

    /// Encode into the wire format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Writer::default();
        self.encode_payload(&mut payload);
        let payload = payload.into_inner();

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&self.type_tag().to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decode exactly one envelope from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (tag, payload) = split_header(bytes)?;
        let declared = payload.len();
        if bytes.len() > HEADER_LEN + declared {
            return Err(DecodeError::TrailingBytes(bytes.len() - HEADER_LEN - declared));
        }
        Self::decode_payload(tag, payload)
    }

    fn encode_payload(&self, w: &mut Writer) {
        match self {
            Self::MousePos(m) => {
                w.f64(m.x);
                w.f64(m.y);
            }
            Self::MouseButton(m) => {
                w.u8(m.button);
                w.u8(m.action);
                w.u8(m.mods);
            }
            Self::MouseScroll(m) => {
                w.f64(m.x);
                w.f64(m.y);
                w.bool(m.holding_alt);
                w.bool(m.holding_control);
            }
            Self::Character(ch) | Self::PutChar(ch) => w.u32(*ch),
            Self::Key(k) => {
                w.u32(k.key);
                w.u32(k.scan);
                w.u8(k.action);
                w.u8(k.mods);
            }
            Self::VisualInfo(v) => {
                w.u32(v.num_columns);
                w.u32(v.num_rows);
                w.u32(v.prompt_lines);
                w.u32(v.curr_row);
            }
            Self::CommandLine(c) => {
                w.u64(c.task_id);
                w.string(&c.command_line);
                w.u32(c.cursor_offset);
            }
            Self::TokenizedCommand(t) => {
                w.string(&t.command);
                w.u32(t.args.len() as u32);
                for arg in &t.args {
                    w.string(arg);
                }
            }
            Self::TerminalIds(t) => {
                w.u64(t.focused);
                w.u32(t.term_ids.len() as u32);
                for id in &t.term_ids {
                    w.u64(*id);
                }
            }
            Self::SetCharAt(s) => {
                w.u32(s.x);
                w.u32(s.y);
                w.u32(s.ch);
            }
            Self::Output(data) => w.raw(data),
            Self::ProcessExited(p) => {
                w.u64(p.process_id);
                w.i32(p.exit_code.unwrap_or(-1));
            }
            Self::ResUsageReport(r) => {
                w.f64(r.cpu_seconds);
                w.u64(r.max_rss_kib);
            }
            Self::UserCommand(c) | Self::UserCommandAck(c) => {
                w.u32(c.sequence);
                w.u64(c.app_id);
                w.raw(&c.inner.encode());
            }
            Self::ClearTerminal | Self::Ping | Self::Pong | Self::Shutdown | Self::ResUsage => {}
        }
    }

    fn decode_payload(tag: u16, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let envelope = match tag {
            type_tag::MOUSE_POS => Self::MousePos(MousePos {
                x: r.f64()?,
                y: r.f64()?,
            }),
            type_tag::MOUSE_BUTTON => Self::MouseButton(MouseButton {
                button: r.u8()?,
                action: r.u8()?,
                mods: r.u8()?,
            }),
            type_tag::MOUSE_SCROLL => Self::MouseScroll(MouseScroll {
                x: r.f64()?,
                y: r.f64()?,
                holding_alt: r.bool()?,
                holding_control: r.bool()?,
            }),
            type_tag::CHARACTER => Self::Character(r.u32()?),
            type_tag::KEY => Self::Key(Key {
                key: r.u32()?,
                scan: r.u32()?,
                action: r.u8()?,
                mods: r.u8()?,
            }),
            type_tag::VISUAL_INFO => Self::VisualInfo(VisualInfo {
                num_columns: r.u32()?,
                num_rows: r.u32()?,
                prompt_lines: r.u32()?,
                curr_row: r.u32()?,
            }),
            type_tag::COMMAND_LINE => Self::CommandLine(CommandLine {
                task_id: r.u64()?,
                command_line: r.string()?,
                cursor_offset: r.u32()?,
            }),
            type_tag::TOKENIZED_COMMAND => {
                let command = r.string()?;
                let count = r.u32()? as usize;
                let mut args = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    args.push(r.string()?);
                }
                Self::TokenizedCommand(TokenizedCommand { command, args })
            }
            type_tag::TERMINAL_IDS => {
                let focused = r.u64()?;
                let count = r.u32()? as usize;
                let mut term_ids = Vec::with_capacity(count.min(r.remaining() / 8));
                for _ in 0..count {
                    term_ids.push(r.u64()?);
                }
                Self::TerminalIds(TerminalIds { focused, term_ids })
            }
            type_tag::PUT_CHAR => Self::PutChar(r.u32()?),
            type_tag::SET_CHAR_AT => Self::SetCharAt(SetCharAt {
                x: r.u32()?,
                y: r.u32()?,
                ch: r.u32()?,
            }),
            type_tag::CLEAR_TERMINAL => Self::ClearTerminal,
            type_tag::OUTPUT => Self::Output(r.rest().to_vec()),
            type_tag::PROCESS_EXITED => {
                let process_id = r.u64()?;
                let raw = r.i32()?;
                Self::ProcessExited(ProcessExited {
                    process_id,
                    exit_code: (raw != -1).then_some(raw),
                })
            }
            type_tag::PING => Self::Ping,
            type_tag::PONG => Self::Pong,
            type_tag::SHUTDOWN => Self::Shutdown,
            type_tag::RES_USAGE => Self::ResUsage,
            type_tag::RES_USAGE_REPORT => Self::ResUsageReport(ResUsageReport {
                cpu_seconds: r.f64()?,
                max_rss_kib: r.u64()?,
            }),
            type_tag::USER_COMMAND | type_tag::USER_COMMAND_ACK => {
                let sequence = r.u32()?;
                let app_id = r.u64()?;
                let inner = r.rest();
                let (inner_tag, _) = split_header(inner)?;
                if matches!(inner_tag, type_tag::USER_COMMAND | type_tag::USER_COMMAND_ACK) {
                    return Err(DecodeError::NestedCommand);
                }
                let command = UserCommand {
                    sequence,
                    app_id,
                    inner: Box::new(Self::decode(inner)?),
                };
                if tag == type_tag::USER_COMMAND {
                    Self::UserCommand(command)
                } else {
                    Self::UserCommandAck(command)
                }
            }
            other => return Err(DecodeError::UnknownType(other)),
        };

        if r.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(r.remaining()));
        }
        Ok(envelope)
    }
}

/// Split an encoded envelope into its tag and declared payload.
///
/// Only checks that the header and the declared payload are present;
/// anything after the payload is left to the caller.
fn split_header(bytes: &[u8]) -> Result<(u16, &[u8]), DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: HEADER_LEN,
            remaining: bytes.len(),
        });
    }
    let tag = u16::from_le_bytes([bytes[0], bytes[1]]);
    let declared = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    let body = &bytes[HEADER_LEN..];
    if body.len() < declared {
        return Err(DecodeError::Truncated {
            needed: declared,
            remaining: body.len(),
        });
    }
    Ok((tag, &body[..declared]))
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn string(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(u64::from_le_bytes(self.array()?)))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .ok()
            .map(str::to_string)
            .ok_or(DecodeError::InvalidUtf8)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}
