//! viscript - a terminal-multiplexing hypervisor.
//!
//! The hypervisor hosts a stack of character-grid terminals, each backed by
//! a process, and moves every message between them through an in-memory
//! pub/sub broker using one binary envelope format.
//!
//! # Architecture
//!
//! - **Hypervisor** - owns everything, runs the cooperative tick
//! - **Terminal stack** - terminals, focus, placement, user commands
//! - **Processes** - in-process task shells and PTY-backed OS commands
//! - **Broker** - named channels fanning envelopes out to mailboxes
//! - **Signal** - TCP responder for the network monitor
//!
//! # Modules
//!
//! - [`msg`] - envelope codec and stream framing
//! - [`mailbox`] - bounded FIFO queues with backpressure
//! - [`broker`] - pub/sub channel registry
//! - [`process`] - task and external processes
//! - [`terminal`] - grid terminal and terminal stack
//! - [`input`] - pointer gestures and cursor glyphs
//! - [`config`] - configuration loading/saving

pub mod broker;
pub mod config;
pub mod env;
pub mod geometry;
pub mod hypervisor;
pub mod ids;
pub mod input;
pub mod mailbox;
pub mod msg;
pub mod process;
pub mod signal;
pub mod terminal;

// Re-export commonly used types
pub use broker::{Broker, SharedBroker};
pub use config::Config;
pub use hypervisor::Hypervisor;
pub use msg::Envelope;
pub use terminal::{Terminal, TerminalStack};
