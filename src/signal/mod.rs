//! Network monitor responder.
//!
//! A monitor addresses a running hypervisor with [`Envelope::UserCommand`]
//! envelopes wrapping one request. Every request gets exactly one
//! [`Envelope::UserCommandAck`] carrying the same sequence number and app
//! id:
//!
//! | Request    | Reply                              |
//! |------------|------------------------------------|
//! | `Ping`     | `Pong`                             |
//! | `ResUsage` | `ResUsageReport` for this process  |
//! | `Shutdown` | `Shutdown` (and the flag is raised)|
//!
//! Anything else is logged and left unanswered.

// Rust guideline compliant 2026-02

pub mod server;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::msg::{Envelope, ResUsageReport, UserCommand};

/// Build the reply to a monitor envelope, if it deserves one.
///
/// `Shutdown` also raises `shutdown`.
pub fn respond(envelope: &Envelope, shutdown: &AtomicBool) -> Option<Envelope> {
    let Envelope::UserCommand(cmd) = envelope else {
        log::debug!(
            "[signal] ignoring bare envelope 0x{:04x}",
            envelope.type_tag()
        );
        return None;
    };

    let reply = match cmd.inner.as_ref() {
        Envelope::Ping => Envelope::Pong,
        Envelope::ResUsage => Envelope::ResUsageReport(res_usage()),
        Envelope::Shutdown => {
            log::info!("[signal] shutdown requested by app {}", cmd.app_id);
            shutdown.store(true, Ordering::SeqCst);
            Envelope::Shutdown
        }
        other => {
            log::warn!(
                "[signal] unsupported request 0x{:04x} (seq {})",
                other.type_tag(),
                cmd.sequence
            );
            return None;
        }
    };

    Some(Envelope::UserCommandAck(UserCommand {
        sequence: cmd.sequence,
        app_id: cmd.app_id,
        inner: Box::new(reply),
    }))
}

/// CPU time and peak resident size of this process.
pub fn res_usage() -> ResUsageReport {
    // SAFETY: `rusage` is plain old data, so an all-zero value is valid.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a valid, exclusively borrowed `rusage` for the call.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        log::warn!("[signal] getrusage failed: {}", std::io::Error::last_os_error());
        return ResUsageReport {
            cpu_seconds: 0.0,
            max_rss_kib: 0,
        };
    }

    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    // Linux reports KiB, macOS reports bytes.
    #[cfg(target_os = "macos")]
    let max_rss_kib = usage.ru_maxrss as u64 / 1024;
    #[cfg(not(target_os = "macos"))]
    let max_rss_kib = usage.ru_maxrss as u64;

    ResUsageReport {
        cpu_seconds: seconds(usage.ru_utime) + seconds(usage.ru_stime),
        max_rss_kib,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sequence: u32, inner: Envelope) -> Envelope {
        Envelope::UserCommand(UserCommand {
            sequence,
            app_id: 9,
            inner: Box::new(inner),
        })
    }

    #[test]
    fn test_ping_gets_pong_with_same_sequence() {
        let flag = AtomicBool::new(false);
        let reply = respond(&request(41, Envelope::Ping), &flag).unwrap();
        assert_eq!(
            reply,
            Envelope::UserCommandAck(UserCommand {
                sequence: 41,
                app_id: 9,
                inner: Box::new(Envelope::Pong),
            })
        );
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_raises_flag() {
        let flag = AtomicBool::new(false);
        let reply = respond(&request(1, Envelope::Shutdown), &flag).unwrap();
        assert!(matches!(reply, Envelope::UserCommandAck(ref c) if *c.inner == Envelope::Shutdown));
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_res_usage_reports_this_process() {
        let flag = AtomicBool::new(false);
        let Some(Envelope::UserCommandAck(ack)) = respond(&request(2, Envelope::ResUsage), &flag) else {
            panic!("expected an ack");
        };
        let Envelope::ResUsageReport(report) = *ack.inner else {
            panic!("expected a report");
        };
        assert!(report.cpu_seconds >= 0.0);
        assert!(report.max_rss_kib > 0);
    }

    #[test]
    fn test_unanswered_envelopes() {
        let flag = AtomicBool::new(false);
        assert!(respond(&Envelope::Ping, &flag).is_none());
        assert!(respond(&request(3, Envelope::ClearTerminal), &flag).is_none());
    }
}
