// End-to-end tests driving the hypervisor the way the binary does: typed
// lines in, ticks, and the focused terminal's screen out.

use std::time::{Duration, Instant};

use viscript::config::Config;
use viscript::ids::TerminalIdSource;
use viscript::input::Headless;
use viscript::msg::{action, mouse_button, Envelope, MouseButton, MousePos};
use viscript::Hypervisor;

const TIMEOUT: Duration = Duration::from_secs(10);

fn hypervisor(seed: u64) -> Hypervisor {
    let mut hv = Hypervisor::with_id_source(Config::default(), TerminalIdSource::seeded(seed));
    hv.init().unwrap();
    hv
}

fn screen(hv: &Hypervisor) -> String {
    hv.stack().focused_terminal().unwrap().screen_text()
}

fn tick_until(hv: &mut Hypervisor, done: impl Fn(&str) -> bool) -> String {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        hv.tick();
        let text = screen(hv);
        if done(&text) {
            return text;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out; screen:\n{}", screen(hv));
}

#[test]
fn test_help_lists_commands() {
    let mut hv = hypervisor(1);
    hv.type_line("help", &mut Headless);
    let text = tick_until(&mut hv, |s| s.contains("close_term"));
    assert!(text.contains("list_terms"));
}

#[test]
fn test_list_terms_marks_focus() {
    let mut hv = hypervisor(2);
    let first = hv.stack().focused().unwrap();
    hv.type_line("list_terms", &mut Headless);
    let marker = format!("{first} *");
    let text = tick_until(&mut hv, |s| s.contains(&marker));
    assert!(text.contains("terminals:"));
}

#[test]
fn test_close_last_terminal_is_refused() {
    let mut hv = hypervisor(3);
    let only = hv.stack().focused().unwrap();
    hv.type_line(&format!("close_term {only}"), &mut Headless);
    tick_until(&mut hv, |s| s.contains("cannot close the last terminal"));
    assert_eq!(hv.stack().ids(), vec![only]);
}

#[test]
fn test_start_cat_forward_and_stop() {
    let mut hv = hypervisor(4);
    let channels = hv.broker().channel_count();
    hv.type_line("start cat", &mut Headless);
    tick_until(&mut hv, |s| s.contains("started process"));
    // Forwarded lines travel on a channel owned by the command.
    assert_eq!(hv.broker().channel_count(), channels + 1);

    hv.type_line("marco", &mut Headless);
    // The task echo plus at least the command's own output.
    tick_until(&mut hv, |s| s.matches("marco").count() >= 2);

    hv.type_line("stop", &mut Headless);
    tick_until(&mut hv, |s| s.contains("exited with"));

    let start = Instant::now();
    while hv.processes().len() > 1 && start.elapsed() < TIMEOUT {
        hv.tick();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(hv.processes().len(), 1);
    assert_eq!(hv.broker().channel_count(), channels);
}

#[test]
fn test_start_failure_is_reported() {
    let mut hv = hypervisor(5);
    hv.type_line("start /nonexistent/viscript-command", &mut Headless);
    tick_until(&mut hv, |s| s.contains("start:"));
    assert_eq!(hv.processes().len(), 1);
}

fn input(hv: &mut Hypervisor, e: Envelope) {
    hv.dispatch_input(&e.encode(), &mut Headless);
}

#[test]
fn test_pointer_drag_moves_focused_terminal() {
    let mut hv = hypervisor(6);
    let id = hv.stack().focused().unwrap();
    let before = hv.stack().get(id).unwrap().bounds();
    let (x, y) = (f64::from(before.left) + 0.5, f64::from(before.top) - 0.5);

    input(&mut hv, Envelope::MousePos(MousePos { x, y }));
    input(
        &mut hv,
        Envelope::MouseButton(MouseButton {
            button: mouse_button::LEFT,
            action: action::PRESS,
            mods: 0,
        }),
    );
    input(&mut hv, Envelope::MousePos(MousePos { x: x + 0.2, y }));
    input(
        &mut hv,
        Envelope::MouseButton(MouseButton {
            button: mouse_button::LEFT,
            action: action::RELEASE,
            mods: 0,
        }),
    );

    let after = hv.stack().get(id).unwrap().bounds();
    assert!((after.left - (before.left + 0.2)).abs() < 1e-5);
    assert_eq!(after.top, before.top);
}

#[test]
fn test_shutdown_stops_running_commands() {
    let mut hv = hypervisor(7);
    hv.type_line("start sleep 30", &mut Headless);
    tick_until(&mut hv, |s| s.contains("started process"));
    hv.shutdown();
    assert!(hv.processes().is_empty());
    assert!(hv.stack().is_empty());
}

#[test]
fn test_shutdown_returns_when_descendant_holds_pty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.sh");
    std::fs::write(&path, "(trap '' HUP; exec sleep 1000) &\necho \"bg=$!\"\nsleep 30\n").unwrap();

    let mut hv = hypervisor(8);
    hv.type_line(&format!("start sh {}", path.display()), &mut Headless);
    let text = tick_until(&mut hv, |s| s.contains("bg="));

    let start = Instant::now();
    hv.shutdown();
    assert!(start.elapsed() < TIMEOUT);
    assert!(hv.processes().is_empty());

    let pid: String = text
        .split("bg=")
        .nth(1)
        .unwrap()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    std::process::Command::new("kill").args(["-9", &pid]).status().unwrap();
}
