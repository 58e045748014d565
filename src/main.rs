//! viscript - terminal-multiplexing hypervisor.
//!
//! This is the binary entry point. See the `viscript` library for the core
//! functionality.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use viscript::input::Headless;
use viscript::signal::server::SignalServer;
use viscript::{Config, Hypervisor};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Ticks to wait after typed input before printing the screen.
const SETTLE_TICKS: u32 = 4;

#[derive(Parser)]
#[command(name = "viscript")]
#[command(version)]
#[command(about = "Terminal-multiplexing hypervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hypervisor; stdin lines are typed into the focused terminal
    Start {
        /// Address for the monitor listener (overrides config)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    // Logs go to a file so they never interleave with the printed screen.
    let log_path = if let Ok(path) = std::env::var("VISCRIPT_LOG_FILE") {
        PathBuf::from(path)
    } else if let Ok(config_dir) = std::env::var("VISCRIPT_CONFIG_DIR") {
        PathBuf::from(config_dir).join("viscript.log")
    } else {
        PathBuf::from("/tmp/viscript.log")
    };
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("Failed to create log file at {}", log_path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen } => {
            let mut config = Config::load()?;
            if listen.is_some() {
                config.listen_addr = listen;
            }
            run(config)?;
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

/// Run the hypervisor until a signal, a monitor shutdown, or end of input.
fn run(config: Config) -> Result<()> {
    let mut hv = Hypervisor::new(config);
    let shutdown = hv.shutdown_flag();

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGHUP, Arc::clone(&shutdown))?;

    // The runtime only hosts the monitor listener; it lives until return.
    let mut monitor = None;
    if let Some(addr) = hv.config().listen_addr.clone() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("Failed to start tokio runtime")?;
        let server = runtime.block_on(SignalServer::start(&addr, Arc::clone(&shutdown)))?;
        println!("Monitor listening on {}", server.local_addr());
        monitor = Some((runtime, server));
    }
    let keep_running_without_input = monitor.is_some();

    hv.init().context("Failed to create the first terminal")?;
    log::info!("viscript {} started", env!("CARGO_PKG_VERSION"));

    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    let interval = hv.config().tick_interval();
    let mut print_in: Option<u32> = Some(SETTLE_TICKS);
    let mut input_open = true;

    while !shutdown.load(Ordering::SeqCst) {
        while input_open {
            match line_rx.try_recv() {
                Ok(line) => {
                    hv.type_line(&line, &mut Headless);
                    print_in = Some(SETTLE_TICKS);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => input_open = false,
            }
        }

        hv.tick();

        print_in = match print_in {
            Some(0) => {
                print_focused(&hv);
                None
            }
            Some(n) => Some(n - 1),
            None => None,
        };

        if !input_open && print_in.is_none() && !keep_running_without_input {
            break;
        }
        std::thread::sleep(interval);
    }

    hv.shutdown();
    if let Some((runtime, server)) = monitor {
        server.shutdown();
        runtime.shutdown_background();
    }
    Ok(())
}

fn print_focused(hv: &Hypervisor) {
    let Some(term) = hv.stack().focused_terminal() else {
        println!("(no terminal has focus)");
        return;
    };
    let size = term.grid_size();
    println!("── terminal {} ({}x{}) ──", term.id(), size.x, size.y);
    println!("{}", term.screen_text().trim_end());
}
