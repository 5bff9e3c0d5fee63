//! tterm-replay - feed a captured terminal stream through a session
//!
//! Reads program output from a file (or stdin), applies it to a screen
//! buffer and prints the final screen as plain text.
//!
//! ```text
//! tterm-replay session.log         # Replay a capture
//! some-command | tterm-replay      # Replay live output
//! tterm-replay -s 120x40 out.log   # Use a specific size
//! ```
//!
//! Logging goes to stderr and is controlled by `TTERM_LOG` (default `info`).

use std::env;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tterm::{Config, Session, SessionEvent, Snapshot, TerminalSize};

/// Command line options
#[derive(Default)]
struct Args {
    /// Config file (default `~/.tterm/config.toml`)
    config_path: Option<PathBuf>,
    /// Size overriding the config
    size: Option<TerminalSize>,
    /// Input file (default stdin)
    input: Option<PathBuf>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("tterm-replay {}", VERSION);
}

fn print_help() {
    eprintln!("tterm-replay {} - Replay a terminal stream and print the screen", VERSION);
    eprintln!();
    eprintln!("Usage: tterm-replay [OPTIONS] [FILE]");
    eprintln!();
    eprintln!("Reads FILE, or stdin when FILE is omitted.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Config file (default ~/.tterm/config.toml)");
    eprintln!("  -s, --size <CxR>      Terminal size, e.g. 80x24");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TTERM_LOG             Log filter (default: info)");
}

fn parse_size(value: &str) -> Result<TerminalSize, String> {
    let (columns, rows) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Invalid size: {}. Expected COLSxROWS", value))?;
    let columns: u16 = columns
        .trim()
        .parse()
        .map_err(|_| format!("Invalid column count: {}", columns))?;
    let rows: u16 = rows
        .trim()
        .parse()
        .map_err(|_| format!("Invalid row count: {}", rows))?;
    Ok(TerminalSize::new(columns, rows))
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing config path".to_string());
                }
                parsed.config_path = Some(PathBuf::from(&args[i]));
            }
            "-s" | "--size" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing size argument".to_string());
                }
                parsed.size = Some(parse_size(&args[i])?);
            }
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            arg => {
                if parsed.input.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                if arg != "-" {
                    parsed.input = Some(PathBuf::from(arg));
                }
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("TTERM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_screen(snapshot: &Snapshot) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "title: {}", snapshot.title)?;
    writeln!(out, "size: {}", snapshot.size)?;
    writeln!(
        out,
        "cursor: {},{}{}",
        snapshot.cursor.x,
        snapshot.cursor.y,
        if snapshot.show_cursor { "" } else { " (hidden)" }
    )?;
    writeln!(out, "{}", "-".repeat(snapshot.size.columns() as usize))?;
    for y in 0..snapshot.rows.len() {
        writeln!(out, "{}", snapshot.row_text(y))?;
    }
    out.flush()
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load(),
    };

    let session = Arc::new(Session::from_config(&config));
    if let Some(size) = args.size {
        session.resize(size)?;
    }
    let events = session.subscribe();

    let input: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };
    info!("Replaying into a {} terminal", session.size());
    session.spawn_reader(input);

    for event in events.iter() {
        match event {
            SessionEvent::Finished(None) => break,
            SessionEvent::Finished(Some(e)) => {
                warn!("Input ended with an error: {}", e);
                break;
            }
            SessionEvent::TitleChanged(title) => debug!("Title changed: {}", title),
            SessionEvent::SizeChanged(size) => debug!("Size changed: {}", size),
            SessionEvent::Output => {}
        }
    }

    print_screen(&session.snapshot())?;
    session.dispose();
    Ok(())
}
