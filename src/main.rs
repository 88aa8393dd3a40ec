//! main.rs
//! Entry point for fbrowse

use fbrowse::config::Config;
use fbrowse::core::{DiffOp, ListingDiff, ModelEvent, format_row};
use fbrowse::utils::cli::{CliAction, handle_args};
use fbrowse::utils::{resolve_initial_dir, shorten_home_path};
use fbrowse::Engine;

use tracing_subscriber::EnvFilter;

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

/// How often the front end drains the model.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> ExitCode {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("\n[fbrowse] Error occurred: {}", info);

        #[cfg(debug_assertions)]
        {
            let bt = std::backtrace::Backtrace::force_capture();
            eprintln!("\nStack Backtrace:\n{}", bt);
        }
    }));

    let requested = match handle_args() {
        CliAction::Exit => return ExitCode::SUCCESS,
        CliAction::Run => None,
        CliAction::RunAtPath(path) => Some(path),
    };

    init_logging();

    let config = Config::load();
    let start = resolve_initial_dir(requested.as_deref());
    let engine = Engine::new(config);
    let mut model = engine.directory_model();
    model.set_directory(&start);

    loop {
        model.process_pending();
        while let Ok(event) = model.events().try_recv() {
            match event {
                ModelEvent::Loaded { path, .. } => {
                    println!("{}", shorten_home_path(&path));
                    if let Some(listing) = model.listing() {
                        for entry in listing.entries() {
                            println!("  {}", format_row(entry));
                        }
                    }
                }
                ModelEvent::LoadFailed { path, error, .. } => {
                    eprintln!("[fbrowse] Error: '{}' cannot be opened: {}", path.display(), error);
                    return ExitCode::FAILURE;
                }
                ModelEvent::Diff(diff) => print_diff(&diff),
                ModelEvent::RefreshFailed { path, error } => {
                    eprintln!("[fbrowse] refresh of '{}' failed: {}", path.display(), error);
                }
                ModelEvent::Job(_) => {}
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Logs go to stderr, filtered by FBROWSE_LOG (default "info").
fn init_logging() {
    let filter = EnvFilter::try_from_env("FBROWSE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_diff(diff: &ListingDiff) {
    for op in &diff.ops {
        match op {
            DiffOp::Remove { index, name } => {
                println!("- [{index}] {}", name.to_string_lossy())
            }
            DiffOp::Move { from, to } => println!("> [{from}] -> [{to}]"),
            DiffOp::Insert { index, entry } => println!("+ [{index}] {}", format_row(entry)),
            DiffOp::Update { index, entry } => println!("~ [{index}] {}", format_row(entry)),
        }
    }
}
