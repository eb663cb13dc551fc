//! The worker process: parses a small set of CLI flags, installs logging,
//! and runs the parser driver in either CGI or FastCGI mode, emitting the
//! parsed-pair stream to stdout.
//!
//! Grounded on the teacher's `server/uploadimpostor.rs::main`/
//! `run_responder` shape: a local `logger()` installing a
//! `simplelog::CombinedLogger` before doing anything else, then a
//! `run_*() -> anyhow::Result<()>` that does the real work and whose
//! error is logged (not just panicked on) at the top.
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use log::LevelFilter;
use std::io::{BufWriter, Write};
use wirecgi::config::WorkerConfig;
use wirecgi::env_provider::ProcessEnv;
use wirecgi::worker::{run_cgi, run_fastcgi};

const LOG_FILE_NAME: &str = "logs/wirecgi-worker.log";

/// Debug logging. The worker's stdout carries the IPC stream to the
/// parent, so diagnostics never go there; matches the teacher's
/// `uploadimpostor.rs::logger()` of writing to a file under `logs/`.
fn logger() {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE_NAME);
    match log_file {
        Ok(file) => {
            let _ = simplelog::CombinedLogger::init(vec![simplelog::WriteLogger::new(
                LevelFilter::Info,
                simplelog::Config::default(),
                file,
            )]);
        }
        Err(_) => {
            // No writable logs/ directory (e.g. a sandboxed worker):
            // fall back to stderr so diagnostics aren't silently lost.
            let _ = simplelog::CombinedLogger::init(vec![simplelog::TermLogger::new(
                LevelFilter::Info,
                simplelog::Config::default(),
                simplelog::TerminalMode::Stderr,
                simplelog::ColorChoice::Never,
            )]);
        }
    }
}

enum Mode {
    Cgi,
    FastCgi,
}

struct Args {
    mode: Mode,
    config_path: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut mode = Mode::Cgi;
    let mut config_path = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--fastcgi" => mode = Mode::FastCgi,
            "--cgi" => mode = Mode::Cgi,
            "--config" => {
                config_path = Some(iter.next().context("--config requires a path")?);
            }
            other => anyhow::bail!("unrecognized argument: {other}"),
        }
    }
    Ok(Args { mode, config_path })
}

fn load_config(path: Option<&str>) -> Result<WorkerConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading worker config from {path}"))?;
            WorkerConfig::parse(&text).with_context(|| format!("parsing worker config {path}"))
        }
        None => Ok(WorkerConfig::default()),
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;
    let config = load_config(args.config_path.as_deref())?;
    let out = std::io::stdout();
    let mut out = BufWriter::new(out.lock());

    match args.mode {
        Mode::Cgi => {
            let provider = ProcessEnv;
            let mut stdin = std::io::stdin();
            run_cgi(&provider, &mut stdin, &mut out, &config)?;
        }
        Mode::FastCgi => {
            let mut control = match config.fastcgi_socket_path.as_deref() {
                Some(path) => wirecgi::fastcgi::accept_fastcgi_socket_at(path)
                    .with_context(|| format!("accepting FastCGI control socket at {path}"))?,
                None => wirecgi::fastcgi::accept_fastcgi_socket()
                    .context("accepting FastCGI control socket on FD 0")?,
            };
            let mut control_clone = control.try_clone().context("cloning control socket")?;
            run_fastcgi(&mut control, &mut control_clone, &mut out, &config)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() {
    logger();
    if let Err(e) = run() {
        log::error!("worker failed: {e:?}");
        std::process::exit(1);
    }
}
