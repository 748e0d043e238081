//! Purpose: `dsrsync` CLI entry point.
//! Role: Binary crate root; parses args, wires the HTTP source, CSV sink and checkpoint store.
//! Invariants: Logs go to stderr; stdout carries only the final JSON run summary.
//! Invariants: Errors are emitted as JSON on stderr when it is not a terminal.
//! Invariants: Process exit code is derived from `api::to_exit_code`; cancellation exits 130.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use clap::{Parser, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use dsrsync::api::{
    CalendarZone, CsvFileSink, DEFAULT_ENDPOINT, DEFAULT_RESOURCE_KEY, DEFAULT_USER_AGENT, Error,
    ErrorKind, FileCheckpointStore, HttpPageSource, Normalizer, Paginator, QueryTemplate,
    RetryPolicy, RunConfig, RunReport, StopReason, TransportConfig, to_exit_code,
};

const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "dsrsync",
    version,
    about = "Export a paginated query result to CSV, resumable after interruption",
    long_about = None,
    after_help = r#"EXAMPLES
  $ dsrsync                              # export (or resume) into result.csv
  $ dsrsync --fresh --output permits.csv # discard previous progress and start over
  $ dsrsync --retries 3 --delay 2        # retry failed fetches, 2s between pages

Progress is checkpointed after every page. Interrupt with Ctrl-C and run the
same command again to continue where it stopped. Set RUST_LOG=debug for
per-request logging."#
)]
struct Cli {
    #[arg(
        long,
        default_value = "result.csv",
        help = "CSV file rows are appended to",
        value_hint = ValueHint::FilePath
    )]
    output: PathBuf,
    #[arg(
        long,
        default_value = "checkpoint.json",
        help = "File holding the resume cursor and row count",
        value_hint = ValueHint::FilePath
    )]
    checkpoint: PathBuf,
    #[arg(long, default_value_t = 1.0, help = "Seconds to wait between page requests")]
    delay: f64,
    #[arg(long, help = "Discard any checkpoint and output and start from the first row")]
    fresh: bool,
    #[arg(long, default_value_t = 0, help = "Retries per page for failed requests")]
    retries: u32,
    #[arg(
        long,
        default_value_t = 1000,
        help = "Initial retry backoff in milliseconds (doubles per retry)"
    )]
    retry_backoff_ms: u64,
    #[arg(long, default_value_t = 30.0, help = "Request timeout in seconds")]
    timeout: f64,
    #[arg(long, default_value = DEFAULT_ENDPOINT, help = "Query endpoint URL")]
    endpoint: String,
    #[arg(long, default_value = DEFAULT_RESOURCE_KEY, help = "Report resource key")]
    resource_key: String,
    #[arg(
        long,
        default_value = DEFAULT_USER_AGENT,
        help = "User-Agent header sent with each request"
    )]
    user_agent: String,
    #[arg(long, help = "Render epoch timestamps in UTC instead of local time")]
    utc: bool,
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };

    init_tracing();

    let delay = seconds(cli.delay, "--delay")?;
    let timeout = seconds(cli.timeout, "--timeout")?;
    let transport = TransportConfig::new(&cli.endpoint, cli.resource_key.clone())?
        .with_timeout(timeout)
        .with_user_agent(cli.user_agent.clone());
    let template = QueryTemplate::builtin()?;
    let config = RunConfig {
        page_size: template.page_size(),
        inter_page_delay: delay,
        fresh_start: cli.fresh,
        retry: RetryPolicy {
            max_retries: cli.retries,
            base_backoff: Duration::from_millis(cli.retry_backoff_ms),
        },
    };
    let zone = if cli.utc {
        CalendarZone::Utc
    } else {
        CalendarZone::Local
    };

    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&stop)?;

    let mut source = HttpPageSource::new(transport, template);
    let mut sink = CsvFileSink::new(&cli.output);
    let mut store = FileCheckpointStore::new(&cli.checkpoint);
    let paginator = Paginator::new(config, Normalizer::new(zone)).with_stop(stop);

    tracing::info!(
        output = %cli.output.display(),
        checkpoint = %cli.checkpoint.display(),
        fresh = cli.fresh,
        "export starting"
    );
    let started = Instant::now();
    let report = paginator.run(&mut source, &mut sink, &mut store)?;
    let elapsed = started.elapsed();
    tracing::info!(
        rows = report.rows_this_run,
        total = report.rows_total,
        stop = report.stop.as_str(),
        "export finished"
    );

    println!("{}", summary_json(&report, &cli, elapsed));
    if report.stop == StopReason::Cancelled {
        return Ok(EXIT_CANCELLED);
    }
    Ok(0)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn install_signal_handlers(stop: &Arc<AtomicBool>) -> Result<(), Error> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    for signal in [SIGINT, SIGTERM] {
        // A second signal after the flag is set terminates immediately.
        signal_hook::flag::register_conditional_shutdown(signal, EXIT_CANCELLED, Arc::clone(stop))
            .and_then(|_| signal_hook::flag::register(signal, Arc::clone(stop)))
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to install signal handler")
                    .with_source(err)
            })?;
    }
    Ok(())
}

fn seconds(value: f64, flag: &str) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(value).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{flag} must be a non-negative number of seconds"))
            .with_source(err)
    })
}

fn summary_json(report: &RunReport, cli: &Cli, elapsed: Duration) -> Value {
    json!({
        "stop": report.stop.as_str(),
        "resumed": report.resumed,
        "pages": report.pages,
        "rows_written": report.rows_this_run,
        "rows_total": report.rows_total,
        "has_cursor": report.cursor.is_some(),
        "output": cli.output.display().to_string(),
        "checkpoint": cli.checkpoint.display().to_string(),
        "elapsed_ms": elapsed.as_millis() as u64,
    })
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Transport => "request failed".to_string(),
        ErrorKind::Decode => "malformed response page".to_string(),
        ErrorKind::Corrupt => "corrupt checkpoint".to_string(),
        ErrorKind::Busy => "output is in use".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(page) = err.page() {
        inner.insert("page".to_string(), json!(page));
    }
    if let Some(record) = err.record() {
        inner.insert("record".to_string(), json!(record));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(page) = err.page() {
        lines.push(format!("page: {page}"));
    }
    if let Some(record) = err.record() {
        lines.push(format!("record: {record}"));
    }
    if let Some(column) = err.column() {
        lines.push(format!("column: {column}"));
    }
    if let Some(status) = err.status() {
        lines.push(format!("status: {status}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    if matches!(err.kind(), ErrorKind::Transport | ErrorKind::Decode) {
        lines.push("Progress up to the last completed page is checkpointed; rerun to resume.".to_string());
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
