//! The worker side of the compiler pool protocol.
//!
//! A worker reads requests from stdin, one per line, runs the named job and
//! answers with the job's output followed by [`SUCCESS`] or [`ERROR`]. Only
//! the functions in the registry can be called.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::compilers::{check_interrupt, clear_interrupt, designspace, ttx, ufo, CompileError};
pub use crate::compilers::{interrupted, request_interrupt};
pub use crate::pool::{ERROR, READY, SUCCESS};

pub const COMPILE_UFO: &str = "fontgoggles.compilers.ufo.compile_ufo_to_path";
pub const COMPILE_DESIGNSPACE: &str =
    "fontgoggles.compilers.designspace.compile_designspace_to_path";
pub const COMPILE_TTX: &str = "fontgoggles.compilers.ttx.compile_ttx_to_path";
pub const SLEEP: &str = "fontgoggles.worker.sleep";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Could not parse request: {0}")]
    BadRequest(#[from] shell_words::ParseError),

    #[error("Empty request")]
    EmptyRequest,

    #[error("Unknown function {0:?}")]
    UnknownFunction(String),

    #[error("{func}: {reason}")]
    BadArguments { func: &'static str, reason: String },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

type Job = fn(&[String], &mut dyn Write) -> Result<(), JobError>;

const REGISTRY: [(&str, Job); 4] = [
    (COMPILE_UFO, run_compile_ufo),
    (COMPILE_DESIGNSPACE, run_compile_designspace),
    (COMPILE_TTX, run_compile_ttx),
    (SLEEP, run_sleep),
];

fn lookup(name: &str) -> Option<Job> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, job)| *job)
}

fn arity(
    func: &'static str,
    args: &[String],
    required: usize,
    optional: usize,
) -> Result<(), JobError> {
    if args.len() < required || args.len() > required + optional {
        return Err(JobError::BadArguments {
            func,
            reason: format!("expected {required} argument(s), got {}", args.len()),
        });
    }
    Ok(())
}

fn run_compile_ufo(args: &[String], output: &mut dyn Write) -> Result<(), JobError> {
    arity(COMPILE_UFO, args, 2, 1)?;
    let layer = args.get(2).map(String::as_str);
    ufo::compile_ufo_to_path(Path::new(&args[0]), Path::new(&args[1]), layer, output)?;
    Ok(())
}

fn run_compile_designspace(args: &[String], output: &mut dyn Write) -> Result<(), JobError> {
    arity(COMPILE_DESIGNSPACE, args, 3, 1)?;
    let exclude = args
        .get(3)
        .map(|s| designspace::parse_exclude(s))
        .unwrap_or_default();
    designspace::compile_designspace_to_path(
        Path::new(&args[0]),
        Path::new(&args[1]),
        Path::new(&args[2]),
        &exclude,
        output,
    )?;
    Ok(())
}

fn run_compile_ttx(args: &[String], output: &mut dyn Write) -> Result<(), JobError> {
    arity(COMPILE_TTX, args, 2, 0)?;
    ttx::compile_ttx_to_path(Path::new(&args[0]), Path::new(&args[1]), output)?;
    Ok(())
}

fn run_sleep(args: &[String], output: &mut dyn Write) -> Result<(), JobError> {
    arity(SLEEP, args, 1, 0)?;
    let seconds: f64 = args[0].parse().map_err(|_| JobError::BadArguments {
        func: SLEEP,
        reason: format!("{:?} is not a number of seconds", args[0]),
    })?;
    sleep(Duration::from_secs_f64(seconds.max(0.0)), output)?;
    Ok(())
}

/// Sleep for `duration`, waking up early when interrupted.
pub fn sleep(duration: Duration, output: &mut dyn Write) -> Result<(), CompileError> {
    let deadline = Instant::now() + duration;
    writeln!(output, "sleeping {:.3}s", duration.as_secs_f64())?;
    while Instant::now() < deadline {
        check_interrupt()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_millis(10)));
    }
    check_interrupt()?;
    writeln!(output, "done sleeping")?;
    Ok(())
}

/// Run one request line. Returns whether the job failed; failures are
/// described in `output` before the sentinel.
pub fn run_request(request: &str, output: &mut dyn Write) -> io::Result<bool> {
    clear_interrupt();
    let result = shell_words::split(request)
        .map_err(JobError::from)
        .and_then(|tokens| {
            let (func, args) = tokens.split_first().ok_or(JobError::EmptyRequest)?;
            let job = lookup(func).ok_or_else(|| JobError::UnknownFunction(func.clone()))?;
            log::info!("Running {func}");
            job(args, output)?;
            check_interrupt()?;
            Ok(())
        });
    let failed = match result {
        Ok(()) => {
            writeln!(output, "{SUCCESS}")?;
            false
        }
        Err(e) => {
            log::warn!("Job failed: {e}");
            writeln!(output, "{e}")?;
            writeln!(output, "{ERROR}")?;
            true
        }
    };
    output.flush()?;
    Ok(failed)
}

/// Tell the pool that interrupts are handled from now on.
pub fn announce_ready(output: &mut impl Write) -> io::Result<()> {
    writeln!(output, "{READY}")?;
    output.flush()
}

/// Serve requests until `input` is exhausted.
pub fn serve(input: impl BufRead, mut output: impl Write) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        run_request(&line, &mut output)?;
    }
    log::debug!("Input closed, exiting");
    Ok(())
}

/// Turn SIGINT into a job interruption instead of process termination.
#[cfg(unix)]
pub fn install_interrupt_handler(runtime: &tokio::runtime::Runtime) -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let _guard = runtime.enter();
    let mut interrupts = signal(SignalKind::interrupt())?;
    runtime.spawn(async move {
        while interrupts.recv().await.is_some() {
            log::debug!("Interrupt received");
            request_interrupt();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install_interrupt_handler(_runtime: &tokio::runtime::Runtime) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn serve_str(input: &str) -> Vec<String> {
        let mut output = vec![];
        serve(input.as_bytes(), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn ready_line() {
        let mut output = vec![];
        announce_ready(&mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), format!("{READY}\n"));
    }

    #[test]
    fn sleep_succeeds() {
        let lines = serve_str("fontgoggles.worker.sleep 0\n");
        assert_eq!(lines, vec!["sleeping 0.000s", "done sleeping", SUCCESS]);
    }

    #[rstest]
    #[case("os.system 'rm -rf /'", "Unknown function \"os.system\"")]
    #[case("fontgoggles.worker.sleep", "fontgoggles.worker.sleep: expected 1 argument(s), got 0")]
    #[case("fontgoggles.worker.sleep soon", "fontgoggles.worker.sleep: \"soon\" is not a number of seconds")]
    fn rejected_requests(#[case] request: &str, #[case] message: &str) {
        let lines = serve_str(&format!("{request}\n"));
        assert_eq!(lines, vec![message.to_string(), ERROR.to_string()]);
    }

    #[test]
    fn unbalanced_quotes_are_an_error() {
        let lines = serve_str("fontgoggles.worker.sleep '1\n");
        assert_eq!(lines.last().map(String::as_str), Some(ERROR));
    }

    #[test]
    fn jobs_keep_running_after_errors() {
        let lines = serve_str("nope\n\nfontgoggles.worker.sleep 0\n");
        assert_eq!(lines.iter().filter(|l| *l == ERROR).count(), 1);
        assert_eq!(lines.last().map(String::as_str), Some(SUCCESS));
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ttx = dir.path().join("missing.ttx");
        let out = dir.path().join("out.ttf");
        let request = shell_words::join([
            COMPILE_TTX,
            &*ttx.to_string_lossy(),
            &*out.to_string_lossy(),
        ]);
        let mut output = vec![];
        assert!(run_request(&request, &mut output).unwrap());
        assert!(!out.exists());
    }
}
