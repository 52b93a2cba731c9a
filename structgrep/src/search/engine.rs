//! Spawns and supervises the spatch processes for one run.
//!
//! Work units here are blocking waits on an external executable, so
//! parallelism means isolated workers, not a shared-memory pool: each worker
//! thread spawns its own engine process over a contiguous slice of the file
//! list and reports back over a dedicated one-shot channel with a single
//! payload — either the captured output or a discriminated launch failure.
//! The parent collects replies in launch order (which is file-partition
//! order, never completion order) and joins every worker before returning,
//! successfully or not.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, warn};

use super::EngineSettings;
use crate::errors::{GrepError, GrepResult};

/// What a worker sends back over its one-shot channel
enum WorkerReply {
    /// Captured stdout of the engine process
    Output(String),
    /// The spawn itself failed; kind, OS error code and message travel
    /// explicitly so the parent can re-raise with the right taxonomy
    LaunchFailure {
        config: bool,
        code: Option<i32>,
        message: String,
    },
}

/// Runs the compiled script over the given files.
///
/// The file list must already be validated. Returns the concatenated raw
/// engine output, ordered by worker launch.
pub(crate) fn run(
    settings: &EngineSettings,
    script: &Path,
    files: &[PathBuf],
) -> GrepResult<String> {
    if settings.concurrency > 1 && files.len() > 1 {
        run_parallel(settings, script, files)
    } else {
        let cmd = build_command(settings, script, files);
        run_process(&cmd).map_err(|err| launch_error(is_config_failure(&err), &err, &cmd))
    }
}

fn run_parallel(settings: &EngineSettings, script: &Path, files: &[PathBuf]) -> GrepResult<String> {
    let partitions = partition(files, settings.concurrency);
    debug!(
        "Running {} spatch workers over {} files",
        partitions.len(),
        files.len()
    );

    let mut workers = Vec::with_capacity(partitions.len());
    for slice in partitions {
        let cmd = build_command(settings, script, &slice);
        let (tx, rx) = mpsc::channel();
        let worker_cmd = cmd.clone();
        let handle = thread::spawn(move || {
            let reply = match run_process(&worker_cmd) {
                Ok(output) => WorkerReply::Output(output),
                Err(err) => WorkerReply::LaunchFailure {
                    config: is_config_failure(&err),
                    code: err.raw_os_error(),
                    message: err.to_string(),
                },
            };
            // A send error means the parent already gave up; nothing to do
            let _ = tx.send(reply);
        });
        workers.push((handle, rx, cmd));
    }

    // Consume replies in launch order and join every worker before deciding
    // the outcome; one failure aborts the whole run.
    let mut output = String::new();
    let mut failure: Option<GrepError> = None;
    for (handle, rx, cmd) in workers {
        let reply = rx.recv();
        let _ = handle.join();
        match reply {
            Ok(WorkerReply::Output(chunk)) => output.push_str(&chunk),
            Ok(WorkerReply::LaunchFailure {
                config,
                code,
                message,
            }) => {
                debug!("Worker launch failure (os error {:?}): {}", code, message);
                if failure.is_none() {
                    failure = Some(launch_failure_error(config, &message, &cmd));
                }
            }
            Err(_) => {
                if failure.is_none() {
                    failure = Some(GrepError::run(
                        "spatch worker terminated without a reply",
                    ));
                }
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(output),
    }
}

/// Assembles one engine invocation:
/// `<spatch> [options] -sp_file <script> -I <include-dir> <file>...`
fn build_command(settings: &EngineSettings, script: &Path, files: &[PathBuf]) -> Vec<String> {
    let mut cmd = Vec::with_capacity(files.len() + settings.options.len() + 6);
    cmd.push(settings.spatch_cmd.clone());
    cmd.push("-all_includes".to_string());
    if settings.cpp {
        cmd.push("-c++".to_string());
    }
    cmd.extend(settings.options.iter().cloned());
    cmd.push("-sp_file".to_string());
    cmd.push(script.display().to_string());
    if let Some(first) = files.first() {
        cmd.push("-I".to_string());
        cmd.push(include_dir(first));
    }
    cmd.extend(files.iter().map(|f| f.display().to_string()));
    cmd
}

/// Include-path hint helping the engine resolve local headers: the
/// directory of the invocation's first file
fn include_dir(file: &Path) -> String {
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.display().to_string(),
        _ => ".".to_string(),
    }
}

/// Splits `items` into at most `workers` contiguous, order-preserving
/// slices of near-equal size; empty slices are dropped.
pub(crate) fn partition<T: Clone>(items: &[T], workers: usize) -> Vec<Vec<T>> {
    let splitsize = items.len() as f64 / workers as f64;
    (0..workers)
        .filter_map(|i| {
            let start = ((i as f64 * splitsize).round() as usize).min(items.len());
            let end = (((i + 1) as f64 * splitsize).round() as usize).min(items.len());
            if start < end {
                Some(items[start..end].to_vec())
            } else {
                None
            }
        })
        .collect()
}

/// Launches one engine process and captures its stdout
fn run_process(cmd: &[String]) -> io::Result<String> {
    debug!("Running: {}", cmd.join(" "));
    let output = Command::new(&cmd[0]).args(&cmd[1..]).output()?;
    if !output.status.success() {
        // spatch complains about individual files without giving up on the
        // rest; its exit status is not part of the output contract
        warn!("spatch exited with {}", output.status);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        debug!("spatch stderr: {}", stderr.trim_end());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `ENOEXEC`: the engine path names something the kernel cannot execute.
/// It has no stable `ErrorKind`, so the raw errno is matched.
#[cfg(unix)]
const ENOEXEC: i32 = 8;

/// A missing or non-executable engine is a configuration problem; any other
/// launch failure is a run problem
fn is_config_failure(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) {
        return true;
    }
    #[cfg(unix)]
    if err.raw_os_error() == Some(ENOEXEC) {
        return true;
    }
    false
}

fn launch_error(config: bool, err: &io::Error, cmd: &[String]) -> GrepError {
    launch_failure_error(config, &err.to_string(), cmd)
}

fn launch_failure_error(config: bool, message: &str, cmd: &[String]) -> GrepError {
    if config {
        GrepError::config(format!(
            "unable to run spatch command '{}': {}",
            cmd[0], message
        ))
    } else {
        GrepError::run(format!("unable to run '{}': {}", cmd.join(" "), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("f{i}.c"))).collect()
    }

    #[test]
    fn test_partition_round_trip() {
        for workers in 1..=8 {
            for count in 0..=20 {
                let items = files(count);
                let parts = partition(&items, workers);
                // Non-empty, order-preserving, concatenation reproduces input
                let rebuilt: Vec<PathBuf> = parts.iter().flatten().cloned().collect();
                assert_eq!(rebuilt, items, "workers={workers} count={count}");
                assert!(
                    parts.iter().all(|p| !p.is_empty()),
                    "empty slice for workers={workers} count={count}"
                );
                assert!(parts.len() <= workers);
                if count >= workers {
                    assert_eq!(parts.len(), workers);
                }
            }
        }
    }

    #[test]
    fn test_partition_near_equal_sizes() {
        let parts = partition(&files(10), 3);
        let sizes: Vec<usize> = parts.iter().map(|p| p.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().all(|&s| s == 3 || s == 4));
    }

    #[test]
    fn test_build_command_shape() {
        let settings = EngineSettings {
            spatch_cmd: "spatch".to_string(),
            options: vec!["-timeout".to_string(), "60".to_string()],
            cpp: true,
            concurrency: 1,
            verbose: false,
        };
        let cmd = build_command(
            &settings,
            Path::new("/tmp/script.cocci"),
            &[PathBuf::from("src/a.c"), PathBuf::from("src/b.c")],
        );
        assert_eq!(
            cmd,
            vec![
                "spatch",
                "-all_includes",
                "-c++",
                "-timeout",
                "60",
                "-sp_file",
                "/tmp/script.cocci",
                "-I",
                "src",
                "src/a.c",
                "src/b.c",
            ]
        );
    }

    #[test]
    fn test_include_dir_for_bare_filename() {
        assert_eq!(include_dir(Path::new("a.c")), ".");
        assert_eq!(include_dir(Path::new("src/net/a.c")), "src/net");
    }

    #[test]
    fn test_launch_classification() {
        assert!(is_config_failure(&io::Error::from(
            io::ErrorKind::NotFound
        )));
        assert!(is_config_failure(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(!is_config_failure(&io::Error::from(
            io::ErrorKind::InvalidInput
        )));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_format_error_is_config_failure() {
        assert!(is_config_failure(&io::Error::from_raw_os_error(ENOEXEC)));
    }

    #[test]
    fn test_sequential_missing_engine_is_config_error() {
        let settings = EngineSettings {
            spatch_cmd: "/nonexistent/spatch".to_string(),
            ..EngineSettings::default()
        };
        let result = run(&settings, Path::new("/tmp/script.cocci"), &files(1));
        assert!(matches!(result, Err(GrepError::Config(_))));
    }

    #[test]
    fn test_parallel_missing_engine_is_config_error() {
        // Exercises the worker channel path: the failure is produced inside
        // a worker thread and re-raised by the parent
        let settings = EngineSettings {
            spatch_cmd: "/nonexistent/spatch".to_string(),
            concurrency: 2,
            ..EngineSettings::default()
        };
        let result = run(&settings, Path::new("/tmp/script.cocci"), &files(4));
        assert!(matches!(result, Err(GrepError::Config(_))));
    }
}
