use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

pub fn run_command(
    program: &str,
    args: &[String],
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    run_command_with_timeout(program, args, Some(Duration::from_secs(10)), trace_id)
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    run_command_streaming(program, args, timeout, None, trace_id, |_| {})
}

pub fn run_command_streaming<F>(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
    cancel: Option<&AtomicBool>,
    trace_id: &str,
    mut on_stdout: F,
) -> Result<CommandOutput, AppError>
where
    F: FnMut(&[u8]),
{
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn command: {err}"), trace_id))?;

    // Drain both pipes off-thread; a chatty child blocks once a pipe buffer fills.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>();
    let stdout_handle = std::thread::spawn(move || {
        let mut reader = stdout;
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => {
                    if chunk_tx.send(temp[..count].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let stderr_handle = std::thread::spawn(move || {
        let mut reader = stderr;
        let mut buffer = Vec::<u8>::new();
        let _ = reader.read_to_end(&mut buffer);
        buffer
    });

    let start = Instant::now();
    let mut stdout_bytes = Vec::<u8>::new();
    let mut stdout_open = true;
    let exit_code = loop {
        if stdout_open {
            match chunk_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(chunk) => {
                    on_stdout(&chunk);
                    stdout_bytes.extend_from_slice(&chunk);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => stdout_open = false,
            }
        } else {
            std::thread::sleep(Duration::from_millis(20));
        }

        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                let cancelled = cancel.is_some_and(|flag| flag.load(Ordering::Relaxed));
                let expired = timeout.is_some_and(|limit| start.elapsed() > limit);
                if cancelled || expired {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(if cancelled {
                        AppError::cancelled("Command cancelled", trace_id)
                    } else {
                        AppError::timeout("Command timed out", trace_id)
                    });
                }
            }
            Err(err) => {
                let _ = child.kill();
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let _ = stdout_handle.join();
    for chunk in chunk_rx.try_iter() {
        on_stdout(&chunk);
        stdout_bytes.extend_from_slice(&chunk);
    }
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}
