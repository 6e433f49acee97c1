use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::app::adb::parse::parse_adb_devices;
use crate::app::adb::receiver::OutputReceiver;
use crate::app::adb::runner::{
    run_command, run_command_streaming, run_command_with_timeout, CommandOutput,
};
use crate::app::adb::transfer::PushProgressTracker;
use crate::app::adb::transport::{
    FileTransferService, ForwardTransport, ProgressSink, ShellTransport, SyncSession,
};
use crate::app::error::AppError;
use crate::app::models::{DeviceIdentity, DeviceSummary};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
const COPY_CHUNK: usize = 64 * 1024;

pub fn resolve_adb_program(config_command_path: &str) -> String {
    let trimmed = config_command_path.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|quote| {
            trimmed
                .strip_prefix(*quote)
                .and_then(|inner| inner.strip_suffix(*quote))
        })
        .unwrap_or(trimmed)
        .trim();
    if unquoted.is_empty() {
        "adb".to_string()
    } else {
        unquoted.to_string()
    }
}

pub fn classify_adb_failure(output: &CommandOutput, trace_id: &str) -> Option<AppError> {
    if output.exit_code == Some(0) {
        return None;
    }
    let stderr = output.stderr.trim();
    if let Some(line) = stderr
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("error:") || line.starts_with("adb: error"))
    {
        return Some(AppError::protocol(line.to_string(), trace_id));
    }
    let tail = output
        .stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let message = if stderr.is_empty() { tail } else { stderr };
    let lower = message.to_lowercase();
    if output.exit_code == Some(127) || lower.contains("not found") {
        return Some(AppError::not_found(message.to_string(), trace_id));
    }
    if output.exit_code == Some(126)
        || lower.contains("permission denied")
        || lower.contains("not allowed")
    {
        return Some(AppError::permission_denied(message.to_string(), trace_id));
    }
    None
}

pub fn shell_exit_error(
    output: &CommandOutput,
    receiver: &OutputReceiver,
    trace_id: &str,
) -> Option<AppError> {
    if let Some(err) = classify_adb_failure(output, trace_id) {
        return Some(err);
    }
    if output.exit_code == Some(0) || receiver.judges_exit_status() {
        return None;
    }
    let detail = [output.stderr.as_str(), output.stdout.as_str()]
        .into_iter()
        .find_map(|text| {
            text.lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
        })
        .unwrap_or("no output");
    Some(AppError::protocol(
        format!("shell command exited with {:?}: {detail}", output.exit_code),
        trace_id,
    ))
}

#[derive(Debug, Clone)]
pub struct AdbCliTransport {
    program: String,
}

impl AdbCliTransport {
    pub fn new(config_command_path: &str) -> Self {
        Self {
            program: resolve_adb_program(config_command_path),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn list_devices(&self, trace_id: &str) -> Result<Vec<DeviceSummary>, AppError> {
        let args = vec!["devices".to_string(), "-l".to_string()];
        let output = run_command(&self.program, &args, trace_id)?;
        if output.exit_code.unwrap_or_default() != 0 {
            return Err(AppError::protocol(
                format!("adb devices failed: {}", output.stderr.trim()),
                trace_id,
            ));
        }
        Ok(parse_adb_devices(&output.stdout))
    }

    fn device_args(device: &DeviceIdentity, rest: &[&str]) -> Vec<String> {
        let mut args = vec!["-s".to_string(), device.serial().to_string()];
        args.extend(rest.iter().map(|item| item.to_string()));
        args
    }

    fn run_checked(
        &self,
        args: &[String],
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let output = run_command_with_timeout(&self.program, args, timeout, trace_id)?;
        if let Some(err) = classify_adb_failure(&output, trace_id) {
            return Err(err);
        }
        if output.exit_code.unwrap_or_default() != 0 {
            return Err(AppError::protocol(
                format!(
                    "adb {} exited with {:?}: {}",
                    args.join(" "),
                    output.exit_code,
                    output.stderr.trim()
                ),
                trace_id,
            ));
        }
        Ok(output)
    }
}

impl ShellTransport for AdbCliTransport {
    fn execute(
        &self,
        device: &DeviceIdentity,
        command: &str,
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let args = Self::device_args(device, &["shell", command]);
        let output =
            run_command_streaming(&self.program, &args, timeout, None, trace_id, |chunk| {
                receiver.add_output(chunk)
            })?;
        receiver.flush();
        match shell_exit_error(&output, receiver, trace_id) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ForwardTransport for AdbCliTransport {
    fn create_forward(
        &self,
        device: &DeviceIdentity,
        local_port: u16,
        remote_port: u16,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let local = format!("tcp:{local_port}");
        let remote = format!("tcp:{remote_port}");
        let args = Self::device_args(device, &["forward", &local, &remote]);
        self.run_checked(&args, Some(FORWARD_TIMEOUT), trace_id)
            .map(|_| ())
    }

    fn remove_forward(
        &self,
        device: &DeviceIdentity,
        local_port: u16,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let local = format!("tcp:{local_port}");
        let args = Self::device_args(device, &["forward", "--remove", &local]);
        self.run_checked(&args, Some(FORWARD_TIMEOUT), trace_id)
            .map(|_| ())
    }
}

pub struct CliSyncSession {
    transport: AdbCliTransport,
    device: DeviceIdentity,
}

impl CliSyncSession {
    fn spool(
        local: &mut dyn Read,
        cancel: &AtomicBool,
        trace_id: &str,
    ) -> Result<NamedTempFile, AppError> {
        let mut spool = NamedTempFile::new().map_err(|err| {
            AppError::system(format!("Failed to create temp file: {err}"), trace_id)
        })?;
        let mut buffer = vec![0u8; COPY_CHUNK];
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(AppError::cancelled("Push cancelled", trace_id));
            }
            let count = match local.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(AppError::system(
                        format!("Failed to read local file: {err}"),
                        trace_id,
                    ))
                }
            };
            spool.write_all(&buffer[..count]).map_err(|err| {
                AppError::system(format!("Failed to write temp file: {err}"), trace_id)
            })?;
        }
        spool.flush().map_err(|err| {
            AppError::system(format!("Failed to flush temp file: {err}"), trace_id)
        })?;
        Ok(spool)
    }

    fn shell_checked(&self, command: &str, trace_id: &str) -> Result<(), AppError> {
        let mut receiver = OutputReceiver::null();
        self.transport.execute(
            &self.device,
            command,
            &mut receiver,
            Some(FORWARD_TIMEOUT),
            trace_id,
        )
    }
}

impl SyncSession for CliSyncSession {
    fn push(
        &mut self,
        local: &mut dyn Read,
        remote_path: &str,
        mode: u32,
        modified: SystemTime,
        progress: Option<ProgressSink<'_>>,
        cancel: &AtomicBool,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let spool = Self::spool(local, cancel, trace_id)?;
        let local_path = spool.path().to_string_lossy().to_string();
        let args =
            AdbCliTransport::device_args(&self.device, &["push", "-p", &local_path, remote_path]);

        let mut tracker = PushProgressTracker::new();
        let output = run_command_streaming(
            &self.transport.program,
            &args,
            None,
            Some(cancel),
            trace_id,
            |chunk| {
                tracker.push_chunk(chunk, |percent| {
                    if let Some(progress) = progress {
                        progress(percent);
                    }
                })
            },
        )?;
        if let Some(err) = classify_adb_failure(&output, trace_id) {
            return Err(err);
        }
        if output.exit_code.unwrap_or_default() != 0 {
            return Err(AppError::protocol(
                format!("adb push failed: {}", output.stderr.trim()),
                trace_id,
            ));
        }
        if let Some(progress) = progress {
            if tracker.last_reported() != Some(100) {
                progress(100);
            }
        }

        self.shell_checked(&format!("chmod {mode:o} \"{remote_path}\""), trace_id)?;
        let seconds = modified
            .duration_since(UNIX_EPOCH)
            .map(|value| value.as_secs())
            .unwrap_or_default();
        let touch = format!("touch -m -d @{seconds} \"{remote_path}\"");
        if let Err(err) = self.shell_checked(&touch, trace_id) {
            // Old toolbox builds have no `touch -d`; the file itself is in place.
            debug!(trace_id = %trace_id, error = %err, "could not set remote mtime");
        }
        Ok(())
    }
}

impl FileTransferService for AdbCliTransport {
    fn open(
        &self,
        device: &DeviceIdentity,
        trace_id: &str,
    ) -> Result<Box<dyn SyncSession>, AppError> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 && !program.is_file() {
            warn!(trace_id = %trace_id, program = %self.program, "adb executable missing");
            return Err(AppError::not_found(
                "ADB executable not found at the configured path",
                trace_id,
            ));
        }
        let args = Self::device_args(device, &["get-state"]);
        let output =
            run_command_with_timeout(&self.program, &args, Some(FORWARD_TIMEOUT), trace_id)?;
        if output.stdout.trim() != "device" {
            return Err(AppError::protocol(
                format!(
                    "device {} not ready for sync: {}",
                    device.serial(),
                    output.stderr.trim()
                ),
                trace_id,
            ));
        }
        Ok(Box::new(CliSyncSession {
            transport: self.clone(),
            device: device.clone(),
        }))
    }
}
