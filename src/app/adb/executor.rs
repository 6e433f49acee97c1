use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::app::adb::receiver::OutputReceiver;
use crate::app::adb::transport::DeviceTransport;
use crate::app::error::AppError;
use crate::app::models::DeviceIdentity;

pub fn format_command(template: &str, args: &[&str], trace_id: &str) -> Result<String, AppError> {
    let mut out = String::with_capacity(template.len());
    let mut next_arg = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut index_text = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    index_text.push(inner);
                }
                if !closed {
                    return Err(AppError::invalid_configuration(
                        format!("Unclosed placeholder in command template: {template}"),
                        trace_id,
                    ));
                }
                let index = if index_text.trim().is_empty() {
                    let index = next_arg;
                    next_arg += 1;
                    index
                } else {
                    index_text.trim().parse::<usize>().map_err(|_| {
                        AppError::invalid_configuration(
                            format!("Invalid placeholder {{{index_text}}} in command template"),
                            trace_id,
                        )
                    })?
                };
                let arg = args.get(index).ok_or_else(|| {
                    AppError::invalid_configuration(
                        format!(
                            "Command template needs argument {index} but only {} given",
                            args.len()
                        ),
                        trace_id,
                    )
                })?;
                out.push_str(arg);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

pub fn wrap_elevated(command: &str) -> String {
    // The outer shell must hand the command to `su` untouched.
    let mut escaped = String::with_capacity(command.len() + 8);
    for ch in command.chars() {
        if matches!(ch, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!("su -c \"{escaped}\"")
}

#[derive(Clone)]
pub struct CommandExecutor {
    device: DeviceIdentity,
    transport: Arc<dyn DeviceTransport>,
    default_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(
        device: DeviceIdentity,
        transport: Arc<dyn DeviceTransport>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            device,
            transport,
            default_timeout,
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    pub fn run(
        &self,
        template: &str,
        args: &[&str],
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let command = format_command(template, args, trace_id)?;
        self.execute(&command, receiver, Some(timeout.unwrap_or(self.default_timeout)), trace_id)
    }

    pub fn run_elevated(
        &self,
        template: &str,
        args: &[&str],
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let command = wrap_elevated(&format_command(template, args, trace_id)?);
        self.execute(&command, receiver, timeout, trace_id)
    }

    fn execute(
        &self,
        command: &str,
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<(), AppError> {
        debug!(
            trace_id = %trace_id,
            serial = %self.device.serial(),
            command = %command,
            timeout_ms = ?timeout.map(|value| value.as_millis()),
            "executing shell command"
        );
        self.transport
            .execute(&self.device, command, receiver, timeout, trace_id)
    }
}
