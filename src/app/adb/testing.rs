use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

use crate::app::adb::receiver::OutputReceiver;
use crate::app::adb::transport::{
    FileTransferService, ForwardTransport, ProgressSink, ShellTransport, SyncSession,
};
use crate::app::error::{AppError, ErrorCode};
use crate::app::models::DeviceIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCall {
    pub serial: String,
    pub command: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCall {
    pub remote_path: String,
    pub mode: u32,
    pub modified: SystemTime,
    pub bytes: Vec<u8>,
}

type Generator = Arc<dyn Fn(usize) -> String + Send + Sync>;

#[derive(Clone)]
enum Reply {
    Output(String),
    Fail(ErrorCode, String),
    // Called with the zero-based count of earlier calls on the same prefix.
    Generated(Generator),
}

#[derive(Default)]
struct Gate {
    held: Mutex<Vec<String>>,
    released: Condvar,
}

#[derive(Default)]
struct PushState {
    calls: Vec<PushCall>,
    failure: Option<(ErrorCode, String)>,
}

#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<Vec<(String, Reply)>>,
    shell_calls: Mutex<Vec<ShellCall>>,
    forward_script: Mutex<VecDeque<bool>>,
    forward_calls: Mutex<Vec<String>>,
    sync_unavailable: AtomicBool,
    pushes: Arc<Mutex<PushState>>,
    gate: Gate,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, prefix: &str, output: &str) {
        self.replies
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::Output(output.to_string())));
    }

    pub fn fail_shell(&self, prefix: &str, code: ErrorCode, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::Fail(code, message.to_string())));
    }

    pub fn reply_with<F>(&self, prefix: &str, generate: F)
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.replies
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::Generated(Arc::new(generate))));
    }

    // Matching commands block after being recorded until `release` is called.
    pub fn hold(&self, prefix: &str) {
        self.gate.held.lock().unwrap().push(prefix.to_string());
    }

    pub fn release(&self) {
        self.gate.held.lock().unwrap().clear();
        self.gate.released.notify_all();
    }

    pub fn shell_calls(&self) -> Vec<ShellCall> {
        self.shell_calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.shell_calls()
            .into_iter()
            .map(|call| call.command)
            .collect()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    pub fn script_forwards(&self, results: &[bool]) {
        self.forward_script.lock().unwrap().extend(results.iter().copied());
    }

    pub fn forward_calls(&self) -> Vec<String> {
        self.forward_calls.lock().unwrap().clone()
    }

    pub fn set_sync_available(&self, available: bool) {
        self.sync_unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn fail_push(&self, code: ErrorCode, message: &str) {
        self.pushes.lock().unwrap().failure = Some((code, message.to_string()));
    }

    pub fn pushes(&self) -> Vec<PushCall> {
        self.pushes.lock().unwrap().calls.clone()
    }

    fn next_forward_result(&self, call: String, trace_id: &str) -> Result<(), AppError> {
        self.forward_calls.lock().unwrap().push(call);
        let ok = self.forward_script.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(AppError::protocol("cannot bind listener", trace_id))
        }
    }
}

impl ShellTransport for FakeTransport {
    fn execute(
        &self,
        device: &DeviceIdentity,
        command: &str,
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let matched = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .cloned();
        let ordinal = {
            let mut calls = self.shell_calls.lock().unwrap();
            let earlier = matched.as_ref().map_or(0, |(prefix, _)| {
                calls
                    .iter()
                    .filter(|call| call.command.starts_with(prefix.as_str()))
                    .count()
            });
            calls.push(ShellCall {
                serial: device.serial().to_string(),
                command: command.to_string(),
                timeout,
            });
            earlier
        };

        let mut held = self.gate.held.lock().unwrap();
        while held.iter().any(|prefix| command.starts_with(prefix.as_str())) {
            held = self.gate.released.wait(held).unwrap();
        }
        drop(held);

        match matched.map(|(_, reply)| reply) {
            Some(Reply::Output(output)) => {
                receiver.add_output(output.as_bytes());
                receiver.flush();
                Ok(())
            }
            Some(Reply::Generated(generate)) => {
                // Line by line so concurrent readers get a chance to interleave.
                for line in generate(ordinal).split_inclusive('\n') {
                    receiver.add_output(line.as_bytes());
                    std::thread::yield_now();
                }
                receiver.flush();
                Ok(())
            }
            Some(Reply::Fail(code, message)) => Err(AppError::new(code, message, trace_id)),
            None => Ok(()),
        }
    }
}

impl ForwardTransport for FakeTransport {
    fn create_forward(
        &self,
        device: &DeviceIdentity,
        local_port: u16,
        remote_port: u16,
        trace_id: &str,
    ) -> Result<(), AppError> {
        self.next_forward_result(
            format!("{} tcp:{local_port} tcp:{remote_port}", device.serial()),
            trace_id,
        )
    }

    fn remove_forward(
        &self,
        device: &DeviceIdentity,
        local_port: u16,
        trace_id: &str,
    ) -> Result<(), AppError> {
        self.next_forward_result(
            format!("{} --remove tcp:{local_port}", device.serial()),
            trace_id,
        )
    }
}

struct FakeSyncSession {
    pushes: Arc<Mutex<PushState>>,
}

impl SyncSession for FakeSyncSession {
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
        if cancel.load(Ordering::SeqCst) {
            return Err(AppError::cancelled("push cancelled", trace_id));
        }
        let mut state = self.pushes.lock().unwrap();
        if let Some((code, message)) = state.failure.clone() {
            return Err(AppError::new(code, message, trace_id));
        }
        let mut bytes = Vec::new();
        local
            .read_to_end(&mut bytes)
            .map_err(|err| AppError::system(err.to_string(), trace_id))?;
        if let Some(progress) = progress {
            progress(100);
        }
        state.calls.push(PushCall {
            remote_path: remote_path.to_string(),
            mode,
            modified,
            bytes,
        });
        Ok(())
    }
}

impl FileTransferService for FakeTransport {
    fn open(
        &self,
        _device: &DeviceIdentity,
        trace_id: &str,
    ) -> Result<Box<dyn SyncSession>, AppError> {
        if self.sync_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::protocol("sync service refused", trace_id));
        }
        Ok(Box::new(FakeSyncSession {
            pushes: Arc::clone(&self.pushes),
        }))
    }
}
