use std::io::Read;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

use crate::app::adb::receiver::OutputReceiver;
use crate::app::error::AppError;
use crate::app::models::DeviceIdentity;

pub type ProgressSink<'a> = &'a (dyn Fn(u8) + Send + Sync);

pub trait ShellTransport: Send + Sync {
    fn execute(
        &self,
        device: &DeviceIdentity,
        command: &str,
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<(), AppError>;
}

pub trait ForwardTransport: Send + Sync {
    fn create_forward(
        &self,
        device: &DeviceIdentity,
        local_port: u16,
        remote_port: u16,
        trace_id: &str,
    ) -> Result<(), AppError>;

    fn remove_forward(
        &self,
        device: &DeviceIdentity,
        local_port: u16,
        trace_id: &str,
    ) -> Result<(), AppError>;
}

pub trait SyncSession: Send {
    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        local: &mut dyn Read,
        remote_path: &str,
        mode: u32,
        modified: SystemTime,
        progress: Option<ProgressSink<'_>>,
        cancel: &AtomicBool,
        trace_id: &str,
    ) -> Result<(), AppError>;
}

pub trait FileTransferService: Send + Sync {
    fn open(&self, device: &DeviceIdentity, trace_id: &str)
        -> Result<Box<dyn SyncSession>, AppError>;
}

pub trait DeviceTransport: ShellTransport + ForwardTransport + FileTransferService {}

impl<T> DeviceTransport for T where T: ShellTransport + ForwardTransport + FileTransferService {}
