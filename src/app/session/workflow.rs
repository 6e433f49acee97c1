use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use tracing::{info, warn};

use crate::app::adb::executor::CommandExecutor;
use crate::app::adb::receiver::{OutputReceiver, ReceiverOutput};
use crate::app::adb::transport::ProgressSink;
use crate::app::config::InstallSettings;
use crate::app::error::AppError;
use crate::app::models::{DeviceState, InstallOutcome, InstallReport, MountPoint};
use crate::app::session::cache::MetadataCache;

#[derive(Debug, Clone, Copy)]
pub enum MountTarget<'a> {
    Name(&'a str),
    Point(&'a MountPoint),
}

impl<'a> From<&'a str> for MountTarget<'a> {
    fn from(name: &'a str) -> Self {
        MountTarget::Name(name)
    }
}

impl<'a> From<&'a MountPoint> for MountTarget<'a> {
    fn from(point: &'a MountPoint) -> Self {
        MountTarget::Point(point)
    }
}

pub fn remote_package_path(
    tmp_dir: &str,
    local_path: &Path,
    trace_id: &str,
) -> Result<String, AppError> {
    let file_name = local_path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            AppError::invalid_configuration(
                format!("Package path has no file name: {}", local_path.display()),
                trace_id,
            )
        })?;
    Ok(format!("{}/{}", tmp_dir.trim_end_matches('/'), file_name))
}

pub struct WorkflowOrchestrator {
    executor: CommandExecutor,
    install: InstallSettings,
    // Two installs of the same file name would share one remote temp path.
    install_lock: Mutex<()>,
}

impl WorkflowOrchestrator {
    pub fn new(executor: CommandExecutor, install: InstallSettings) -> Self {
        Self {
            executor,
            install,
            install_lock: Mutex::new(()),
        }
    }

    fn serial(&self) -> &str {
        self.executor.device().serial()
    }

    fn install_guard(&self) -> MutexGuard<'_, ()> {
        self.install_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: Option<ProgressSink<'_>>,
        cancel: &AtomicBool,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let mut file = File::open(local_path).map_err(|err| {
            AppError::not_found(
                format!("Failed to open {}: {err}", local_path.display()),
                trace_id,
            )
        })?;
        let modified = file
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or_else(|_| SystemTime::now());

        let mut sync = self
            .executor
            .transport()
            .open(self.executor.device(), trace_id)
            .map_err(|err| {
                AppError::transfer_unavailable(
                    format!("File transfer unavailable for {}: {}", self.serial(), err.error),
                    trace_id,
                )
            })?;
        sync.push(
            &mut file,
            remote_path,
            self.install.file_mode,
            modified,
            progress,
            cancel,
            trace_id,
        )?;
        info!(
            trace_id = %trace_id,
            serial = %self.serial(),
            remote_path = %remote_path,
            "pushed file"
        );
        Ok(())
    }

    fn run_package_manager(
        &self,
        template: &str,
        args: &[&str],
        trace_id: &str,
    ) -> Result<InstallOutcome, AppError> {
        let mut receiver = OutputReceiver::install();
        self.executor
            .run(template, args, &mut receiver, None, trace_id)?;
        match receiver.finish() {
            ReceiverOutput::Install(outcome) => Ok(outcome),
            _ => Err(AppError::protocol("unexpected install receiver output", trace_id)),
        }
    }

    fn outcome_to_result(outcome: InstallOutcome, trace_id: &str) -> Result<(), AppError> {
        if outcome.error_message.is_empty() {
            Ok(())
        } else {
            Err(AppError::installation_failed(outcome.error_message, trace_id))
        }
    }

    pub fn install_remote_package(
        &self,
        remote_path: &str,
        reinstall: bool,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let template = if reinstall {
            "pm install -r \"{}\""
        } else {
            "pm install \"{}\""
        };
        let outcome = self.run_package_manager(template, &[remote_path], trace_id)?;
        Self::outcome_to_result(outcome, trace_id)
    }

    pub fn remove_remote_package(&self, remote_path: &str, trace_id: &str) -> Result<(), AppError> {
        let mut receiver = OutputReceiver::null();
        self.executor
            .run("rm \"{}\"", &[remote_path], &mut receiver, None, trace_id)
    }

    pub fn install_package(
        &self,
        local_path: &Path,
        reinstall: bool,
        progress: Option<ProgressSink<'_>>,
        cancel: &AtomicBool,
        trace_id: &str,
    ) -> Result<InstallReport, AppError> {
        let remote_path = remote_package_path(&self.install.remote_tmp_dir, local_path, trace_id)?;
        let _guard = self.install_guard();

        self.push_file(local_path, &remote_path, progress, cancel, trace_id)?;

        let installed = self.install_remote_package(&remote_path, reinstall, trace_id);

        let cleanup_error = match self.remove_remote_package(&remote_path, trace_id) {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    serial = %self.serial(),
                    remote_path = %remote_path,
                    error = %err,
                    "failed to remove pushed package"
                );
                Some(err.error)
            }
        };

        installed?;
        info!(
            trace_id = %trace_id,
            serial = %self.serial(),
            local_path = %local_path.display(),
            reinstall,
            "package installed"
        );
        Ok(InstallReport {
            remote_path,
            cleanup_error,
        })
    }

    pub fn uninstall_package(&self, package_name: &str, trace_id: &str) -> Result<(), AppError> {
        if package_name.trim().is_empty() {
            return Err(AppError::invalid_configuration(
                "package_name is required",
                trace_id,
            ));
        }
        let outcome = self.run_package_manager("pm uninstall {}", &[package_name], trace_id)?;
        Self::outcome_to_result(outcome, trace_id)
    }

    pub fn create_forward(&self, local_port: u16, remote_port: u16, trace_id: &str) -> bool {
        match self.executor.transport().create_forward(
            self.executor.device(),
            local_port,
            remote_port,
            trace_id,
        ) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    serial = %self.serial(),
                    local_port,
                    remote_port,
                    error = %err,
                    "failed to create port forward"
                );
                false
            }
        }
    }

    pub fn remove_forward(&self, local_port: u16, trace_id: &str) -> bool {
        match self
            .executor
            .transport()
            .remove_forward(self.executor.device(), local_port, trace_id)
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    serial = %self.serial(),
                    local_port,
                    error = %err,
                    "failed to remove port forward"
                );
                false
            }
        }
    }

    pub fn remount(
        &self,
        target: MountTarget<'_>,
        read_only: bool,
        state: DeviceState,
        cache: &MetadataCache,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let mount = match target {
            MountTarget::Point(point) => point.clone(),
            MountTarget::Name(name) => cache.mount_points().get(name).cloned().ok_or_else(|| {
                AppError::invalid_configuration(
                    format!("Mount point not found: {name}"),
                    trace_id,
                )
            })?,
        };
        let mode = if read_only { "ro" } else { "rw" };
        let mut receiver = OutputReceiver::null();
        let result = self.executor.run(
            "mount -o {},remount -t {} {} {}",
            &[mode, &mount.fs_type, &mount.block_device, &mount.name],
            &mut receiver,
            None,
            trace_id,
        );
        cache.refresh_mount_points(state, &self.executor, trace_id);
        result
    }
}
