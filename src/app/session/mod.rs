pub mod cache;
pub mod events;
pub mod workflow;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::app::adb::executor::CommandExecutor;
use crate::app::adb::receiver::OutputReceiver;
use crate::app::adb::transport::{DeviceTransport, ProgressSink, SyncSession};
use crate::app::config::{SessionConfig, TimeoutSettings};
use crate::app::error::AppError;
use crate::app::models::{
    BatteryReading, Capability, ClientProcess, DeviceIdentity, DeviceState, InstallReport,
    MountPoint,
};

use cache::{EnvironmentMap, MetadataCache, MountMap, PropertyMap, Refresh};
use events::{EventHub, EventKind, ListenerId, SessionEvent};
use workflow::{MountTarget, WorkflowOrchestrator};

pub const PROP_API_LEVEL: &str = "ro.build.version.sdk";
pub const PROP_BUILD_FINGERPRINT: &str = "ro.build.fingerprint";
pub const PROP_AVD_NAME: &str = "ro.kernel.qemu.avd_name";
const BUILD_PROPERTY_PREFIX: &str = "ro.build.";
const LANGUAGE_PROPERTIES: [&str; 2] = ["persist.sys.language", "ro.product.locale.language"];
const REGION_PROPERTIES: [&str; 2] = ["persist.sys.country", "ro.product.locale.region"];

fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

fn build_entries(map: &PropertyMap) -> Vec<(&String, &String)> {
    let mut entries: Vec<(&String, &String)> = map
        .iter()
        .filter(|(key, _)| key.starts_with(BUILD_PROPERTY_PREFIX))
        .collect();
    entries.sort();
    entries
}

fn build_entries_differ(previous: &PropertyMap, current: &PropertyMap) -> bool {
    build_entries(previous) != build_entries(current)
}

pub struct DeviceSession {
    identity: DeviceIdentity,
    state: RwLock<DeviceState>,
    avd_name: RwLock<Option<String>>,
    clients: RwLock<Arc<Vec<ClientProcess>>>,
    executor: CommandExecutor,
    cache: MetadataCache,
    workflow: WorkflowOrchestrator,
    events: EventHub,
    timeouts: TimeoutSettings,
}

impl DeviceSession {
    pub fn new(
        identity: DeviceIdentity,
        state: DeviceState,
        transport: Arc<dyn DeviceTransport>,
        config: &SessionConfig,
    ) -> Self {
        let executor = CommandExecutor::new(
            identity.clone(),
            transport,
            config.timeouts.command_timeout(),
        );
        let workflow = WorkflowOrchestrator::new(executor.clone(), config.install.clone());
        let session = Self {
            identity,
            state: RwLock::new(state),
            avd_name: RwLock::new(None),
            clients: RwLock::new(Arc::new(Vec::new())),
            executor,
            cache: MetadataCache::new(),
            workflow,
            events: EventHub::new(),
            timeouts: config.timeouts.clone(),
        };
        let trace_id = new_trace_id();
        info!(
            trace_id = %trace_id,
            serial = %session.serial(),
            state = ?state,
            "device session created"
        );
        session.eager_refresh(&trace_id);
        session
    }

    fn eager_refresh(&self, trace_id: &str) {
        let state = self.state();
        if state != DeviceState::Online {
            return;
        }
        self.cache
            .refresh_mount_points(state, &self.executor, trace_id);
        self.cache
            .refresh_environment(state, &self.executor, trace_id);
        self.apply_property_refresh(state, trace_id);
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn serial(&self) -> &str {
        self.identity.serial()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_online(&self) -> bool {
        self.state() == DeviceState::Online
    }

    pub fn is_offline(&self) -> bool {
        self.state() == DeviceState::Offline
    }

    pub fn is_bootloader(&self) -> bool {
        self.state() == DeviceState::BootLoader
    }

    pub fn is_recovery(&self) -> bool {
        self.state() == DeviceState::Recovery
    }

    pub fn is_unauthorized(&self) -> bool {
        self.state() == DeviceState::Unauthorized
    }

    pub fn is_emulator(&self) -> bool {
        self.identity.is_emulator()
    }

    pub fn set_state(&self, next: DeviceState) {
        let previous = {
            let mut guard = self
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *guard, next)
        };
        if previous == next {
            return;
        }
        let trace_id = new_trace_id();
        info!(
            trace_id = %trace_id,
            serial = %self.serial(),
            previous = ?previous,
            current = ?next,
            "device state changed"
        );
        if next == DeviceState::Online {
            self.eager_refresh(&trace_id);
        }
        self.events.publish(&SessionEvent::StateChanged {
            serial: self.serial().to_string(),
            previous,
            current: next,
        });
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn avd_name(&self) -> Option<String> {
        self.avd_name
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_avd_name(&self, name: impl Into<String>) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        if !self.is_emulator() {
            return Err(AppError::invalid_configuration(
                format!("{} is not an emulator; AVD name cannot be set", self.serial()),
                &trace_id,
            ));
        }
        *self
            .avd_name
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(name.into());
        Ok(())
    }

    // properties

    fn apply_property_refresh(&self, state: DeviceState, trace_id: &str) -> Refresh<PropertyMap> {
        let outcome = self
            .cache
            .refresh_properties(state, &self.executor, trace_id);
        if let Refresh::Replaced { previous } = &outcome {
            if build_entries_differ(previous, &self.cache.properties()) {
                debug!(trace_id = %trace_id, serial = %self.serial(), "build info changed");
                self.events.publish(&SessionEvent::BuildInfoChanged {
                    serial: self.serial().to_string(),
                });
            }
            if self.is_emulator() && self.avd_name().is_none() {
                if let Some(name) = self.cache.first_property(&[PROP_AVD_NAME]) {
                    let _ = self.set_avd_name(name);
                }
            }
        }
        outcome
    }

    pub fn refresh_properties(&self) -> Refresh<PropertyMap> {
        let trace_id = new_trace_id();
        self.apply_property_refresh(self.state(), &trace_id)
    }

    pub fn properties(&self) -> Arc<PropertyMap> {
        self.cache.properties()
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.cache.first_property(&[name])
    }

    pub fn first_property(&self, names: &[&str]) -> Option<String> {
        self.cache.first_property(names)
    }

    pub fn api_level(&self) -> Option<u32> {
        self.property(PROP_API_LEVEL)?.trim().parse().ok()
    }

    pub fn build_fingerprint(&self) -> Option<String> {
        self.property(PROP_BUILD_FINGERPRINT)
    }

    pub fn language(&self) -> Option<String> {
        self.first_property(&LANGUAGE_PROPERTIES)
    }

    pub fn region(&self) -> Option<String> {
        self.first_property(&REGION_PROPERTIES)
    }

    // mounts and environment

    pub fn refresh_mount_points(&self) -> Refresh<MountMap> {
        let trace_id = new_trace_id();
        self.cache
            .refresh_mount_points(self.state(), &self.executor, &trace_id)
    }

    pub fn mount_points(&self) -> Arc<MountMap> {
        self.cache.mount_points()
    }

    pub fn mount_point(&self, name: &str) -> Option<MountPoint> {
        self.cache.mount_points().get(name).cloned()
    }

    pub fn refresh_environment(&self) -> Refresh<EnvironmentMap> {
        let trace_id = new_trace_id();
        self.cache
            .refresh_environment(self.state(), &self.executor, &trace_id)
    }

    pub fn environment(&self) -> Arc<EnvironmentMap> {
        self.cache.environment()
    }

    pub fn env_var(&self, name: &str) -> Option<String> {
        self.cache.environment().get(name).cloned()
    }

    // battery and privilege

    pub fn battery(&self, freshness: Duration) -> Result<BatteryReading, AppError> {
        let trace_id = new_trace_id();
        self.cache.battery(
            self.state(),
            freshness,
            self.timeouts.battery_timeout(),
            &self.executor,
            &trace_id,
        )
    }

    pub fn battery_default(&self) -> Result<BatteryReading, AppError> {
        self.battery(self.timeouts.battery_freshness())
    }

    pub fn probe_elevated_capability(&self) -> Result<bool, AppError> {
        let trace_id = new_trace_id();
        self.cache
            .check_elevated(self.state(), &self.executor, &trace_id)
    }

    pub fn elevated_capability(&self) -> Capability {
        self.cache.elevated_capability()
    }

    // clients

    pub fn clients(&self) -> Arc<Vec<ClientProcess>> {
        self.clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn client_name(&self, pid: u32) -> Option<String> {
        self.clients()
            .iter()
            .find(|client| client.pid == pid)
            .map(|client| client.package.clone())
    }

    pub fn update_clients(&self, next: Vec<ClientProcess>) {
        let changed = {
            let mut guard = self
                .clients
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if **guard == next {
                false
            } else {
                *guard = Arc::new(next);
                true
            }
        };
        if changed {
            self.events.publish(&SessionEvent::ClientListChanged {
                serial: self.serial().to_string(),
            });
        }
    }

    // raw execution and transfer

    pub fn execute_shell(
        &self,
        command: &str,
        receiver: &mut OutputReceiver,
        timeout: Option<Duration>,
    ) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        self.executor
            .run("{}", &[command], receiver, timeout, &trace_id)
    }

    pub fn sync_session(&self) -> Option<Box<dyn SyncSession>> {
        let trace_id = new_trace_id();
        match self
            .executor
            .transport()
            .open(&self.identity, &trace_id)
        {
            Ok(session) => Some(session),
            Err(err) => {
                debug!(
                    trace_id = %trace_id,
                    serial = %self.serial(),
                    error = %err,
                    "file transfer session unavailable"
                );
                None
            }
        }
    }

    // workflows

    pub fn push_file(&self, local_path: &Path, remote_path: &str) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        let cancel = AtomicBool::new(false);
        self.workflow
            .push_file(local_path, remote_path, None, &cancel, &trace_id)
    }

    pub fn install_remote_package(
        &self,
        remote_path: &str,
        reinstall: bool,
    ) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        self.workflow
            .install_remote_package(remote_path, reinstall, &trace_id)
    }

    pub fn remove_remote_package(&self, remote_path: &str) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        self.workflow.remove_remote_package(remote_path, &trace_id)
    }

    pub fn install_package(
        &self,
        local_path: &Path,
        reinstall: bool,
    ) -> Result<InstallReport, AppError> {
        let cancel = AtomicBool::new(false);
        self.install_package_with(local_path, reinstall, None, &cancel)
    }

    pub fn install_package_with(
        &self,
        local_path: &Path,
        reinstall: bool,
        progress: Option<ProgressSink<'_>>,
        cancel: &AtomicBool,
    ) -> Result<InstallReport, AppError> {
        let trace_id = new_trace_id();
        self.workflow
            .install_package(local_path, reinstall, progress, cancel, &trace_id)
    }

    pub fn uninstall_package(&self, package_name: &str) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        self.workflow.uninstall_package(package_name, &trace_id)
    }

    pub fn create_forward(&self, local_port: u16, remote_port: u16) -> bool {
        let trace_id = new_trace_id();
        self.workflow
            .create_forward(local_port, remote_port, &trace_id)
    }

    pub fn remove_forward(&self, local_port: u16) -> bool {
        let trace_id = new_trace_id();
        self.workflow.remove_forward(local_port, &trace_id)
    }

    pub fn remount<'a>(
        &self,
        target: impl Into<MountTarget<'a>>,
        read_only: bool,
    ) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        self.workflow.remount(
            target.into(),
            read_only,
            self.state(),
            &self.cache,
            &trace_id,
        )
    }
}
