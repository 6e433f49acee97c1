use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app::adb::executor::CommandExecutor;
use crate::app::adb::receiver::{OutputReceiver, ReceiverOutput};
use crate::app::error::AppError;
use crate::app::models::{BatteryReading, Capability, DeviceState, MountPoint};

pub const GET_PROPERTIES_COMMAND: &str = "getprop";
pub const GET_MOUNTS_COMMAND: &str = "cat /proc/mounts";
pub const GET_ENVIRONMENT_COMMAND: &str = "printenv";
pub const GET_BATTERY_COMMAND: &str = "dumpsys battery";
pub const ELEVATED_CHECK_COMMAND: &str = "id";

pub type PropertyMap = HashMap<String, String>;
pub type MountMap = HashMap<String, MountPoint>;
pub type EnvironmentMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Refresh<T> {
    Skipped,
    Failed,
    Replaced { previous: Arc<T> },
}

impl<T> Refresh<T> {
    pub fn is_replaced(&self) -> bool {
        matches!(self, Refresh::Replaced { .. })
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn swap<T>(lock: &RwLock<Arc<T>>, next: T) -> Arc<T> {
    let mut guard = lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::replace(&mut *guard, Arc::new(next))
}

#[derive(Default)]
pub struct MetadataCache {
    exclusive: Mutex<()>,
    properties: RwLock<Arc<PropertyMap>>,
    mount_points: RwLock<Arc<MountMap>>,
    environment: RwLock<Arc<EnvironmentMap>>,
    battery: RwLock<Option<BatteryReading>>,
    elevated: RwLock<Capability>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.exclusive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn properties(&self) -> Arc<PropertyMap> {
        read(&self.properties)
    }

    pub fn mount_points(&self) -> Arc<MountMap> {
        read(&self.mount_points)
    }

    pub fn environment(&self) -> Arc<EnvironmentMap> {
        read(&self.environment)
    }

    pub fn cached_battery(&self) -> Option<BatteryReading> {
        read(&self.battery)
    }

    pub fn elevated_capability(&self) -> Capability {
        read(&self.elevated)
    }

    pub fn first_property(&self, names: &[&str]) -> Option<String> {
        let properties = self.properties();
        names
            .iter()
            .find_map(|name| properties.get(*name).cloned())
    }

    pub fn replace_properties(&self, next: PropertyMap) -> Arc<PropertyMap> {
        swap(&self.properties, next)
    }

    pub fn replace_mount_points(&self, next: MountMap) -> Arc<MountMap> {
        swap(&self.mount_points, next)
    }

    pub fn replace_environment(&self, next: EnvironmentMap) -> Arc<EnvironmentMap> {
        swap(&self.environment, next)
    }

    fn record_battery(&self, reading: BatteryReading) {
        *self
            .battery
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(reading);
    }

    pub fn resolve_elevated(&self, available: bool) -> bool {
        let mut guard = self
            .elevated
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(resolved) = guard.resolved() {
            return resolved;
        }
        *guard = if available {
            Capability::Available
        } else {
            Capability::Unavailable
        };
        available
    }

    fn fetch(
        executor: &CommandExecutor,
        command: &str,
        mut receiver: OutputReceiver,
        timeout: Option<Duration>,
        trace_id: &str,
    ) -> Result<ReceiverOutput, AppError> {
        executor.run(command, &[], &mut receiver, timeout, trace_id)?;
        Ok(receiver.finish())
    }

    pub fn refresh_properties(
        &self,
        state: DeviceState,
        executor: &CommandExecutor,
        trace_id: &str,
    ) -> Refresh<PropertyMap> {
        if state != DeviceState::Online {
            return Refresh::Skipped;
        }
        let _exclusive = self.exclusive();
        match Self::fetch(
            executor,
            GET_PROPERTIES_COMMAND,
            OutputReceiver::properties(),
            None,
            trace_id,
        ) {
            Ok(ReceiverOutput::Properties(map)) => {
                debug!(trace_id = %trace_id, count = map.len(), "properties refreshed");
                Refresh::Replaced {
                    previous: self.replace_properties(map),
                }
            }
            Ok(_) => Refresh::Failed,
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    serial = %executor.device().serial(),
                    error = %err,
                    "failed to refresh device properties"
                );
                Refresh::Failed
            }
        }
    }

    pub fn refresh_mount_points(
        &self,
        state: DeviceState,
        executor: &CommandExecutor,
        trace_id: &str,
    ) -> Refresh<MountMap> {
        if state != DeviceState::Online {
            return Refresh::Skipped;
        }
        let _exclusive = self.exclusive();
        match Self::fetch(
            executor,
            GET_MOUNTS_COMMAND,
            OutputReceiver::mount_points(),
            None,
            trace_id,
        ) {
            Ok(ReceiverOutput::MountPoints(map)) => Refresh::Replaced {
                previous: self.replace_mount_points(map),
            },
            Ok(_) => Refresh::Failed,
            Err(err) => {
                debug!(trace_id = %trace_id, error = %err, "mount table refresh failed");
                Refresh::Failed
            }
        }
    }

    pub fn refresh_environment(
        &self,
        state: DeviceState,
        executor: &CommandExecutor,
        trace_id: &str,
    ) -> Refresh<EnvironmentMap> {
        if state != DeviceState::Online {
            return Refresh::Skipped;
        }
        let _exclusive = self.exclusive();
        match Self::fetch(
            executor,
            GET_ENVIRONMENT_COMMAND,
            OutputReceiver::environment(),
            None,
            trace_id,
        ) {
            Ok(ReceiverOutput::Environment(map)) => Refresh::Replaced {
                previous: self.replace_environment(map),
            },
            Ok(_) => Refresh::Failed,
            Err(err) => {
                debug!(trace_id = %trace_id, error = %err, "environment refresh failed");
                Refresh::Failed
            }
        }
    }

    fn fresh_battery(&self, freshness: Duration) -> Option<BatteryReading> {
        let reading = self.cached_battery()?;
        let freshness = chrono::Duration::from_std(freshness).unwrap_or(chrono::Duration::MAX);
        let age = Utc::now().signed_duration_since(reading.observed_at);
        (age < freshness).then_some(reading)
    }

    pub fn battery(
        &self,
        state: DeviceState,
        freshness: Duration,
        query_timeout: Duration,
        executor: &CommandExecutor,
        trace_id: &str,
    ) -> Result<BatteryReading, AppError> {
        if let Some(reading) = self.fresh_battery(freshness) {
            return Ok(reading);
        }
        if state != DeviceState::Online {
            return Err(AppError::protocol(
                format!("device {} is not online", executor.device().serial()),
                trace_id,
            ));
        }
        let _exclusive = self.exclusive();
        // Another caller may have refreshed while we waited.
        if let Some(reading) = self.fresh_battery(freshness) {
            return Ok(reading);
        }
        match Self::fetch(
            executor,
            GET_BATTERY_COMMAND,
            OutputReceiver::battery(),
            Some(query_timeout),
            trace_id,
        )? {
            ReceiverOutput::Battery(reading) => {
                self.record_battery(reading.clone());
                Ok(reading)
            }
            _ => Err(AppError::protocol("unexpected battery receiver output", trace_id)),
        }
    }

    pub fn check_elevated(
        &self,
        state: DeviceState,
        executor: &CommandExecutor,
        trace_id: &str,
    ) -> Result<bool, AppError> {
        if let Some(resolved) = self.elevated_capability().resolved() {
            return Ok(resolved);
        }
        if state != DeviceState::Online {
            return Err(AppError::protocol(
                format!("device {} is not online", executor.device().serial()),
                trace_id,
            ));
        }
        // Not under the exclusive section; the first resolution sticks.
        let mut receiver = OutputReceiver::null();
        let available = match executor.run_elevated(
            ELEVATED_CHECK_COMMAND,
            &[],
            &mut receiver,
            None,
            trace_id,
        ) {
            Ok(()) => true,
            Err(err) if err.is_definitive_refusal() => {
                debug!(trace_id = %trace_id, error = %err, "elevated execution refused");
                false
            }
            Err(err) => return Err(err),
        };
        info!(
            trace_id = %trace_id,
            serial = %executor.device().serial(),
            available,
            "elevated capability resolved"
        );
        Ok(self.resolve_elevated(available))
    }
}
