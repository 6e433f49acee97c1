use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::app::adb::parse::{
    parse_battery_line, parse_env_line, parse_getprop_line, parse_install_line, parse_mount_line,
    InstallLine,
};
use crate::app::models::{BatteryReading, InstallOutcome, MountPoint};

#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        for byte in chunk {
            match byte {
                b'\n' | b'\r' => {
                    let line = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    on_line(&line);
                }
                other => self.pending.push(*other),
            }
        }
    }

    fn flush(&mut self, mut on_line: impl FnMut(&str)) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        on_line(&line);
    }
}

#[derive(Debug, Default)]
pub struct InstallState {
    success: bool,
    error_message: Option<String>,
    saw_output: bool,
}

impl InstallState {
    fn push_line(&mut self, line: &str) {
        if !line.trim().is_empty() {
            self.saw_output = true;
        }
        match parse_install_line(line) {
            InstallLine::Success => {
                self.success = true;
                self.error_message = None;
            }
            InstallLine::Failure(message) => {
                self.success = false;
                self.error_message = Some(message);
            }
            InstallLine::Other => {}
        }
    }

    fn outcome(&self) -> InstallOutcome {
        if self.success {
            return InstallOutcome::succeeded();
        }
        match &self.error_message {
            Some(message) => InstallOutcome::failed(message.clone()),
            None if self.saw_output => InstallOutcome::failed("Unknown failure"),
            None => InstallOutcome::failed("Unknown failure: no output from package manager"),
        }
    }
}

#[derive(Debug, Default)]
enum ReceiverKind {
    #[default]
    Null,
    Properties(HashMap<String, String>),
    MountPoints(HashMap<String, MountPoint>),
    Environment(HashMap<String, String>),
    Battery(BTreeMap<String, String>),
    Install(InstallState),
}

#[derive(Debug, Default)]
pub struct OutputReceiver {
    kind: ReceiverKind,
    buffer: LineBuffer,
    line_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverOutput {
    Nothing,
    Properties(HashMap<String, String>),
    MountPoints(HashMap<String, MountPoint>),
    Environment(HashMap<String, String>),
    Battery(BatteryReading),
    Install(InstallOutcome),
}

impl OutputReceiver {
    fn with_kind(kind: ReceiverKind) -> Self {
        Self {
            kind,
            buffer: LineBuffer::default(),
            line_count: 0,
        }
    }

    pub fn null() -> Self {
        Self::with_kind(ReceiverKind::Null)
    }

    pub fn properties() -> Self {
        Self::with_kind(ReceiverKind::Properties(HashMap::new()))
    }

    pub fn mount_points() -> Self {
        Self::with_kind(ReceiverKind::MountPoints(HashMap::new()))
    }

    pub fn environment() -> Self {
        Self::with_kind(ReceiverKind::Environment(HashMap::new()))
    }

    pub fn battery() -> Self {
        Self::with_kind(ReceiverKind::Battery(BTreeMap::new()))
    }

    pub fn install() -> Self {
        Self::with_kind(ReceiverKind::Install(InstallState::default()))
    }

    pub fn add_output(&mut self, chunk: &[u8]) {
        let Self {
            kind,
            buffer,
            line_count,
        } = self;
        buffer.push(chunk, |line| {
            *line_count += 1;
            Self::dispatch(kind, line);
        });
    }

    pub fn flush(&mut self) {
        let Self {
            kind,
            buffer,
            line_count,
        } = self;
        buffer.flush(|line| {
            *line_count += 1;
            Self::dispatch(kind, line);
        });
    }

    pub fn add_line(&mut self, line: &str) {
        self.line_count += 1;
        Self::dispatch(&mut self.kind, line);
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    // The package manager reports its own verdict and exits non-zero on failure.
    pub fn judges_exit_status(&self) -> bool {
        matches!(self.kind, ReceiverKind::Install(_))
    }

    fn dispatch(kind: &mut ReceiverKind, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match kind {
            ReceiverKind::Null => {}
            ReceiverKind::Properties(map) => {
                if let Some((key, value)) = parse_getprop_line(line) {
                    map.insert(key, value);
                }
            }
            ReceiverKind::MountPoints(map) => {
                if let Some(mount) = parse_mount_line(line) {
                    map.insert(mount.name.clone(), mount);
                }
            }
            ReceiverKind::Environment(map) => {
                if let Some((key, value)) = parse_env_line(line) {
                    map.insert(key, value);
                }
            }
            ReceiverKind::Battery(fields) => {
                if let Some((key, value)) = parse_battery_line(line) {
                    fields.insert(key, value);
                }
            }
            ReceiverKind::Install(state) => state.push_line(line),
        }
    }

    pub fn finish(mut self) -> ReceiverOutput {
        self.flush();
        match self.kind {
            ReceiverKind::Null => ReceiverOutput::Nothing,
            ReceiverKind::Properties(map) => ReceiverOutput::Properties(map),
            ReceiverKind::MountPoints(map) => ReceiverOutput::MountPoints(map),
            ReceiverKind::Environment(map) => ReceiverOutput::Environment(map),
            ReceiverKind::Battery(fields) => {
                let level = fields.get("level").and_then(|value| value.parse().ok());
                let scale = fields.get("scale").and_then(|value| value.parse().ok());
                ReceiverOutput::Battery(BatteryReading {
                    level,
                    scale,
                    fields,
                    observed_at: Utc::now(),
                })
            }
            ReceiverKind::Install(state) => ReceiverOutput::Install(state.outcome()),
        }
    }
}
