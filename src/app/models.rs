use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<String>,
}

fn emulator_serial_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^emulator-\d+$").ok()).as_ref()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    serial: String,
    model: Option<String>,
    product: Option<String>,
    name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(
        serial: impl Into<String>,
        model: Option<String>,
        product: Option<String>,
        name: Option<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            model,
            product,
            name,
        }
    }

    pub fn from_serial(serial: impl Into<String>) -> Self {
        Self::new(serial, None, None, None)
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_emulator(&self) -> bool {
        emulator_serial_re().is_some_and(|re| re.is_match(&self.serial))
    }
}

impl From<&DeviceSummary> for DeviceIdentity {
    fn from(summary: &DeviceSummary) -> Self {
        Self::new(
            summary.serial.clone(),
            summary.model.clone(),
            summary.product.clone(),
            summary.device.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Offline,
    Online,
    BootLoader,
    Recovery,
    Unauthorized,
}

impl DeviceState {
    pub fn from_adb_state(value: &str) -> Self {
        match value.trim() {
            "device" => DeviceState::Online,
            "bootloader" => DeviceState::BootLoader,
            "recovery" => DeviceState::Recovery,
            "unauthorized" => DeviceState::Unauthorized,
            _ => DeviceState::Offline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub name: String,
    pub block_device: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatteryReading {
    pub level: Option<u32>,
    pub scale: Option<u32>,
    pub fields: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

impl BatteryReading {
    pub fn percent(&self) -> Option<u8> {
        let level = self.level?;
        let scale = self.scale.filter(|scale| *scale > 0).unwrap_or(100);
        let percent = (u64::from(level) * 100 / u64::from(scale)).min(100);
        u8::try_from(percent).ok()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Capability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

impl Capability {
    pub fn resolved(&self) -> Option<bool> {
        match self {
            Capability::Unknown => None,
            Capability::Available => Some(true),
            Capability::Unavailable => Some(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    pub error_message: String,
    pub error_code: InstallErrorCode,
}

impl InstallOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error_message: String::new(),
            error_code: InstallErrorCode::Success,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error_code: InstallErrorCode::from_output(&message),
            error_message: message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallReport {
    pub remote_path: String,
    pub cleanup_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientProcess {
    pub pid: u32,
    pub package: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstallErrorCode {
    Success,
    InstallFailedAlreadyExists,
    InstallFailedUpdateIncompatible,
    InstallFailedDuplicatePackage,
    InstallFailedOlderSdk,
    InstallFailedNewerSdk,
    InstallFailedVersionDowngrade,
    InstallFailedInsufficientStorage,
    InstallFailedUserRestricted,
    InstallFailedVerificationFailure,
    InstallParseFailedNotApk,
    InstallParseFailedNoCertificates,
    InstallParseFailedInconsistentCertificates,
    InstallFailedInvalidApk,
    InstallFailedNoMatchingAbis,
    InstallFailedTestOnly,
    DeleteFailedInternalError,
    UnknownError,
}

impl InstallErrorCode {
    const FAILURES: [InstallErrorCode; 16] = [
        InstallErrorCode::InstallFailedAlreadyExists,
        InstallErrorCode::InstallFailedUpdateIncompatible,
        InstallErrorCode::InstallFailedDuplicatePackage,
        InstallErrorCode::InstallFailedOlderSdk,
        InstallErrorCode::InstallFailedNewerSdk,
        InstallErrorCode::InstallFailedVersionDowngrade,
        InstallErrorCode::InstallFailedInsufficientStorage,
        InstallErrorCode::InstallFailedUserRestricted,
        InstallErrorCode::InstallFailedVerificationFailure,
        InstallErrorCode::InstallParseFailedNotApk,
        InstallErrorCode::InstallParseFailedNoCertificates,
        InstallErrorCode::InstallParseFailedInconsistentCertificates,
        InstallErrorCode::InstallFailedInvalidApk,
        InstallErrorCode::InstallFailedNoMatchingAbis,
        InstallErrorCode::InstallFailedTestOnly,
        InstallErrorCode::DeleteFailedInternalError,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            InstallErrorCode::Success => "SUCCESS",
            InstallErrorCode::InstallFailedAlreadyExists => "INSTALL_FAILED_ALREADY_EXISTS",
            InstallErrorCode::InstallFailedUpdateIncompatible => {
                "INSTALL_FAILED_UPDATE_INCOMPATIBLE"
            }
            InstallErrorCode::InstallFailedDuplicatePackage => "INSTALL_FAILED_DUPLICATE_PACKAGE",
            InstallErrorCode::InstallFailedOlderSdk => "INSTALL_FAILED_OLDER_SDK",
            InstallErrorCode::InstallFailedNewerSdk => "INSTALL_FAILED_NEWER_SDK",
            InstallErrorCode::InstallFailedVersionDowngrade => "INSTALL_FAILED_VERSION_DOWNGRADE",
            InstallErrorCode::InstallFailedInsufficientStorage => {
                "INSTALL_FAILED_INSUFFICIENT_STORAGE"
            }
            InstallErrorCode::InstallFailedUserRestricted => "INSTALL_FAILED_USER_RESTRICTED",
            InstallErrorCode::InstallFailedVerificationFailure => {
                "INSTALL_FAILED_VERIFICATION_FAILURE"
            }
            InstallErrorCode::InstallParseFailedNotApk => "INSTALL_PARSE_FAILED_NOT_APK",
            InstallErrorCode::InstallParseFailedNoCertificates => {
                "INSTALL_PARSE_FAILED_NO_CERTIFICATES"
            }
            InstallErrorCode::InstallParseFailedInconsistentCertificates => {
                "INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES"
            }
            InstallErrorCode::InstallFailedInvalidApk => "INSTALL_FAILED_INVALID_APK",
            InstallErrorCode::InstallFailedNoMatchingAbis => "INSTALL_FAILED_NO_MATCHING_ABIS",
            InstallErrorCode::InstallFailedTestOnly => "INSTALL_FAILED_TEST_ONLY",
            InstallErrorCode::DeleteFailedInternalError => "DELETE_FAILED_INTERNAL_ERROR",
            InstallErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn from_output(output: &str) -> Self {
        let upper = output.to_uppercase();
        if upper.trim().is_empty() {
            return InstallErrorCode::UnknownError;
        }
        Self::FAILURES
            .into_iter()
            .find(|code| upper.contains(code.code()))
            .unwrap_or(InstallErrorCode::UnknownError)
    }
}
