use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[serde(rename = "ERR_PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "ERR_NOT_FOUND")]
    NotFound,
    #[serde(rename = "ERR_PROTOCOL")]
    Protocol,
    #[serde(rename = "ERR_TIMEOUT")]
    Timeout,
    #[serde(rename = "ERR_TRANSFER_UNAVAILABLE")]
    TransferUnavailable,
    #[serde(rename = "ERR_INSTALLATION_FAILED")]
    InstallationFailed,
    #[serde(rename = "ERR_INVALID_CONFIGURATION")]
    InvalidConfiguration,
    #[serde(rename = "ERR_CANCELLED")]
    Cancelled,
    #[serde(rename = "ERR_SYSTEM")]
    System,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PermissionDenied => "ERR_PERMISSION_DENIED",
            ErrorCode::NotFound => "ERR_NOT_FOUND",
            ErrorCode::Protocol => "ERR_PROTOCOL",
            ErrorCode::Timeout => "ERR_TIMEOUT",
            ErrorCode::TransferUnavailable => "ERR_TRANSFER_UNAVAILABLE",
            ErrorCode::InstallationFailed => "ERR_INSTALLATION_FAILED",
            ErrorCode::InvalidConfiguration => "ERR_INVALID_CONFIGURATION",
            ErrorCode::Cancelled => "ERR_CANCELLED",
            ErrorCode::System => "ERR_SYSTEM",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: ErrorCode,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code,
            trace_id: trace_id.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message, trace_id)
    }

    pub fn not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message, trace_id)
    }

    pub fn protocol(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::Protocol, message, trace_id)
    }

    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message, trace_id)
    }

    pub fn transfer_unavailable(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransferUnavailable, message, trace_id)
    }

    pub fn installation_failed(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::InstallationFailed, message, trace_id)
    }

    pub fn invalid_configuration(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message, trace_id)
    }

    pub fn cancelled(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::System, message, trace_id)
    }

    pub fn is_definitive_refusal(&self) -> bool {
        matches!(self.code, ErrorCode::PermissionDenied | ErrorCode::NotFound)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
