pub mod app;

pub use app::adb::cli::AdbCliTransport;
pub use app::adb::receiver::{OutputReceiver, ReceiverOutput};
pub use app::adb::transport::{
    DeviceTransport, FileTransferService, ForwardTransport, ShellTransport, SyncSession,
};
pub use app::config::SessionConfig;
pub use app::error::{AppError, ErrorCode};
pub use app::models::{DeviceIdentity, DeviceState, InstallOutcome, MountPoint};
pub use app::session::events::{EventKind, SessionEvent};
pub use app::session::DeviceSession;
