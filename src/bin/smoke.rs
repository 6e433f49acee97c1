use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lazy_blacktea_session_lib::app::adb::cli::AdbCliTransport;
use lazy_blacktea_session_lib::app::config::load_config;
use lazy_blacktea_session_lib::app::logging::init_logging;
use lazy_blacktea_session_lib::app::models::{DeviceIdentity, DeviceState, DeviceSummary};
use lazy_blacktea_session_lib::app::session::DeviceSession;
use serde::Serialize;
use uuid::Uuid;

const DEFAULT_FORWARD_PORT: u16 = 27183;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    apk_path: Option<PathBuf>,
    apk_replace: bool,
    forward_port: u16,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    adb_program: Option<String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SmokeCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: "skip",
            duration_ms: 0,
            detail: None,
            error_code: None,
            error: None,
        }
    }

    fn failed(name: &'static str, code: &'static str, error: String) -> Self {
        Self {
            name,
            status: "fail",
            duration_ms: 0,
            detail: None,
            error_code: Some(code),
            error: Some(error),
        }
    }
}

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut apk_path: Option<PathBuf> = None;
    let mut apk_replace = true;
    let mut forward_port = DEFAULT_FORWARD_PORT;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--apk" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--apk requires a value".to_string())?;
                apk_path = Some(PathBuf::from(value));
            }
            "--apk-no-replace" => {
                apk_replace = false;
            }
            "--forward-port" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--forward-port requires a value".to_string())?;
                forward_port = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("Invalid --forward-port: {value}"))?;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--serial SERIAL] [--apk PATH] [--apk-no-replace] [--forward-port PORT]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        serial,
        apk_path,
        apk_replace,
        forward_port,
    })
}

fn pick_device(
    transport: &AdbCliTransport,
    wanted: Option<&str>,
    trace_id: &str,
) -> Result<DeviceSummary, String> {
    let summaries = transport
        .list_devices(trace_id)
        .map_err(|err| err.to_string())?;
    if let Some(serial) = wanted {
        return summaries
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| format!("Device {serial} not listed by adb devices."));
    }
    let mut online: Vec<_> = summaries
        .into_iter()
        .filter(|d| d.state == "device")
        .collect();
    if online.is_empty() {
        return Err("No online adb devices found.".to_string());
    }
    if online.len() > 1 {
        let serials = online
            .into_iter()
            .map(|d| d.serial)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(format!(
            "Multiple online devices found ({serials}). Set ANDROID_SERIAL or pass --serial."
        ));
    }
    Ok(online.remove(0))
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> Result<(), ()>
where
    F: FnOnce() -> Result<Option<String>, (&'static str, String)>,
{
    let start = Instant::now();
    match f() {
        Ok(detail) => {
            checks.push(SmokeCheck {
                name,
                status: "pass",
                duration_ms: start.elapsed().as_millis(),
                detail,
                error_code: None,
                error: None,
            });
            Ok(())
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                detail: None,
                error_code: Some(code),
                error: Some(err),
            });
            Err(())
        }
    }
}

fn run_warn<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F)
where
    F: FnOnce() -> Result<(Option<String>, Option<String>), (&'static str, String)>,
{
    let start = Instant::now();
    match f() {
        Ok((detail, warning)) => {
            checks.push(SmokeCheck {
                name,
                status: if warning.is_some() { "warn" } else { "pass" },
                duration_ms: start.elapsed().as_millis(),
                detail,
                error_code: warning.as_ref().map(|_| "WARN"),
                error: warning,
            });
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "warn",
                duration_ms: start.elapsed().as_millis(),
                detail: None,
                error_code: Some(code),
                error: Some(err),
            });
        }
    }
}

fn finish(summary: SmokeSummary) -> ! {
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    );
    std::process::exit(if summary.status == "pass" { 0 } else { 1 });
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut status = "pass";

    let config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck::failed("load_config", err.code.as_str(), err.to_string()));
            finish(SmokeSummary {
                tool: "lazy_blacktea_session_smoke",
                status: "fail",
                trace_id,
                serial: args.serial,
                adb_program: None,
                checks,
            });
        }
    };
    init_logging(&config.logging);

    let transport = Arc::new(AdbCliTransport::new(&config.adb.command_path));
    let adb_program = transport.program().to_string();

    let summary = match pick_device(&transport, args.serial.as_deref(), &trace_id) {
        Ok(summary) => summary,
        Err(err) => {
            checks.push(SmokeCheck::failed("pick_device", "ERR_PICK_DEVICE", err));
            finish(SmokeSummary {
                tool: "lazy_blacktea_session_smoke",
                status: "fail",
                trace_id,
                serial: args.serial,
                adb_program: Some(adb_program),
                checks,
            });
        }
    };
    let serial = summary.serial.clone();
    let session = DeviceSession::new(
        DeviceIdentity::from(&summary),
        DeviceState::from_adb_state(&summary.state),
        transport,
        &config,
    );

    if run_check(&mut checks, "device_online", || {
        if session.is_online() {
            Ok(None)
        } else {
            Err((
                "ERR_DEVICE_STATE",
                format!("Device state is {:?}", session.state()),
            ))
        }
    })
    .is_err()
    {
        status = "fail";
        finish(SmokeSummary {
            tool: "lazy_blacktea_session_smoke",
            status,
            trace_id,
            serial: Some(serial),
            adb_program: Some(adb_program),
            checks,
        });
    }

    if run_check(&mut checks, "properties", || {
        let api = session.api_level().ok_or_else(|| {
            (
                "ERR_PROPERTIES",
                "ro.build.version.sdk missing after refresh".to_string(),
            )
        })?;
        Ok(Some(format!(
            "api={api} fingerprint={} locale={}-{}",
            session.build_fingerprint().unwrap_or_default(),
            session.language().unwrap_or_default(),
            session.region().unwrap_or_default()
        )))
    })
    .is_err()
    {
        status = "fail";
    }

    run_warn(&mut checks, "mount_points", || {
        let mounts = session.mount_points();
        let detail = Some(format!("{} entries", mounts.len()));
        if mounts.is_empty() {
            Ok((detail, Some("Mount table is empty.".to_string())))
        } else {
            Ok((detail, None))
        }
    });

    run_warn(&mut checks, "environment", || {
        let environment = session.environment();
        let detail = Some(format!("{} variables", environment.len()));
        if session.env_var("PATH").is_none() {
            Ok((detail, Some("PATH not reported by printenv.".to_string())))
        } else {
            Ok((detail, None))
        }
    });

    if run_check(&mut checks, "battery", || {
        let first = session
            .battery(Duration::from_secs(30))
            .map_err(|err| (err.code.as_str(), err.to_string()))?;
        let second = session
            .battery(Duration::from_secs(30))
            .map_err(|err| (err.code.as_str(), err.to_string()))?;
        if first.observed_at != second.observed_at {
            return Err((
                "ERR_BATTERY_CACHE",
                "Second reading inside the freshness window was re-queried".to_string(),
            ));
        }
        Ok(first.percent().map(|percent| format!("{percent}%")))
    })
    .is_err()
    {
        status = "fail";
    }

    run_warn(&mut checks, "elevated_capability", || {
        let available = session
            .probe_elevated_capability()
            .map_err(|err| (err.code.as_str(), err.to_string()))?;
        if available {
            Ok((Some("su available".to_string()), None))
        } else {
            Ok((None, Some("su not available (optional).".to_string())))
        }
    });

    run_warn(&mut checks, "port_forward", || {
        let port = args.forward_port;
        if !session.create_forward(port, port) {
            return Ok((None, Some(format!("Could not forward tcp:{port}."))));
        }
        if !session.remove_forward(port) {
            return Ok((None, Some(format!("Could not remove forward tcp:{port}."))));
        }
        Ok((Some(format!("tcp:{port}")), None))
    });

    match args.apk_path.as_deref() {
        Some(apk) => {
            if run_check(&mut checks, "apk_install", || {
                let report = session
                    .install_package(apk, args.apk_replace)
                    .map_err(|err| (err.code.as_str(), err.to_string()))?;
                Ok(Some(match report.cleanup_error {
                    Some(cleanup) => format!("installed; cleanup failed: {cleanup}"),
                    None => format!("installed via {}", report.remote_path),
                }))
            })
            .is_err()
            {
                status = "fail";
            }
        }
        None => checks.push(SmokeCheck::skipped("apk_install")),
    }

    finish(SmokeSummary {
        tool: "lazy_blacktea_session_smoke",
        status,
        trace_id,
        serial: Some(serial),
        adb_program: Some(adb_program),
        checks,
    });
}
