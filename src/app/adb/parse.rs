use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{DeviceSummary, MountPoint};

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut summary = DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                model: None,
                product: None,
                device: None,
                transport_id: None,
            };
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    summary.model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    summary.product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    summary.device = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    summary.transport_id = Some(value.to_string());
                }
            }
            Some(summary)
        })
        .collect()
}

pub fn parse_getprop_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let (key_part, value_part) = trimmed.split_once("]: [")?;
    let key = key_part.trim_start_matches('[').trim();
    let value = value_part.strip_suffix(']')?.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

pub fn parse_getprop_map(output: &str) -> HashMap<String, String> {
    output.lines().filter_map(parse_getprop_line).collect()
}

pub fn parse_mount_line(line: &str) -> Option<MountPoint> {
    let mut columns = line.split_whitespace();
    let block_device = columns.next()?;
    let name = columns.next()?;
    let fs_type = columns.next()?;
    if !name.starts_with('/') {
        return None;
    }
    Some(MountPoint {
        name: name.to_string(),
        block_device: block_device.to_string(),
        fs_type: fs_type.to_string(),
    })
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

pub fn parse_battery_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.trim().split_once(':')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn install_failure_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Failure\s*(?:\[(.*)\]|(.*))$").ok())
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallLine {
    Success,
    Failure(String),
    Other,
}

pub fn parse_install_line(line: &str) -> InstallLine {
    let trimmed = line.trim();
    if trimmed.starts_with("Success") {
        return InstallLine::Success;
    }
    if !trimmed.starts_with("Failure") {
        return InstallLine::Other;
    }
    let message = install_failure_re()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| trimmed.to_string());
    InstallLine::Failure(message)
}
