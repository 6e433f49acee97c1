use std::sync::OnceLock;

use regex::Regex;

fn bracket_percent_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s*(\d{1,3})%\]").ok()).as_ref()
}

fn loose_percent_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\d])(\d{1,3})%").ok()).as_ref()
}

pub fn parse_progress_percent(line: &str) -> Option<u8> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let caps = bracket_percent_re()
        .and_then(|re| re.captures(trimmed))
        .or_else(|| loose_percent_re().and_then(|re| re.captures(trimmed)))?;
    let value: u8 = caps.get(1)?.as_str().parse().ok()?;
    (value <= 100).then_some(value)
}

#[derive(Debug, Default)]
pub struct PushProgressTracker {
    pending: String,
    last_reported: Option<u8>,
}

impl PushProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8], mut report: impl FnMut(u8)) {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        while let Some(index) = self.pending.find(['\r', '\n']) {
            let line: String = self.pending.drain(..=index).collect();
            if let Some(percent) = parse_progress_percent(&line) {
                if self.last_reported.map_or(true, |last| percent > last) {
                    self.last_reported = Some(percent);
                    report(percent);
                }
            }
        }
    }

    pub fn last_reported(&self) -> Option<u8> {
        self.last_reported
    }
}
