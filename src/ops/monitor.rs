//! Turns the controller's `status` text into per-server records.
//!
//! The controller prints one block per server:
//!
//! ```text
//! 📡 CIS Server (jcepnzzkmj)
//! Tasks: 12 (9 enabled)
//! Running: 1
//! Failed (24h): 0
//! Last Run: 2024-01-01 03:00:00
//! ```
//!
//! Parsing is a two-state machine driven one classified line at a time.
//! Anything that is not a recognised line is ignored so extra controller
//! output does not break the dashboard.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Token that opens a server block.
pub const SERVER_MARKER: &str = "📡";

pub const NEVER_RUN: &str = "Never";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusRecord {
    pub name: String,
    pub id: String,
    pub tasks: u32,
    pub enabled: u32,
    pub running: u32,
    pub failed: u32,
    pub last_run: String,
}

impl ServerStatusRecord {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            tasks: 0,
            enabled: 0,
            running: 0,
            failed: 0,
            last_run: NEVER_RUN.to_string(),
        }
    }
}

/// Totals across every server, for the header cards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub servers: usize,
    pub tasks: u32,
    pub enabled: u32,
    pub running: u32,
    pub failed: u32,
}

impl StatusSummary {
    pub fn from_records(records: &[ServerStatusRecord]) -> Self {
        records.iter().fold(
            StatusSummary {
                servers: records.len(),
                ..Default::default()
            },
            |mut acc, r| {
                acc.tasks = acc.tasks.saturating_add(r.tasks);
                acc.enabled = acc.enabled.saturating_add(r.enabled);
                acc.running = acc.running.saturating_add(r.running);
                acc.failed = acc.failed.saturating_add(r.failed);
                acc
            },
        )
    }
}

/// One line of controller output, after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    Header { name: String, id: String },
    Tasks { total: u32, enabled: u32 },
    Running(u32),
    Failed(u32),
    LastRun(String),
    Ignored,
}

struct Patterns {
    header: Regex,
    tasks: Regex,
    running: Regex,
    failed: Regex,
    last_run: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // First `(id)` after the name wins; anything after it (status
        // emoji, notes) is ignored.
        header: Regex::new(r"📡\s*([^()]*?[^()\s])\s*\(([^()]+)\)").expect("header pattern"),
        tasks: Regex::new(r"\bTasks:\s*(\d+)\s*\(\s*(\d+)\s+enabled\s*\)").expect("tasks pattern"),
        running: Regex::new(r"\bRunning:\s*(\d+)").expect("running pattern"),
        failed: Regex::new(r"\bFailed\b[^:]*:\s*(\d+)").expect("failed pattern"),
        last_run: Regex::new(r"\bLast Run:(.*)$").expect("last run pattern"),
    })
}

/// Digits that overflow (or are otherwise unparseable) count as zero.
fn number(raw: &str) -> u32 {
    raw.parse().unwrap_or(0)
}

impl StatusLine {
    pub fn classify(line: &str) -> StatusLine {
        let p = patterns();

        // A marker line is either a header or nothing at all: a malformed
        // header must never be read as a field of the current block.
        if line.contains(SERVER_MARKER) {
            return match p.header.captures(line) {
                Some(caps) => StatusLine::Header {
                    name: caps[1].trim().to_string(),
                    id: caps[2].trim().to_string(),
                },
                None => StatusLine::Ignored,
            };
        }

        if let Some(caps) = p.tasks.captures(line) {
            return StatusLine::Tasks {
                total: number(&caps[1]),
                enabled: number(&caps[2]),
            };
        }
        if let Some(caps) = p.running.captures(line) {
            return StatusLine::Running(number(&caps[1]));
        }
        if let Some(caps) = p.failed.captures(line) {
            return StatusLine::Failed(number(&caps[1]));
        }
        if let Some(caps) = p.last_run.captures(line) {
            let value = caps[1].trim();
            let value = if value.is_empty() { NEVER_RUN } else { value };
            return StatusLine::LastRun(value.to_string());
        }
        StatusLine::Ignored
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseState {
    AwaitingHeader,
    InRecord(ServerStatusRecord),
}

impl ParseState {
    /// Advance by one line, pushing any completed record onto `out`.
    pub fn step(self, line: StatusLine, out: &mut Vec<ServerStatusRecord>) -> ParseState {
        match (self, line) {
            (ParseState::AwaitingHeader, StatusLine::Header { name, id }) => {
                ParseState::InRecord(ServerStatusRecord::new(name, id))
            }
            (ParseState::InRecord(done), StatusLine::Header { name, id }) => {
                out.push(done);
                ParseState::InRecord(ServerStatusRecord::new(name, id))
            }
            (ParseState::InRecord(mut rec), StatusLine::Tasks { total, enabled }) => {
                rec.tasks = total;
                rec.enabled = enabled.min(total);
                ParseState::InRecord(rec)
            }
            (ParseState::InRecord(mut rec), StatusLine::Running(n)) => {
                rec.running = n;
                ParseState::InRecord(rec)
            }
            (ParseState::InRecord(mut rec), StatusLine::Failed(n)) => {
                rec.failed = n;
                ParseState::InRecord(rec)
            }
            (ParseState::InRecord(mut rec), StatusLine::LastRun(when)) => {
                rec.last_run = when;
                ParseState::InRecord(rec)
            }
            (state, _) => state,
        }
    }

    pub fn finish(self, out: &mut Vec<ServerStatusRecord>) {
        if let ParseState::InRecord(rec) = self {
            out.push(rec);
        }
    }
}

pub fn parse_status(text: &str) -> Vec<ServerStatusRecord> {
    let mut records = Vec::new();
    let mut state = ParseState::AwaitingHeader;
    for line in text.lines() {
        let classified = StatusLine::classify(line);
        if classified == StatusLine::Ignored && line.contains(SERVER_MARKER) {
            debug!("Skipping malformed server header: {:?}", line);
        }
        state = state.step(classified, &mut records);
    }
    state.finish(&mut records);
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_header() {
        assert_eq!(
            StatusLine::classify("📡 CIS Server (jcepnzzkmj)"),
            StatusLine::Header {
                name: "CIS Server".into(),
                id: "jcepnzzkmj".into()
            }
        );
    }

    #[test]
    fn test_classify_header_first_parenthesis_is_id() {
        assert_eq!(
            StatusLine::classify("  📡 Staging (beta) (stg01)  "),
            StatusLine::Header {
                name: "Staging".into(),
                id: "beta".into(),
            }
        );
    }

    #[test]
    fn test_classify_header_with_trailing_badge() {
        assert_eq!(
            StatusLine::classify("📡 CIS Server (jcepnzzkmj) ✅"),
            StatusLine::Header {
                name: "CIS Server".into(),
                id: "jcepnzzkmj".into(),
            }
        );
    }

    #[test]
    fn test_trailing_badge_does_not_merge_blocks() {
        let text = "📡 CIS Server (jcepnzzkmj) ✅
Tasks: 4 (3 enabled)
Running: 1
📡 Intelligence Hub (hdgwrzntwa) ⚠️
Tasks: 2 (2 enabled)
Failed (24h): 2
";
        let records = parse_status(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "jcepnzzkmj");
        assert_eq!(records[0].tasks, 4);
        assert_eq!(records[1].id, "hdgwrzntwa");
        assert_eq!(records[1].failed, 2);
    }

    #[test]
    fn test_classify_fields() {
        assert_eq!(
            StatusLine::classify("Tasks: 12 (9 enabled)"),
            StatusLine::Tasks {
                total: 12,
                enabled: 9
            }
        );
        assert_eq!(StatusLine::classify("Running: 3"), StatusLine::Running(3));
        assert_eq!(StatusLine::classify("Failed (24h): 7"), StatusLine::Failed(7));
        assert_eq!(StatusLine::classify("Failed: 2"), StatusLine::Failed(2));
        assert_eq!(
            StatusLine::classify("Last Run:   2024-01-01 03:00:00  "),
            StatusLine::LastRun("2024-01-01 03:00:00".into())
        );
    }

    #[test]
    fn test_classify_overflow_is_zero() {
        assert_eq!(
            StatusLine::classify("Running: 99999999999999999999"),
            StatusLine::Running(0)
        );
    }

    #[test]
    fn test_fields_before_any_header_are_dropped() {
        let records = parse_status("Tasks: 4 (4 enabled)\nRunning: 2\n");
        assert!(records.is_empty());
    }

    #[test]
    fn test_step_awaiting_header_ignores_fields() {
        let mut out = Vec::new();
        let state = ParseState::AwaitingHeader.step(StatusLine::Running(5), &mut out);
        assert_eq!(state, ParseState::AwaitingHeader);
        assert!(out.is_empty());
    }

    #[test]
    fn test_summary_totals() {
        let mut a = ServerStatusRecord::new("A", "a");
        a.tasks = 3;
        a.enabled = 2;
        a.failed = 1;
        let mut b = ServerStatusRecord::new("B", "b");
        b.tasks = 5;
        b.enabled = 5;
        b.running = 1;

        let summary = StatusSummary::from_records(&[a, b]);
        assert_eq!(summary.servers, 2);
        assert_eq!(summary.tasks, 8);
        assert_eq!(summary.enabled, 7);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.failed, 1);
    }
}
