//! Per-day attendance ledger.
//!
//! One CSV file per calendar day under the ledger directory, named
//! `Attendance-<mm_dd_yy>.csv` with the fixed header `Name,Roll,Time`.
//! Files are append-only; an identity is recorded at most once per day.
//!
//! `log` is a plain read-then-append sequence with no file locking. The
//! daemon serializes all calls through its single engine thread; concurrent
//! writers from separate processes are out of scope (single kiosk).

use crate::types::IdentityKey;
use chrono::{Local, NaiveDate, NaiveTime};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: &str = "Name,Roll,Time";
const FILE_PREFIX: &str = "Attendance-";
const DATE_TOKEN_FORMAT: &str = "%m_%d_%y";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a `log` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First record for this identity today; one row was appended.
    Marked,
    /// Identity already present in today's file; nothing was written.
    AlreadyMarked,
}

/// One ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub roll: String,
    /// Wall-clock time as written, `HH:MM:SS`.
    pub time: String,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the ledger file for a given date.
    pub fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{FILE_PREFIX}{}.csv",
            date.format(DATE_TOKEN_FORMAT)
        ))
    }

    /// Mark attendance for `identity` at the current local date and time.
    pub fn log(&self, identity: &IdentityKey) -> Result<MarkOutcome, LedgerError> {
        let now = Local::now();
        self.log_at(identity, now.date_naive(), now.time())
    }

    /// Mark attendance at an explicit date and time.
    ///
    /// Creates the day's file with the header when absent, dedupes on the
    /// `Name` column, and otherwise appends exactly one row.
    pub fn log_at(
        &self,
        identity: &IdentityKey,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<MarkOutcome, LedgerError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.day_path(date);
        if !path.exists() {
            fs::write(&path, format!("{HEADER}\n"))?;
        }

        let key = identity.to_string();
        if read_records(&path)?.iter().any(|r| r.name == key) {
            tracing::debug!(identity = %key, "already marked today");
            return Ok(MarkOutcome::AlreadyMarked);
        }

        // Roll is the second underscore token of the key, by contract.
        let roll = key.split('_').nth(1).unwrap_or_default();
        let mut file = OpenOptions::new().append(true).open(&path)?;
        writeln!(file, "{key},{roll},{}", time.format(TIME_FORMAT))?;

        tracing::info!(identity = %key, file = %path.display(), "attendance marked");
        Ok(MarkOutcome::Marked)
    }

    /// All records for a date. A missing or empty file yields an empty vec.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let path = self.day_path(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_records(&path)
    }

    /// Whether a ledger file exists for the date.
    pub fn day_exists(&self, date: NaiveDate) -> bool {
        self.day_path(date).exists()
    }

    /// Per-name record counts for a date, descending.
    pub fn day_counts(&self, date: NaiveDate) -> Result<Vec<(String, usize)>, LedgerError> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in self.read_day(date)? {
            match counts.iter_mut().find(|(name, _)| *name == record.name) {
                Some(entry) => entry.1 += 1,
                None => counts.push((record.name, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(counts)
    }

    /// Every record across all days whose `Name` belongs to the given
    /// account name (i.e. starts with `<name>_`), oldest day first.
    pub fn history(&self, name: &str) -> Result<Vec<(NaiveDate, AttendanceRecord)>, LedgerError> {
        let mut days: Vec<(NaiveDate, PathBuf)> = Vec::new();
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(token) = file_name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".csv"))
            else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(token, DATE_TOKEN_FORMAT) {
                days.push((date, path));
            }
        }
        days.sort_by_key(|(date, _)| *date);

        let prefix = format!("{name}_");
        let mut records = Vec::new();
        for (date, path) in days {
            for record in read_records(&path)? {
                if record.name.starts_with(&prefix) {
                    records.push((date, record));
                }
            }
        }
        Ok(records)
    }
}

/// Parse a ledger file, skipping the header and any malformed rows.
fn read_records(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let raw = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in raw.lines().skip(1) {
        let mut fields = line.split(',');
        let (Some(name), Some(roll), Some(time)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        records.push(AttendanceRecord {
            name: name.to_string(),
            roll: roll.to_string(),
            time: time.to_string(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger() -> (TempDir, Ledger) {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::new(tmp.path().join("Attendance"));
        (tmp, ledger)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 31).unwrap()
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_first_log_marks_and_appends_one_row() {
        let (_tmp, ledger) = ledger();
        let alice = IdentityKey::new("alice", "101").unwrap();

        let outcome = ledger.log_at(&alice, date(), time(9, 15, 0)).unwrap();
        assert_eq!(outcome, MarkOutcome::Marked);

        let records = ledger.read_day(date()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "alice_101");
        assert_eq!(records[0].roll, "101");
        assert_eq!(records[0].time, "09:15:00");
    }

    #[test]
    fn test_repeat_log_same_day_is_idempotent() {
        let (_tmp, ledger) = ledger();
        let alice = IdentityKey::new("alice", "101").unwrap();

        assert_eq!(
            ledger.log_at(&alice, date(), time(9, 0, 0)).unwrap(),
            MarkOutcome::Marked
        );
        for minute in 1..5 {
            assert_eq!(
                ledger.log_at(&alice, date(), time(9, minute, 0)).unwrap(),
                MarkOutcome::AlreadyMarked
            );
        }
        assert_eq!(ledger.read_day(date()).unwrap().len(), 1);
    }

    #[test]
    fn test_same_identity_distinct_days() {
        let (_tmp, ledger) = ledger();
        let alice = IdentityKey::new("alice", "101").unwrap();
        let next_day = date().succ_opt().unwrap();

        assert_eq!(
            ledger.log_at(&alice, date(), time(9, 0, 0)).unwrap(),
            MarkOutcome::Marked
        );
        assert_eq!(
            ledger.log_at(&alice, next_day, time(9, 0, 0)).unwrap(),
            MarkOutcome::Marked
        );
        assert_eq!(ledger.read_day(date()).unwrap().len(), 1);
        assert_eq!(ledger.read_day(next_day).unwrap().len(), 1);
    }

    #[test]
    fn test_header_is_exact_regardless_of_logs() {
        let (_tmp, ledger) = ledger();
        for (name, roll) in [("alice", "101"), ("bob", "102"), ("carol", "103")] {
            let identity = IdentityKey::new(name, roll).unwrap();
            ledger.log_at(&identity, date(), time(8, 30, 0)).unwrap();
            ledger.log_at(&identity, date(), time(8, 31, 0)).unwrap();
        }

        let raw = fs::read_to_string(ledger.day_path(date())).unwrap();
        assert_eq!(raw.lines().next().unwrap(), "Name,Roll,Time");
        assert_eq!(raw.lines().count(), 4); // header + 3 rows
    }

    #[test]
    fn test_day_file_name_uses_two_digit_tokens() {
        let (_tmp, ledger) = ledger();
        let d = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert!(ledger
            .day_path(d)
            .ends_with("Attendance/Attendance-01_05_26.csv"));
    }

    #[test]
    fn test_read_missing_day_is_empty() {
        let (_tmp, ledger) = ledger();
        assert!(ledger.read_day(date()).unwrap().is_empty());
        assert!(!ledger.day_exists(date()));
    }

    #[test]
    fn test_day_counts() {
        let (_tmp, ledger) = ledger();
        ledger
            .log_at(&IdentityKey::new("alice", "101").unwrap(), date(), time(9, 0, 0))
            .unwrap();
        ledger
            .log_at(&IdentityKey::new("bob", "102").unwrap(), date(), time(9, 5, 0))
            .unwrap();

        let counts = ledger.day_counts(date()).unwrap();
        assert_eq!(
            counts,
            vec![("alice_101".to_string(), 1), ("bob_102".to_string(), 1)]
        );
    }

    #[test]
    fn test_history_filters_by_account_name() {
        let (_tmp, ledger) = ledger();
        let alice = IdentityKey::new("alice", "101").unwrap();
        let bob = IdentityKey::new("bob", "102").unwrap();
        let d1 = date();
        let d2 = date().succ_opt().unwrap();

        ledger.log_at(&alice, d2, time(9, 0, 0)).unwrap();
        ledger.log_at(&alice, d1, time(9, 0, 0)).unwrap();
        ledger.log_at(&bob, d1, time(9, 1, 0)).unwrap();

        let history = ledger.history("alice").unwrap();
        assert_eq!(history.len(), 2);
        // Oldest day first.
        assert_eq!(history[0].0, d1);
        assert_eq!(history[1].0, d2);
        assert!(history.iter().all(|(_, r)| r.name == "alice_101"));

        // Prefix match must not catch "al".
        assert!(ledger.history("al").unwrap().is_empty());
    }
}
