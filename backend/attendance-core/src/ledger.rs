// src/ledger.rs
//! The per-employee, per-day attendance ledger.
//!
//! Rows live in the `Attendance` sheet of a workbook held by a [`TableStore`].
//! Every upsert is a full read-modify-write of that workbook, serialized by a
//! mutex so the on-site and remote pollers can share one ledger.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::model::{AttendanceEvent, AttendanceRow, EmployeeKey, EventKind, TimePair, BREAK_SLOTS, REMOTE_SLOTS};
use crate::storage::{Sheet, StorageError, TableStore};
use crate::time_util::{format_ledger_date, format_ledger_time, parse_ledger_date, parse_time_of_day};
use crate::work_time::{compute_remote_time, compute_work_time};

pub const LEDGER_SHEET: &str = "Attendance";

pub const HEADERS: [&str; 22] = [
    "Name",
    "EmployeeCode",
    "Date",
    "CheckIn",
    "CheckOut",
    "Break1Start",
    "Break1End",
    "Break2Start",
    "Break2End",
    "Break3Start",
    "Break3End",
    "Remote1Start",
    "Remote1End",
    "Remote2Start",
    "Remote2End",
    "Remote3Start",
    "Remote3End",
    "Remote4Start",
    "Remote4End",
    "TotalWorkTime",
    "Project",
    "Source",
];

fn break_columns(slot: usize) -> (String, String) {
    (format!("Break{}Start", slot + 1), format!("Break{}End", slot + 1))
}

fn remote_columns(slot: usize) -> (String, String) {
    (format!("Remote{}Start", slot + 1), format!("Remote{}End", slot + 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was created for the event.
    Created,
    /// An existing row changed.
    Updated,
    /// The event was already reflected in the row (or its slots were full).
    Unchanged,
}

/// A sheet row: either understood, or carried through verbatim.
#[derive(Debug, Clone)]
enum LedgerEntry {
    Parsed { row: AttendanceRow, cells: Vec<String> },
    Raw(Vec<String>),
}

struct DecodedSheet {
    headers: Vec<String>,
    entries: Vec<LedgerEntry>,
}

impl DecodedSheet {
    fn decode(sheet: Option<&Sheet>) -> Self {
        let Some(sheet) = sheet else {
            return Self {
                headers: HEADERS.iter().map(|h| h.to_string()).collect(),
                entries: Vec::new(),
            };
        };

        // Keep whatever columns the sheet already has, add any we need.
        let mut headers = sheet.headers.clone();
        for header in HEADERS {
            if !headers.iter().any(|h| h.trim() == header) {
                headers.push(header.to_string());
            }
        }
        let columns = sheet.column_index();

        let entries = sheet
            .rows
            .iter()
            .map(|cells| match decode_row(&columns, cells) {
                Some(row) => LedgerEntry::Parsed {
                    row,
                    cells: cells.clone(),
                },
                None => {
                    debug!("Keeping unparseable ledger row as-is: {:?}", cells);
                    LedgerEntry::Raw(cells.clone())
                }
            })
            .collect();

        Self { headers, entries }
    }

    fn encode(&self) -> Sheet {
        let columns: HashMap<String, usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();
        let rows = self
            .entries
            .iter()
            .map(|entry| match entry {
                LedgerEntry::Parsed { row, cells } => encode_row(&columns, self.headers.len(), row, cells),
                LedgerEntry::Raw(cells) => cells.clone(),
            })
            .collect();
        Sheet {
            headers: self.headers.clone(),
            rows,
        }
    }

    fn rows(&self) -> impl Iterator<Item = &AttendanceRow> {
        self.entries.iter().filter_map(|entry| match entry {
            LedgerEntry::Parsed { row, .. } => Some(row),
            LedgerEntry::Raw(_) => None,
        })
    }
}

fn cell<'a>(columns: &HashMap<String, usize>, cells: &'a [String], name: &str) -> Option<&'a str> {
    let value = cells.get(*columns.get(name)?)?.trim();
    (!value.is_empty()).then_some(value)
}

fn decode_row(columns: &HashMap<String, usize>, cells: &[String]) -> Option<AttendanceRow> {
    let owned = |name: &str| cell(columns, cells, name).map(str::to_string);
    let date = parse_ledger_date(cell(columns, cells, "Date")?)?;

    let mut breaks: [TimePair; BREAK_SLOTS] = Default::default();
    for (slot, pair) in breaks.iter_mut().enumerate() {
        let (start, end) = break_columns(slot);
        pair.start = owned(&start);
        pair.end = owned(&end);
    }
    let mut remote: [TimePair; REMOTE_SLOTS] = Default::default();
    for (slot, pair) in remote.iter_mut().enumerate() {
        let (start, end) = remote_columns(slot);
        pair.start = owned(&start);
        pair.end = owned(&end);
    }

    Some(AttendanceRow {
        name: owned("Name").unwrap_or_default(),
        employee_code: owned("EmployeeCode").unwrap_or_default(),
        date,
        check_in: owned("CheckIn"),
        check_out: owned("CheckOut"),
        breaks,
        remote,
        total_work_time: owned("TotalWorkTime"),
        project: owned("Project"),
        source: owned("Source"),
    })
}

fn encode_row(
    columns: &HashMap<String, usize>,
    width: usize,
    row: &AttendanceRow,
    original: &[String],
) -> Vec<String> {
    let mut cells = original.to_vec();
    cells.resize(width.max(original.len()), String::new());

    let mut put = |name: &str, value: Option<&str>| {
        if let Some(&i) = columns.get(name) {
            cells[i] = value.unwrap_or_default().to_string();
        }
    };

    put("Name", Some(row.name.as_str()));
    put("EmployeeCode", Some(row.employee_code.as_str()));
    put("Date", Some(format_ledger_date(row.date).as_str()));
    put("CheckIn", row.check_in.as_deref());
    put("CheckOut", row.check_out.as_deref());
    for (slot, pair) in row.breaks.iter().enumerate() {
        let (start, end) = break_columns(slot);
        put(&start, pair.start.as_deref());
        put(&end, pair.end.as_deref());
    }
    for (slot, pair) in row.remote.iter().enumerate() {
        let (start, end) = remote_columns(slot);
        put(&start, pair.start.as_deref());
        put(&end, pair.end.as_deref());
    }
    put("TotalWorkTime", row.total_work_time.as_deref());
    put("Project", row.project.as_deref());
    put("Source", row.source.as_deref());
    cells
}

fn same_time(slot: &Option<String>, minutes: u32) -> bool {
    slot.as_deref()
        .map(|t| parse_time_of_day(t) == minutes && minutes != 0)
        .unwrap_or(false)
}

fn side_mut(pair: &mut TimePair, end_side: bool) -> &mut Option<String> {
    if end_side {
        &mut pair.end
    } else {
        &mut pair.start
    }
}

/// Writes `time` into the first pair whose chosen side is empty. A pair that
/// already holds the same time on that side makes the event a no-op.
fn fill_pair_slot(pairs: &mut [TimePair], time: &str, end_side: bool) -> bool {
    let minutes = parse_time_of_day(time);
    if pairs
        .iter_mut()
        .any(|pair| same_time(side_mut(pair, end_side), minutes))
    {
        return false;
    }
    match pairs
        .iter_mut()
        .map(|pair| side_mut(pair, end_side))
        .find(|slot| slot.is_none())
    {
        Some(slot) => {
            *slot = Some(time.to_string());
            true
        }
        None => false,
    }
}

fn fill_once(slot: &mut Option<String>, time: &str) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(time.to_string());
    true
}

/// Applies `event` to `row` under the write-once slot rules. Returns whether
/// anything changed.
pub fn apply_event(row: &mut AttendanceRow, event: &AttendanceEvent) -> bool {
    let time = format_ledger_time(event.time_of_day);
    let mut changed = match event.kind {
        EventKind::CheckIn => fill_once(&mut row.check_in, &time),
        EventKind::CheckOut => fill_once(&mut row.check_out, &time),
        EventKind::BreakStart => fill_pair_slot(&mut row.breaks, &time, false),
        EventKind::BreakEnd => fill_pair_slot(&mut row.breaks, &time, true),
        EventKind::RemoteStart => fill_pair_slot(&mut row.remote, &time, false),
        EventKind::RemoteEnd => fill_pair_slot(&mut row.remote, &time, true),
    };

    let recompute = match event.kind {
        EventKind::CheckOut => true,
        EventKind::BreakEnd => row.check_out.is_some(),
        _ => false,
    };
    if recompute {
        if let Some(total) = compute_work_time(row) {
            changed |= row.total_work_time.as_deref() != Some(total.as_str());
            row.total_work_time = Some(total);
        }
    }
    if event.kind == EventKind::RemoteEnd && row.employee_code.is_empty() {
        if let Some(total) = compute_remote_time(row) {
            changed |= row.total_work_time.as_deref() != Some(total.as_str());
            row.total_work_time = Some(total);
        }
    }

    if let Some(project) = event.project.as_deref() {
        if row.project.as_deref() != Some(project) {
            row.project = Some(project.to_string());
            changed = true;
        }
    }

    if changed {
        row.source = Some(event.source().label().to_string());
    }
    changed
}

pub struct AttendanceLedger {
    store: Arc<dyn TableStore>,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AttendanceLedger {
    pub fn new(store: Arc<dyn TableStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finds or creates the row for the event's `(key, date)`, applies it and
    /// persists the workbook. Nothing is written when the event changes nothing.
    pub fn upsert(&self, event: &AttendanceEvent) -> Result<UpsertOutcome, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut table = self.store.load(&self.path)?.unwrap_or_default();
        let mut decoded = DecodedSheet::decode(table.sheet(LEDGER_SHEET));

        let existing = decoded.entries.iter_mut().find_map(|entry| match entry {
            LedgerEntry::Parsed { row, .. } if row.matches(&event.key, event.date) => Some(row),
            _ => None,
        });

        let outcome = match existing {
            Some(row) => {
                if apply_event(row, event) {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            None => {
                let mut row = AttendanceRow::blank(&event.key, &event.name, event.date);
                apply_event(&mut row, event);
                decoded.entries.push(LedgerEntry::Parsed { row, cells: Vec::new() });
                UpsertOutcome::Created
            }
        };

        match outcome {
            UpsertOutcome::Unchanged => {
                debug!("{:?} for {} on {} already recorded", event.kind, event.key, event.date);
            }
            _ => {
                table.set_sheet(LEDGER_SHEET, decoded.encode());
                self.store.save(&table, &self.path)?;
                info!(
                    "Ledger {:?}: {:?} {} for {} on {}",
                    outcome,
                    event.kind,
                    format_ledger_time(event.time_of_day),
                    event.key,
                    event.date
                );
            }
        }
        Ok(outcome)
    }

    /// Every parseable row currently stored.
    pub fn rows(&self) -> Result<Vec<AttendanceRow>, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let table = self.store.load(&self.path)?.unwrap_or_default();
        let decoded = DecodedSheet::decode(table.sheet(LEDGER_SHEET));
        let skipped = decoded.entries.len() - decoded.rows().count();
        if skipped > 0 {
            warn!("{} ledger rows in {:?} could not be parsed", skipped, self.path);
        }
        Ok(decoded.rows().cloned().collect())
    }

    pub fn find(&self, key: &EmployeeKey, date: NaiveDate) -> Result<Option<AttendanceRow>, StorageError> {
        Ok(self.rows()?.into_iter().find(|row| row.matches(key, date)))
    }
}
