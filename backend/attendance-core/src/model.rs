// src/model.rs
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const BREAK_SLOTS: usize = 3;
pub const REMOTE_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    CheckIn,
    CheckOut,
    BreakStart,
    BreakEnd,
    RemoteStart,
    RemoteEnd,
}

impl EventKind {
    /// Maps the device's human status label ("Check In", "Break Out", ...) to a
    /// kind. Unknown labels (overtime and the like) return `None`.
    pub fn from_device_status(label: &str) -> Option<Self> {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "checkin" => Some(Self::CheckIn),
            "checkout" => Some(Self::CheckOut),
            "breakstart" | "breakout" => Some(Self::BreakStart),
            "breakend" | "breakin" => Some(Self::BreakEnd),
            _ => None,
        }
    }

    pub fn source(self) -> Source {
        match self {
            Self::RemoteStart | Self::RemoteEnd => Source::Remote,
            _ => Source::OnSite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    OnSite,
    Remote,
}

impl Source {
    /// Label written to the ledger's `Source` column.
    pub fn label(self) -> &'static str {
        match self {
            Self::OnSite => "Zkteco",
            Self::Remote => "Clockify",
        }
    }
}

/// How an event finds its ledger row. Device punches carry a stable employee
/// code; time-tracking events only know the user's display name. The two key
/// spaces never match each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmployeeKey {
    Code(String),
    Name(String),
}

impl EmployeeKey {
    /// Key for a device punch. Terminals without an enrolled code fall back
    /// to the display name.
    pub fn for_device(code: &str, name: &str) -> Self {
        let code = code.trim();
        if code.is_empty() {
            Self::Name(name.to_string())
        } else {
            Self::Code(code.to_string())
        }
    }
}

impl fmt::Display for EmployeeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "code {}", code),
            Self::Name(name) => write!(f, "name {}", name),
        }
    }
}

/// A source-agnostic attendance fact, produced once at the translation
/// boundary of each poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub key: EmployeeKey,
    pub name: String,
    pub date: NaiveDate,
    pub time_of_day: NaiveTime,
    pub kind: EventKind,
    pub project: Option<String>,
}

impl AttendanceEvent {
    pub fn at(key: EmployeeKey, name: impl Into<String>, timestamp: NaiveDateTime, kind: EventKind) -> Self {
        Self {
            key,
            name: name.into(),
            date: timestamp.date(),
            time_of_day: timestamp.time(),
            kind,
            project: None,
        }
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn source(&self) -> Source {
        self.kind.source()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimePair {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TimePair {
    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

/// One employee's attendance for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub name: String,
    /// Empty for rows keyed by display name.
    pub employee_code: String,
    pub date: NaiveDate,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub breaks: [TimePair; BREAK_SLOTS],
    pub remote: [TimePair; REMOTE_SLOTS],
    pub total_work_time: Option<String>,
    pub project: Option<String>,
    pub source: Option<String>,
}

impl AttendanceRow {
    pub fn blank(key: &EmployeeKey, name: &str, date: NaiveDate) -> Self {
        let employee_code = match key {
            EmployeeKey::Code(code) => code.clone(),
            EmployeeKey::Name(_) => String::new(),
        };
        Self {
            name: name.to_string(),
            employee_code,
            date,
            check_in: None,
            check_out: None,
            breaks: Default::default(),
            remote: Default::default(),
            total_work_time: None,
            project: None,
            source: None,
        }
    }

    pub fn matches(&self, key: &EmployeeKey, date: NaiveDate) -> bool {
        if self.date != date {
            return false;
        }
        match key {
            EmployeeKey::Code(code) => !code.is_empty() && self.employee_code == *code,
            EmployeeKey::Name(name) => self.employee_code.is_empty() && self.name == *name,
        }
    }
}
