// src/report.rs
//! Bulk merge of device history and time-tracking entries for a date range,
//! plus weekly/monthly rollups of the merged rows.

use chrono::{Datelike, DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clockify_client::{TimeEntry, TimeTrackingApi};
use crate::device_client::{DeviceSession, RawPunch};
use crate::error::SyncError;
use crate::model::BREAK_SLOTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Weekly,
    Monthly,
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Ok(ReportPeriod::Weekly),
            "monthly" | "month" => Ok(ReportPeriod::Monthly),
            other => Err(format!("unknown report period '{}' (expected weekly or monthly)", other)),
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportPeriod::Weekly => write!(f, "Weekly"),
            ReportPeriod::Monthly => write!(f, "Monthly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakSpan {
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

/// One employee's punches on one device-local day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnSiteDay {
    pub name: String,
    pub employee_code: String,
    pub date: NaiveDate,
    pub check_in: NaiveTime,
    pub check_out: Option<NaiveTime>,
    pub breaks: Vec<BreakSpan>,
    pub work_minutes: Option<i64>,
}

/// One user's completed time entries on one local day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDay {
    pub name: String,
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub minutes: i64,
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub name: String,
    pub employee_code: Option<String>,
    pub date: NaiveDate,
    pub onsite: Option<OnSiteDay>,
    pub remote: Option<RemoteDay>,
}

impl ReportRow {
    pub fn onsite_minutes(&self) -> i64 {
        self.onsite.as_ref().and_then(|d| d.work_minutes).unwrap_or(0)
    }

    pub fn remote_minutes(&self) -> i64 {
        self.remote.as_ref().map(|d| d.minutes).unwrap_or(0)
    }

    pub fn total_minutes(&self) -> i64 {
        self.onsite_minutes() + self.remote_minutes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    pub employee: String,
    pub period: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: usize,
    pub onsite_minutes: i64,
    pub remote_minutes: i64,
    pub total_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub period: ReportPeriod,
    pub daily: Vec<ReportRow>,
    pub aggregates: Vec<AggregateRow>,
}

/// A completed or running entry together with the owner's display name and
/// the resolved project name.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub name: String,
    pub entry: TimeEntry,
    pub project: Option<String>,
}

fn minutes_between(start: NaiveTime, end: NaiveTime) -> i64 {
    (end - start).num_minutes()
}

/// Groups report punches by `(employee code, date)`. The first and last punch
/// of a day are check-in and check-out; the punches between them pair up into
/// breaks in time order. Records with an unreadable time are dropped.
pub fn group_onsite(punches: &[RawPunch]) -> Vec<OnSiteDay> {
    let mut groups: BTreeMap<(String, NaiveDate), (String, Vec<NaiveTime>)> = BTreeMap::new();
    for punch in punches {
        let Some(at) = punch.timestamp() else {
            warn!("Report record for {} has unreadable time {:?}", punch.emp_code, punch.punch_time);
            continue;
        };
        groups
            .entry((punch.emp_code.clone(), at.date()))
            .or_insert_with(|| (punch.display_name(), Vec::new()))
            .1
            .push(at.time());
    }

    groups
        .into_iter()
        .filter_map(|((employee_code, date), (name, mut times))| {
            times.sort();
            let (&check_in, rest) = times.split_first()?;
            let (check_out, middle) = match rest.split_last() {
                Some((&last, middle)) => (Some(last), middle),
                None => (None, rest),
            };

            let breaks: Vec<BreakSpan> = middle
                .chunks(2)
                .take(BREAK_SLOTS)
                .map(|pair| BreakSpan {
                    start: pair[0],
                    end: pair.get(1).copied(),
                })
                .collect();

            let work_minutes = check_out.and_then(|out| {
                let away: i64 = breaks
                    .iter()
                    .filter_map(|b| b.end.map(|end| minutes_between(b.start, end)))
                    .sum();
                let worked = minutes_between(check_in, out) - away;
                (worked >= 0).then_some(worked)
            });

            Some(OnSiteDay {
                name,
                employee_code,
                date,
                check_in,
                check_out,
                breaks,
                work_minutes,
            })
        })
        .collect()
}

/// Groups entries by `(name, local start date)`. Running entries are skipped.
pub fn group_remote(records: &[RemoteRecord], offset: FixedOffset) -> Vec<RemoteDay> {
    let mut groups: BTreeMap<(String, NaiveDate), RemoteDay> = BTreeMap::new();
    for record in records {
        let Some(end) = record.entry.time_interval.end else {
            debug!("Skipping running entry {} for {}", record.entry.id, record.name);
            continue;
        };
        let start = record.entry.time_interval.start.with_timezone(&offset).naive_local();
        let end = end.with_timezone(&offset).naive_local();
        let minutes = record
            .entry
            .elapsed()
            .map(|d| d.num_minutes())
            .unwrap_or(0)
            .max(0);

        let day = groups
            .entry((record.name.clone(), start.date()))
            .or_insert_with(|| RemoteDay {
                name: record.name.clone(),
                date: start.date(),
                start,
                end,
                minutes: 0,
                project: None,
            });
        day.start = day.start.min(start);
        day.end = day.end.max(end);
        day.minutes += minutes;

        if let Some(project) = record.project.as_deref().filter(|p| !p.trim().is_empty()) {
            match &mut day.project {
                Some(existing) if existing.split(", ").any(|p| p == project) => {}
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(project);
                }
                None => day.project = Some(project.to_string()),
            }
        }
    }
    groups.into_values().collect()
}

fn join_key(name: &str, date: NaiveDate) -> (String, NaiveDate) {
    (name.trim().to_lowercase(), date)
}

/// Joins on-site and remote days on case-insensitive trimmed name and date.
/// Remote days without an on-site match are appended after the on-site rows.
pub fn merge(onsite: Vec<OnSiteDay>, remote: Vec<RemoteDay>) -> Vec<ReportRow> {
    let mut remote_by_key: HashMap<(String, NaiveDate), RemoteDay> = HashMap::new();
    let mut remote_order = Vec::new();
    for day in remote {
        let key = join_key(&day.name, day.date);
        if !remote_by_key.contains_key(&key) {
            remote_order.push(key.clone());
        }
        remote_by_key.insert(key, day);
    }

    let mut rows: Vec<ReportRow> = onsite
        .into_iter()
        .map(|day| {
            let remote = remote_by_key.remove(&join_key(&day.name, day.date));
            ReportRow {
                name: day.name.clone(),
                employee_code: Some(day.employee_code.clone()),
                date: day.date,
                onsite: Some(day),
                remote,
            }
        })
        .collect();

    for key in remote_order {
        if let Some(day) = remote_by_key.remove(&key) {
            rows.push(ReportRow {
                name: day.name.clone(),
                employee_code: None,
                date: day.date,
                onsite: None,
                remote: Some(day),
            });
        }
    }
    rows
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

/// The bucket `date` falls in, clamped to `[from, to]`, and its label.
fn bucket(period: ReportPeriod, date: NaiveDate, from: NaiveDate, to: NaiveDate) -> (NaiveDate, NaiveDate, String) {
    let (start, end, label) = match period {
        ReportPeriod::Weekly => {
            let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            let week = date.iso_week();
            (
                monday,
                monday + Duration::days(6),
                format!("{}-W{:02}", week.year(), week.week()),
            )
        }
        ReportPeriod::Monthly => (
            date.with_day(1).unwrap_or(date),
            last_day_of_month(date),
            format!("{}-{:02}", date.year(), date.month()),
        ),
    };
    (start.max(from), end.min(to), label)
}

/// Sums each duration column per employee and period. Output is ordered by
/// period start, then employee.
pub fn aggregate(rows: &[ReportRow], period: ReportPeriod, from: NaiveDate, to: NaiveDate) -> Vec<AggregateRow> {
    let mut buckets: BTreeMap<(NaiveDate, String), AggregateRow> = BTreeMap::new();
    for row in rows {
        let (start, end, label) = bucket(period, row.date, from, to);
        let employee = row.name.trim().to_string();
        let agg = buckets
            .entry((start, employee.to_lowercase()))
            .or_insert_with(|| AggregateRow {
                employee,
                period: label,
                from: start,
                to: end,
                days: 0,
                onsite_minutes: 0,
                remote_minutes: 0,
                total_minutes: 0,
            });
        agg.days += 1;
        agg.onsite_minutes += row.onsite_minutes();
        agg.remote_minutes += row.remote_minutes();
        agg.total_minutes += row.total_minutes();
    }
    buckets.into_values().collect()
}

/// Local midnight of `date` as a UTC instant.
fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&(local - Duration::seconds(offset.local_minus_utc() as i64)))
}

pub struct MergeReporter {
    session: DeviceSession,
    api: Arc<dyn TimeTrackingApi>,
    offset: FixedOffset,
}

impl MergeReporter {
    pub fn new(session: DeviceSession, api: Arc<dyn TimeTrackingApi>, offset: FixedOffset) -> Self {
        Self { session, api, offset }
    }

    async fn remote_records(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<RemoteRecord>, SyncError> {
        let start = local_midnight(from, self.offset);
        let end = local_midnight(to + Duration::days(1), self.offset);
        let mut records = Vec::new();

        for user in self.api.list_users().await? {
            let entries = self.api.list_entries(&user.id, start, end).await?;
            debug!("{} entries for {} between {} and {}", entries.len(), user.name, start, end);
            for entry in entries {
                let project = match entry.project_id.as_deref() {
                    Some(project_id) => self.api.get_project_name(project_id).await?,
                    None => None,
                };
                records.push(RemoteRecord {
                    name: user.name.clone(),
                    entry,
                    project,
                });
            }
        }
        Ok(records)
    }

    pub async fn build(&self, from: NaiveDate, to: NaiveDate, period: ReportPeriod) -> Result<Report, SyncError> {
        let mut report = Report {
            from,
            to,
            period,
            daily: Vec::new(),
            aggregates: Vec::new(),
        };
        if from > to {
            warn!("Report range {} to {} is empty", from, to);
            return Ok(report);
        }

        let punches = self.session.fetch_report(from, to).await?;
        let onsite: Vec<OnSiteDay> = group_onsite(&punches)
            .into_iter()
            .filter(|day| day.date >= from && day.date <= to)
            .collect();
        let remote = group_remote(&self.remote_records(from, to).await?, self.offset);

        report.daily = merge(onsite, remote);
        report.aggregates = aggregate(&report.daily, period, from, to);
        info!(
            "Built {} report for {} to {}: {} daily rows, {} aggregate rows",
            period,
            from,
            to,
            report.daily.len(),
            report.aggregates.len()
        );
        Ok(report)
    }
}
