// src/report_export.rs
//! Writes a built [`Report`] to an xlsx workbook: a `Daily` sheet with the
//! merged rows and a `Weekly`/`Monthly` sheet with the rollups.

use rust_xlsxwriter::{Color, Format, FormatBorder, FormatPattern, Workbook, Worksheet};
use std::path::Path;
use tracing::info;

use crate::model::BREAK_SLOTS;
use crate::report::{AggregateRow, Report, ReportRow};
use crate::storage::StorageError;
use crate::time_util::{format_hhmm, format_ledger_date, format_ledger_time};

pub const DAILY_HEADERS: [&str; 16] = [
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
    "OnSiteWork",
    "RemoteStart",
    "RemoteEnd",
    "RemoteWork",
    "Project",
];

pub const AGGREGATE_HEADERS: [&str; 8] = [
    "Employee",
    "Period",
    "From",
    "To",
    "Days",
    "OnSiteWork",
    "RemoteWork",
    "TotalWork",
];

/// Cell values for one merged row, in [`DAILY_HEADERS`] order plus `TotalWork`.
pub fn daily_cells(row: &ReportRow) -> Vec<String> {
    let mut cells = vec![
        row.name.clone(),
        row.employee_code.clone().unwrap_or_default(),
        format_ledger_date(row.date),
    ];

    match &row.onsite {
        Some(day) => {
            cells.push(format_ledger_time(day.check_in));
            cells.push(day.check_out.map(format_ledger_time).unwrap_or_default());
            for slot in 0..BREAK_SLOTS {
                let span = day.breaks.get(slot);
                cells.push(span.map(|b| format_ledger_time(b.start)).unwrap_or_default());
                cells.push(span.and_then(|b| b.end).map(format_ledger_time).unwrap_or_default());
            }
            cells.push(day.work_minutes.map(format_hhmm).unwrap_or_default());
        }
        None => cells.extend(std::iter::repeat(String::new()).take(3 + 2 * BREAK_SLOTS)),
    }

    match &row.remote {
        Some(day) => {
            cells.push(format_ledger_time(day.start.time()));
            cells.push(format_ledger_time(day.end.time()));
            cells.push(format_hhmm(day.minutes));
            cells.push(day.project.clone().unwrap_or_default());
        }
        None => cells.extend(std::iter::repeat(String::new()).take(4)),
    }

    cells.push(format_hhmm(row.total_minutes()));
    cells
}

pub fn aggregate_cells(row: &AggregateRow) -> Vec<String> {
    vec![
        row.employee.clone(),
        row.period.clone(),
        row.from.format("%Y-%m-%d").to_string(),
        row.to.format("%Y-%m-%d").to_string(),
        row.days.to_string(),
        format_hhmm(row.onsite_minutes),
        format_hhmm(row.remote_minutes),
        format_hhmm(row.total_minutes),
    ]
}

fn to_workbook_error<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Workbook(e.to_string())
}

fn write_sheet(worksheet: &mut Worksheet, headers: &[&str], rows: &[Vec<String>]) -> Result<(), StorageError> {
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::RGB(0xFFFFFF))
        .set_background_color(Color::RGB(0x2F75B5))
        .set_pattern(FormatPattern::Solid)
        .set_border(FormatBorder::Thin);
    let cell_format = Format::new().set_border(FormatBorder::Thin);

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_with_format(0, col as u16, *header, &header_format)
            .map_err(to_workbook_error)?;
    }
    worksheet
        .set_freeze_panes(1, 0)
        .map_err(to_workbook_error)?;

    for (index, values) in rows.iter().enumerate() {
        let row = (index + 1) as u32;
        for (col, value) in values.iter().enumerate() {
            worksheet
                .write_with_format(row, col as u16, value.as_str(), &cell_format)
                .map_err(to_workbook_error)?;
            if let Some(width) = widths.get_mut(col) {
                *width = (*width).max(value.chars().count());
            }
        }
    }

    for (col, width) in widths.iter().enumerate() {
        worksheet
            .set_column_width(col as u16, *width as f64 + 2.0)
            .map_err(to_workbook_error)?;
    }
    Ok(())
}

pub fn export_report(report: &Report, path: &Path) -> Result<(), StorageError> {
    let mut workbook = Workbook::new();

    let mut daily_headers = DAILY_HEADERS.to_vec();
    daily_headers.push("TotalWork");
    let daily: Vec<Vec<String>> = report.daily.iter().map(daily_cells).collect();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Daily").map_err(to_workbook_error)?;
    write_sheet(sheet, &daily_headers, &daily)?;

    let aggregates: Vec<Vec<String>> = report.aggregates.iter().map(aggregate_cells).collect();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name(report.period.to_string())
        .map_err(to_workbook_error)?;
    write_sheet(sheet, &AGGREGATE_HEADERS, &aggregates)?;

    workbook.save(path).map_err(to_workbook_error)?;
    info!(
        "Wrote report for {} to {} with {} daily rows to {}",
        report.from,
        report.to,
        report.daily.len(),
        path.display()
    );
    Ok(())
}
