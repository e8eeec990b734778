// src/report_tests.rs

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
    use tokio::runtime::Runtime;

    use crate::device_client::{DeviceCredentials, DeviceSession, ReportPage};
    use crate::report::{
        aggregate, group_onsite, group_remote, merge, MergeReporter, RemoteRecord, ReportPeriod,
    };
    use crate::test_support::{entry, punch, FakeTimeTracking, ScriptedDevice};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    fn record(name: &str, id: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>, project: Option<&str>) -> RemoteRecord {
        RemoteRecord {
            name: name.to_string(),
            entry: entry(id, None, start, end),
            project: project.map(str::to_string),
        }
    }

    #[test]
    fn test_group_onsite_pairs_middle_punches_into_breaks() {
        let punches = vec![
            punch("101", "Ada Lovelace", "2024-01-01 17:00:00", "Check Out"),
            punch("101", "Ada Lovelace", "2024-01-01 09:00:00", "Check In"),
            punch("101", "Ada Lovelace", "2024-01-01 12:00:00", "Break Out"),
            punch("101", "Ada Lovelace", "2024-01-01 12:30:00", "Break In"),
            punch("101", "Ada Lovelace", "2024-01-01 15:00:00", "Break Out"),
        ];

        let days = group_onsite(&punches);

        assert_eq!(days.len(), 1);
        let day = &days[0];
        assert_eq!(day.name, "Ada Lovelace");
        assert_eq!(day.check_in, hm(9, 0));
        assert_eq!(day.check_out, Some(hm(17, 0)));
        assert_eq!(day.breaks.len(), 2);
        assert_eq!(day.breaks[0].end, Some(hm(12, 30)));
        assert_eq!(day.breaks[1].end, None);
        // the open break counts for nothing
        assert_eq!(day.work_minutes, Some(8 * 60 - 30));
    }

    #[test]
    fn test_group_onsite_single_punch_and_extra_breaks() {
        let mut punches = vec![punch("7", "Solo", "2024-01-02 08:00:00", "Check In")];
        for (i, minute) in ["10", "11", "12", "13", "14", "15", "16", "17"].iter().enumerate() {
            punches.push(punch("9", "Busy", &format!("2024-01-02 {}:00:00", minute), if i == 0 { "Check In" } else { "Break" }));
        }

        let days = group_onsite(&punches);

        let busy = days.iter().find(|d| d.employee_code == "9").unwrap();
        assert_eq!(busy.breaks.len(), 3);
        assert_eq!(busy.check_out, Some(hm(17, 0)));

        let solo = days.iter().find(|d| d.employee_code == "7").unwrap();
        assert_eq!(solo.check_out, None);
        assert_eq!(solo.work_minutes, None);
        assert!(solo.breaks.is_empty());
    }

    #[test]
    fn test_group_remote_sums_completed_entries_per_day() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let records = vec![
            record("Grace", "a", utc(1, 8, 0), Some(utc(1, 9, 30)), Some("Apollo")),
            record("Grace", "b", utc(1, 13, 0), Some(utc(1, 14, 0)), Some("Gemini")),
            record("Grace", "c", utc(1, 15, 0), None, Some("Mercury")),
            record("Grace", "d", utc(2, 8, 0), Some(utc(2, 8, 45)), Some("Apollo")),
        ];

        let days = group_remote(&records, offset);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, date(1));
        assert_eq!(days[0].minutes, 150);
        assert_eq!(days[0].start.time(), hm(9, 0));
        assert_eq!(days[0].end.time(), hm(15, 0));
        assert_eq!(days[0].project.as_deref(), Some("Apollo, Gemini"));
        assert_eq!(days[1].minutes, 45);
    }

    #[test]
    fn test_merge_joins_on_name_and_appends_remote_only() {
        let onsite = group_onsite(&[
            punch("101", "Ada Lovelace", "2024-01-01 09:00:00", "Check In"),
            punch("101", "Ada Lovelace", "2024-01-01 13:00:00", "Check Out"),
        ]);
        let remote = group_remote(
            &[
                record(" ada lovelace ", "a", utc(1, 14, 0), Some(utc(1, 16, 0)), None),
                record("Grace", "b", utc(1, 9, 0), Some(utc(1, 10, 0)), None),
            ],
            FixedOffset::east_opt(0).unwrap(),
        );

        let rows = merge(onsite, remote);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Ada Lovelace");
        assert!(rows[0].onsite.is_some() && rows[0].remote.is_some());
        assert_eq!(rows[0].total_minutes(), 4 * 60 + 2 * 60);

        assert_eq!(rows[1].name, "Grace");
        assert!(rows[1].onsite.is_none());
        assert_eq!(rows[1].employee_code, None);
        assert_eq!(rows[1].total_minutes(), 60);
    }

    #[test]
    fn test_weekly_aggregate_anchors_first_week_to_start() {
        // 2024-01-03 is a Wednesday
        let remote = group_remote(
            &[
                record("Grace", "a", utc(3, 9, 0), Some(utc(3, 10, 0)), None),
                record("Grace", "b", utc(7, 9, 0), Some(utc(7, 11, 0)), None),
                record("Grace", "c", utc(8, 9, 0), Some(utc(8, 9, 30)), None),
                record("Ada", "d", utc(4, 9, 0), Some(utc(4, 9, 15)), None),
            ],
            FixedOffset::east_opt(0).unwrap(),
        );
        let rows = merge(Vec::new(), remote);

        let weeks = aggregate(&rows, ReportPeriod::Weekly, date(3), date(10));

        assert_eq!(weeks.len(), 3);
        assert_eq!(weeks[0].employee, "Ada");
        assert_eq!(weeks[1].employee, "Grace");
        assert_eq!((weeks[1].from, weeks[1].to), (date(3), date(7)));
        assert_eq!(weeks[1].days, 2);
        assert_eq!(weeks[1].remote_minutes, 180);
        assert_eq!(weeks[1].period, "2024-W01");
        assert_eq!((weeks[2].from, weeks[2].to), (date(8), date(10)));
        assert_eq!(weeks[2].total_minutes, 30);
    }

    #[test]
    fn test_monthly_aggregate_uses_calendar_months() {
        let remote = group_remote(
            &[
                record("Grace", "a", utc(30, 9, 0), Some(utc(30, 10, 0)), None),
                record(
                    "Grace",
                    "b",
                    Utc.with_ymd_and_hms(2024, 2, 2, 9, 0, 0).unwrap(),
                    Some(Utc.with_ymd_and_hms(2024, 2, 2, 9, 20, 0).unwrap()),
                    None,
                ),
            ],
            FixedOffset::east_opt(0).unwrap(),
        );
        let rows = merge(Vec::new(), remote);
        let to = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();

        let months = aggregate(&rows, ReportPeriod::Monthly, date(15), to);

        assert_eq!(months.len(), 2);
        assert_eq!((months[0].from, months[0].to), (date(15), date(31)));
        assert_eq!(months[0].period, "2024-01");
        assert_eq!(months[1].from, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(months[1].to, to);
        assert_eq!(months[1].remote_minutes, 20);
    }

    #[test]
    fn test_period_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<ReportPeriod>().unwrap(), ReportPeriod::Weekly);
        assert_eq!(" monthly ".parse::<ReportPeriod>().unwrap(), ReportPeriod::Monthly);
        assert!("daily".parse::<ReportPeriod>().is_err());
        assert_eq!(ReportPeriod::Monthly.to_string(), "Monthly");
    }

    #[test]
    fn test_reporter_follows_pages_and_merges_sources() {
        let rt = Runtime::new().unwrap();
        let device = Arc::new(ScriptedDevice::new());
        device.push_report_page(Ok(Some(ReportPage {
            records: vec![punch("101", "Grace", "2024-01-01 09:00:00", "Check In")],
            next: Some("http://device/page2".to_string()),
        })));
        device.push_report_page(Ok(Some(ReportPage {
            records: vec![punch("101", "Grace", "2024-01-01 12:00:00", "Check Out")],
            next: None,
        })));

        let api = Arc::new(FakeTimeTracking::new());
        api.add_user("u1", "grace");
        api.add_project("p1", "Apollo");
        api.add_entries(
            "u1",
            vec![
                entry("t1", Some("p1"), utc(1, 13, 0), Some(utc(1, 15, 0))),
                // outside the requested range
                entry("t2", Some("p1"), utc(5, 13, 0), Some(utc(5, 15, 0))),
            ],
        );

        let session = DeviceSession::new(
            device.clone(),
            device.clone(),
            DeviceCredentials {
                username: "admin".into(),
                password: "secret".into(),
            },
        );
        let reporter = MergeReporter::new(session, api, FixedOffset::east_opt(0).unwrap());

        let report = rt
            .block_on(reporter.build(date(1), date(2), ReportPeriod::Weekly))
            .unwrap();

        assert_eq!(device.report_cursors(), vec![None, Some("http://device/page2".to_string())]);
        assert_eq!(report.daily.len(), 1);
        let row = &report.daily[0];
        assert_eq!(row.onsite_minutes(), 180);
        assert_eq!(row.remote_minutes(), 120);
        assert_eq!(row.remote.as_ref().unwrap().project.as_deref(), Some("Apollo"));
        assert_eq!(report.aggregates.len(), 1);
        assert_eq!(report.aggregates[0].total_minutes, 300);
    }

    #[test]
    fn test_reporter_rejects_inverted_range_without_calls() {
        let rt = Runtime::new().unwrap();
        let device = Arc::new(ScriptedDevice::new());
        let session = DeviceSession::new(device.clone(), device.clone(), DeviceCredentials::default());
        let reporter = MergeReporter::new(session, Arc::new(FakeTimeTracking::new()), FixedOffset::east_opt(0).unwrap());

        let report = rt
            .block_on(reporter.build(date(5), date(1), ReportPeriod::Monthly))
            .unwrap();

        assert!(report.daily.is_empty());
        assert!(device.report_cursors().is_empty());
    }
}
