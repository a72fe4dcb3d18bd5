pub mod poller;

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::error::Result;
use crate::period::PeriodType;
use crate::report::{build_csv_with_summary, generate_sales_report, ReportSummary};
use crate::storage::repository::{self, Recipient};
use crate::storage::Database;

/// How often a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "WEEKLY" => Frequency::Weekly,
            _ => Frequency::Daily,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
        }
    }
}

/// One unit of delivery work: a generated report plus the recipients it goes
/// to. The `csv` already carries the summary block. Handed to the messaging
/// worker, which owns the actual send.
#[derive(Debug, Clone, Serialize)]
pub struct DueReport {
    pub schedule_id: i64,
    pub report_id: i64,
    pub report_name: String,
    pub summary: ReportSummary,
    pub csv: String,
    pub recipients: Vec<Recipient>,
}

/// Resolve which schedules fire at `now` and prepare their reports.
///
/// Per invocation:
/// 1. Load active schedules matching the current hour/minute (joined with
///    active report definitions), then their eligible recipients keyed by
///    schedule id.
/// 2. For each match in id order: apply the weekly weekday filter, skip if a
///    SUCCESS delivery fact already exists for this minute, skip if nobody
///    would receive it, otherwise generate the report and append one SUCCESS
///    fact per recipient in a single batch.
///
/// The dedup check is minute-granular: the trigger condition (hour == H,
/// minute == M) holds for the whole 60-second window, so every tick inside
/// that window must produce identical behavior exactly once. The check and
/// the batch write are not covered by one transaction; two concurrent runs
/// in the same minute could both pass the check. Accepted under the
/// single-process poller (see `poller`).
pub async fn find_due_schedules(db: &Database, now: NaiveDateTime) -> Result<Vec<DueReport>> {
    let hour = now.hour();
    let minute = now.minute();
    let weekday = now.weekday().num_days_from_sunday();
    let minute_start = now
        .date()
        .and_hms_opt(hour, minute, 0)
        .expect("hour/minute taken from a valid timestamp");

    let candidates = db
        .reader()
        .call(move |conn| repository::due_schedule_candidates(conn, hour, minute))
        .await?;

    // The common case: the external ticker fires many times a minute and
    // almost never lands on a configured hour:minute.
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Second read of the two-step load: recipients per schedule, grouped in
    // an ordered map so work units come out in schedule-id order.
    let ids: Vec<i64> = candidates.iter().map(|c| c.schedule_id).collect();
    let recipients_by_schedule: BTreeMap<i64, Vec<Recipient>> = db
        .reader()
        .call(move |conn| {
            let mut map = BTreeMap::new();
            for id in ids {
                map.insert(id, repository::eligible_recipients(conn, id)?);
            }
            Ok::<_, rusqlite::Error>(map)
        })
        .await?;

    let mut due = Vec::new();

    for candidate in candidates {
        if Frequency::from_tag(&candidate.frequency) == Frequency::Weekly {
            if let Some(wd) = candidate.weekday {
                if wd != weekday {
                    continue;
                }
            }
        }

        let already_sent = {
            let schedule_id = candidate.schedule_id;
            db.reader()
                .call(move |conn| repository::has_success_since(conn, schedule_id, minute_start))
                .await?
        };
        if already_sent {
            log::debug!(
                "schedule {} already delivered this minute, skipping",
                candidate.schedule_id
            );
            continue;
        }

        let recipients = recipients_by_schedule
            .get(&candidate.schedule_id)
            .cloned()
            .unwrap_or_default();
        if recipients.is_empty() {
            log::debug!(
                "schedule {} has no eligible recipients, skipping",
                candidate.schedule_id
            );
            continue;
        }

        let key = PeriodType::from_tag(&candidate.period_type).period_key();
        let report = generate_sales_report(db, key, now).await?;
        let csv = build_csv_with_summary(&candidate.report_name, &report.summary, &report.csv);

        // Record SUCCESS before returning the work unit so the next tick in
        // this minute sees the schedule as already fired.
        {
            let recipients = recipients.clone();
            let report_id = candidate.report_id;
            let schedule_id = candidate.schedule_id;
            db.writer()
                .call(move |conn| {
                    repository::insert_delivery_batch(conn, report_id, schedule_id, &recipients, now)
                })
                .await?;
        }

        due.push(DueReport {
            schedule_id: candidate.schedule_id,
            report_id: candidate.report_id,
            report_name: candidate.report_name,
            summary: report.summary,
            csv,
            recipients,
        });
    }

    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    /// One report, one schedule at 09:30 DAILY, recipients bound and active.
    /// Returns (report_id, schedule_id).
    async fn seed_daily(db: &Database, recipients: usize) -> (i64, i64) {
        db.writer()
            .call(move |conn| {
                let report = repository::insert_report(conn, "Daily sales", None, "DAY")?;
                let mut user_ids = Vec::new();
                for i in 0..recipients {
                    user_ids.push(repository::insert_user(
                        conn,
                        &format!("user{i}"),
                        Some(&format!("chat-{i}")),
                    )?);
                }
                let schedule =
                    repository::insert_schedule(conn, report, 9, 30, "DAILY", None, &user_ids)?;
                repository::insert_sale(conn, "Acme", "Widget", 2, 1000.0, at(2025, 1, 15, 8, 0, 0))?;
                Ok::<(i64, i64), rusqlite::Error>((report, schedule))
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_match_returns_empty() {
        let db = Database::open_memory().await.unwrap();
        seed_daily(&db, 1).await;

        // 2025-01-15 is a Wednesday; tick off the trigger minute.
        let due = find_due_schedules(&db, at(2025, 1, 15, 9, 31, 0)).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_due_schedule_emits_work_and_facts() {
        let db = Database::open_memory().await.unwrap();
        let (report_id, schedule_id) = seed_daily(&db, 2).await;

        let now = at(2025, 1, 15, 9, 30, 12);
        let due = find_due_schedules(&db, now).await.unwrap();
        assert_eq!(due.len(), 1);

        let work = &due[0];
        assert_eq!(work.schedule_id, schedule_id);
        assert_eq!(work.report_id, report_id);
        assert_eq!(work.report_name, "Daily sales");
        assert_eq!(work.recipients.len(), 2);
        assert_eq!(work.summary.total_revenue, 2000.0);
        assert!(work.csv.starts_with("Report;Daily sales\n"));
        assert!(work.csv.contains("date;customer;product;quantity;price;sum"));

        let logs = db
            .reader()
            .call(|conn| repository::list_delivery_logs(conn, 10))
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == "SUCCESS"));
        assert!(logs.iter().all(|l| l.schedule_id == schedule_id));
        assert_eq!(logs[0].sent_at, logs[1].sent_at);
    }

    #[tokio::test]
    async fn test_second_run_in_same_minute_is_idempotent() {
        let db = Database::open_memory().await.unwrap();
        seed_daily(&db, 1).await;

        let first = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 2)).await.unwrap();
        assert_eq!(first.len(), 1);

        // Later tick inside the same minute: nothing to do.
        let second = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 42)).await.unwrap();
        assert!(second.is_empty());

        // Exactly one fact was written.
        let logs = db
            .reader()
            .call(|conn| repository::list_delivery_logs(conn, 10))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_next_day_fires_again() {
        let db = Database::open_memory().await.unwrap();
        seed_daily(&db, 1).await;

        assert_eq!(find_due_schedules(&db, at(2025, 1, 15, 9, 30, 0)).await.unwrap().len(), 1);
        assert_eq!(find_due_schedules(&db, at(2025, 1, 16, 9, 30, 0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_weekly_fires_only_on_its_weekday() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                let report = repository::insert_report(conn, "Weekly sales", None, "WEEK")?;
                let user = repository::insert_user(conn, "alice", Some("chat-alice"))?;
                // weekday 3 = Wednesday
                repository::insert_schedule(conn, report, 9, 30, "WEEKLY", Some(3), &[user])?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        // 2025-01-16 is a Thursday: hour/minute match, weekday does not.
        let thursday = find_due_schedules(&db, at(2025, 1, 16, 9, 30, 0)).await.unwrap();
        assert!(thursday.is_empty());

        // 2025-01-15 is a Wednesday.
        let wednesday = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 0)).await.unwrap();
        assert_eq!(wednesday.len(), 1);
    }

    #[tokio::test]
    async fn test_two_schedules_one_already_sent() {
        let db = Database::open_memory().await.unwrap();
        let (fired_schedule, fresh_schedule) = db
            .writer()
            .call(|conn| {
                let report = repository::insert_report(conn, "Daily sales", None, "DAY")?;
                let user = repository::insert_user(conn, "alice", Some("chat-alice"))?;
                let s1 = repository::insert_schedule(conn, report, 9, 30, "DAILY", None, &[user])?;
                let s2 = repository::insert_schedule(conn, report, 9, 30, "DAILY", None, &[user])?;
                // s1 already has a SUCCESS fact inside the current minute.
                repository::insert_delivery(
                    conn,
                    report,
                    user,
                    s1,
                    "SUCCESS",
                    None,
                    at(2025, 1, 15, 9, 30, 1),
                )?;
                Ok::<(i64, i64), rusqlite::Error>((s1, s2))
            })
            .await
            .unwrap();

        let due = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 20)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].schedule_id, fresh_schedule);
        assert_ne!(due[0].schedule_id, fired_schedule);
    }

    #[tokio::test]
    async fn test_no_eligible_recipients_writes_nothing() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                let report = repository::insert_report(conn, "Daily sales", None, "DAY")?;
                let unbound = repository::insert_user(conn, "carol", None)?;
                let inactive = repository::insert_user(conn, "dave", Some("chat-dave"))?;
                repository::set_user_active(conn, inactive, false)?;
                repository::insert_schedule(conn, report, 9, 30, "DAILY", None, &[unbound, inactive])?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let due = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 0)).await.unwrap();
        assert!(due.is_empty());

        let logs = db
            .reader()
            .call(|conn| repository::list_delivery_logs(conn, 10))
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_error_fact_does_not_block_next_run() {
        let db = Database::open_memory().await.unwrap();
        let (report_id, schedule_id) = seed_daily(&db, 1).await;

        db.writer()
            .call(move |conn| {
                repository::insert_delivery(
                    conn,
                    report_id,
                    1,
                    schedule_id,
                    "ERROR",
                    Some("bot unreachable"),
                    at(2025, 1, 15, 9, 30, 1),
                )
            })
            .await
            .unwrap();

        let due = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 30)).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_period_type_selects_window() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                let report = repository::insert_report(conn, "Monthly sales", None, "MONTH")?;
                let user = repository::insert_user(conn, "alice", Some("chat-alice"))?;
                repository::insert_schedule(conn, report, 9, 30, "DAILY", None, &[user])?;
                // 20 days back: outside "today", inside last30days.
                repository::insert_sale(conn, "Acme", "Widget", 1, 700.0, at(2024, 12, 26, 12, 0, 0))?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let due = find_due_schedules(&db, at(2025, 1, 15, 9, 30, 0)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].summary.total_orders, 1);
        assert_eq!(due[0].summary.total_revenue, 700.0);
    }

    #[test]
    fn test_frequency_tags() {
        assert_eq!(Frequency::from_tag("WEEKLY"), Frequency::Weekly);
        assert_eq!(Frequency::from_tag("DAILY"), Frequency::Daily);
        assert_eq!(Frequency::from_tag("whenever"), Frequency::Daily);
        assert_eq!(Frequency::Weekly.as_tag(), "WEEKLY");
    }
}
