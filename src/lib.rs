pub mod error;
pub mod period;
pub mod report;
pub mod scheduler;
pub mod storage;

pub use error::{Error, Result};
pub use period::{DateRange, PeriodKey, PeriodType};
pub use report::{build_csv_with_summary, generate_sales_report, ReportResult, ReportSummary};
pub use scheduler::poller::{run_once, run_poller, DeliverySink, DEFAULT_POLL_INTERVAL};
pub use scheduler::{find_due_schedules, DueReport, Frequency};
pub use storage::Database;

// Re-export repository row types needed by the binary crate, but not the module itself
pub use storage::repository::{DeliveryLog, Recipient, ReportDef, ScheduleInfo, User};

use chrono::NaiveDateTime;
use storage::repository;

/// Label used for ad-hoc reports that are not tied to a configured
/// report definition.
const ON_DEMAND_REPORT_NAME: &str = "Sales report";

/// Main entry point: the report engine plus the admin operations the CLI
/// drives. Scheduled delivery itself runs through [`run_poller`].
pub struct SalesCast {
    db: Database,
}

impl SalesCast {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Reports ────────────────────────────────────────────────────

    /// On-demand report for a period key, bypassing the scheduler. The
    /// returned CSV carries the summary block.
    pub async fn run_report(&self, key: PeriodKey) -> Result<ReportResult> {
        self.run_report_at(key, chrono::Local::now().naive_local()).await
    }

    /// Same as [`run_report`](Self::run_report) with an injected clock.
    pub async fn run_report_at(&self, key: PeriodKey, now: NaiveDateTime) -> Result<ReportResult> {
        let mut result = generate_sales_report(&self.db, key, now).await?;
        result.csv = build_csv_with_summary(ON_DEMAND_REPORT_NAME, &result.summary, &result.csv);
        Ok(result)
    }

    /// On-demand run of a configured report definition.
    pub async fn run_report_by_id(&self, report_id: i64) -> Result<(ReportDef, ReportResult)> {
        let def = self
            .db
            .reader()
            .call(move |conn| repository::get_report(conn, report_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("report {report_id}")))?;
        if !def.is_active {
            return Err(Error::NotFound(format!("report {report_id} is inactive")));
        }

        let key = PeriodType::from_tag(&def.period_type).period_key();
        let now = chrono::Local::now().naive_local();
        let mut result = generate_sales_report(&self.db, key, now).await?;
        result.csv = build_csv_with_summary(&def.name, &result.summary, &result.csv);
        Ok((def, result))
    }

    pub async fn add_report(
        &self,
        name: &str,
        description: Option<&str>,
        period_type: PeriodType,
    ) -> Result<i64> {
        let name = name.to_string();
        let description = description.map(|s| s.to_string());
        self.db
            .writer()
            .call(move |conn| {
                repository::insert_report(conn, &name, description.as_deref(), period_type.as_tag())
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn list_reports(&self) -> Result<Vec<ReportDef>> {
        self.db
            .reader()
            .call(|conn| repository::list_active_reports(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Schedules ──────────────────────────────────────────────────

    /// Create a schedule. Weekly schedules require a weekday (0=Sunday);
    /// daily schedules ignore any weekday passed.
    pub async fn add_schedule(
        &self,
        report_id: i64,
        hour: u32,
        minute: u32,
        frequency: Frequency,
        weekday: Option<u32>,
        recipient_ids: Vec<i64>,
    ) -> Result<i64> {
        if hour > 23 {
            return Err(Error::Schedule(format!("hour {hour} out of range 0-23")));
        }
        if minute > 59 {
            return Err(Error::Schedule(format!("minute {minute} out of range 0-59")));
        }
        let weekday = match frequency {
            Frequency::Weekly => match weekday {
                Some(wd) if wd <= 6 => Some(wd),
                Some(wd) => {
                    return Err(Error::Schedule(format!(
                        "weekday {wd} out of range 0-6 (0=Sunday)"
                    )))
                }
                None => {
                    return Err(Error::Schedule(
                        "weekly schedules require a weekday (0=Sunday)".into(),
                    ))
                }
            },
            Frequency::Daily => None,
        };

        self.db
            .writer()
            .call(move |conn| {
                repository::insert_schedule(
                    conn,
                    report_id,
                    hour,
                    minute,
                    frequency.as_tag(),
                    weekday,
                    &recipient_ids,
                )
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn remove_schedule(&self, schedule_id: i64) -> Result<bool> {
        self.db
            .writer()
            .call(move |conn| repository::remove_schedule(conn, schedule_id))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn set_schedule_active(&self, schedule_id: i64, active: bool) -> Result<bool> {
        self.db
            .writer()
            .call(move |conn| repository::set_schedule_active(conn, schedule_id, active))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleInfo>> {
        self.db
            .reader()
            .call(|conn| repository::list_schedules(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Resolve due schedules against the real clock.
    pub async fn due_now(&self) -> Result<Vec<DueReport>> {
        find_due_schedules(&self.db, chrono::Local::now().naive_local()).await
    }

    // ── Sales ──────────────────────────────────────────────────────

    pub async fn add_sale(
        &self,
        customer: &str,
        product: &str,
        quantity: i64,
        price: f64,
        sold_at: Option<NaiveDateTime>,
    ) -> Result<i64> {
        let customer = customer.to_string();
        let product = product.to_string();
        let sold_at = sold_at.unwrap_or_else(|| chrono::Local::now().naive_local());
        self.db
            .writer()
            .call(move |conn| {
                repository::insert_sale(conn, &customer, &product, quantity, price, sold_at)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Seed a deterministic batch of demo sales spread over the last `days`
    /// days. Returns the number of rows inserted.
    pub async fn seed_demo_sales(&self, days: u32) -> Result<u64> {
        const CUSTOMERS: [&str; 4] = ["Acme Corp", "Globex", "Initech", "Umbrella"];
        const PRODUCTS: [(&str, f64); 4] = [
            ("Standard plan", 49.0),
            ("Pro plan", 199.0),
            ("Enterprise plan", 999.0),
            ("Support pack", 25.5),
        ];

        let now = chrono::Local::now().naive_local();
        self.db
            .writer()
            .call(move |conn| {
                let mut inserted = 0u64;
                for day in 0..days {
                    let date = now - chrono::Duration::days(day as i64);
                    // Row count varies by day so aggregates aren't flat.
                    for i in 0..(1 + (day % 3)) {
                        let customer = CUSTOMERS[((day + i) % 4) as usize];
                        let (product, price) = PRODUCTS[((day * 2 + i) % 4) as usize];
                        let quantity = 1 + ((day + i) % 5) as i64;
                        let sold_at = date
                            .date()
                            .and_hms_opt(9 + (i % 10), (day * 7 % 60), 0)
                            .expect("hour 9-18, minute 0-59");
                        repository::insert_sale(conn, customer, product, quantity, price, sold_at)?;
                        inserted += 1;
                    }
                }
                Ok::<u64, rusqlite::Error>(inserted)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Users ──────────────────────────────────────────────────────

    pub async fn add_user(&self, username: &str, chat_id: Option<&str>) -> Result<i64> {
        let username = username.to_string();
        let chat_id = chat_id.map(|s| s.to_string());
        self.db
            .writer()
            .call(move |conn| repository::insert_user(conn, &username, chat_id.as_deref()))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn bind_user_chat(&self, user_id: i64, chat_id: &str) -> Result<bool> {
        let chat_id = chat_id.to_string();
        self.db
            .writer()
            .call(move |conn| repository::bind_chat(conn, user_id, &chat_id))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool> {
        self.db
            .writer()
            .call(move |conn| repository::set_user_active(conn, user_id, active))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.db
            .reader()
            .call(|conn| repository::list_users(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Delivery ledger ────────────────────────────────────────────

    pub async fn delivery_logs(&self, limit: u32) -> Result<Vec<DeliveryLog>> {
        self.db
            .reader()
            .call(move |conn| repository::list_delivery_logs(conn, limit))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
