use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text, which orders
/// lexicographically. Upper range bounds carry milliseconds so an end-of-day
/// bound (`…23:59:59.999`) compares after any stored second-granularity value.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TS_BOUND_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_ts(dt: NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn format_bound(dt: NaiveDateTime) -> String {
    dt.format(TS_BOUND_FORMAT).to_string()
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, TS_BOUND_FORMAT))
        .unwrap_or_default()
}

// ── Sales ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SaleRow {
    pub customer: String,
    pub product: String,
    pub quantity: i64,
    pub price: f64,
    pub sold_at: NaiveDateTime,
}

pub fn insert_sale(
    conn: &Connection,
    customer: &str,
    product: &str,
    quantity: i64,
    price: f64,
    sold_at: NaiveDateTime,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sales (customer, product, quantity, price, sold_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![customer, product, quantity, price, format_ts(sold_at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Bulk read of every sale inside the inclusive range, oldest first.
pub fn list_sales_between(
    conn: &Connection,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Result<Vec<SaleRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT customer, product, quantity, price, sold_at
         FROM sales
         WHERE sold_at >= ?1 AND sold_at <= ?2
         ORDER BY sold_at ASC",
    )?;
    // Lower bound stays second-granular: "…00:00:00.000" would sort after a
    // stored "…00:00:00" and drop sales landing exactly on the period start.
    let rows = stmt.query_map(params![format_ts(from), format_bound(to)], |row| {
        Ok(SaleRow {
            customer: row.get(0)?,
            product: row.get(1)?,
            quantity: row.get(2)?,
            price: row.get(3)?,
            sold_at: parse_ts(&row.get::<_, String>(4)?),
        })
    })?;
    rows.collect()
}

// ── Report definitions ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ReportDef {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub period_type: String,
    pub is_active: bool,
}

pub fn insert_report(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    period_type: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO reports (name, description, period_type, is_active)
         VALUES (?1, ?2, ?3, 1)",
        params![name, description, period_type],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_report(conn: &Connection, id: i64) -> Result<Option<ReportDef>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, description, period_type, is_active
         FROM reports WHERE id = ?1",
        params![id],
        report_from_row,
    )
    .optional()
}

pub fn list_active_reports(conn: &Connection) -> Result<Vec<ReportDef>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, period_type, is_active
         FROM reports WHERE is_active = 1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], report_from_row)?;
    rows.collect()
}

pub fn set_report_active(
    conn: &Connection,
    id: i64,
    active: bool,
) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE reports SET is_active = ?2 WHERE id = ?1",
        params![id, active as i32],
    )?;
    Ok(count > 0)
}

fn report_from_row(row: &rusqlite::Row<'_>) -> Result<ReportDef, rusqlite::Error> {
    Ok(ReportDef {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        period_type: row.get(3)?,
        is_active: row.get(4)?,
    })
}

// ── Users ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub chat_id: Option<String>,
    pub is_active: bool,
}

pub fn insert_user(
    conn: &Connection,
    username: &str,
    chat_id: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO users (username, chat_id, is_active) VALUES (?1, ?2, 1)",
        params![username, chat_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Bind a deliverable chat handle to an existing user.
pub fn bind_chat(conn: &Connection, user_id: i64, chat_id: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE users SET chat_id = ?2 WHERE id = ?1",
        params![user_id, chat_id],
    )?;
    Ok(count > 0)
}

pub fn set_user_active(
    conn: &Connection,
    user_id: i64,
    active: bool,
) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE users SET is_active = ?2 WHERE id = ?1",
        params![user_id, active as i32],
    )?;
    Ok(count > 0)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT id, username, chat_id, is_active FROM users ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            chat_id: row.get(2)?,
            is_active: row.get(3)?,
        })
    })?;
    rows.collect()
}

// ── Schedules ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub id: i64,
    pub report_id: i64,
    pub report_name: String,
    pub hour: u32,
    pub minute: u32,
    pub frequency: String,
    pub weekday: Option<u32>,
    pub is_active: bool,
    pub recipients: Vec<String>,
}

/// A schedule matching the current clock tick, joined with its active report
/// definition. Schedules pointing at a missing or deactivated report are
/// excluded here (report configuration is owned by the admin flow).
#[derive(Debug, Clone)]
pub struct DueCandidate {
    pub schedule_id: i64,
    pub report_id: i64,
    pub report_name: String,
    pub period_type: String,
    pub frequency: String,
    pub weekday: Option<u32>,
}

pub fn insert_schedule(
    conn: &Connection,
    report_id: i64,
    hour: u32,
    minute: u32,
    frequency: &str,
    weekday: Option<u32>,
    recipient_ids: &[i64],
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO schedules (report_id, hour, minute, frequency, weekday, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![report_id, hour, minute, frequency, weekday],
    )?;
    let schedule_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO schedule_recipients (schedule_id, user_id) VALUES (?1, ?2)",
    )?;
    for user_id in recipient_ids {
        stmt.execute(params![schedule_id, user_id])?;
    }
    Ok(schedule_id)
}

pub fn remove_schedule(conn: &Connection, schedule_id: i64) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM schedules WHERE id = ?1", params![schedule_id])?;
    Ok(count > 0)
}

pub fn set_schedule_active(
    conn: &Connection,
    schedule_id: i64,
    active: bool,
) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE schedules SET is_active = ?2 WHERE id = ?1",
        params![schedule_id, active as i32],
    )?;
    Ok(count > 0)
}

/// Admin view of all schedules with recipient usernames.
pub fn list_schedules(conn: &Connection) -> Result<Vec<ScheduleInfo>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.report_id, r.name, s.hour, s.minute, s.frequency, s.weekday, s.is_active
         FROM schedules s
         JOIN reports r ON r.id = s.report_id
         ORDER BY s.id ASC",
    )?;
    let mut schedules: Vec<ScheduleInfo> = stmt
        .query_map([], |row| {
            Ok(ScheduleInfo {
                id: row.get(0)?,
                report_id: row.get(1)?,
                report_name: row.get(2)?,
                hour: row.get(3)?,
                minute: row.get(4)?,
                frequency: row.get(5)?,
                weekday: row.get(6)?,
                is_active: row.get(7)?,
                recipients: Vec::new(),
            })
        })?
        .collect::<Result<_, _>>()?;

    let mut rstmt = conn.prepare(
        "SELECT u.username
         FROM schedule_recipients sr
         JOIN users u ON u.id = sr.user_id
         WHERE sr.schedule_id = ?1
         ORDER BY sr.rowid ASC",
    )?;
    for s in &mut schedules {
        let names = rstmt.query_map(params![s.id], |row| row.get(0))?;
        s.recipients = names.collect::<Result<_, _>>()?;
    }
    Ok(schedules)
}

/// Active schedules whose trigger hour/minute equal the current tick.
pub fn due_schedule_candidates(
    conn: &Connection,
    hour: u32,
    minute: u32,
) -> Result<Vec<DueCandidate>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.report_id, r.name, r.period_type, s.frequency, s.weekday
         FROM schedules s
         JOIN reports r ON r.id = s.report_id
         WHERE s.is_active = 1 AND r.is_active = 1 AND s.hour = ?1 AND s.minute = ?2
         ORDER BY s.id ASC",
    )?;
    let rows = stmt.query_map(params![hour, minute], |row| {
        Ok(DueCandidate {
            schedule_id: row.get(0)?,
            report_id: row.get(1)?,
            report_name: row.get(2)?,
            period_type: row.get(3)?,
            frequency: row.get(4)?,
            weekday: row.get(5)?,
        })
    })?;
    rows.collect()
}

/// A deliverable recipient: active user with a bound chat handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub user_id: i64,
    pub chat_id: String,
}

/// Eligible recipients of a schedule in insertion order. Users without a
/// chat handle or marked inactive are filtered out.
pub fn eligible_recipients(
    conn: &Connection,
    schedule_id: i64,
) -> Result<Vec<Recipient>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.chat_id
         FROM schedule_recipients sr
         JOIN users u ON u.id = sr.user_id
         WHERE sr.schedule_id = ?1 AND u.is_active = 1 AND u.chat_id IS NOT NULL
         ORDER BY sr.rowid ASC",
    )?;
    let rows = stmt.query_map(params![schedule_id], |row| {
        Ok(Recipient {
            user_id: row.get(0)?,
            chat_id: row.get(1)?,
        })
    })?;
    rows.collect()
}

// ── Delivery ledger ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryLog {
    pub id: i64,
    pub report_id: i64,
    pub user_id: i64,
    pub schedule_id: i64,
    pub status: String,
    pub error: Option<String>,
    pub sent_at: String,
}

/// True if the schedule already has a SUCCESS fact at or after `since`.
/// This is the sole duplicate-prevention mechanism: any SUCCESS row inside
/// the current minute proves the schedule fired, regardless of recipient.
pub fn has_success_since(
    conn: &Connection,
    schedule_id: i64,
    since: NaiveDateTime,
) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM delivery_logs
             WHERE schedule_id = ?1 AND sent_at >= ?2 AND status = 'SUCCESS'
             LIMIT 1",
            params![schedule_id, format_ts(since)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Append one SUCCESS fact per recipient in a single transaction, all
/// sharing `sent_at`. The idempotency check is satisfied as soon as the
/// transaction commits.
pub fn insert_delivery_batch(
    conn: &mut Connection,
    report_id: i64,
    schedule_id: i64,
    recipients: &[Recipient],
    sent_at: NaiveDateTime,
) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO delivery_logs (report_id, user_id, schedule_id, status, sent_at)
             VALUES (?1, ?2, ?3, 'SUCCESS', ?4)",
        )?;
        for r in recipients {
            stmt.execute(params![report_id, r.user_id, schedule_id, format_ts(sent_at)])?;
        }
    }
    tx.commit()
}

/// Append a single delivery fact. Used by the messaging worker to record
/// ERROR facts after a failed send; ERROR facts never block future runs.
pub fn insert_delivery(
    conn: &Connection,
    report_id: i64,
    user_id: i64,
    schedule_id: i64,
    status: &str,
    error: Option<&str>,
    sent_at: NaiveDateTime,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO delivery_logs (report_id, user_id, schedule_id, status, error, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![report_id, user_id, schedule_id, status, error, format_ts(sent_at)],
    )?;
    Ok(())
}

pub fn list_delivery_logs(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<DeliveryLog>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, report_id, user_id, schedule_id, status, error, sent_at
         FROM delivery_logs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(DeliveryLog {
            id: row.get(0)?,
            report_id: row.get(1)?,
            user_id: row.get(2)?,
            schedule_id: row.get(3)?,
            status: row.get(4)?,
            error: row.get(5)?,
            sent_at: row.get(6)?,
        })
    })?;
    rows.collect()
}
