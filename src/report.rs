use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::Result;
use crate::period::{DateRange, PeriodKey};
use crate::storage::repository::{self, SaleRow};
use crate::storage::Database;

/// Aggregate metrics for one reporting period.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_revenue: f64,
    pub total_orders: u64,
    pub total_quantity: i64,
    pub average_check: f64,
}

/// A generated report: resolved range, summary metrics, and the detail table.
/// Produced fresh on every invocation, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub summary: ReportSummary,
    pub csv: String,
}

/// Generate a sales report for the given period key, relative to `now`.
///
/// Reads every sale in the inclusive range (oldest first), computes the
/// summary, and renders the detail table. A storage failure fails the whole
/// invocation; there is no partial output.
pub async fn generate_sales_report(
    db: &Database,
    key: PeriodKey,
    now: NaiveDateTime,
) -> Result<ReportResult> {
    let range = key.range(now);
    let rows = db
        .reader()
        .call(move |conn| repository::list_sales_between(conn, range.from, range.to))
        .await?;
    Ok(build_report(range, &rows))
}

fn build_report(range: DateRange, rows: &[SaleRow]) -> ReportResult {
    let summary = build_summary(rows.iter().map(|r| (r.price, r.quantity)));
    let csv = build_detail_csv(rows);
    ReportResult {
        from: range.from,
        to: range.to,
        summary,
        csv,
    }
}

/// Compute summary metrics from `(price, quantity)` pairs.
///
/// `average_check` is revenue over order count, or exactly `0` for an empty
/// period — never NaN.
pub fn build_summary(rows: impl Iterator<Item = (f64, i64)>) -> ReportSummary {
    let mut total_revenue = 0.0;
    let mut total_orders = 0u64;
    let mut total_quantity = 0i64;

    for (price, quantity) in rows {
        total_revenue += price * quantity as f64;
        total_orders += 1;
        total_quantity += quantity;
    }

    let average_check = if total_orders > 0 {
        round2(total_revenue / total_orders as f64)
    } else {
        0.0
    };

    ReportSummary {
        total_revenue: round2(total_revenue),
        total_orders,
        total_quantity,
        average_check,
    }
}

const CSV_HEADER: &str = "date;customer;product;quantity;price;sum";

/// Render the semicolon-delimited detail table. Monetary fields use two
/// decimals with a comma separator; the format is consumed by spreadsheet
/// imports and must stay byte-stable.
fn build_detail_csv(rows: &[SaleRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for r in rows {
        let sum = r.price * r.quantity as f64;
        lines.push(format!(
            "{};{};{};{};{};{}",
            r.sold_at.format("%Y-%m-%d"),
            r.customer,
            r.product,
            r.quantity,
            money(r.price),
            money(sum),
        ));
    }
    lines.join("\n")
}

/// Prepend the human-readable summary block (report name plus totals) and a
/// blank line before the detail table.
pub fn build_csv_with_summary(
    report_name: &str,
    summary: &ReportSummary,
    detail_csv: &str,
) -> String {
    let block = [
        format!("Report;{report_name}"),
        format!("Revenue;{:.2}", summary.total_revenue),
        format!("Orders;{}", summary.total_orders),
        format!("Units;{}", summary.total_quantity),
        format!("Average check;{:.2}", summary.average_check),
        String::new(),
    ];
    format!("{}\n{}", block.join("\n"), detail_csv)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn money(v: f64) -> String {
    format!("{v:.2}").replace('.', ",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn sale(customer: &str, product: &str, quantity: i64, price: f64, at: NaiveDateTime) -> SaleRow {
        SaleRow {
            customer: customer.into(),
            product: product.into(),
            quantity,
            price,
            sold_at: at,
        }
    }

    #[test]
    fn test_summary_canonical_scenario() {
        let summary = build_summary(
            [(1000.0, 2), (500.0, 1), (200.0, 3)].into_iter(),
        );
        assert_eq!(summary.total_revenue, 3100.0);
        assert_eq!(summary.total_orders, 3);
        assert_eq!(summary.total_quantity, 6);
        assert_eq!(summary.average_check, 1033.33);
    }

    #[test]
    fn test_summary_empty_has_no_nan() {
        let summary = build_summary(std::iter::empty());
        assert_eq!(summary.total_revenue, 0.0);
        assert_eq!(summary.total_orders, 0);
        assert_eq!(summary.total_quantity, 0);
        assert_eq!(summary.average_check, 0.0);
        assert!(summary.average_check.is_finite());
    }

    #[test]
    fn test_detail_csv_format() {
        let rows = vec![
            sale("Acme", "Widget", 2, 19.5, at(2025, 1, 15, 9)),
            sale("Beta", "Gadget", 1, 3.0, at(2025, 1, 16, 12)),
        ];
        let csv = build_detail_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "date;customer;product;quantity;price;sum");
        assert_eq!(lines[1], "2025-01-15;Acme;Widget;2;19,50;39,00");
        assert_eq!(lines[2], "2025-01-16;Beta;Gadget;1;3,00;3,00");
    }

    #[test]
    fn test_detail_sums_reconcile_with_revenue() {
        let rows = vec![
            sale("A", "x", 3, 10.01, at(2025, 2, 1, 8)),
            sale("B", "y", 7, 0.99, at(2025, 2, 2, 8)),
            sale("C", "z", 1, 1234.56, at(2025, 2, 3, 8)),
        ];
        let summary = build_summary(rows.iter().map(|r| (r.price, r.quantity)));
        let csv = build_detail_csv(&rows);

        let total: f64 = csv
            .lines()
            .skip(1)
            .map(|l| l.rsplit(';').next().unwrap().replace(',', ".").parse::<f64>().unwrap())
            .sum();
        assert!((total - summary.total_revenue).abs() < 0.005);
    }

    #[test]
    fn test_csv_with_summary_block() {
        let summary = ReportSummary {
            total_revenue: 3100.0,
            total_orders: 3,
            total_quantity: 6,
            average_check: 1033.33,
        };
        let full = build_csv_with_summary("Daily sales", &summary, CSV_HEADER);
        let lines: Vec<&str> = full.lines().collect();
        assert_eq!(lines[0], "Report;Daily sales");
        assert_eq!(lines[1], "Revenue;3100.00");
        assert_eq!(lines[2], "Orders;3");
        assert_eq!(lines[3], "Units;6");
        assert_eq!(lines[4], "Average check;1033.33");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], CSV_HEADER);
    }

    #[tokio::test]
    async fn test_generate_filters_by_period() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                repository::insert_sale(conn, "Acme", "Widget", 2, 1000.0, at(2025, 1, 15, 10))?;
                repository::insert_sale(conn, "Acme", "Widget", 1, 500.0, at(2025, 1, 15, 18))?;
                // Outside "today"
                repository::insert_sale(conn, "Beta", "Gadget", 5, 100.0, at(2025, 1, 14, 10))?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let now = at(2025, 1, 15, 20);
        let report = generate_sales_report(&db, PeriodKey::Today, now).await.unwrap();
        assert_eq!(report.summary.total_orders, 2);
        assert_eq!(report.summary.total_revenue, 2500.0);
        assert_eq!(report.csv.lines().count(), 3);

        let week = generate_sales_report(&db, PeriodKey::Last7Days, now).await.unwrap();
        assert_eq!(week.summary.total_orders, 3);
    }

    #[tokio::test]
    async fn test_generate_empty_period() {
        let db = Database::open_memory().await.unwrap();
        let report = generate_sales_report(&db, PeriodKey::Yesterday, at(2025, 6, 1, 9))
            .await
            .unwrap();
        assert_eq!(report.summary, ReportSummary::default());
        assert_eq!(report.csv, CSV_HEADER);
        assert!(report.from <= report.to);
    }
}
