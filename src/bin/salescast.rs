use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};

use salescast::{
    Database, DeliverySink, DueReport, Frequency, PeriodKey, PeriodType, Recipient, SalesCast,
};

#[derive(Parser)]
#[command(name = "salescast", about = "Scheduled sales-report delivery engine")]
struct Cli {
    /// Database path (default: ~/.salescast/salescast.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the delivery poller
    Run {
        /// Poll interval in seconds
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
    /// Generate an on-demand report
    Report {
        /// Period key: today, yesterday, last7days, last30days
        #[arg(default_value = "today")]
        period: String,
        /// Output the full result as JSON
        #[arg(long)]
        json: bool,
        /// Write the CSV to a file instead of printing the summary
        #[arg(long, value_name = "FILE")]
        out: Option<String>,
    },
    /// Manage sale records
    Sales {
        #[command(subcommand)]
        action: SalesAction,
    },
    /// Manage report definitions
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },
    /// Manage recipients
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Manage delivery schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Show recent delivery log entries
    Logs {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum SalesAction {
    /// Record a sale
    Add {
        customer: String,
        product: String,
        quantity: i64,
        price: f64,
        /// Sale timestamp (YYYY-MM-DD or "YYYY-MM-DD HH:MM"); default now
        #[arg(long)]
        at: Option<String>,
    },
    /// Insert demo sales spread over recent days
    Seed {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum ReportsAction {
    /// Add a report definition
    Add {
        name: String,
        /// Period type: DAY, WEEK or MONTH
        #[arg(long, default_value = "DAY")]
        period_type: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List active report definitions
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Add a recipient
    Add {
        username: String,
        /// Deliverable chat handle
        #[arg(long)]
        chat: Option<String>,
    },
    /// Bind a chat handle to an existing recipient
    Bind { id: i64, chat: String },
    /// List recipients
    List {
        #[arg(long)]
        json: bool,
    },
    /// Deactivate a recipient
    Disable { id: i64 },
    /// Reactivate a recipient
    Enable { id: i64 },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create a schedule
    Add {
        report_id: i64,
        hour: u32,
        minute: u32,
        /// DAILY or WEEKLY
        #[arg(long, default_value = "DAILY")]
        frequency: String,
        /// Required for WEEKLY: 0=Sunday .. 6=Saturday
        #[arg(long)]
        weekday: Option<u32>,
        /// Recipient user ids
        #[arg(long = "recipient", value_name = "USER_ID")]
        recipients: Vec<i64>,
    },
    /// List schedules
    List {
        #[arg(long)]
        json: bool,
    },
    Remove { id: i64 },
    Enable { id: i64 },
    Disable { id: i64 },
}

/// Sink used by `run`: logs each delivery instead of talking to a real
/// messaging transport. Swap this out to integrate a chat or mail client.
struct LogSink;

impl DeliverySink for LogSink {
    fn send(&self, recipient: &Recipient, due: &DueReport) -> Result<(), String> {
        log::info!(
            "deliver '{}' ({} bytes csv) to {}",
            due.report_name,
            due.csv.len(),
            recipient.chat_id
        );
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return Ok(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).unwrap());
    }
    anyhow::bail!("unrecognized timestamp: {s} (expected YYYY-MM-DD or YYYY-MM-DD HH:MM)")
}

fn print_summary(result: &salescast::ReportResult) {
    println!("Period:        {} .. {}", result.from, result.to);
    println!("Revenue:       {:.2}", result.summary.total_revenue);
    println!("Orders:        {}", result.summary.total_orders);
    println!("Units:         {}", result.summary.total_quantity);
    println!("Average check: {:.2}", result.summary.average_check);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };
    let app = SalesCast::new(db);

    match cli.command {
        Commands::Run { interval_secs } => {
            salescast::run_poller(
                app.db().clone(),
                Arc::new(LogSink),
                Duration::from_secs(interval_secs),
            )
            .await;
        }
        Commands::Report { period, json, out } => {
            let key = PeriodKey::parse(&period);
            let result = app.run_report(key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(path) = out {
                std::fs::write(&path, &result.csv)?;
                print_summary(&result);
                println!("CSV written to {path}");
            } else {
                print_summary(&result);
                println!();
                println!("{}", result.csv);
            }
        }
        Commands::Sales { action } => match action {
            SalesAction::Add {
                customer,
                product,
                quantity,
                price,
                at,
            } => {
                let sold_at = at.as_deref().map(parse_timestamp).transpose()?;
                let id = app.add_sale(&customer, &product, quantity, price, sold_at).await?;
                println!("Sale {id} recorded");
            }
            SalesAction::Seed { days } => {
                let inserted = app.seed_demo_sales(days).await?;
                println!("Inserted {inserted} demo sales over {days} day(s)");
            }
        },
        Commands::Reports { action } => match action {
            ReportsAction::Add {
                name,
                period_type,
                description,
            } => {
                let pt = PeriodType::from_tag(&period_type.to_uppercase());
                let id = app.add_report(&name, description.as_deref(), pt).await?;
                println!("Report {id} ({name}, {}) added", pt.as_tag());
            }
            ReportsAction::List { json } => {
                let reports = app.list_reports().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&reports)?);
                } else {
                    for r in reports {
                        println!(
                            "{:>4}  {:<30} {:<6} {}",
                            r.id,
                            r.name,
                            r.period_type,
                            r.description.unwrap_or_default()
                        );
                    }
                }
            }
        },
        Commands::Users { action } => match action {
            UsersAction::Add { username, chat } => {
                let id = app.add_user(&username, chat.as_deref()).await?;
                println!("User {id} ({username}) added");
            }
            UsersAction::Bind { id, chat } => {
                if app.bind_user_chat(id, &chat).await? {
                    println!("User {id} bound to {chat}");
                } else {
                    anyhow::bail!("no user with id {id}");
                }
            }
            UsersAction::List { json } => {
                let users = app.list_users().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&users)?);
                } else {
                    for u in users {
                        println!(
                            "{:>4}  {:<20} {:<16} {}",
                            u.id,
                            u.username,
                            u.chat_id.unwrap_or_else(|| "-".into()),
                            if u.is_active { "active" } else { "inactive" }
                        );
                    }
                }
            }
            UsersAction::Disable { id } => {
                if !app.set_user_active(id, false).await? {
                    anyhow::bail!("no user with id {id}");
                }
                println!("User {id} disabled");
            }
            UsersAction::Enable { id } => {
                if !app.set_user_active(id, true).await? {
                    anyhow::bail!("no user with id {id}");
                }
                println!("User {id} enabled");
            }
        },
        Commands::Schedule { action } => match action {
            ScheduleAction::Add {
                report_id,
                hour,
                minute,
                frequency,
                weekday,
                recipients,
            } => {
                let freq = Frequency::from_tag(&frequency.to_uppercase());
                let id = app
                    .add_schedule(report_id, hour, minute, freq, weekday, recipients)
                    .await?;
                println!("Schedule {id} added ({:02}:{:02} {})", hour, minute, freq.as_tag());
            }
            ScheduleAction::List { json } => {
                let schedules = app.list_schedules().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&schedules)?);
                } else {
                    for s in schedules {
                        let weekday = s
                            .weekday
                            .map(|w| format!(" wd={w}"))
                            .unwrap_or_default();
                        println!(
                            "{:>4}  {:02}:{:02} {:<6}{}  {:<30} -> {} [{}]",
                            s.id,
                            s.hour,
                            s.minute,
                            s.frequency,
                            weekday,
                            s.report_name,
                            s.recipients.join(", "),
                            if s.is_active { "active" } else { "inactive" }
                        );
                    }
                }
            }
            ScheduleAction::Remove { id } => {
                if !app.remove_schedule(id).await? {
                    anyhow::bail!("no schedule with id {id}");
                }
                println!("Schedule {id} removed");
            }
            ScheduleAction::Enable { id } => {
                if !app.set_schedule_active(id, true).await? {
                    anyhow::bail!("no schedule with id {id}");
                }
                println!("Schedule {id} enabled");
            }
            ScheduleAction::Disable { id } => {
                if !app.set_schedule_active(id, false).await? {
                    anyhow::bail!("no schedule with id {id}");
                }
                println!("Schedule {id} disabled");
            }
        },
        Commands::Logs { limit } => {
            let logs = app.delivery_logs(limit).await?;
            for l in logs {
                println!(
                    "{:>5}  {}  schedule={} report={} user={} {:<7} {}",
                    l.id,
                    l.sent_at,
                    l.schedule_id,
                    l.report_id,
                    l.user_id,
                    l.status,
                    l.error.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
