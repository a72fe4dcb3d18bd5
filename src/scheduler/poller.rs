use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::scheduler::{find_due_schedules, DueReport};
use crate::storage::repository::{self, Recipient};
use crate::storage::Database;

/// Ticks every 10 seconds; only ticks landing on a configured hour:minute
/// produce work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// The seam to the messaging collaborator. Implementations render the work
/// unit into a deliverable artifact and send it to the recipient's address;
/// a returned error is recorded as an ERROR fact in the ledger.
pub trait DeliverySink: Send + Sync {
    fn send(&self, recipient: &Recipient, due: &DueReport) -> Result<(), String>;
}

/// Run the delivery poller until the surrounding task is dropped.
///
/// Each tick attempts a resolver run. An explicit in-flight token
/// (`try_lock` on a shared mutex) guarantees at most one run at a time; a
/// tick that fires while a run is still in progress no-ops instead of
/// overlapping it.
pub async fn run_poller(db: Database, sink: Arc<dyn DeliverySink>, every: Duration) {
    let in_flight = Arc::new(tokio::sync::Mutex::new(()));
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    log::info!("delivery poller started, interval {every:?}");

    loop {
        ticker.tick().await;

        let guard = match in_flight.clone().try_lock_owned() {
            Ok(g) => g,
            Err(_) => {
                log::debug!("resolver run still in flight, skipping tick");
                continue;
            }
        };

        let db = db.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            let _guard = guard;
            run_once(&db, sink.as_ref(), chrono::Local::now().naive_local()).await;
        });
    }
}

/// One resolver run: find due schedules and drive the sink per recipient.
///
/// A resolution error is logged and dropped; schedules recur, so the next
/// tick is the retry mechanism. A failed send is recorded as an ERROR fact
/// (which never blocks future deliveries) and does not stop the remaining
/// recipients.
pub async fn run_once(db: &Database, sink: &dyn DeliverySink, now: NaiveDateTime) {
    let due = match find_due_schedules(db, now).await {
        Ok(due) => due,
        Err(e) => {
            log::error!("schedule resolution failed: {e}");
            return;
        }
    };

    for work in &due {
        log::info!(
            "schedule {}: delivering '{}' to {} recipient(s)",
            work.schedule_id,
            work.report_name,
            work.recipients.len()
        );

        for recipient in &work.recipients {
            if let Err(reason) = sink.send(recipient, work) {
                log::warn!(
                    "delivery to {} failed for schedule {}: {reason}",
                    recipient.chat_id,
                    work.schedule_id
                );
                let result = db
                    .writer()
                    .call({
                        let (report_id, schedule_id, user_id) =
                            (work.report_id, work.schedule_id, recipient.user_id);
                        move |conn| {
                            repository::insert_delivery(
                                conn,
                                report_id,
                                user_id,
                                schedule_id,
                                "ERROR",
                                Some(reason.as_str()),
                                now,
                            )
                        }
                    })
                    .await;
                if let Err(e) = result {
                    log::error!("failed to record ERROR fact: {e}");
                }
            }
        }
    }
}
