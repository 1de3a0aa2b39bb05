//! Expiry of day-scoped orders.
//!
//! Good-for-day orders live until the session close (16:00:00 local by
//! default), at which point a dedicated background thread cancels them in one
//! batch. The thread spends its life blocked on a condition variable, never
//! holding the book lock while it waits, and exits within one wake cycle of
//! the shutdown signal.

use chrono::{DateTime, Days, Local, NaiveTime};
use tracing::{debug, info};

use crate::orderbook::BookShared;

/// The default session close, 16:00:00 local time.
pub(crate) fn default_session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("16:00:00 is a valid time of day")
}

/// First instant matching `close` strictly after `now`. If today's close has
/// already passed, targets tomorrow's.
pub(crate) fn next_session_close(now: DateTime<Local>, close: NaiveTime) -> DateTime<Local> {
    let mut date = now.date_naive();
    if now.time() >= close {
        date = date + Days::new(1);
    }
    // a DST transition can make the close non-existent on a given day; skip
    // forward until it maps to a real local instant
    loop {
        if let Some(instant) = date.and_time(close).and_local_timezone(Local).earliest() {
            return instant;
        }
        date = date + Days::new(1);
    }
}

/// Body of the pruner thread.
///
/// Each cycle sleeps until the next session close, then snapshots the resting
/// good-for-day ids under the book lock, releases it, and cancels the batch
/// under a single re-acquisition. A shutdown wake-up ends the loop instead.
pub(crate) fn run(shared: &BookShared) {
    loop {
        let close = next_session_close(Local::now(), shared.session_close());
        debug!(%close, "day-order pruner sleeping until session close");
        if shared.wait_for_shutdown_until(close) {
            debug!("day-order pruner stopping");
            return;
        }

        let expired = shared.collect_day_order_ids();
        if expired.is_empty() {
            continue;
        }
        info!(count = expired.len(), "session close reached, cancelling day orders");
        shared.cancel_batch(&expired);
    }
}
