use chrono::Utc;
use cron::Schedule;
use std::{sync::Arc, thread};
use tokio::time::Duration;
use tracing::Span;

use crate::common::AppState;

async fn scheduler_loop(state: Arc<AppState>, schedule: Schedule) {
    let timezone = chrono_tz::UTC;
    let upcoming = schedule.upcoming(timezone);

    for next in upcoming {
        let now = Utc::now().with_timezone(&timezone);
        let duration = next - now;
        let sleep_duration = duration.to_std().unwrap_or(Duration::from_secs(0));
        tracing::debug!(
            "Next guardian cycle at {} ({} seconds)",
            next,
            sleep_duration.as_secs()
        );

        tokio::time::sleep(sleep_duration).await;
        state.runtime.guardian.tick().await;
    }
}

pub fn launch(state: Arc<AppState>, parent_span: Span) -> thread::JoinHandle<()> {
    // Sub-minute cron expression, roughly once per slot
    let schedule: Schedule = state
        .env_vars
        .guardian_cron
        .value
        .parse()
        .unwrap_or_else(|e| panic!("Failed to parse GUARDIAN_CRON: {e:?}"));

    tracing::info!("Scheduler enabled with schedule: {}", schedule);

    thread::Builder::new()
        .name("scheduler-thread".into())
        .spawn(move || {
            let _entered = parent_span.entered();
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(scheduler_loop(state, schedule));
        })
        .unwrap()
}
