//! desk-realtime-watch: follow one background task from the terminal.
//!
//! ```text
//! desk-realtime-watch <origin> <task_id> [port]
//! ```
//!
//! `port` replaces the configured default port, which only matters when
//! `DESK_REALTIME_DEV_SERVER` is set.
//!
//! Other settings come from `DESK_REALTIME_*` environment variables; set
//! `RUST_LOG=info` to see progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use tokio::time::{timeout, Duration};

use desk_realtime::{RealtimeClient, RealtimeConfig, TaskHandlers, TaskUpdate};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const TERMINAL_STATUSES: [&str; 4] = ["success", "failed", "cancelled", "completed"];

fn usage() -> String {
    "usage: desk-realtime-watch <origin> <task_id> [port]".to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let origin = args.next().ok_or_else(usage)?;
    let task_id = args.next().ok_or_else(usage)?;
    let port = args.next().map(|port| port.parse::<u16>()).transpose()?;

    let mut config = RealtimeConfig::from_env()?;
    config.origin = origin;
    if let Some(port) = port {
        config.default_port = port;
    }

    let finished = Arc::new(AtomicBool::new(false));
    let mut handlers = TaskHandlers::new()
        .on("progress", |update: &TaskUpdate| {
            info!("{} progress: {:?}", update.task_id, update.extra.get("progress"));
        })
        .always(|update: &TaskUpdate| {
            if let Some(status) = &update.status {
                info!("{} status: {status}", update.task_id);
            }
        })
        .error(|update: &TaskUpdate| {
            log::error!("{} failed with status code {:?}", update.task_id, update.status_code);
        });
    for status in TERMINAL_STATUSES {
        let done = finished.clone();
        handlers = handlers.on(status, move |_: &TaskUpdate| done.store(true, Ordering::SeqCst));
    }

    let mut client = RealtimeClient::new(config);
    client.initialize_default();
    if !client.has_channel() {
        return Err(format!("no realtime channel for {}", client.config().origin).into());
    }

    info!("Watching task {task_id}");
    client.subscribe_task(&task_id, handlers);

    while !finished.load(Ordering::SeqCst) {
        if !client.process_next().await {
            break;
        }
    }

    client.unsubscribe_task(&task_id);
    if timeout(CLOSE_TIMEOUT, client.close()).await.is_err() {
        log::warn!("Transport did not stop within {CLOSE_TIMEOUT:?}");
        client.shutdown();
    }

    if finished.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(format!("channel closed before task {task_id} finished").into())
    }
}
