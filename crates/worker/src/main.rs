use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use payqueue_infra::QueueConfig;
use payqueue_worker::{App, load_notifications, sample_notifications};

fn main() -> anyhow::Result<()> {
    payqueue_observability::init();

    let config = QueueConfig::from_env().context("invalid PAYQUEUE_* configuration")?;
    tracing::info!(
        workers = config.workers,
        max_retries = config.max_retries,
        retention_days = config.retention_days,
        "starting payqueue worker"
    );

    let notifications = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => load_notifications(&path)?,
        None => {
            tracing::warn!("no notification file given; using the demo batch");
            sample_notifications()
        }
    };

    let app = App::build(config)?;
    let items = app.submit(&notifications)?;
    let summary = app.run(items.len(), Duration::from_secs(60))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
