use std::sync::Arc;

use quip_core::sync::{SchedulerOptions, SyncEvent, SyncScheduler};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{open_sync_engine, resolve_profile, Context};
use crate::commands::sync::format_report;
use crate::error::CliError;

/// Run the scheduler in the foreground until Ctrl-C or a lost session
pub async fn run_watch(ctx: &Context) -> Result<(), CliError> {
    let (_, profile_name) = resolve_profile(ctx)?;
    let engine = Arc::new(open_sync_engine(ctx).await?);
    let interval = engine.settings().sync_interval;
    let handle = SyncScheduler::spawn(engine, SchedulerOptions::default());
    let mut events = handle.subscribe();
    handle.request_sync();

    println!(
        "Watching for changes every {}s, press Ctrl-C to stop",
        interval.as_secs()
    );

    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::Io),
            event = events.recv() => match event {
                Ok(SyncEvent::AuthRequired) => break Err(CliError::NotSignedIn(profile_name)),
                Ok(event) => {
                    for line in describe_event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Dropped sync events");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    handle.shutdown().await;
    outcome
}

pub fn describe_event(event: &SyncEvent) -> Vec<String> {
    match event {
        // Quiet cycles with nothing to report stay silent.
        SyncEvent::CycleCompleted(report)
            if report.confirmed == 0
                && report.fetched == 0
                && report.removed == 0
                && report.is_clean() =>
        {
            Vec::new()
        }
        SyncEvent::CycleCompleted(report) => {
            let mut lines = format_report(report);
            // Terminal failures are reported through their own events.
            lines.retain(|line| !line.starts_with("Failed:"));
            lines
        }
        SyncEvent::TerminalFailure(failure) => vec![format!(
            "Failed: {} {} ({})",
            failure.operation.kind,
            failure.message_id().short(),
            failure.reason
        )],
        SyncEvent::AuthRequired => vec!["Session expired, sign in again".to_string()],
        SyncEvent::CycleFailed(error) => vec![format!("Sync cycle failed: {error}")],
    }
}
