use quip_core::{SyncEngine, SyncReport};

use crate::cli::SyncCommands;
use crate::commands::common::{
    failure_to_item, format_failure_lines, format_pending_lines, format_sync_conflict_lines,
    normalize_identifier, open_engine, open_sync_engine, pending_to_item, resolve_failure,
    sync_conflict_to_item, Context, FailureItem, PendingItem, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(command: Option<SyncCommands>, ctx: &Context) -> Result<(), CliError> {
    match command {
        None => {
            let engine = open_sync_engine(ctx).await?;
            let report = engine.sync_now().await?;
            for line in format_report(&report) {
                println!("{line}");
            }
            Ok(())
        }
        Some(SyncCommands::Pending { json }) => {
            let engine = open_engine(ctx).await?;
            run_sync_pending(&engine, json).await
        }
        Some(SyncCommands::Failures { json }) => {
            let engine = open_engine(ctx).await?;
            run_sync_failures(&engine, json).await
        }
        Some(SyncCommands::Retry { id }) => {
            let engine = open_engine(ctx).await?;
            run_sync_retry(&engine, &id).await
        }
        Some(SyncCommands::Discard { id }) => {
            let engine = open_engine(ctx).await?;
            run_sync_discard(&engine, &id).await
        }
        Some(SyncCommands::Conflicts { limit, json }) => {
            let engine = open_engine(ctx).await?;
            run_sync_conflicts(&engine, limit, json).await
        }
        Some(SyncCommands::Full) => {
            let engine = open_engine(ctx).await?;
            engine.request_full_resync().await?;
            println!("The next sync will refetch every message");
            Ok(())
        }
    }
}

pub fn format_report(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync completed: {} sent, {} received, {} removed{}",
        report.confirmed,
        report.fetched,
        report.removed,
        if report.full_fetch { " (full)" } else { "" }
    )];
    if report.conflicts > 0 {
        lines.push(format!(
            "{} remote edit(s) overlapped local changes; see `quip sync conflicts`",
            report.conflicts
        ));
    }
    for failure in &report.failures {
        lines.push(format!(
            "Failed: {} {} ({})",
            failure.operation.kind,
            failure.message_id().short(),
            failure.reason
        ));
    }
    if report.blocked_by.is_some() {
        lines.push("Some changes are still queued and will be retried".to_string());
    }
    if let Some(error) = &report.fetch_error {
        lines.push(format!("Could not fetch remote changes: {error}"));
    }
    lines
}

pub async fn run_sync_pending(engine: &SyncEngine, as_json: bool) -> Result<(), CliError> {
    let pending = engine.pending_operations().await;

    if as_json {
        let json_items = pending.iter().map(pending_to_item).collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("Nothing queued.");
        return Ok(());
    }
    for line in format_pending_lines(&pending) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_failures(engine: &SyncEngine, as_json: bool) -> Result<(), CliError> {
    let failures = engine.sync_failures().await;

    if as_json {
        let json_items = failures.iter().map(failure_to_item).collect::<Vec<FailureItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if failures.is_empty() {
        println!("No failed operations.");
        return Ok(());
    }
    for line in format_failure_lines(&failures) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_retry(engine: &SyncEngine, id: &str) -> Result<(), CliError> {
    let query = normalize_identifier(id)?;
    let failure = resolve_failure(engine, &query).await?;
    let op = engine.retry_failure(failure.operation_id()).await?;
    println!("{}", op.id);
    Ok(())
}

pub async fn run_sync_discard(engine: &SyncEngine, id: &str) -> Result<(), CliError> {
    let query = normalize_identifier(id)?;
    let failure = resolve_failure(engine, &query).await?;
    let discarded = engine.discard_failure(failure.operation_id()).await?;
    println!("{}", discarded.operation_id());
    Ok(())
}

pub async fn run_sync_conflicts(
    engine: &SyncEngine,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = engine.sync_conflicts(limit).await;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
