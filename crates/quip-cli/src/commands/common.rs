use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quip_core::auth::AuthClient;
use quip_core::db::{Database, LibSqlKeyValueStore};
use quip_core::models::{Message, MessageId, PendingOperation, SyncConflict, SyncFailure};
use quip_core::remote::{
    HttpMessageApi, LoginResponse, MessageApi, MessagePage, RemoteError, RemoteResult,
};
use quip_core::sync::MessageStatus;
use quip_core::{SyncEngine, SyncSettings};
use serde::Serialize;

use crate::auth::SessionStore;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

/// Global options shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub profile: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageListItem {
    pub id: String,
    pub preview: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub relative_time: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub id: String,
    pub kind: String,
    pub message_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FailureItem {
    pub operation_id: String,
    pub kind: String,
    pub message_id: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub message_id: String,
    pub local_updated_at: DateTime<Utc>,
    pub incoming_updated_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub strategy: String,
}

/// Stand-in API for profiles without a server; every call fails as unreachable
pub struct OfflineApi;

fn no_server() -> RemoteError {
    RemoteError::Transport("no server configured".to_string())
}

#[async_trait]
impl MessageApi for OfflineApi {
    async fn login(&self, _email: &str, _password: &str) -> RemoteResult<LoginResponse> {
        Err(no_server())
    }

    fn set_token(&self, _token: Option<String>) {}

    fn has_token(&self) -> bool {
        false
    }

    async fn list_messages(&self, _since: Option<DateTime<Utc>>) -> RemoteResult<MessagePage> {
        Err(no_server())
    }

    async fn create_message(&self, _id: MessageId, _content: &str) -> RemoteResult<Message> {
        Err(no_server())
    }

    async fn update_message(&self, _id: MessageId, _content: &str) -> RemoteResult<Message> {
        Err(no_server())
    }

    async fn delete_message(&self, _id: MessageId) -> RemoteResult<()> {
        Err(no_server())
    }

    async fn update_email(&self, _email: &str) -> RemoteResult<()> {
        Err(no_server())
    }

    async fn update_username(&self, _username: &str) -> RemoteResult<()> {
        Err(no_server())
    }
}

/// Server connection for the resolved profile
pub struct Remote {
    pub profile_name: String,
    pub api: Arc<HttpMessageApi>,
}

impl Remote {
    pub fn auth_client(&self) -> AuthClient<SessionStore> {
        AuthClient::new(self.api.clone(), SessionStore::new(&self.profile_name))
    }
}

pub fn load_settings() -> Result<SyncSettings, CliError> {
    SyncSettings::from_env().map_err(|error| CliError::Config(error.to_string()))
}

pub fn resolve_profile(ctx: &Context) -> Result<(CliProfilesConfig, String), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(ctx.profile.as_deref());
    Ok((config, profile_name))
}

/// Build the HTTP client for the profile, if it has a server URL
pub fn connect(ctx: &Context, settings: &SyncSettings) -> Result<Option<Remote>, CliError> {
    let (config, profile_name) = resolve_profile(ctx)?;
    let Some(url) = config.resolve_api_url(&profile_name) else {
        return Ok(None);
    };
    let api = HttpMessageApi::new(url, settings.request_timeout)
        .map_err(|error| CliError::Config(error.to_string()))?;
    Ok(Some(Remote {
        profile_name,
        api: Arc::new(api),
    }))
}

pub fn require_remote(ctx: &Context, settings: &SyncSettings) -> Result<Remote, CliError> {
    connect(ctx, settings)?.ok_or(CliError::ServerNotConfigured)
}

/// Open the local engine; the server is never contacted
pub async fn open_engine(ctx: &Context) -> Result<SyncEngine, CliError> {
    let settings = load_settings()?;
    let api: Arc<dyn MessageApi> = match connect(ctx, &settings)? {
        Some(remote) => remote.api,
        None => Arc::new(OfflineApi),
    };
    open_engine_with(&ctx.db_path, api, settings).await
}

/// Open the engine with a signed-in server connection
pub async fn open_sync_engine(ctx: &Context) -> Result<SyncEngine, CliError> {
    let settings = load_settings()?;
    let remote = require_remote(ctx, &settings)?;
    if remote.auth_client().restore_session()?.is_none() {
        return Err(CliError::NotSignedIn(remote.profile_name));
    }
    open_engine_with(&ctx.db_path, remote.api, settings).await
}

pub async fn open_engine_with(
    db_path: &Path,
    api: Arc<dyn MessageApi>,
    settings: SyncSettings,
) -> Result<SyncEngine, CliError> {
    let db = Database::open(db_path).await?;
    let store = Arc::new(LibSqlKeyValueStore::new(db));
    Ok(SyncEngine::open(store, api, settings).await?)
}

pub async fn resolve_message(engine: &SyncEngine, query: &str) -> Result<Message, CliError> {
    if let Ok(id) = query.parse::<MessageId>() {
        if let Some(message) = engine.get_message(id).await {
            return Ok(message);
        }
    }

    let mut matches: Vec<Message> = engine
        .list_messages()
        .await
        .into_iter()
        .filter(|message| message.id.as_str().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::MessageNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(ambiguous(
            query,
            matches.iter().map(|message| message.id.as_str()),
        )),
    }
}

pub async fn resolve_failure(engine: &SyncEngine, query: &str) -> Result<SyncFailure, CliError> {
    let mut matches: Vec<SyncFailure> = engine
        .sync_failures()
        .await
        .into_iter()
        .filter(|failure| failure.operation_id().to_string().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::FailureNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(ambiguous(
            query,
            matches
                .iter()
                .map(|failure| failure.operation_id().to_string()),
        )),
    }
}

fn ambiguous(query: &str, ids: impl Iterator<Item = String>) -> CliError {
    let options = ids
        .take(3)
        .map(|id| id.chars().take(18).collect::<String>())
        .collect::<Vec<_>>()
        .join(", ");
    CliError::AmbiguousId(format!(
        "ID prefix '{query}' is ambiguous; matches: {options}"
    ))
}

const fn status_marker(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Synced => " ",
        MessageStatus::Pending => "*",
        MessageStatus::Failed => "!",
    }
}

const fn status_label(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Synced => "synced",
        MessageStatus::Pending => "pending",
        MessageStatus::Failed => "failed",
    }
}

pub fn format_message_lines(messages: &[(Message, MessageStatus)]) -> Vec<String> {
    let now = Utc::now();
    messages
        .iter()
        .map(|(message, status)| {
            let marker = status_marker(*status);
            let short_id = message.id.short();
            let preview = message.preview(40);
            let relative_time = format_relative_time(message.updated_at, now);
            format!("{marker}{short_id:<13}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn message_to_list_item(message: &Message, status: MessageStatus) -> MessageListItem {
    MessageListItem {
        id: message.id.to_string(),
        preview: message.preview(80),
        content: message.content.clone(),
        created_at: message.created_at,
        updated_at: message.updated_at,
        relative_time: format_relative_time(message.updated_at, Utc::now()),
        status: status_label(status),
    }
}

pub fn pending_to_item(op: &PendingOperation) -> PendingItem {
    PendingItem {
        id: op.id.to_string(),
        kind: op.kind.to_string(),
        message_id: op.target_message_id.to_string(),
        enqueued_at: op.enqueued_at,
        retry_count: op.retry_count,
        next_attempt_at: op.next_attempt_at,
        last_error: op.last_error.clone(),
    }
}

pub fn format_pending_lines(ops: &[PendingOperation]) -> Vec<String> {
    ops.iter()
        .map(|op| {
            let mut line = format!(
                "{}  {:<6}  message={}  queued={}",
                short(&op.id.to_string()),
                op.kind,
                op.target_message_id.short(),
                format_timestamp(op.enqueued_at)
            );
            if op.retry_count > 0 {
                line.push_str(&format!("  retries={}", op.retry_count));
            }
            if let Some(error) = &op.last_error {
                line.push_str(&format!("  last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn failure_to_item(failure: &SyncFailure) -> FailureItem {
    FailureItem {
        operation_id: failure.operation_id().to_string(),
        kind: failure.operation.kind.to_string(),
        message_id: failure.message_id().to_string(),
        reason: failure.reason.to_string(),
        failed_at: failure.failed_at,
    }
}

pub fn format_failure_lines(failures: &[SyncFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{}  {:<6}  message={}  {}",
                short(&failure.operation_id().to_string()),
                failure.operation.kind,
                failure.message_id().short(),
                failure.reason
            )
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        message_id: conflict.message_id.to_string(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  message={}  local={} incoming={}",
                format_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.message_id.short(),
                format_timestamp(conflict.local_updated_at),
                format_timestamp(conflict.incoming_updated_at)
            )
        })
        .collect()
}

fn short(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_message_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_ascii_lowercase())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_message_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        ))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // EDITOR may carry arguments, e.g. "code --wait".
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let status = Command::new(program).args(parts).arg(file_path).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_message_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("quip-message-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("QUIP_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("quip").join("quip.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}
