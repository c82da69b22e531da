//! In-memory `MessageApi` used by the sync tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{LoginResponse, MessageApi, MessagePage, RemoteError, RemoteResult, RemoteUser};
use crate::models::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login,
    List(Option<DateTime<Utc>>),
    Create(MessageId, String),
    Update(MessageId, String),
    Delete(MessageId),
    UpdateEmail(String),
    UpdateUsername(String),
}

struct FakeState {
    messages: BTreeMap<MessageId, Message>,
    tombstones: Vec<(MessageId, DateTime<Utc>)>,
    clock: DateTime<Utc>,
    calls: Vec<Call>,
    token: Option<String>,
    write_failures: VecDeque<RemoteError>,
    always_fail_writes: Option<RemoteError>,
    list_failure: Option<RemoteError>,
    send_tombstones: bool,
    send_server_time: bool,
    reject_duplicate_create: bool,
}

/// Server double with a deterministic clock starting at 2026-01-04T10:00:00Z
pub struct FakeMessageApi {
    state: Mutex<FakeState>,
}

impl Default for FakeMessageApi {
    fn default() -> Self {
        Self::new()
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 4, 10, 0, 0).unwrap()
}

impl FakeMessageApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                messages: BTreeMap::new(),
                tombstones: Vec::new(),
                clock: start_time(),
                calls: Vec::new(),
                token: Some("test-token".to_string()),
                write_failures: VecDeque::new(),
                always_fail_writes: None,
                list_failure: None,
                send_tombstones: false,
                send_server_time: false,
                reject_duplicate_create: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Fail the next create/update/delete calls, one error each
    pub fn fail_next_writes(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.lock().write_failures.extend(errors);
    }

    pub fn fail_all_writes(&self, error: Option<RemoteError>) {
        self.lock().always_fail_writes = error;
    }

    pub fn fail_list(&self, error: Option<RemoteError>) {
        self.lock().list_failure = error;
    }

    pub fn send_tombstones(&self, enabled: bool) {
        self.lock().send_tombstones = enabled;
    }

    pub fn send_server_time(&self, enabled: bool) {
        self.lock().send_server_time = enabled;
    }

    pub fn reject_duplicate_create(&self, enabled: bool) {
        self.lock().reject_duplicate_create = enabled;
    }

    pub fn set_clock(&self, at: DateTime<Utc>) {
        self.lock().clock = at;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(call, Call::Create(..) | Call::Update(..) | Call::Delete(_))
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn server_message(&self, id: MessageId) -> Option<Message> {
        self.lock().messages.get(&id).cloned()
    }

    pub fn server_messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.lock().messages.values().cloned().collect();
        crate::models::sort_messages(&mut messages);
        messages
    }

    /// A write made by another device
    pub fn remote_upsert(&self, id: MessageId, content: &str) -> Message {
        let mut state = self.lock();
        let now = state.tick();
        let message = match state.messages.get(&id) {
            Some(existing) => Message {
                content: content.to_string(),
                updated_at: now,
                ..existing.clone()
            },
            None => Message::draft(id, content, now),
        };
        state.messages.insert(id, message.clone());
        message
    }

    /// Insert a message exactly as given
    pub fn insert_raw(&self, message: Message) {
        self.lock().messages.insert(message.id, message);
    }

    pub fn remote_delete(&self, id: MessageId) {
        let mut state = self.lock();
        let now = state.tick();
        state.messages.remove(&id);
        state.tombstones.push((id, now));
    }

    fn take_write_failure(state: &mut FakeState) -> Option<RemoteError> {
        if let Some(error) = state.always_fail_writes.clone() {
            return Some(error);
        }
        state.write_failures.pop_front()
    }

    fn check_auth(state: &FakeState) -> RemoteResult<()> {
        if state.token.is_some() {
            Ok(())
        } else {
            Err(RemoteError::Unauthorized)
        }
    }
}

impl FakeState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::minutes(1);
        self.clock
    }
}

fn not_found() -> RemoteError {
    RemoteError::Status {
        status: 404,
        message: "Not Found (404)".to_string(),
    }
}

#[async_trait]
impl MessageApi for FakeMessageApi {
    async fn login(&self, email: &str, password: &str) -> RemoteResult<LoginResponse> {
        let mut state = self.lock();
        state.calls.push(Call::Login);
        if password != "correct horse" {
            return Err(RemoteError::Unauthorized);
        }
        Ok(LoginResponse {
            token: "fresh-token".to_string(),
            user: RemoteUser {
                id: "user-1".to_string(),
                email: email.to_string(),
                username: None,
            },
        })
    }

    fn set_token(&self, token: Option<String>) {
        self.lock().token = token;
    }

    fn has_token(&self) -> bool {
        self.lock().token.is_some()
    }

    async fn list_messages(&self, since: Option<DateTime<Utc>>) -> RemoteResult<MessagePage> {
        let mut state = self.lock();
        state.calls.push(Call::List(since));
        Self::check_auth(&state)?;
        if let Some(error) = state.list_failure.clone() {
            return Err(error);
        }

        let messages = state
            .messages
            .values()
            .filter(|message| since.is_none_or(|since| message.updated_at > since))
            .cloned()
            .collect();
        let deleted = if state.send_tombstones {
            state
                .tombstones
                .iter()
                .filter(|(_, at)| since.is_none_or(|since| *at > since))
                .map(|(id, _)| *id)
                .collect()
        } else {
            Vec::new()
        };
        let server_time = state.send_server_time.then_some(state.clock);
        Ok(MessagePage {
            messages,
            deleted,
            server_time,
        })
    }

    async fn create_message(&self, id: MessageId, content: &str) -> RemoteResult<Message> {
        let mut state = self.lock();
        state.calls.push(Call::Create(id, content.to_string()));
        Self::check_auth(&state)?;
        if let Some(error) = Self::take_write_failure(&mut state) {
            return Err(error);
        }
        if let Some(existing) = state.messages.get(&id) {
            if state.reject_duplicate_create {
                return Err(RemoteError::Status {
                    status: 409,
                    message: "Conflict (409)".to_string(),
                });
            }
            return Ok(existing.clone());
        }
        let now = state.tick();
        let message = Message::draft(id, content, now);
        state.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn update_message(&self, id: MessageId, content: &str) -> RemoteResult<Message> {
        let mut state = self.lock();
        state.calls.push(Call::Update(id, content.to_string()));
        Self::check_auth(&state)?;
        if let Some(error) = Self::take_write_failure(&mut state) {
            return Err(error);
        }
        let now = state.tick();
        let message = state.messages.get_mut(&id).ok_or_else(not_found)?;
        message.content = content.to_string();
        message.updated_at = now;
        Ok(message.clone())
    }

    async fn delete_message(&self, id: MessageId) -> RemoteResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::Delete(id));
        Self::check_auth(&state)?;
        if let Some(error) = Self::take_write_failure(&mut state) {
            return Err(error);
        }
        if state.messages.remove(&id).is_none() {
            return Err(not_found());
        }
        let now = state.tick();
        state.tombstones.push((id, now));
        Ok(())
    }

    async fn update_email(&self, email: &str) -> RemoteResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::UpdateEmail(email.to_string()));
        Self::check_auth(&state)
    }

    async fn update_username(&self, username: &str) -> RemoteResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::UpdateUsername(username.to_string()));
        Self::check_auth(&state)
    }
}
