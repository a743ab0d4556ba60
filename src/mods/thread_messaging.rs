//! Reddit-style threaded messaging mod: channels, direct messages, 5-level
//! reply threads, reactions, and an ephemeral base64 file store.

use crate::error::ModError;
use crate::event::{Event, EventResponse};
use crate::mod_pipeline::{EmitHandle, Mod, PipelineVerdict};
use crate::time_provider::SharedTimeProvider;
use crate::types::{AgentId, ModId, PageLimit};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

const MAX_HISTORY_SIZE: usize = 2000;
const HISTORY_TRIM_COUNT: usize = 200;
const MAX_THREAD_LEVEL: u8 = 4;
const DEFAULT_CHANNELS: &[&str] = &["general"];

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredMessage {
    message_id: String,
    source_id: String,
    text: String,
    timestamp: u64,
    reply_to_id: Option<String>,
    quoted_text: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Thread {
    root_message_id: String,
    levels: HashMap<String, u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FileMeta {
    file_id: String,
    filename: String,
    uploader: AgentId,
    size: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct State {
    known_channels: HashSet<String>,
    history: HashMap<String, Vec<StoredMessage>>,
    threads: HashMap<String, Thread>,
    message_to_thread: HashMap<String, String>,
    reactions: HashMap<String, HashMap<String, HashSet<AgentId>>>,
    files: HashMap<String, FileMeta>,
}

impl State {
    fn seeded() -> Self {
        Self {
            known_channels: DEFAULT_CHANNELS.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        }
    }

    fn add_to_history(&mut self, key: &str, message: StoredMessage) {
        let bucket = self.history.entry(key.to_string()).or_default();
        bucket.push(message);
        if bucket.len() > MAX_HISTORY_SIZE {
            bucket.drain(0..HISTORY_TRIM_COUNT);
        }
    }

    fn quoted_text(&self, key: &str, quoted_message_id: &str) -> Option<String> {
        self.history.get(key).and_then(|bucket| {
            bucket
                .iter()
                .find(|m| m.message_id == quoted_message_id)
                .map(|m| crate::event::quoted_text(&m.source_id, &m.text))
        })
    }
}

fn dyad_key(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort_unstable();
    format!("dm:{}:{}", pair[0], pair[1])
}

fn channel_key(name: &str) -> String {
    format!("channel:{name}")
}

/// The threaded-messaging mod.
pub struct ThreadMessagingMod {
    id: ModId,
    state: Mutex<State>,
    time: SharedTimeProvider,
    workspace: PathBuf,
}

impl ThreadMessagingMod {
    /// Build the mod, rooted at `<workspace>/mods/thread_messaging/`.
    #[must_use]
    pub fn new(workspace: PathBuf, time: SharedTimeProvider) -> Self {
        Self {
            id: ModId::try_new("thread_messaging").expect("literal is valid"),
            state: Mutex::new(State::seeded()),
            time,
            workspace: workspace.join("mods").join("thread_messaging"),
        }
    }

    fn now(&self) -> u64 {
        self.time
            .now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn files_dir(&self) -> PathBuf {
        self.workspace.join("files")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.workspace.join("state.json")
    }

    async fn snapshot(&self) {
        let state = self.state.lock().await;
        match serde_json::to_vec_pretty(&*state) {
            Ok(bytes) => {
                if let Err(error) = std::fs::write(self.snapshot_path(), bytes) {
                    warn!(%error, "thread messaging snapshot write failed");
                }
            }
            Err(error) => warn!(%error, "thread messaging snapshot serialize failed"),
        }
    }

    async fn load_snapshot(&self) {
        let Ok(bytes) = std::fs::read(self.snapshot_path()) else {
            return;
        };
        match serde_json::from_slice::<State>(&bytes) {
            Ok(loaded) => *self.state.lock().await = loaded,
            Err(error) => warn!(%error, "discarding malformed thread messaging snapshot"),
        }
    }
}

fn text_of(payload: &serde_json::Map<String, serde_json::Value>) -> String {
    payload
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn paginate<T: Clone>(items: &[T], limit: usize, offset: usize) -> (Vec<T>, bool) {
    let total = items.len();
    // Newest-first: `items` is stored oldest-first, so reverse before paging.
    let reversed: Vec<&T> = items.iter().rev().collect();
    let page: Vec<T> = reversed
        .iter()
        .skip(offset)
        .take(limit)
        .map(|m| (*m).clone())
        .collect();
    let has_more = offset + page.len() < total;
    (page, has_more)
}

#[async_trait]
impl Mod for ThreadMessagingMod {
    fn id(&self) -> ModId {
        self.id.clone()
    }

    async fn initialize(&self) -> bool {
        if std::fs::create_dir_all(self.files_dir()).is_err() {
            return false;
        }
        self.load_snapshot().await;
        info!(mod_id = %self.id, "thread messaging mod initialized");
        true
    }

    async fn shutdown(&self) -> bool {
        self.snapshot().await;
        true
    }

    async fn tick(&self) {
        self.snapshot().await;
    }

    #[allow(clippy::too_many_lines)]
    async fn process_event(&self, event: &Event, emit: &EmitHandle) -> PipelineVerdict {
        if !event.event_name.starts_with("thread.") {
            return PipelineVerdict::Pass;
        }
        let now = self.now();
        let source_id = event.source_id.clone();

        let response = match event.event_name.as_str() {
            "thread.channel_message.post" => {
                let Some(channel) = channel_of(event) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("destination must be channel:<name>".to_string()).into(),
                    );
                };
                let text = text_of(&event.payload);
                let mut state = self.state.lock().await;
                state.known_channels.insert(channel.clone());
                let quoted_text = event
                    .payload
                    .get("quoted_message_id")
                    .and_then(|v| v.as_str())
                    .and_then(|id| state.quoted_text(&channel_key(&channel), id));
                state.add_to_history(
                    &channel_key(&channel),
                    StoredMessage {
                        message_id: event.event_id.clone(),
                        source_id: source_id.clone(),
                        text: text.clone(),
                        timestamp: now,
                        reply_to_id: None,
                        quoted_text: quoted_text.clone(),
                    },
                );
                drop(state);
                emit.emit(
                    Event::new("thread.channel_message.notification", source_id.clone(), event.source_type)
                        .expect("literal event name is valid")
                        .with_destination(format!("channel:{channel}"))
                        .with_payload(crate::event::payload([
                            ("message_id", json!(event.event_id)),
                            ("text", json!(text)),
                            ("quoted_text", json!(quoted_text)),
                        ])),
                );
                EventResponse::ok("posted")
            }
            "thread.direct_message.post" => {
                let Some(target) = target_agent(event) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("destination must be agent:<id>".to_string()).into(),
                    );
                };
                let text = text_of(&event.payload);
                let key = dyad_key(&source_id, target.as_ref());
                let mut state = self.state.lock().await;
                let quoted_text = event
                    .payload
                    .get("quoted_message_id")
                    .and_then(|v| v.as_str())
                    .and_then(|id| state.quoted_text(&key, id));
                state.add_to_history(
                    &key,
                    StoredMessage {
                        message_id: event.event_id.clone(),
                        source_id: source_id.clone(),
                        text: text.clone(),
                        timestamp: now,
                        reply_to_id: None,
                        quoted_text: quoted_text.clone(),
                    },
                );
                drop(state);
                emit.emit(
                    Event::new("thread.direct_message.notification", source_id.clone(), event.source_type)
                        .expect("literal event name is valid")
                        .with_destination(format!("agent:{target}"))
                        .with_payload(crate::event::payload([
                            ("message_id", json!(event.event_id)),
                            ("text", json!(text)),
                            ("quoted_text", json!(quoted_text)),
                        ])),
                );
                EventResponse::ok("sent")
            }
            "thread.reply.post" => {
                let Some(parent_id) = event
                    .payload
                    .get("reply_to_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("reply_to_id is required".to_string()).into(),
                    );
                };
                let history_key = match (channel_of(event), target_agent(event)) {
                    (Some(channel), _) => channel_key(&channel),
                    (None, Some(target)) => dyad_key(&source_id, target.as_ref()),
                    (None, None) => {
                        return PipelineVerdict::Respond(
                            ModError::InvalidRequest("destination is required".to_string()).into(),
                        );
                    }
                };
                let mut state = self.state.lock().await;
                let thread_id = state
                    .message_to_thread
                    .get(&parent_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        let thread_id = uuid::Uuid::new_v4().to_string();
                        let mut levels = HashMap::new();
                        levels.insert(parent_id.clone(), 0u8);
                        state.threads.insert(
                            thread_id.clone(),
                            Thread {
                                root_message_id: parent_id.clone(),
                                levels,
                            },
                        );
                        state.message_to_thread.insert(parent_id.clone(), thread_id.clone());
                        thread_id
                    });
                let parent_level = state
                    .threads
                    .get(&thread_id)
                    .and_then(|t| t.levels.get(&parent_id))
                    .copied()
                    .unwrap_or(0);
                if parent_level >= MAX_THREAD_LEVEL {
                    return PipelineVerdict::Respond(ModError::ThreadDepthExceeded.into());
                }
                let text = text_of(&event.payload);
                let quoted_text = event
                    .payload
                    .get("quoted_message_id")
                    .and_then(|v| v.as_str())
                    .and_then(|id| state.quoted_text(&history_key, id));
                state.add_to_history(
                    &history_key,
                    StoredMessage {
                        message_id: event.event_id.clone(),
                        source_id: source_id.clone(),
                        text: text.clone(),
                        timestamp: now,
                        reply_to_id: Some(parent_id.clone()),
                        quoted_text: quoted_text.clone(),
                    },
                );
                if let Some(thread) = state.threads.get_mut(&thread_id) {
                    thread.levels.insert(event.event_id.clone(), parent_level + 1);
                }
                state
                    .message_to_thread
                    .insert(event.event_id.clone(), thread_id.clone());
                drop(state);
                emit.emit(
                    Event::new("thread.reply.notification", source_id.clone(), event.source_type)
                        .expect("literal event name is valid")
                        .with_destination(event.destination_id.clone().unwrap_or_default())
                        .with_payload(crate::event::payload([
                            ("message_id", json!(event.event_id)),
                            ("reply_to_id", json!(parent_id)),
                            ("thread_id", json!(thread_id)),
                            ("text", json!(text)),
                            ("quoted_text", json!(quoted_text)),
                        ])),
                );
                EventResponse::ok("replied")
            }
            "thread.file.upload" => {
                let filename = event
                    .payload
                    .get("filename")
                    .and_then(|v| v.as_str())
                    .unwrap_or("upload.bin")
                    .to_string();
                let Some(encoded) = event.payload.get("file_content").and_then(|v| v.as_str()) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("file_content is required".to_string()).into(),
                    );
                };
                let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("file_content is not valid base64".to_string()).into(),
                    );
                };
                let file_id = uuid::Uuid::new_v4().to_string();
                let Ok(uploader) = AgentId::try_new(source_id.clone()) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("invalid source_id".to_string()).into(),
                    );
                };
                let path = self.files_dir().join(&file_id);
                if let Err(error) = std::fs::write(&path, &bytes) {
                    warn!(%error, file_id, "file upload write failed");
                    return PipelineVerdict::Respond(EventResponse::failure(
                        "io_error",
                        "failed to store file",
                    ));
                }
                let mut state = self.state.lock().await;
                state.files.insert(
                    file_id.clone(),
                    FileMeta {
                        file_id: file_id.clone(),
                        filename,
                        uploader,
                        size: bytes.len(),
                    },
                );
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "file_id": file_id })),
                    error_code: None,
                }
            }
            "thread.file.download" => {
                let Some(file_id) = event.payload.get("file_id").and_then(|v| v.as_str()) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("file_id is required".to_string()).into(),
                    );
                };
                let state = self.state.lock().await;
                let Some(meta) = state.files.get(file_id).cloned() else {
                    return PipelineVerdict::Respond(ModError::FileNotFound.into());
                };
                drop(state);
                match std::fs::read(self.files_dir().join(file_id)) {
                    Ok(bytes) => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                        EventResponse {
                            success: true,
                            message: None,
                            data: Some(json!({
                                "file_id": meta.file_id,
                                "filename": meta.filename,
                                "file_content": encoded,
                            })),
                            error_code: None,
                        }
                    }
                    Err(_) => ModError::FileNoLongerAvailable.into(),
                }
            }
            "thread.channels.list" => {
                let state = self.state.lock().await;
                let channels: Vec<&str> = state.known_channels.iter().map(String::as_str).collect();
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "channels": channels })),
                    error_code: None,
                }
            }
            "thread.channel_messages.retrieve" | "thread.direct_messages.retrieve" | "thread.messages.retrieve" => {
                let key = match (channel_of(event), target_agent(event)) {
                    (Some(channel), _) => channel_key(&channel),
                    (None, Some(target)) => dyad_key(&source_id, target.as_ref()),
                    (None, None) => {
                        return PipelineVerdict::Respond(
                            ModError::InvalidRequest("destination is required".to_string()).into(),
                        );
                    }
                };
                let limit = event
                    .payload
                    .get("limit")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|v| PageLimit::try_new(v as usize).ok())
                    .unwrap_or_default()
                    .into_inner();
                let offset = event.payload.get("offset").and_then(serde_json::Value::as_u64).unwrap_or(0) as usize;
                let state = self.state.lock().await;
                let bucket = state.history.get(&key).cloned().unwrap_or_default();
                let (page, has_more) = paginate(&bucket, limit, offset);
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "messages": page, "has_more": has_more })),
                    error_code: None,
                }
            }
            "thread.reaction.add" | "thread.reaction.remove" | "thread.reaction.toggle" => {
                let Some(message_id) = event.payload.get("message_id").and_then(|v| v.as_str()).map(str::to_string) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("message_id is required".to_string()).into(),
                    );
                };
                let Some(reaction_type) = event.payload.get("reaction_type").and_then(|v| v.as_str()).map(str::to_string) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("reaction_type is required".to_string()).into(),
                    );
                };
                let Ok(agent_id) = AgentId::try_new(source_id.clone()) else {
                    return PipelineVerdict::Respond(
                        ModError::InvalidRequest("invalid source_id".to_string()).into(),
                    );
                };
                let mut state = self.state.lock().await;
                let entry = state
                    .reactions
                    .entry(message_id.clone())
                    .or_default()
                    .entry(reaction_type.clone())
                    .or_default();
                let add = match event.event_name.as_str() {
                    "thread.reaction.add" => true,
                    "thread.reaction.remove" => false,
                    _ => !entry.contains(&agent_id),
                };
                if add {
                    entry.insert(agent_id);
                } else {
                    entry.remove(&agent_id);
                }
                let total = entry.len();
                drop(state);
                emit.emit(
                    Event::new("thread.reaction.notification", source_id.clone(), event.source_type)
                        .expect("literal event name is valid")
                        .with_destination(event.destination_id.clone().unwrap_or_default())
                        .with_payload(crate::event::payload([
                            ("message_id", json!(message_id)),
                            ("reaction_type", json!(reaction_type)),
                            ("total_reactions", json!(total)),
                        ])),
                );
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "total_reactions": total })),
                    error_code: None,
                }
            }
            _ => return PipelineVerdict::Pass,
        };
        PipelineVerdict::Respond(response)
    }
}

fn channel_of(event: &Event) -> Option<String> {
    match event.destination() {
        crate::event::Destination::Channel(name) => Some(name),
        _ => None,
    }
}

fn target_agent(event: &Event) -> Option<AgentId> {
    match event.destination() {
        crate::event::Destination::Agent(id) => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mod_pipeline::EmitQueue;
    use crate::time_provider::test_time_provider;
    use crate::types::SourceType;

    fn event(name: &str, source: &str, destination: &str, payload: crate::event::Payload) -> Event {
        Event::new(name, source, SourceType::Agent)
            .unwrap()
            .with_destination(destination)
            .with_payload(payload)
    }

    async fn new_mod() -> (ThreadMessagingMod, EmitHandle) {
        let dir = tempfile::tempdir().unwrap();
        let m = ThreadMessagingMod::new(dir.keep(), test_time_provider());
        assert!(m.initialize().await);
        let (emit, _queue) = EmitQueue::channel();
        (m, emit)
    }

    #[tokio::test]
    async fn channel_post_emits_notification_and_records_history() {
        let (m, emit) = new_mod().await;
        let verdict = m
            .process_event(
                &event(
                    "thread.channel_message.post",
                    "alice",
                    "channel:general",
                    crate::event::payload([("text", json!("hello"))]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(verdict, PipelineVerdict::Respond(r) if r.success));

        let retrieve = m
            .process_event(
                &event(
                    "thread.channel_messages.retrieve",
                    "bob",
                    "channel:general",
                    crate::event::Payload::new(),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = retrieve else {
            panic!("expected Respond")
        };
        let messages = response.data.unwrap()["messages"].as_array().unwrap().len();
        assert_eq!(messages, 1);
    }

    #[tokio::test]
    async fn reply_past_level_four_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = ThreadMessagingMod::new(dir.keep(), test_time_provider());
        assert!(m.initialize().await);
        let (emit, mut queue) = EmitQueue::channel();

        // Levels 0-3 must each succeed, chaining off the previous reply's id
        // (read back from the notification the mod emits).
        let mut parent_id = "root".to_string();
        for level in 0..4 {
            let verdict = m
                .process_event(
                    &event(
                        "thread.reply.post",
                        "alice",
                        "channel:general",
                        crate::event::payload([
                            ("text", json!(format!("level {level}"))),
                            ("reply_to_id", json!(parent_id.clone())),
                        ]),
                    ),
                    &emit,
                )
                .await;
            assert!(
                matches!(verdict, PipelineVerdict::Respond(ref r) if r.success),
                "level {level} should succeed"
            );
            let notification = queue.drain().pop().expect("notification emitted");
            parent_id = notification.payload["message_id"].as_str().unwrap().to_string();
        }

        // A fifth reply, targeting the level-4 message, must be rejected.
        let verdict = m
            .process_event(
                &event(
                    "thread.reply.post",
                    "alice",
                    "channel:general",
                    crate::event::payload([("text", json!("level 4")), ("reply_to_id", json!(parent_id))]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(
            verdict,
            PipelineVerdict::Respond(r) if !r.success && r.error_code.as_deref() == Some("thread_depth_exceeded")
        ));
    }

    #[tokio::test]
    async fn reaction_toggle_adds_then_removes() {
        let (m, emit) = new_mod().await;
        let add = m
            .process_event(
                &event(
                    "thread.reaction.toggle",
                    "alice",
                    "channel:general",
                    crate::event::payload([("message_id", json!("m1")), ("reaction_type", json!("up"))]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = add else {
            panic!("expected Respond")
        };
        assert_eq!(response.data.unwrap()["total_reactions"], json!(1));

        let remove = m
            .process_event(
                &event(
                    "thread.reaction.toggle",
                    "alice",
                    "channel:general",
                    crate::event::payload([("message_id", json!("m1")), ("reaction_type", json!("up"))]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = remove else {
            panic!("expected Respond")
        };
        assert_eq!(response.data.unwrap()["total_reactions"], json!(0));
    }

    #[tokio::test]
    async fn download_of_unknown_file_fails() {
        let (m, emit) = new_mod().await;
        let verdict = m
            .process_event(
                &event(
                    "thread.file.download",
                    "alice",
                    "",
                    crate::event::payload([("file_id", json!("missing"))]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(verdict, PipelineVerdict::Respond(r) if !r.success));
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let (m, emit) = new_mod().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello file");
        let upload = m
            .process_event(
                &event(
                    "thread.file.upload",
                    "alice",
                    "",
                    crate::event::payload([
                        ("filename", json!("note.txt")),
                        ("file_content", json!(encoded)),
                    ]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = upload else {
            panic!("expected Respond")
        };
        let file_id = response.data.unwrap()["file_id"].as_str().unwrap().to_string();

        let download = m
            .process_event(
                &event(
                    "thread.file.download",
                    "bob",
                    "",
                    crate::event::payload([("file_id", json!(file_id))]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = download else {
            panic!("expected Respond")
        };
        assert!(response.success);
    }
}
