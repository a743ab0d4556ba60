//! Collaborative line-addressed document mod: per-line authorship, advisory
//! line locks, pinned comments, cursor presence, and a version counter.

use crate::error::ModError;
use crate::event::{Event, EventResponse};
use crate::mod_pipeline::{EmitHandle, Mod, PipelineVerdict};
use crate::time_provider::SharedTimeProvider;
use crate::types::{AgentId, ModId, PageLimit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

const LOCK_TIMEOUT_SECS: u64 = 30;

/// A document's per-agent access level.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// May read and comment, never mutate content.
    ReadOnly,
    /// May read, comment, and mutate content.
    ReadWrite,
    /// `ReadWrite` plus removing any comment, not just one's own.
    Admin,
}

impl Permission {
    fn can_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Admin)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LineLock {
    holder: AgentId,
    acquired_at: u64,
}

/// A comment pinned to a line number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comment {
    id: String,
    line: usize,
    author: AgentId,
    text: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct CursorPosition {
    line: usize,
    column: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Presence {
    cursor: CursorPosition,
    last_activity: u64,
    active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Operation {
    agent_id: AgentId,
    op_type: String,
    timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Document {
    id: String,
    name: String,
    creator: AgentId,
    content: Vec<String>,
    line_authors: HashMap<usize, AgentId>,
    locks: HashMap<usize, LineLock>,
    comments: HashMap<usize, Vec<Comment>>,
    presence: HashMap<AgentId, Presence>,
    permissions: HashMap<AgentId, Permission>,
    version: u64,
    history: Vec<Operation>,
}

impl Document {
    fn new(id: String, name: String, creator: AgentId, initial_content: &str) -> Self {
        let content: Vec<String> = if initial_content.is_empty() {
            vec![String::new()]
        } else {
            initial_content.lines().map(str::to_string).collect()
        };
        let mut line_authors = HashMap::new();
        for i in 1..=content.len() {
            line_authors.insert(i, creator.clone());
        }
        let mut permissions = HashMap::new();
        permissions.insert(creator.clone(), Permission::Admin);
        Self {
            id,
            name,
            creator,
            content,
            line_authors,
            locks: HashMap::new(),
            comments: HashMap::new(),
            presence: HashMap::new(),
            permissions,
            version: 1,
            history: Vec::new(),
        }
    }

    fn permission_of(&self, agent_id: &AgentId) -> Option<Permission> {
        self.permissions.get(agent_id).copied()
    }

    fn is_locked_by_other(&mut self, agent_id: &AgentId, line: usize, now: u64) -> bool {
        let Some(lock) = self.locks.get(&line) else {
            return false;
        };
        if &lock.holder == agent_id {
            return false;
        }
        if now.saturating_sub(lock.acquired_at) > LOCK_TIMEOUT_SECS {
            self.locks.remove(&line);
            return false;
        }
        true
    }

    fn acquire_lock(&mut self, agent_id: &AgentId, line: usize, now: u64) -> bool {
        if self.is_locked_by_other(agent_id, line, now) {
            return false;
        }
        self.locks.insert(
            line,
            LineLock {
                holder: agent_id.clone(),
                acquired_at: now,
            },
        );
        true
    }

    fn release_lock(&mut self, agent_id: &AgentId, line: usize) -> bool {
        match self.locks.get(&line) {
            Some(lock) if &lock.holder == agent_id => {
                self.locks.remove(&line);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    fn shift_after(&mut self, after_line: usize, delta: i64) {
        let shift = |line: usize| -> usize {
            if line as i64 <= after_line as i64 {
                line
            } else {
                (line as i64 + delta).max(1) as usize
            }
        };
        self.line_authors = self
            .line_authors
            .drain()
            .map(|(line, author)| (shift(line), author))
            .collect();
        self.comments = self
            .comments
            .drain()
            .map(|(line, mut comments)| {
                let new_line = shift(line);
                for comment in &mut comments {
                    comment.line = new_line;
                }
                (new_line, comments)
            })
            .collect();
        self.locks = self
            .locks
            .drain()
            .map(|(line, lock)| (shift(line), lock))
            .collect();
    }

    fn insert_lines(
        &mut self,
        agent_id: &AgentId,
        line_number: usize,
        lines: &[String],
        now: u64,
    ) -> Result<(), ModError> {
        if line_number < 1 || line_number > self.content.len() + 1 {
            return Err(ModError::InvalidRequest(format!(
                "invalid line number: {line_number}"
            )));
        }
        let index = line_number - 1;
        for (offset, line) in lines.iter().enumerate() {
            self.content.insert(index + offset, line.clone());
        }
        self.shift_after(line_number - 1, lines.len() as i64);
        for (offset, _) in lines.iter().enumerate() {
            self.line_authors
                .insert(line_number + offset, agent_id.clone());
        }
        self.version += 1;
        self.history.push(Operation {
            agent_id: agent_id.clone(),
            op_type: "insert_lines".to_string(),
            timestamp: now,
        });
        Ok(())
    }

    fn remove_lines(
        &mut self,
        agent_id: &AgentId,
        start_line: usize,
        end_line: usize,
        now: u64,
    ) -> Result<(), ModError> {
        if start_line < 1 || end_line < start_line || end_line > self.content.len() {
            return Err(ModError::InvalidRequest(format!(
                "invalid line range: {start_line}-{end_line}"
            )));
        }
        self.content.drain(start_line - 1..end_line);
        if self.content.is_empty() {
            self.content.push(String::new());
        }
        for line in start_line..=end_line {
            self.comments.remove(&line);
            self.line_authors.remove(&line);
        }
        let removed = (end_line - start_line + 1) as i64;
        self.shift_after(end_line, -removed);
        self.version += 1;
        self.history.push(Operation {
            agent_id: agent_id.clone(),
            op_type: "remove_lines".to_string(),
            timestamp: now,
        });
        Ok(())
    }

    fn replace_lines(
        &mut self,
        agent_id: &AgentId,
        start_line: usize,
        end_line: usize,
        lines: &[String],
        now: u64,
    ) -> Result<(), ModError> {
        if start_line < 1 || end_line < start_line || start_line > self.content.len() + 1 {
            return Err(ModError::InvalidRequest(format!(
                "invalid line range: {start_line}-{end_line}"
            )));
        }
        for line in start_line..=end_line.min(self.content.len()) {
            if self.is_locked_by_other(agent_id, line, now) {
                let holder = self
                    .locks
                    .get(&line)
                    .expect("is_locked_by_other confirmed a lock exists")
                    .holder
                    .clone();
                return Err(ModError::LineLocked { line, holder });
            }
        }
        let end = end_line.min(self.content.len());
        if start_line <= self.content.len() {
            self.content.drain(start_line - 1..end);
        }
        for (offset, line) in lines.iter().enumerate() {
            self.content.insert(start_line - 1 + offset, line.clone());
        }
        for line in start_line..=end_line {
            self.comments.remove(&line);
        }
        let delta = lines.len() as i64 - (end_line - start_line + 1) as i64;
        self.shift_after(end_line, delta);
        for (offset, _) in lines.iter().enumerate() {
            self.line_authors
                .insert(start_line + offset, agent_id.clone());
        }
        self.version += 1;
        self.history.push(Operation {
            agent_id: agent_id.clone(),
            op_type: "replace_lines".to_string(),
            timestamp: now,
        });
        Ok(())
    }

    fn add_comment(&mut self, author: &AgentId, line: usize, text: String) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.comments.entry(line).or_default().push(Comment {
            id: id.clone(),
            line,
            author: author.clone(),
            text,
        });
        id
    }

    fn remove_comment(
        &mut self,
        agent_id: &AgentId,
        comment_id: &str,
        permission: Permission,
    ) -> Result<(), ModError> {
        for comments in self.comments.values_mut() {
            if let Some(position) = comments.iter().position(|c| c.id == comment_id) {
                if &comments[position].author != agent_id && permission != Permission::Admin {
                    return Err(ModError::PermissionDenied);
                }
                comments.remove(position);
                return Ok(());
            }
        }
        Err(ModError::NotFound(comment_id.to_string()))
    }

    fn update_presence(&mut self, agent_id: &AgentId, cursor: Option<(usize, usize)>, now: u64) {
        let entry = self.presence.entry(agent_id.clone()).or_insert(Presence {
            cursor: CursorPosition { line: 1, column: 1 },
            last_activity: now,
            active: true,
        });
        entry.last_activity = now;
        entry.active = true;
        if let Some((line, column)) = cursor {
            entry.cursor = CursorPosition { line, column };
        }
    }
}

/// The shared-document mod.
pub struct SharedDocumentMod {
    id: ModId,
    documents: Mutex<HashMap<String, Document>>,
    time: SharedTimeProvider,
    workspace: PathBuf,
}

impl SharedDocumentMod {
    /// Build the mod, rooted at `<workspace>/mods/shared_document/`.
    #[must_use]
    pub fn new(workspace: PathBuf, time: SharedTimeProvider) -> Self {
        Self {
            id: ModId::try_new("shared_document").expect("literal is valid"),
            documents: Mutex::new(HashMap::new()),
            time,
            workspace: workspace.join("mods").join("shared_document"),
        }
    }

    fn now(&self) -> u64 {
        self.time
            .now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    async fn snapshot_all(&self) {
        let documents = self.documents.lock().await;
        for document in documents.values() {
            let path = self.workspace.join(format!("{}.json", document.id));
            match serde_json::to_vec_pretty(document) {
                Ok(bytes) => {
                    if let Err(error) = std::fs::write(&path, bytes) {
                        warn!(%error, doc_id = %document.id, "snapshot write failed");
                    }
                }
                Err(error) => warn!(%error, doc_id = %document.id, "snapshot serialize failed"),
            }
        }
    }

    async fn load_snapshots(&self) {
        let Ok(entries) = std::fs::read_dir(&self.workspace) else {
            return;
        };
        let mut documents = self.documents.lock().await;
        for entry in entries.flatten() {
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            match serde_json::from_slice::<Document>(&bytes) {
                Ok(document) => {
                    documents.insert(document.id.clone(), document);
                }
                Err(error) => warn!(%error, path = ?entry.path(), "discarding malformed snapshot"),
            }
        }
    }
}

fn text_lines(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Mod for SharedDocumentMod {
    fn id(&self) -> ModId {
        self.id.clone()
    }

    async fn initialize(&self) -> bool {
        if std::fs::create_dir_all(&self.workspace).is_err() {
            return false;
        }
        self.load_snapshots().await;
        info!(mod_id = %self.id, "shared document mod initialized");
        true
    }

    async fn shutdown(&self) -> bool {
        self.snapshot_all().await;
        true
    }

    async fn tick(&self) {
        self.snapshot_all().await;
    }

    async fn process_event(&self, event: &Event, _emit: &EmitHandle) -> PipelineVerdict {
        if !event.event_name.starts_with("document.") {
            return PipelineVerdict::Pass;
        }
        let Ok(agent_id) = AgentId::try_new(event.source_id.clone()) else {
            return PipelineVerdict::Respond(
                ModError::InvalidRequest("invalid source_id".to_string()).into(),
            );
        };
        let now = self.now();
        let mut documents = self.documents.lock().await;
        let response = match event.event_name.as_str() {
            "document.create" => {
                let name = event
                    .payload
                    .get("document_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("untitled")
                    .to_string();
                let initial = event
                    .payload
                    .get("initial_content")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let doc_id = uuid::Uuid::new_v4().to_string();
                let document = Document::new(doc_id.clone(), name, agent_id.clone(), initial);
                documents.insert(doc_id.clone(), document);
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "document_id": doc_id })),
                    error_code: None,
                }
            }
            "document.list_documents" => {
                let ids: Vec<&str> = documents.keys().map(String::as_str).collect();
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "documents": ids })),
                    error_code: None,
                }
            }
            "document.open" => with_document(&mut documents, event, |document| {
                if document.permission_of(&agent_id).is_none() {
                    document.permissions.insert(agent_id.clone(), Permission::ReadWrite);
                }
                document.update_presence(&agent_id, None, now);
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({
                        "content": document.content,
                        "version": document.version,
                    })),
                    error_code: None,
                }
            }),
            "document.close" => with_document(&mut documents, event, |document| {
                if let Some(presence) = document.presence.get_mut(&agent_id) {
                    presence.active = false;
                }
                EventResponse::ok("closed")
            }),
            "document.insert_lines" => with_write_permission(&mut documents, event, &agent_id, |document| {
                let line_number = event
                    .payload
                    .get("line_number")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(1) as usize;
                let lines = text_lines(event.payload.get("content").unwrap_or(&json!([])));
                match document.insert_lines(&agent_id, line_number, &lines, now) {
                    Ok(()) => EventResponse::ok("inserted"),
                    Err(error) => error.into(),
                }
            }),
            "document.remove_lines" => with_write_permission(&mut documents, event, &agent_id, |document| {
                let start = event.payload.get("start_line").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                let end = event.payload.get("end_line").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                match document.remove_lines(&agent_id, start, end, now) {
                    Ok(()) => EventResponse::ok("removed"),
                    Err(error) => error.into(),
                }
            }),
            "document.replace_lines" => with_write_permission(&mut documents, event, &agent_id, |document| {
                let start = event.payload.get("start_line").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                let end = event.payload.get("end_line").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                let lines = text_lines(event.payload.get("content").unwrap_or(&json!([])));
                match document.replace_lines(&agent_id, start, end, &lines, now) {
                    Ok(()) => EventResponse::ok("replaced"),
                    Err(error) => error.into(),
                }
            }),
            "document.add_comment" => with_document(&mut documents, event, |document| {
                let line = event.payload.get("line_number").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                let text = event.payload.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let comment_id = document.add_comment(&agent_id, line, text);
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({ "comment_id": comment_id })),
                    error_code: None,
                }
            }),
            "document.remove_comment" => with_document(&mut documents, event, |document| {
                let Some(comment_id) = event.payload.get("comment_id").and_then(|v| v.as_str()) else {
                    return ModError::InvalidRequest("comment_id is required".to_string()).into();
                };
                let permission = document.permission_of(&agent_id).unwrap_or(Permission::ReadOnly);
                match document.remove_comment(&agent_id, comment_id, permission) {
                    Ok(()) => EventResponse::ok("removed"),
                    Err(error) => error.into(),
                }
            }),
            "document.update_cursor_position" => with_document(&mut documents, event, |document| {
                let line = event.payload.get("line_number").and_then(serde_json::Value::as_u64).map(|v| v as usize);
                let column = event.payload.get("column_number").and_then(serde_json::Value::as_u64).map(|v| v as usize);
                let cursor = line.zip(column);
                document.update_presence(&agent_id, cursor, now);
                EventResponse::ok("updated")
            }),
            "document.acquire_line_lock" => with_document(&mut documents, event, |document| {
                let line = event.payload.get("line_number").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                if document.acquire_lock(&agent_id, line, now) {
                    EventResponse::ok("locked")
                } else {
                    let holder = document
                        .locks
                        .get(&line)
                        .expect("acquire_lock only fails when a lock is already held")
                        .holder
                        .clone();
                    ModError::LineLocked { line, holder }.into()
                }
            }),
            "document.release_line_lock" => with_document(&mut documents, event, |document| {
                let line = event.payload.get("line_number").and_then(serde_json::Value::as_u64).unwrap_or(1) as usize;
                if document.release_lock(&agent_id, line) {
                    EventResponse::ok("released")
                } else {
                    ModError::PermissionDenied.into()
                }
            }),
            "document.get_content" => with_document(&mut documents, event, |document| EventResponse {
                success: true,
                message: None,
                data: Some(json!({
                    "content": document.content,
                    "version": document.version,
                    "line_authors": document.line_authors,
                    "comments": document.comments,
                })),
                error_code: None,
            }),
            "document.get_history" => with_document(&mut documents, event, |document| {
                let limit = event
                    .payload
                    .get("limit")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|v| PageLimit::try_new(v as usize).ok())
                    .unwrap_or_default()
                    .into_inner();
                let offset = event.payload.get("offset").and_then(serde_json::Value::as_u64).unwrap_or(0) as usize;
                let total = document.history.len();
                let page: Vec<&Operation> = document
                    .history
                    .iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .collect();
                EventResponse {
                    success: true,
                    message: None,
                    data: Some(json!({
                        "operations": page,
                        "has_more": offset + page.len() < total,
                    })),
                    error_code: None,
                }
            }),
            "document.get_agent_presence" => with_document(&mut documents, event, |document| EventResponse {
                success: true,
                message: None,
                data: Some(json!({ "presence": document.presence })),
                error_code: None,
            }),
            other => EventResponse::failure("unknown_operation", other),
        };
        PipelineVerdict::Respond(response)
    }
}

fn with_document(
    documents: &mut HashMap<String, Document>,
    event: &Event,
    f: impl FnOnce(&mut Document) -> EventResponse,
) -> EventResponse {
    let Some(doc_id) = event.payload.get("document_id").and_then(|v| v.as_str()) else {
        return ModError::InvalidRequest("document_id is required".to_string()).into();
    };
    match documents.get_mut(doc_id) {
        Some(document) => f(document),
        None => ModError::NotFound(doc_id.to_string()).into(),
    }
}

fn with_write_permission(
    documents: &mut HashMap<String, Document>,
    event: &Event,
    agent_id: &AgentId,
    f: impl FnOnce(&mut Document) -> EventResponse,
) -> EventResponse {
    with_document(documents, event, |document| match document.permission_of(agent_id) {
        Some(permission) if permission.can_write() => f(document),
        Some(_) | None => ModError::PermissionDenied.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::mod_pipeline::EmitQueue;
    use crate::time_provider::test_time_provider;

    fn event(name: &str, source: &str, payload: Payload) -> Event {
        Event::new(name, source, crate::types::SourceType::Agent)
            .unwrap()
            .with_payload(payload)
    }

    async fn new_mod() -> (SharedDocumentMod, EmitHandle) {
        let dir = tempfile::tempdir().unwrap();
        let m = SharedDocumentMod::new(dir.keep(), test_time_provider());
        assert!(m.initialize().await);
        let (emit, _queue) = EmitQueue::channel();
        (m, emit)
    }

    #[tokio::test]
    async fn create_then_insert_and_read_back() {
        let (m, emit) = new_mod().await;
        let create = m
            .process_event(
                &event(
                    "document.create",
                    "alice",
                    crate::event::payload([("document_name", json!("notes"))]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = create else {
            panic!("expected Respond")
        };
        let doc_id = response.data.unwrap()["document_id"]
            .as_str()
            .unwrap()
            .to_string();

        let open = m
            .process_event(
                &event(
                    "document.open",
                    "alice",
                    crate::event::payload([("document_id", json!(doc_id.clone()))]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(open, PipelineVerdict::Respond(r) if r.success));

        let insert = m
            .process_event(
                &event(
                    "document.insert_lines",
                    "alice",
                    crate::event::payload([
                        ("document_id", json!(doc_id.clone())),
                        ("line_number", json!(1)),
                        ("content", json!(["hello", "world"])),
                    ]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(insert, PipelineVerdict::Respond(r) if r.success));

        let content = m
            .process_event(
                &event(
                    "document.get_content",
                    "alice",
                    crate::event::payload([("document_id", json!(doc_id))]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = content else {
            panic!("expected Respond")
        };
        let lines = response.data.unwrap()["content"].as_array().unwrap().len();
        assert_eq!(lines, 3);
    }

    #[tokio::test]
    async fn read_only_agent_cannot_write() {
        let (m, emit) = new_mod().await;
        let create = m
            .process_event(
                &event(
                    "document.create",
                    "alice",
                    crate::event::payload([("document_name", json!("notes"))]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = create else {
            panic!("expected Respond")
        };
        let doc_id = response.data.unwrap()["document_id"].as_str().unwrap().to_string();

        let insert = m
            .process_event(
                &event(
                    "document.insert_lines",
                    "bob",
                    crate::event::payload([
                        ("document_id", json!(doc_id)),
                        ("line_number", json!(1)),
                        ("content", json!(["hi"])),
                    ]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(insert, PipelineVerdict::Respond(r) if !r.success));
    }

    #[tokio::test]
    async fn locked_line_blocks_replace_by_other_agent() {
        let (m, emit) = new_mod().await;
        let create = m
            .process_event(
                &event("document.create", "alice", crate::event::payload([("document_name", json!("notes")), ("initial_content", json!("a\nb\nc"))])),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = create else { panic!() };
        let doc_id = response.data.unwrap()["document_id"].as_str().unwrap().to_string();

        m.process_event(&event("document.open", "bob", crate::event::payload([("document_id", json!(doc_id.clone()))])), &emit).await;

        let lock = m
            .process_event(
                &event("document.acquire_line_lock", "alice", crate::event::payload([("document_id", json!(doc_id.clone())), ("line_number", json!(2))])),
                &emit,
            )
            .await;
        assert!(matches!(lock, PipelineVerdict::Respond(r) if r.success));

        let replace = m
            .process_event(
                &event(
                    "document.replace_lines",
                    "bob",
                    crate::event::payload([
                        ("document_id", json!(doc_id)),
                        ("start_line", json!(2)),
                        ("end_line", json!(2)),
                        ("content", json!(["changed"])),
                    ]),
                ),
                &emit,
            )
            .await;
        assert!(matches!(replace, PipelineVerdict::Respond(r) if !r.success));
    }

    #[tokio::test]
    async fn remove_comment_error_codes_diverge_by_cause() {
        let (m, emit) = new_mod().await;
        let create = m
            .process_event(
                &event(
                    "document.create",
                    "alice",
                    crate::event::payload([
                        ("document_name", json!("notes")),
                        ("initial_content", json!("a")),
                    ]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = create else {
            panic!()
        };
        let doc_id = response.data.unwrap()["document_id"]
            .as_str()
            .unwrap()
            .to_string();

        let missing = m
            .process_event(
                &event(
                    "document.remove_comment",
                    "alice",
                    crate::event::payload([
                        ("document_id", json!(doc_id.clone())),
                        ("comment_id", json!("does-not-exist")),
                    ]),
                ),
                &emit,
            )
            .await;
        assert!(
            matches!(missing, PipelineVerdict::Respond(r) if r.error_code.as_deref() == Some("not_found"))
        );

        m.process_event(
            &event(
                "document.open",
                "bob",
                crate::event::payload([("document_id", json!(doc_id.clone()))]),
            ),
            &emit,
        )
        .await;
        let comment = m
            .process_event(
                &event(
                    "document.add_comment",
                    "alice",
                    crate::event::payload([
                        ("document_id", json!(doc_id.clone())),
                        ("line_number", json!(1)),
                        ("text", json!("looks good")),
                    ]),
                ),
                &emit,
            )
            .await;
        let PipelineVerdict::Respond(response) = comment else {
            panic!()
        };
        let comment_id = response.data.unwrap()["comment_id"]
            .as_str()
            .unwrap()
            .to_string();

        let denied = m
            .process_event(
                &event(
                    "document.remove_comment",
                    "bob",
                    crate::event::payload([
                        ("document_id", json!(doc_id)),
                        ("comment_id", json!(comment_id)),
                    ]),
                ),
                &emit,
            )
            .await;
        assert!(
            matches!(denied, PipelineVerdict::Respond(r) if r.error_code.as_deref() == Some("permission_denied"))
        );
    }
}
