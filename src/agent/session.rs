//! The chat loop: model ↔ tools, with a human approval gate on edits.
//!
//! `semantic_search` calls run as soon as the model asks for them.
//! `update_code` calls suspend the loop and surface a [`PendingChange`];
//! nothing is written until [`ChatSession::approve`] is called. Either
//! way the model receives a `tool_result` for every `tool_use`, so the
//! conversation stays well-formed.

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::anthropic::{ChatModel, ContentBlock, Message, Role, ToolDefinition};
use super::api::CodeTools;
use super::tool_definitions;
use crate::models::CodeResult;

pub const REJECTION_MESSAGE: &str =
    "The user rejected this change. No files or database records were modified.";

#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Complete { text: String },
    ApprovalRequired(PendingChange),
    IterationLimit,
}

/// An edit waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingChange {
    pub tool_use_id: String,
    pub chunk_id: i64,
    /// Known only when the chunk appeared in an earlier search.
    pub file_path: String,
    pub old_code: String,
    pub new_code: String,
    /// Assistant text produced since the last turn.
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub input: Value,
    pub output: Value,
    pub elapsed: Duration,
}

struct ToolCall {
    id: String,
    name: String,
    input: Value,
}

pub struct ChatSession {
    model: Box<dyn ChatModel>,
    tools: Box<dyn CodeTools>,
    definitions: Vec<ToolDefinition>,
    max_iterations: usize,
    messages: Vec<Message>,
    search_results: Vec<CodeResult>,
    executions: Vec<ToolExecution>,
    /// Tool calls from the last assistant message not yet answered.
    queue: VecDeque<ToolCall>,
    /// Results to send back once the queue is drained.
    results: Vec<ContentBlock>,
    awaiting: Option<(ToolCall, PendingChange)>,
    text: Vec<String>,
    iterations: usize,
}

impl ChatSession {
    pub fn new(model: Box<dyn ChatModel>, tools: Box<dyn CodeTools>, max_iterations: usize) -> Self {
        Self {
            model,
            tools,
            definitions: tool_definitions(),
            max_iterations,
            messages: Vec::new(),
            search_results: Vec::new(),
            executions: Vec::new(),
            queue: VecDeque::new(),
            results: Vec::new(),
            awaiting: None,
            text: Vec::new(),
            iterations: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn executions(&self) -> &[ToolExecution] {
        &self.executions
    }

    pub fn pending(&self) -> Option<&PendingChange> {
        self.awaiting.as_ref().map(|(_, change)| change)
    }

    pub async fn send(&mut self, user_message: &str) -> Result<Turn> {
        if self.awaiting.is_some() {
            bail!("A change is waiting for approval; approve or reject it first");
        }
        self.iterations = 0;
        self.text.clear();
        self.push_user(vec![ContentBlock::Text {
            text: user_message.to_string(),
        }]);
        self.run().await
    }

    /// Apply the pending change, report the outcome to the model, continue.
    pub async fn approve(&mut self) -> Result<Turn> {
        let Some((call, change)) = self.awaiting.take() else {
            bail!("No change is waiting for approval");
        };
        tracing::info!(chunk_id = change.chunk_id, "update approved");

        let started = Instant::now();
        let (output, is_error) = match self.tools.update(change.chunk_id, &change.new_code).await {
            Ok(outcome) => (serde_json::to_value(outcome)?, false),
            Err(e) => (json!({ "error": e.to_string() }), true),
        };
        self.record(&call, output.clone(), started.elapsed());
        self.results.push(ContentBlock::ToolResult {
            tool_use_id: call.id,
            content: output.to_string(),
            is_error,
        });
        self.run().await
    }

    /// Drop the pending change and tell the model it was rejected.
    pub async fn reject(&mut self) -> Result<Turn> {
        let Some((call, change)) = self.awaiting.take() else {
            bail!("No change is waiting for approval");
        };
        tracing::info!(chunk_id = change.chunk_id, "update rejected");
        self.results.push(ContentBlock::ToolResult {
            tool_use_id: call.id,
            content: REJECTION_MESSAGE.to_string(),
            is_error: false,
        });
        self.run().await
    }

    async fn run(&mut self) -> Result<Turn> {
        loop {
            while let Some(call) = self.queue.pop_front() {
                if call.name == "update_code" {
                    let change = self.pending_change(&call);
                    self.awaiting = Some((call, change.clone()));
                    return Ok(Turn::ApprovalRequired(change));
                }
                let block = self.execute(call).await;
                self.results.push(block);
            }
            if !self.results.is_empty() {
                let results = std::mem::take(&mut self.results);
                self.push_user(results);
            }

            if self.iterations >= self.max_iterations {
                tracing::warn!(max = self.max_iterations, "maximum iterations reached");
                return Ok(Turn::IterationLimit);
            }
            self.iterations += 1;
            tracing::debug!(iteration = self.iterations, "calling model");

            let response = self.model.create(&self.messages, &self.definitions).await?;
            let text = response.text();
            if !text.is_empty() {
                self.text.push(text);
            }
            let content: Vec<ContentBlock> = response
                .content
                .iter()
                .filter(|block| !matches!(block, ContentBlock::Unknown))
                .cloned()
                .collect();
            if !content.is_empty() {
                self.messages.push(Message {
                    role: Role::Assistant,
                    content,
                });
            }

            self.queue = response
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCall { id, name, input }),
                    _ => None,
                })
                .collect();

            if self.queue.is_empty() {
                return Ok(Turn::Complete {
                    text: std::mem::take(&mut self.text).join("\n\n"),
                });
            }
        }
    }

    async fn execute(&mut self, call: ToolCall) -> ContentBlock {
        let started = Instant::now();
        let (output, is_error) = match call.name.as_str() {
            "semantic_search" => {
                let query = call.input["query"].as_str().unwrap_or("");
                let top_k = call.input["top_k"].as_u64().unwrap_or(2) as usize;
                match self.tools.search(query, top_k).await {
                    Ok(results) => {
                        let value = json!(results);
                        for r in results {
                            self.search_results.retain(|s| s.chunk_id != r.chunk_id);
                            self.search_results.push(r);
                        }
                        (value, false)
                    }
                    Err(e) => (json!({ "error": e.to_string() }), true),
                }
            }
            other => (json!({ "error": format!("Unknown tool: {}", other) }), true),
        };
        tracing::info!(tool = %call.name, elapsed_ms = started.elapsed().as_millis() as u64, "tool executed");
        self.record(&call, output.clone(), started.elapsed());

        let content = match &output {
            Value::Array(items) if items.is_empty() => "No results".to_string(),
            other => other.to_string(),
        };
        ContentBlock::ToolResult {
            tool_use_id: call.id,
            content,
            is_error,
        }
    }

    fn record(&mut self, call: &ToolCall, output: Value, elapsed: Duration) {
        self.executions.push(ToolExecution {
            tool_name: call.name.clone(),
            input: call.input.clone(),
            output,
            elapsed,
        });
    }

    fn pending_change(&self, call: &ToolCall) -> PendingChange {
        let chunk_id = call.input["chunk_id"].as_i64().unwrap_or(-1);
        let known = self.search_results.iter().find(|r| r.chunk_id == chunk_id);
        PendingChange {
            tool_use_id: call.id.clone(),
            chunk_id,
            file_path: known.map(|r| r.file_path.clone()).unwrap_or_default(),
            old_code: known.map(|r| r.code_snippet.clone()).unwrap_or_default(),
            new_code: call.input["new_code"].as_str().unwrap_or("").to_string(),
            note: self.text.join("\n\n"),
        }
    }

    /// Consecutive user content is merged into one message.
    fn push_user(&mut self, blocks: Vec<ContentBlock>) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::User => last.content.extend(blocks),
            _ => self.messages.push(Message {
                role: Role::User,
                content: blocks,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::anthropic::MessagesResponse;
    use crate::models::UpdateOutcome;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Replays canned responses and records what it was sent.
    struct ScriptedModel {
        responses: Mutex<VecDeque<MessagesResponse>>,
        seen: Arc<Mutex<Vec<Vec<Message>>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Vec<ContentBlock>>) -> (Self, Arc<Mutex<Vec<Vec<Message>>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let model = Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|content| MessagesResponse {
                            content,
                            stop_reason: None,
                        })
                        .collect(),
                ),
                seen: seen.clone(),
            };
            (model, seen)
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn create(&self, messages: &[Message], _tools: &[ToolDefinition]) -> Result<MessagesResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match self.responses.lock().unwrap().pop_front() {
                Some(r) => Ok(r),
                None => bail!("script exhausted"),
            }
        }
    }

    #[derive(Default)]
    struct FakeTools {
        updates: Arc<Mutex<Vec<(i64, String)>>>,
    }

    #[async_trait]
    impl CodeTools for FakeTools {
        async fn search(&self, query: &str, _top_k: usize) -> Result<Vec<CodeResult>> {
            if query == "nothing" {
                return Ok(vec![]);
            }
            Ok(vec![CodeResult {
                chunk_id: 7,
                file_path: "src/login.js".into(),
                file_name: "login.js".into(),
                language: "javascript".into(),
                chunk_index: 0,
                code_snippet: "const btn = 'Login';".into(),
                similarity_score: 0.9,
            }])
        }

        async fn update(&self, chunk_id: i64, new_code: &str) -> Result<UpdateOutcome> {
            self.updates.lock().unwrap().push((chunk_id, new_code.to_string()));
            Ok(UpdateOutcome {
                success: true,
                database_updated: true,
                file_updated: true,
                chunk_id: Some(chunk_id),
                message: "ok".into(),
                ..Default::default()
            })
        }
    }

    fn text(t: &str) -> ContentBlock {
        ContentBlock::Text { text: t.into() }
    }

    fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    fn last_tool_result(messages: &[Message]) -> (String, String) {
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        match last.content.last().unwrap() {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => (tool_use_id.clone(), content.clone()),
            other => panic!("expected tool_result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn search_then_answer() {
        let (model, seen) = ScriptedModel::new(vec![
            vec![
                text("Let me look."),
                tool_use("tu_1", "semantic_search", json!({ "query": "login button" })),
            ],
            vec![text("The button is in src/login.js.")],
        ]);
        let mut session = ChatSession::new(Box::new(model), Box::new(FakeTools::default()), 10);

        let turn = session.send("where is the login button?").await.unwrap();
        assert_eq!(
            turn,
            Turn::Complete {
                text: "Let me look.\n\nThe button is in src/login.js.".into()
            }
        );
        assert_eq!(session.executions().len(), 1);

        let calls = seen.lock().unwrap();
        let (id, content) = last_tool_result(&calls[1]);
        assert_eq!(id, "tu_1");
        assert!(content.contains("\"chunk_id\":7"));
    }

    #[tokio::test]
    async fn empty_search_reports_no_results() {
        let (model, seen) = ScriptedModel::new(vec![
            vec![tool_use("tu_1", "semantic_search", json!({ "query": "nothing" }))],
            vec![text("Nothing found.")],
        ]);
        let mut session = ChatSession::new(Box::new(model), Box::new(FakeTools::default()), 10);
        session.send("?").await.unwrap();
        let (_, content) = last_tool_result(&seen.lock().unwrap()[1]);
        assert_eq!(content, "No results");
    }

    #[tokio::test]
    async fn update_waits_for_approval() {
        let (model, seen) = ScriptedModel::new(vec![
            vec![tool_use("tu_1", "semantic_search", json!({ "query": "login" }))],
            vec![
                text("I'll rename it."),
                tool_use(
                    "tu_2",
                    "update_code",
                    json!({ "chunk_id": 7, "new_code": "const btn = 'Sign in';" }),
                ),
            ],
            vec![text("Done.")],
        ]);
        let tools = FakeTools::default();
        let updates = tools.updates.clone();
        let mut session = ChatSession::new(Box::new(model), Box::new(tools), 10);

        let turn = session.send("rename the login button").await.unwrap();
        let Turn::ApprovalRequired(change) = turn else {
            panic!("expected approval request");
        };
        assert_eq!(change.chunk_id, 7);
        assert_eq!(change.file_path, "src/login.js");
        assert_eq!(change.old_code, "const btn = 'Login';");
        assert_eq!(change.note, "I'll rename it.");
        assert!(updates.lock().unwrap().is_empty());
        assert!(session.send("hello").await.is_err());

        let turn = session.approve().await.unwrap();
        assert_eq!(turn, Turn::Complete { text: "I'll rename it.\n\nDone.".into() });
        assert_eq!(
            updates.lock().unwrap().as_slice(),
            &[(7, "const btn = 'Sign in';".to_string())]
        );

        let (id, content) = last_tool_result(&seen.lock().unwrap()[2]);
        assert_eq!(id, "tu_2");
        assert!(content.contains("\"success\":true"));
    }

    #[tokio::test]
    async fn rejection_is_reported_to_model() {
        let (model, seen) = ScriptedModel::new(vec![
            vec![tool_use("tu_1", "update_code", json!({ "chunk_id": 3, "new_code": "x" }))],
            vec![text("Understood, nothing changed.")],
        ]);
        let tools = FakeTools::default();
        let updates = tools.updates.clone();
        let mut session = ChatSession::new(Box::new(model), Box::new(tools), 10);

        let Turn::ApprovalRequired(change) = session.send("change it").await.unwrap() else {
            panic!("expected approval request");
        };
        assert!(change.old_code.is_empty());

        let turn = session.reject().await.unwrap();
        assert!(matches!(turn, Turn::Complete { .. }));
        assert!(updates.lock().unwrap().is_empty());
        let (_, content) = last_tool_result(&seen.lock().unwrap()[1]);
        assert_eq!(content, REJECTION_MESSAGE);
        assert!(session.reject().await.is_err());
    }

    #[tokio::test]
    async fn unknown_blocks_are_not_sent_back() {
        let (model, seen) = ScriptedModel::new(vec![
            vec![
                ContentBlock::Unknown,
                tool_use("tu_1", "semantic_search", json!({ "query": "login" })),
            ],
            vec![text("Found it.")],
        ]);
        let mut session = ChatSession::new(Box::new(model), Box::new(FakeTools::default()), 10);

        let turn = session.send("where?").await.unwrap();
        assert_eq!(turn, Turn::Complete { text: "Found it.".into() });
        let calls = seen.lock().unwrap();
        let assistant = &calls[1][1];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content.len(), 1);
        assert!(serde_json::to_string(&session.messages()).is_ok());
    }

    #[tokio::test]
    async fn stops_at_iteration_limit() {
        let looping: Vec<Vec<ContentBlock>> = (0..5)
            .map(|i| vec![tool_use(&format!("tu_{i}"), "semantic_search", json!({ "query": "a" }))])
            .collect();
        let (model, _) = ScriptedModel::new(looping);
        let mut session = ChatSession::new(Box::new(model), Box::new(FakeTools::default()), 3);

        assert_eq!(session.send("loop").await.unwrap(), Turn::IterationLimit);
        assert_eq!(session.executions().len(), 3);
        // conversation ends on the user's tool results
        assert_eq!(session.messages().last().unwrap().role, Role::User);
    }
}
