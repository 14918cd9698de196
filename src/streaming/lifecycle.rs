//! Per-invocation lifecycle state for streaming tool calls.
//!
//! Each in-flight tool call owns a [`ToolCallSession`]: an append-only
//! argument buffer plus the last values observed for the fields it tracks.
//! Every delta reparses the whole buffer and pushes a snapshot to the
//! [`StateSink`] only when a tracked value actually changed, so write volume
//! is bounded by value transitions rather than by fragment count. A sink
//! failure is logged and swallowed; the tool call itself always proceeds.

use crate::error::LifecycleError;
use crate::streaming::escape::normalize_escapes;
use crate::streaming::fields::ExtractedFields;
use crate::streaming::parser::parse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a tool call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Session constructed, no events yet.
    Idle,
    /// `start` received; no argument fragments so far.
    Started,
    /// At least one fragment received; fields are optimistic guesses.
    Streaming,
    /// `finish` received; arguments are authoritative.
    Finished,
}

/// Snapshot of one tool call, as handed to the persistence sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallView {
    pub call_id: String,
    pub tool_name: String,
    pub status: CallStatus,
    /// Raw accumulated argument text.
    pub args_text: String,
    /// Latest observed value per tracked field path.
    pub fields: ExtractedFields,
    /// Authoritative decoded arguments, present once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persistence/side-effect boundary for call snapshots.
///
/// `save` may fail; the lifecycle catches and logs the failure and keeps the
/// call running — a lost progress update is preferable to an aborted turn.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn save(&self, view: &ToolCallView) -> anyhow::Result<()>;
}

/// Lifecycle state machine for a single tool invocation.
///
/// `idle → started → (streaming)* → finished`, one instance per invocation
/// identifier. Instances are never shared across identifiers; if a runtime
/// can deliver deltas for one identifier from several threads, the caller
/// must serialize them — buffer appends do not commute.
pub struct ToolCallSession {
    call_id: String,
    tool_name: String,
    buffer: String,
    tracked: Option<Vec<String>>,
    escape_normalized: Vec<String>,
    observed: ExtractedFields,
    status: CallStatus,
    arguments: Option<Value>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    sink: Arc<dyn StateSink>,
}

impl ToolCallSession {
    /// New idle session with a generated call id.
    pub fn new(tool_name: impl Into<String>, sink: Arc<dyn StateSink>) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            buffer: String::new(),
            tracked: None,
            escape_normalized: Vec::new(),
            observed: ExtractedFields::new(),
            status: CallStatus::Idle,
            arguments: None,
            started_at: Utc::now(),
            finished_at: None,
            sink,
        }
    }

    /// Use the transport-supplied invocation identifier.
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    /// Observe only these field paths. Untracked changes never emit.
    /// Default is to track every extracted field.
    pub fn track(mut self, paths: Vec<String>) -> Self {
        self.tracked = Some(paths);
        self
    }

    /// Run these string fields through escape normalization before they are
    /// observed — for free-text fields that cross a double-encoding transport.
    pub fn normalize_escapes_for(mut self, paths: Vec<String>) -> Self {
        self.escape_normalized = paths;
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Begin the call: fresh state, cleared buffer, one initial snapshot.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.status != CallStatus::Idle {
            return Err(LifecycleError::AlreadyStarted(self.call_id.clone()));
        }
        self.buffer.clear();
        self.observed = ExtractedFields::new();
        self.arguments = None;
        self.started_at = Utc::now();
        self.status = CallStatus::Started;
        self.emit().await;
        Ok(())
    }

    /// Append an argument fragment, reparse, and emit if anything tracked
    /// changed. Emission is suppressed on a no-change delta.
    pub async fn delta(&mut self, fragment: &str) -> Result<(), LifecycleError> {
        match self.status {
            CallStatus::Idle => return Err(LifecycleError::NotStarted(self.call_id.clone())),
            CallStatus::Finished => {
                return Err(LifecycleError::AlreadyFinished(self.call_id.clone()))
            }
            CallStatus::Started | CallStatus::Streaming => {}
        }
        self.status = CallStatus::Streaming;
        self.buffer.push_str(fragment);

        let result = parse(&self.buffer);
        if self.observe(&result.fields) {
            self.emit().await;
        }
        Ok(())
    }

    /// Conclude the call with the authoritative decoded arguments, replacing
    /// every optimistic guess, and emit a final snapshot.
    pub async fn finish(&mut self, final_args: Value) -> Result<(), LifecycleError> {
        match self.status {
            CallStatus::Idle => return Err(LifecycleError::NotStarted(self.call_id.clone())),
            CallStatus::Finished => {
                return Err(LifecycleError::AlreadyFinished(self.call_id.clone()))
            }
            CallStatus::Started | CallStatus::Streaming => {}
        }
        self.observed = ExtractedFields::new();
        self.observe(&ExtractedFields::flatten(&final_args));
        self.arguments = Some(final_args);
        self.finished_at = Some(Utc::now());
        self.status = CallStatus::Finished;
        self.emit().await;
        Ok(())
    }

    /// Fold freshly extracted fields into the observed set; true when any
    /// tracked value changed.
    fn observe(&mut self, fields: &ExtractedFields) -> bool {
        let mut changed = false;
        for (path, value) in fields {
            if let Some(tracked) = &self.tracked {
                if !tracked.iter().any(|t| t == path) {
                    continue;
                }
            }
            let value = self.normalized(path, value);
            if self.observed.get(path) != Some(&value) {
                self.observed.insert(path.clone(), value);
                changed = true;
            }
        }
        changed
    }

    fn normalized(&self, path: &str, value: &Value) -> Value {
        if self.escape_normalized.iter().any(|p| p == path) {
            if let Value::String(text) = value {
                return Value::String(normalize_escapes(text).into_owned());
            }
        }
        value.clone()
    }

    pub fn view(&self) -> ToolCallView {
        ToolCallView {
            call_id: self.call_id.clone(),
            tool_name: self.tool_name.clone(),
            status: self.status,
            args_text: self.buffer.clone(),
            fields: self.observed.clone(),
            arguments: self.arguments.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    async fn emit(&self) {
        let view = self.view();
        if let Err(error) = self.sink.save(&view).await {
            tracing::warn!(
                call_id = %self.call_id,
                tool = %self.tool_name,
                %error,
                "state sink write failed; tool call continues"
            );
        }
    }
}

/// In-flight sessions keyed by invocation identifier.
///
/// One assistant turn can stream several tool calls at once; the registry
/// gives each its own session and routes events by id. A session is checked
/// out of the map while it handles an event, so concurrent events for the
/// same id surface as [`LifecycleError::UnknownCall`] rather than racing —
/// per-id serialization remains the caller's job.
pub struct CallRegistry {
    sink: Arc<dyn StateSink>,
    sessions: Mutex<HashMap<String, ToolCallSession>>,
}

impl CallRegistry {
    pub fn new(sink: Arc<dyn StateSink>) -> Self {
        Self {
            sink,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin tracking a new invocation.
    pub async fn start(
        &self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        let call_id = call_id.into();
        if self.sessions.lock().contains_key(&call_id) {
            return Err(LifecycleError::AlreadyStarted(call_id));
        }
        let mut session = ToolCallSession::new(tool_name, Arc::clone(&self.sink))
            .with_call_id(call_id.clone());
        session.start().await?;
        self.sessions.lock().insert(call_id, session);
        Ok(())
    }

    /// Route an argument fragment to its session.
    pub async fn delta(&self, call_id: &str, fragment: &str) -> Result<(), LifecycleError> {
        let mut session = self.checkout(call_id)?;
        let outcome = session.delta(fragment).await;
        self.sessions.lock().insert(call_id.to_string(), session);
        outcome
    }

    /// Conclude a call; its session (and buffer) is discarded and the final
    /// snapshot returned.
    pub async fn finish(
        &self,
        call_id: &str,
        final_args: Value,
    ) -> Result<ToolCallView, LifecycleError> {
        let mut session = self.checkout(call_id)?;
        match session.finish(final_args).await {
            Ok(()) => Ok(session.view()),
            Err(error) => {
                self.sessions.lock().insert(call_id.to_string(), session);
                Err(error)
            }
        }
    }

    /// Drop a call without a final snapshot (stream aborted mid-flight).
    pub fn abort(&self, call_id: &str) -> bool {
        self.sessions.lock().remove(call_id).is_some()
    }

    /// Snapshot of an in-flight call, if present.
    pub fn view(&self, call_id: &str) -> Option<ToolCallView> {
        self.sessions.lock().get(call_id).map(ToolCallSession::view)
    }

    /// Identifiers of every in-flight call.
    pub fn active_calls(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn checkout(&self, call_id: &str) -> Result<ToolCallSession, LifecycleError> {
        self.sessions
            .lock()
            .remove(call_id)
            .ok_or_else(|| LifecycleError::UnknownCall(call_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink that records every snapshot it receives.
    #[derive(Default)]
    struct RecordingSink {
        views: Mutex<Vec<ToolCallView>>,
    }

    #[async_trait]
    impl StateSink for RecordingSink {
        async fn save(&self, view: &ToolCallView) -> anyhow::Result<()> {
            self.views.lock().push(view.clone());
            Ok(())
        }
    }

    /// Sink that always fails.
    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl StateSink for FailingSink {
        async fn save(&self, _view: &ToolCallView) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("sink unavailable")
        }
    }

    #[tokio::test]
    async fn start_emits_initial_snapshot() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("execute_sql", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1");

        session.start().await.unwrap();

        let views = sink.views.lock();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].call_id, "call-1");
        assert_eq!(views[0].status, CallStatus::Started);
        assert!(views[0].fields.is_empty());
    }

    #[tokio::test]
    async fn unchanged_deltas_suppress_emission() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("think", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1");
        session.start().await.unwrap();

        session.delta(r#"{"thought": "Step"#).await.unwrap();
        let emitted_after_first = sink.views.lock().len();

        // Fragment that changes nothing extractable: still inside the same
        // string token would change the value, so use pure whitespace after
        // the value closed.
        session.delta(r#" one"}"#).await.unwrap();
        session.delta("   ").await.unwrap();
        session.delta("\n").await.unwrap();

        let views = sink.views.lock();
        // start + first delta + value completion; the whitespace deltas
        // changed nothing and emitted nothing.
        assert_eq!(emitted_after_first, 2);
        assert_eq!(views.len(), 3);
        assert_eq!(views[2].fields.get_str("thought"), Some("Step one"));
    }

    #[tokio::test]
    async fn growing_string_emits_per_transition() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("think", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1");
        session.start().await.unwrap();

        for fragment in [r#"{"thought": "a"#, "b", "c", r#""}"#] {
            session.delta(fragment).await.unwrap();
        }

        // The closing fragment repairs to the same value the previous delta
        // already observed, so it emits nothing.
        let views = sink.views.lock();
        let thoughts: Vec<_> = views
            .iter()
            .filter_map(|v| v.fields.get_str("thought").map(str::to_string))
            .collect();
        assert_eq!(thoughts, vec!["a", "ab", "abc"]);
    }

    #[tokio::test]
    async fn finish_overwrites_optimistic_guesses() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("execute_sql", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1");
        session.start().await.unwrap();
        session.delta(r#"{"sql": "SELECT * FR"#).await.unwrap();

        session
            .finish(json!({"sql": "SELECT * FROM orders"}))
            .await
            .unwrap();

        let views = sink.views.lock();
        let last = views.last().unwrap();
        assert_eq!(last.status, CallStatus::Finished);
        assert_eq!(last.fields.get_str("sql"), Some("SELECT * FROM orders"));
        assert_eq!(last.arguments, Some(json!({"sql": "SELECT * FROM orders"})));
        assert!(last.finished_at.is_some());
    }

    #[tokio::test]
    async fn tracked_fields_limit_observation() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("done", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1")
            .track(vec!["final_response".to_string()]);
        session.start().await.unwrap();

        session
            .delta(r#"{"internal": "noise", "final_response": "All done"#)
            .await
            .unwrap();

        let views = sink.views.lock();
        let last = views.last().unwrap();
        assert_eq!(last.fields.get_str("final_response"), Some("All done"));
        assert!(!last.fields.contains("internal"));
    }

    #[tokio::test]
    async fn untracked_only_changes_do_not_emit() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("done", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1")
            .track(vec!["final_response".to_string()]);
        session.start().await.unwrap();

        session.delta(r#"{"internal": "noise grows"#).await.unwrap();
        session.delta(" and grows").await.unwrap();

        // Only the start snapshot: nothing tracked ever changed.
        assert_eq!(sink.views.lock().len(), 1);
    }

    #[tokio::test]
    async fn escape_normalized_fields_are_cleaned_on_observation() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = ToolCallSession::new("think", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1")
            .normalize_escapes_for(vec!["thought".to_string()]);
        session.start().await.unwrap();

        // The buffer carries a doubly-escaped newline: JSON decoding yields
        // two backslashes and an `n`, normalization collapses that to a real
        // newline.
        session
            .delta(r#"{"thought": "Line 1\\\\nLine 2"}"#)
            .await
            .unwrap();

        let views = sink.views.lock();
        let last = views.last().unwrap();
        assert_eq!(last.fields.get_str("thought"), Some("Line 1\nLine 2"));
    }

    #[tokio::test]
    async fn sink_failure_never_aborts_the_call() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let mut session = ToolCallSession::new("execute_sql", Arc::clone(&sink) as Arc<dyn StateSink>)
            .with_call_id("call-1");

        session.start().await.unwrap();
        session.delta(r#"{"sql": "SELECT 1"#).await.unwrap();
        session.finish(json!({"sql": "SELECT 1"})).await.unwrap();

        assert_eq!(session.status(), CallStatus::Finished);
        assert!(sink.attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn lifecycle_order_is_enforced() {
        let sink = Arc::new(RecordingSink::default()) as Arc<dyn StateSink>;
        let mut session = ToolCallSession::new("think", Arc::clone(&sink)).with_call_id("call-1");

        assert_eq!(
            session.delta("{").await,
            Err(LifecycleError::NotStarted("call-1".into()))
        );

        session.start().await.unwrap();
        assert_eq!(
            session.start().await,
            Err(LifecycleError::AlreadyStarted("call-1".into()))
        );

        session.finish(json!({})).await.unwrap();
        assert_eq!(
            session.delta("{").await,
            Err(LifecycleError::AlreadyFinished("call-1".into()))
        );
        assert_eq!(
            session.finish(json!({})).await,
            Err(LifecycleError::AlreadyFinished("call-1".into()))
        );
    }

    #[tokio::test]
    async fn registry_routes_concurrent_calls_by_id() {
        let sink = Arc::new(RecordingSink::default());
        let registry = CallRegistry::new(Arc::clone(&sink) as Arc<dyn StateSink>);

        registry.start("call-1", "execute_sql").await.unwrap();
        registry.start("call-2", "search_files").await.unwrap();

        // Interleaved fragments for two in-flight calls.
        registry.delta("call-1", r#"{"sql": "SELECT"#).await.unwrap();
        registry
            .delta("call-2", r#"{"pattern": "*.yml"#)
            .await
            .unwrap();
        registry.delta("call-1", r#" 1"}"#).await.unwrap();

        let view1 = registry.view("call-1").unwrap();
        let view2 = registry.view("call-2").unwrap();
        assert_eq!(view1.fields.get_str("sql"), Some("SELECT 1"));
        assert_eq!(view2.fields.get_str("pattern"), Some("*.yml"));

        let final_view = registry
            .finish("call-1", json!({"sql": "SELECT 1"}))
            .await
            .unwrap();
        assert_eq!(final_view.status, CallStatus::Finished);
        assert_eq!(registry.active_calls(), vec!["call-2".to_string()]);
    }

    #[tokio::test]
    async fn registry_rejects_unknown_and_duplicate_ids() {
        let sink = Arc::new(RecordingSink::default()) as Arc<dyn StateSink>;
        let registry = CallRegistry::new(sink);

        assert_eq!(
            registry.delta("ghost", "{").await,
            Err(LifecycleError::UnknownCall("ghost".into()))
        );

        registry.start("call-1", "think").await.unwrap();
        assert_eq!(
            registry.start("call-1", "think").await,
            Err(LifecycleError::AlreadyStarted("call-1".into()))
        );

        assert!(registry.abort("call-1"));
        assert!(!registry.abort("call-1"));
        assert!(registry.is_empty());
    }
}
