//! Agent loop implementation
//!
//! This module provides the core engine that processes inbound messages,
//! calls the completion provider, and executes tool calls until a final
//! natural-language reply is produced.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::Result;
use crate::providers::{CompletionOptions, CompletionProvider, ModelToolCall};
use crate::session::{ContentBlock, SessionStore, StoredMessage, ToolResultBlock};
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry, ToolRunner};

use super::prompt::PromptBuilder;
use super::transcode::transcode_history;

/// Reply for a duplicate inbound message id.
pub const REPLY_DUPLICATE: &str = "I already processed that message.";
/// Reply after a termination keyword closes the conversation.
pub const REPLY_FAREWELL: &str =
    "Thanks for chatting with us! Your conversation has been closed. Write again any time.";
/// Reply when an internal fault is caught at the loop boundary.
pub const REPLY_APOLOGY: &str =
    "Sorry, something went wrong on my side. Please try again in a moment.";
/// Reply when the model produced no text at all.
pub const REPLY_EMPTY: &str =
    "Sorry, I couldn't come up with a reply just now. Could you rephrase that?";
/// Reply when the round budget is exhausted without a final answer.
pub const REPLY_CLARIFY: &str =
    "I wasn't able to finish that request. Could you simplify it or ask one thing at a time?";

/// Keywords that terminate a conversation (case-insensitive substring match).
const TERMINATION_KEYWORDS: &[&str] = &["fin", "adios", "adiós", "bye", "goodbye", "chau"];

/// One inbound unit of work delivered by the transport collaborator.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Conversation identity (e.g. a phone number)
    pub identity: String,
    /// Message text
    pub text: String,
    /// Transport-assigned message id, when available
    pub message_id: Option<String>,
}

impl InboundMessage {
    /// Create an inbound message without a transport id.
    pub fn new(identity: &str, text: &str) -> Self {
        Self {
            identity: identity.to_string(),
            text: text.to_string(),
            message_id: None,
        }
    }

    /// Attach the transport-assigned message id.
    pub fn with_message_id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }
}

/// The conversational tool-orchestration engine.
///
/// `Engine` composes the session store, the completion provider, the tool
/// registry, and the tool runner into the per-message state machine:
/// duplicate-delivery check, termination check, then model rounds that
/// alternate completion calls with tool execution until a text-only reply
/// or the round budget is reached.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use charla::agent::{Engine, InboundMessage};
///
/// let engine = Engine::new(config, store, provider, registry);
/// let reply = engine
///     .handle_message(&InboundMessage::new("+100", "hola"))
///     .await;
/// ```
pub struct Engine {
    config: Config,
    store: SessionStore,
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<ToolRegistry>,
    runner: ToolRunner,
    prompt: PromptBuilder,
    /// Per-identity locks serializing concurrent messages for one session.
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
    /// Create a new engine from its injected collaborators.
    pub fn new(
        config: Config,
        store: SessionStore,
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let runner = ToolRunner::new(&config.runner);
        let prompt = PromptBuilder::from_config(&config.agent);
        Self {
            config,
            store,
            provider,
            registry,
            runner,
            prompt,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the prompt builder (custom policy prompts).
    pub fn with_prompt(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    /// Get a reference to the session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process one inbound message to a user-facing reply.
    ///
    /// Never fails: any fault that escapes a round is caught here and
    /// converted to the apology reply, so no internal error ever reaches
    /// the transport layer.
    pub async fn handle_message(&self, inbound: &InboundMessage) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "request",
            request_id = %request_id,
            identity = %inbound.identity,
        );

        async {
            // Serialize messages for the same identity; different identities
            // proceed concurrently.
            let session_lock = {
                let mut locks = self.session_locks.lock().await;
                locks
                    .entry(inbound.identity.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            };
            let _guard = session_lock.lock().await;

            info!(text_len = inbound.text.len(), "Processing message");
            let started = std::time::Instant::now();
            match self.process(inbound, &request_id).await {
                Ok(reply) => {
                    info!(
                        latency_ms = started.elapsed().as_millis() as u64,
                        reply_len = reply.len(),
                        "Request completed"
                    );
                    reply
                }
                Err(e) => {
                    error!(
                        latency_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Request failed"
                    );
                    REPLY_APOLOGY.to_string()
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, inbound: &InboundMessage, request_id: &str) -> Result<String> {
        // Duplicate delivery short-circuits before any mutation.
        if let Some(message_id) = &inbound.message_id {
            if self.store.is_seen(message_id).await {
                info!(message_id = %message_id, "Duplicate delivery short-circuited");
                return Ok(REPLY_DUPLICATE.to_string());
            }
            self.store.mark_seen(message_id).await?;
        }

        // Termination keywords close the session without a model call.
        if is_termination(&inbound.text) {
            info!("Termination keyword received, ending session");
            self.store.end(&inbound.identity).await?;
            return Ok(REPLY_FAREWELL.to_string());
        }

        let mut session = self
            .store
            .append(&inbound.identity, StoredMessage::user(&inbound.text))
            .await?;

        let system = self.prompt.build();
        let tools = self.registry.definitions();
        let options = CompletionOptions::new()
            .with_model(&self.config.agent.model)
            .with_max_tokens(self.config.agent.max_tokens)
            .with_temperature(self.config.agent.temperature);

        let max_rounds = self.config.agent.max_rounds;
        for round in 0..max_rounds {
            let wire = transcode_history(&session.messages);
            let response = self
                .provider
                .complete(&system, wire, tools.clone(), options.clone())
                .await?;

            if !response.has_tool_calls() {
                let text = response.content.trim().to_string();
                if text.is_empty() {
                    warn!(round = round, "Model returned empty reply");
                    return Ok(REPLY_EMPTY.to_string());
                }
                self.store
                    .append(&inbound.identity, StoredMessage::assistant_text(&text))
                    .await?;
                return Ok(text);
            }

            // Keep only distinct calls belonging to this response.
            let calls = dedupe_calls(&response.tool_calls);
            info!(round = round, calls = calls.len(), "Executing tool calls");

            // Append the assistant message before executing anything, so the
            // history stays consistent even if execution fails mid-way.
            let mut blocks = Vec::with_capacity(calls.len() + 1);
            let text = response.content.trim();
            if !text.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            }
            for call in &calls {
                blocks.push(ContentBlock::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }
            session = self
                .store
                .append(&inbound.identity, StoredMessage::assistant(blocks))
                .await?;

            let mut ctx = ToolContext::new()
                .with_request_id(request_id)
                .with_identity(&inbound.identity);
            if let Some(message_id) = &inbound.message_id {
                ctx = ctx.with_inbound_message_id(message_id);
            }

            // Exactly one result block per call id: an unanswered call would
            // invalidate the whole next request.
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let outcome = match self.registry.get(&call.name) {
                    Some(tool) => self.runner.run(tool, call.input.clone(), &ctx).await,
                    None => {
                        warn!(tool = %call.name, "Model requested unknown tool");
                        ToolOutcome::failure(format!("unknown tool: {}", call.name))
                    }
                };
                results.push(result_block(&call.id, &outcome));
            }

            session = self
                .store
                .append(&inbound.identity, StoredMessage::tool_results(results))
                .await?;
        }

        info!(rounds = max_rounds, "Round budget exhausted without final reply");
        Ok(REPLY_CLARIFY.to_string())
    }
}

/// Check whether a user text requests termination.
fn is_termination(text: &str) -> bool {
    let lower = text.to_lowercase();
    TERMINATION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Drop duplicate call ids, keeping first occurrences in order.
fn dedupe_calls(calls: &[ModelToolCall]) -> Vec<ModelToolCall> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(calls.len());
    for call in calls {
        if seen.insert(call.id.clone()) {
            out.push(call.clone());
        } else {
            warn!(call_id = %call.id, "Dropping duplicate tool call id");
        }
    }
    out
}

/// Serialize an outcome into its result block, substituting a structured
/// empty result if serialization itself fails.
fn result_block(call_id: &str, outcome: &ToolOutcome) -> ToolResultBlock {
    match serde_json::to_string(outcome) {
        Ok(content) => ToolResultBlock {
            call_id: call_id.to_string(),
            content,
            is_error: !outcome.ok,
        },
        Err(e) => {
            warn!(call_id = %call_id, error = %e, "Tool outcome serialization failed");
            ToolResultBlock::error(call_id, r#"{"ok":false,"error":"result unavailable"}"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::error::CharlaError;
    use crate::providers::{ModelResponse, ToolDefinition, WireMessage};
    use crate::session::MemoryBackend;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Provider that replays a scripted sequence of responses.
    struct ScriptedProvider {
        script: StdMutex<VecDeque<Result<ModelResponse>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ModelResponse>>) -> Self {
            Self {
                script: StdMutex::new(script.into_iter().collect()),
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn default_model(&self) -> &str {
            "test-model"
        }
        async fn complete(
            &self,
            _system: &str,
            _messages: Vec<WireMessage>,
            _tools: Vec<ToolDefinition>,
            _options: CompletionOptions,
        ) -> Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::text("default reply")))
        }
    }

    fn engine_with(provider: ScriptedProvider) -> (Engine, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let store = SessionStore::new(Arc::new(MemoryBackend::new()), SessionConfig::default());
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let engine = Engine::new(
            Config::default(),
            store,
            provider.clone(),
            Arc::new(registry),
        );
        (engine, provider)
    }

    #[tokio::test]
    async fn test_text_only_reply() {
        let (engine, provider) =
            engine_with(ScriptedProvider::new(vec![Ok(ModelResponse::text("¡Hola!"))]));
        let reply = engine
            .handle_message(&InboundMessage::new("+100", "hola"))
            .await;
        assert_eq!(reply, "¡Hola!");
        assert_eq!(provider.call_count(), 1);

        let session = engine.store().load("+100").await.unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn test_termination_skips_model() {
        let (engine, provider) = engine_with(ScriptedProvider::new(vec![]));
        engine
            .store()
            .append("+100", StoredMessage::user("previous"))
            .await
            .unwrap();

        let reply = engine
            .handle_message(&InboundMessage::new("+100", "FIN"))
            .await;
        assert_eq!(reply, REPLY_FAREWELL);
        assert_eq!(provider.call_count(), 0);
        assert!(engine.store().load("+100").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_short_circuits() {
        let (engine, provider) =
            engine_with(ScriptedProvider::new(vec![Ok(ModelResponse::text("first"))]));
        let msg = InboundMessage::new("+100", "hola").with_message_id("msg-7");

        let first = engine.handle_message(&msg).await;
        assert_eq!(first, "first");
        let count = engine.store().load("+100").await.unwrap().message_count();

        let second = engine.handle_message(&msg).await;
        assert_eq!(second, REPLY_DUPLICATE);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            engine.store().load("+100").await.unwrap().message_count(),
            count
        );
    }

    #[tokio::test]
    async fn test_tool_round_then_reply() {
        let (engine, provider) = engine_with(ScriptedProvider::new(vec![
            Ok(ModelResponse::with_tools(
                "Echoing...",
                vec![ModelToolCall::new("call_1", "echo", json!({"message": "hi"}))],
            )),
            Ok(ModelResponse::text("done")),
        ]));

        let reply = engine
            .handle_message(&InboundMessage::new("+100", "echo hi"))
            .await;
        assert_eq!(reply, "done");
        assert_eq!(provider.call_count(), 2);

        let session = engine.store().load("+100").await.unwrap();
        // user, assistant(tool call), results, assistant(text)
        assert_eq!(session.message_count(), 4);
        assert_eq!(session.messages[1].tool_call_ids(), vec!["call_1"]);
        assert!(session.messages[2].is_tool_results());
    }

    #[tokio::test]
    async fn test_result_bundle_covers_every_call() {
        let (engine, _) = engine_with(ScriptedProvider::new(vec![
            Ok(ModelResponse::with_tools(
                "",
                vec![
                    ModelToolCall::new("call_1", "echo", json!({"message": "a"})),
                    ModelToolCall::new("call_2", "missing_tool", json!({})),
                    ModelToolCall::new("call_3", "echo", json!({"message": "b"})),
                ],
            )),
            Ok(ModelResponse::text("done")),
        ]));

        engine
            .handle_message(&InboundMessage::new("+100", "go"))
            .await;
        let session = engine.store().load("+100").await.unwrap();
        let StoredMessage::ToolResults { blocks } = &session.messages[2] else {
            panic!("expected tool results at index 2");
        };
        assert_eq!(blocks.len(), 3);
        let ids: Vec<&str> = blocks.iter().map(|b| b.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3"]);
        // Unknown tool resolves to a structured error, not a fault
        assert!(blocks[1].is_error);
        assert!(blocks[1].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_duplicate_call_ids_collapsed() {
        let (engine, _) = engine_with(ScriptedProvider::new(vec![
            Ok(ModelResponse::with_tools(
                "",
                vec![
                    ModelToolCall::new("call_1", "echo", json!({"message": "a"})),
                    ModelToolCall::new("call_1", "echo", json!({"message": "b"})),
                ],
            )),
            Ok(ModelResponse::text("done")),
        ]));

        engine
            .handle_message(&InboundMessage::new("+100", "go"))
            .await;
        let session = engine.store().load("+100").await.unwrap();
        assert_eq!(session.messages[1].tool_call_ids(), vec!["call_1"]);
        let StoredMessage::ToolResults { blocks } = &session.messages[2] else {
            panic!("expected tool results");
        };
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_round_budget_fallback() {
        let tool_round = || {
            Ok(ModelResponse::with_tools(
                "",
                vec![ModelToolCall::new("call_1", "echo", json!({"message": "x"}))],
            ))
        };
        let (engine, provider) = engine_with(ScriptedProvider::new(vec![
            tool_round(),
            tool_round(),
            tool_round(),
            tool_round(),
        ]));

        let reply = engine
            .handle_message(&InboundMessage::new("+100", "loop forever"))
            .await;
        assert_eq!(reply, REPLY_CLARIFY);
        // max_rounds defaults to 3: exactly three model calls, no more
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_provider_fault_becomes_apology() {
        let (engine, _) = engine_with(ScriptedProvider::new(vec![Err(CharlaError::Provider(
            "connection refused".into(),
        ))]));
        let reply = engine
            .handle_message(&InboundMessage::new("+100", "hola"))
            .await;
        assert_eq!(reply, REPLY_APOLOGY);
    }

    #[tokio::test]
    async fn test_empty_model_reply_is_apology() {
        let (engine, _) = engine_with(ScriptedProvider::new(vec![Ok(ModelResponse::text("  "))]));
        let reply = engine
            .handle_message(&InboundMessage::new("+100", "hola"))
            .await;
        assert_eq!(reply, REPLY_EMPTY);
        // The user message is kept; no empty assistant message is stored
        let session = engine.store().load("+100").await.unwrap();
        assert_eq!(session.message_count(), 1);
    }

    #[test]
    fn test_is_termination() {
        assert!(is_termination("FIN"));
        assert!(is_termination("adios!"));
        assert!(is_termination("ok bye"));
        assert!(is_termination("Adiós amigos"));
        assert!(!is_termination("hola"));
        assert!(!is_termination("what's the plan?"));
    }

    #[test]
    fn test_dedupe_calls_keeps_order() {
        let calls = vec![
            ModelToolCall::new("a", "t", json!({})),
            ModelToolCall::new("b", "t", json!({})),
            ModelToolCall::new("a", "t", json!({"other": true})),
        ];
        let deduped = dedupe_calls(&calls);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "a");
        assert_eq!(deduped[1].id, "b");
    }

    #[test]
    fn test_result_block_serializes_outcome() {
        let block = result_block("call_1", &ToolOutcome::success(json!({"n": 1})));
        assert_eq!(block.call_id, "call_1");
        assert!(!block.is_error);
        let parsed: serde_json::Value = serde_json::from_str(&block.content).unwrap();
        assert_eq!(parsed["ok"], true);
        assert_eq!(parsed["data"]["n"], 1);

        let block = result_block("call_2", &ToolOutcome::failure("nope"));
        assert!(block.is_error);
    }

    /// Tool that records which identity it saw.
    struct IdentityProbeTool {
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Tool for IdentityProbeTool {
        fn name(&self) -> &str {
            "probe"
        }
        fn description(&self) -> &str {
            "Records the dispatch identity"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<ToolOutcome> {
            self.seen.lock().unwrap().push(ctx.identity.clone());
            assert!(!ctx.request_id.is_empty());
            Ok(ToolOutcome::success(json!("ok")))
        }
    }

    #[tokio::test]
    async fn test_tool_context_carries_identity() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ModelResponse::with_tools(
                "",
                vec![ModelToolCall::new("call_1", "probe", json!({}))],
            )),
            Ok(ModelResponse::text("done")),
        ]));
        let store = SessionStore::new(Arc::new(MemoryBackend::new()), SessionConfig::default());
        let probe = Arc::new(IdentityProbeTool {
            seen: StdMutex::new(Vec::new()),
        });
        struct Wrapper(Arc<IdentityProbeTool>);
        #[async_trait]
        impl Tool for Wrapper {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn description(&self) -> &str {
                self.0.description()
            }
            fn parameters(&self) -> serde_json::Value {
                self.0.parameters()
            }
            async fn execute(
                &self,
                args: serde_json::Value,
                ctx: &ToolContext,
            ) -> Result<ToolOutcome> {
                self.0.execute(args, ctx).await
            }
        }
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Wrapper(probe.clone())));
        let engine = Engine::new(Config::default(), store, provider, Arc::new(registry));

        engine
            .handle_message(&InboundMessage::new("+100", "go").with_message_id("msg-1"))
            .await;
        assert_eq!(*probe.seen.lock().unwrap(), vec!["+100".to_string()]);
    }
}
