//! Tool runner for Charla
//!
//! Executes a handler under its resolved policy: per-attempt timeout race,
//! bounded retries with exponential backoff, and idempotency caching keyed
//! by a deterministic fingerprint of the unit of work. A cached key never
//! re-executes its side effect, and every dispatch resolves to a structured
//! [`ToolOutcome`] — handler faults never escape the runner.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;

use super::{Tool, ToolContext, ToolOutcome, ToolPolicy};

/// Fully-resolved execution policy after merging tool overrides with defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub retries: u32,
    /// Base delay between attempts
    pub retry_delay: Duration,
}

/// Bounded idempotency cache: key → outcome, oldest insertion evicted first.
struct OutcomeCache {
    entries: HashMap<String, ToolOutcome>,
    order: VecDeque<String>,
    capacity: usize,
}

impl OutcomeCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<ToolOutcome> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, outcome: ToolOutcome) {
        if self.entries.insert(key.clone(), outcome).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Executes tools with timeout, retry, and at-most-once semantics.
///
/// The cache is in-process and capacity-bounded; a multi-replica deployment
/// needs the fingerprints moved into the shared session store for the
/// at-most-once contract to hold cluster-wide.
pub struct ToolRunner {
    defaults: ResolvedPolicy,
    cache: Mutex<OutcomeCache>,
}

impl ToolRunner {
    /// Create a runner from configuration.
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            defaults: ResolvedPolicy {
                timeout: Duration::from_secs(config.timeout_secs),
                retries: config.retries,
                retry_delay: Duration::from_millis(config.retry_delay_ms),
            },
            cache: Mutex::new(OutcomeCache::new(config.cache_capacity.max(1))),
        }
    }

    /// Merge a tool's policy overrides with the runner defaults.
    pub fn resolve_policy(&self, policy: ToolPolicy) -> ResolvedPolicy {
        ResolvedPolicy {
            timeout: policy.timeout.unwrap_or(self.defaults.timeout),
            retries: policy.retries.unwrap_or(self.defaults.retries),
            retry_delay: policy.retry_delay.unwrap_or(self.defaults.retry_delay),
        }
    }

    /// Number of cached outcomes (for tests and metrics).
    pub fn cached_outcomes(&self) -> usize {
        self.cache.lock().expect("cache lock").len()
    }

    /// Execute a tool under its resolved policy.
    ///
    /// 1. Cached fingerprint → cached outcome, no re-execution.
    /// 2. Validation failure → structured error outcome, no retry, cached.
    /// 3. Otherwise up to `retries + 1` attempts, each raced against the
    ///    timeout, with `delay * 2^attempt` between attempts.
    /// 4. The final outcome (success or exhausted failure) is cached.
    pub async fn run(&self, tool: &dyn Tool, raw_input: Value, ctx: &ToolContext) -> ToolOutcome {
        let policy = self.resolve_policy(tool.policy());
        let key = idempotency_key(
            tool.name(),
            &ctx.identity,
            ctx.inbound_message_id.as_deref(),
            &raw_input,
        );

        if let Some(cached) = self.cache.lock().expect("cache lock").get(&key) {
            debug!(tool = %tool.name(), key = %key, "Idempotency cache hit");
            return cached;
        }

        if let Err(reason) = tool.validate(&raw_input) {
            warn!(tool = %tool.name(), reason = %reason, "Tool input rejected");
            let outcome = ToolOutcome::failure(format!("invalid input: {}", reason));
            self.cache
                .lock()
                .expect("cache lock")
                .insert(key, outcome.clone());
            return outcome;
        }

        let mut last_error = String::new();
        let mut outcome = None;

        for attempt in 0..=policy.retries {
            if attempt > 0 {
                // Exponential backoff: delay * 2^(attempt-1) after the
                // attempt that just failed.
                let backoff = policy.retry_delay.saturating_mul(1 << (attempt - 1).min(16));
                debug!(
                    tool = %tool.name(),
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(backoff).await;
            }

            let started = std::time::Instant::now();
            match tokio::time::timeout(policy.timeout, tool.execute(raw_input.clone(), ctx)).await {
                Ok(Ok(result)) => {
                    info!(
                        tool = %tool.name(),
                        attempt = attempt + 1,
                        duration_ms = started.elapsed().as_millis() as u64,
                        ok = result.ok,
                        "Tool executed"
                    );
                    outcome = Some(result);
                    break;
                }
                Ok(Err(e)) => {
                    error!(
                        tool = %tool.name(),
                        attempt = attempt + 1,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Tool execution failed"
                    );
                    last_error = e.to_string();
                }
                Err(_) => {
                    error!(
                        tool = %tool.name(),
                        attempt = attempt + 1,
                        timeout_ms = policy.timeout.as_millis() as u64,
                        "Tool execution timed out"
                    );
                    last_error = format!("timed out after {:?}", policy.timeout);
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            ToolOutcome::failure(format!(
                "failed after {} attempts: {}",
                policy.retries + 1,
                last_error
            ))
        });

        self.cache
            .lock()
            .expect("cache lock")
            .insert(key, outcome.clone());
        outcome
    }
}

/// Deterministic fingerprint of one unit of tool work.
///
/// SHA-256 over tool name, identity, inbound message id, and the
/// canonicalized input, so equal work hashes equally regardless of JSON key
/// order.
pub fn idempotency_key(
    tool_name: &str,
    identity: &str,
    inbound_message_id: Option<&str>,
    input: &Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(identity.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(inbound_message_id.unwrap_or("").as_bytes());
    hasher.update(b"\x1f");
    hasher.update(canonical_json(input).as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value with object keys sorted recursively.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CharlaError, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn runner() -> ToolRunner {
        ToolRunner::new(&RunnerConfig {
            timeout_secs: 2,
            retries: 2,
            retry_delay_ms: 10,
            cache_capacity: 100,
        })
    }

    /// Counts executions; succeeds with its count.
    struct CountingTool {
        calls: AtomicU32,
    }

    impl CountingTool {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "Counts invocations"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ToolOutcome::success(json!({"calls": n})))
        }
    }

    /// Always returns Err — a fault, retried per policy.
    struct ThrowingTool {
        attempts: AtomicU32,
        policy: ToolPolicy,
    }

    impl ThrowingTool {
        fn new(policy: ToolPolicy) -> Self {
            Self {
                attempts: AtomicU32::new(0),
                policy,
            }
        }
    }

    #[async_trait]
    impl Tool for ThrowingTool {
        fn name(&self) -> &str {
            "throwing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        fn policy(&self) -> ToolPolicy {
            self.policy
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(CharlaError::Tool("backend unreachable".into()))
        }
    }

    /// Sleeps past any reasonable timeout.
    struct HangingTool;

    #[async_trait]
    impl Tool for HangingTool {
        fn name(&self) -> &str {
            "hanging"
        }
        fn description(&self) -> &str {
            "Never returns in time"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        fn policy(&self) -> ToolPolicy {
            ToolPolicy::new()
                .with_timeout(Duration::from_millis(30))
                .with_retries(1)
                .with_retry_delay(Duration::from_millis(5))
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutcome::success(json!("never")))
        }
    }

    /// Rejects inputs missing the "name" field.
    struct StrictTool {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "Requires a name"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]})
        }
        fn validate(&self, args: &Value) -> std::result::Result<(), String> {
            match args.get("name").and_then(|v| v.as_str()) {
                Some(s) if !s.trim().is_empty() => Ok(()),
                _ => Err("missing required field 'name'".to_string()),
            }
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome::success(json!("ok")))
        }
    }

    fn ctx(message_id: &str) -> ToolContext {
        ToolContext::new()
            .with_request_id("req-1")
            .with_identity("+100")
            .with_inbound_message_id(message_id)
    }

    #[tokio::test]
    async fn test_success_outcome() {
        let runner = runner();
        let tool = CountingTool::new();
        let outcome = runner.run(&tool, json!({}), &ctx("msg-1")).await;
        assert!(outcome.ok);
        assert_eq!(outcome.data.unwrap()["calls"], 1);
    }

    #[tokio::test]
    async fn test_idempotent_repeat_executes_once() {
        let runner = runner();
        let tool = CountingTool::new();
        let first = runner.run(&tool, json!({"a": 1}), &ctx("msg-1")).await;
        let second = runner.run(&tool, json!({"a": 1}), &ctx("msg-1")).await;
        assert_eq!(first, second);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_message_id_executes_again() {
        let runner = runner();
        let tool = CountingTool::new();
        runner.run(&tool, json!({"a": 1}), &ctx("msg-1")).await;
        runner.run(&tool, json!({"a": 1}), &ctx("msg-2")).await;
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_key_order_insensitive_input() {
        let runner = runner();
        let tool = CountingTool::new();
        runner
            .run(&tool, json!({"a": 1, "b": 2}), &ctx("msg-1"))
            .await;
        runner
            .run(&tool, json!({"b": 2, "a": 1}), &ctx("msg-1"))
            .await;
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throwing_tool_attempted_retries_plus_one() {
        let runner = runner();
        let tool = ThrowingTool::new(
            ToolPolicy::new()
                .with_retries(2)
                .with_retry_delay(Duration::from_millis(5))
                .with_timeout(Duration::from_millis(100)),
        );
        let outcome = runner.run(&tool, json!({}), &ctx("msg-1")).await;
        assert!(!outcome.ok);
        assert_eq!(tool.attempts.load(Ordering::SeqCst), 3);
        let error = outcome.error.unwrap();
        assert!(error.contains("failed after 3 attempts"));
        assert!(error.contains("backend unreachable"));
    }

    #[tokio::test]
    async fn test_exhausted_failure_is_cached() {
        let runner = runner();
        let tool = ThrowingTool::new(
            ToolPolicy::new()
                .with_retries(1)
                .with_retry_delay(Duration::from_millis(1)),
        );
        runner.run(&tool, json!({}), &ctx("msg-1")).await;
        assert_eq!(tool.attempts.load(Ordering::SeqCst), 2);
        // Second identical dispatch comes from the cache
        runner.run(&tool, json!({}), &ctx("msg-1")).await;
        assert_eq!(tool.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backoff_is_non_decreasing() {
        let runner = runner();
        let tool = ThrowingTool::new(
            ToolPolicy::new()
                .with_retries(2)
                .with_retry_delay(Duration::from_millis(40))
                .with_timeout(Duration::from_secs(1)),
        );
        let started = Instant::now();
        runner.run(&tool, json!({}), &ctx("msg-1")).await;
        // Delays: 40ms then 80ms — at least 120ms total.
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_timeout_races_each_attempt() {
        let runner = runner();
        let started = Instant::now();
        let outcome = runner.run(&HangingTool, json!({}), &ctx("msg-1")).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("timed out"));
        // Two attempts at 30ms plus one 5ms backoff — nowhere near 60s.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_validation_failure_no_retry_and_cached() {
        let runner = runner();
        let tool = StrictTool {
            calls: AtomicU32::new(0),
        };
        let outcome = runner.run(&tool, json!({}), &ctx("msg-1")).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("invalid input"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);

        // Cached: repeat doesn't re-validate or execute
        let repeat = runner.run(&tool, json!({}), &ctx("msg-1")).await;
        assert!(!repeat.ok);
        assert_eq!(runner.cached_outcomes(), 1);
    }

    #[tokio::test]
    async fn test_cache_capacity_evicts_oldest() {
        let small = ToolRunner::new(&RunnerConfig {
            timeout_secs: 1,
            retries: 0,
            retry_delay_ms: 1,
            cache_capacity: 2,
        });
        let tool = CountingTool::new();
        small.run(&tool, json!({}), &ctx("msg-1")).await;
        small.run(&tool, json!({}), &ctx("msg-2")).await;
        small.run(&tool, json!({}), &ctx("msg-3")).await;
        assert_eq!(small.cached_outcomes(), 2);

        // msg-1 was evicted, so it executes again
        small.run(&tool, json!({}), &ctx("msg-1")).await;
        assert_eq!(tool.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_resolve_policy_merging() {
        let runner = runner();
        let resolved = runner.resolve_policy(ToolPolicy::default());
        assert_eq!(resolved.timeout, Duration::from_secs(2));
        assert_eq!(resolved.retries, 2);
        assert_eq!(resolved.retry_delay, Duration::from_millis(10));

        let resolved =
            runner.resolve_policy(ToolPolicy::new().with_timeout(Duration::from_millis(100)));
        assert_eq!(resolved.timeout, Duration::from_millis(100));
        assert_eq!(resolved.retries, 2);
    }

    #[test]
    fn test_idempotency_key_deterministic() {
        let a = idempotency_key("t", "+100", Some("msg-1"), &json!({"x": 1, "y": [1, 2]}));
        let b = idempotency_key("t", "+100", Some("msg-1"), &json!({"y": [1, 2], "x": 1}));
        assert_eq!(a, b);

        let c = idempotency_key("t", "+100", Some("msg-2"), &json!({"x": 1, "y": [1, 2]}));
        assert_ne!(a, c);
        let d = idempotency_key("t2", "+100", Some("msg-1"), &json!({"x": 1, "y": [1, 2]}));
        assert_ne!(a, d);
        let e = idempotency_key("t", "+200", Some("msg-1"), &json!({"x": 1, "y": [1, 2]}));
        assert_ne!(a, e);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": {"d": 2, "c": 1}, "a": [3, {"z": 1, "y": 2}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[3,{"y":2,"z":1}],"b":{"c":1,"d":2}}"#
        );
    }

    #[test]
    fn test_canonical_json_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!("s")), "\"s\"");
        assert_eq!(canonical_json(&json!(1.5)), "1.5");
    }
}
