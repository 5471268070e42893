//! The four-agent generation pipeline (C4 *Agent Runner*).
//!
//! Runs Planner → Element Identifier → Assembler → Validator sequentially, handing each task's
//! output to the next and collecting token metrics at run, agent, and task granularity. The
//! pipeline never retries the validator and bounds every other agent's iterations to
//! [`Config::max_agent_iterations`].

mod url_extraction;

pub use url_extraction::extract_url;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::context_optimizer::{AgentRole, ContextOptimizer};
use crate::errors::PipelineError;

/// Which of the four sequential agents is about to run, reported to [`AgentRunner::run_with_progress`]'s
/// callback. Distinct from [`AgentRole`] in name only — kept separate because the orchestrator's
/// fixed stage-progress map (§4.1) names stages by gerund ("planning", "identifying", ...) rather
/// than by agent role, and the two vocabularies should stay free to diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    Planning,
    Identifying,
    Generating,
    Validating,
}

/// A candidate locator returned by the external browser-probing collaborator (§6, out of scope
/// to implement, in scope to contract).
#[derive(Debug, Clone, Serialize)]
pub struct Locator {
    /// e.g. `"css"`, `"xpath"`, `"role"`, `"text"`.
    pub strategy: String,
    pub value: String,
    pub description: String,
}

/// The interface the Element Identifier agent uses to obtain up-front-validated locators.
///
/// Modeled as an explicit small interface rather than dynamic attribute dispatch on a tool
/// object (§9 *Dynamic attribute dispatch on tool objects*).
#[async_trait]
pub trait ElementProbe: Send + Sync {
    async fn probe(&self, url: &str, plan: &str) -> Result<Vec<Locator>, PipelineError>;
}

/// A probe that always returns no locators; used when no browser-probing collaborator is wired
/// up (e.g. in environments exercising generation only).
pub struct NoopProbe;

#[async_trait]
impl ElementProbe for NoopProbe {
    async fn probe(&self, _url: &str, _plan: &str) -> Result<Vec<Locator>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Token usage and raw output collected per agent invocation.
#[derive(Debug, Clone)]
pub struct AgentTaskResult {
    pub role: AgentRole,
    pub raw_output: String,
    pub usage: TokenUsage,
}

/// Run-level token accounting, broken down per agent and per task.
///
/// In this fixed four-stage pipeline each agent runs exactly one task, so `per_agent` and
/// `per_task` carry the same keys; the distinction is kept separate so a future agent that fans
/// out into multiple tasks per run can populate `per_task` independently of `per_agent`.
#[derive(Debug, Clone, Default)]
pub struct RunTokenMetrics {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub successful_requests: u64,
    pub per_agent: HashMap<String, TokenUsage>,
    pub per_task: HashMap<String, TokenUsage>,
}

impl RunTokenMetrics {
    fn record(&mut self, role: AgentRole, usage: &TokenUsage) {
        self.total_tokens += usage.total_tokens as u64;
        self.prompt_tokens += usage.input_tokens as u64;
        self.completion_tokens += usage.output_tokens as u64;
        self.successful_requests += 1;
        self.per_agent.insert(role.key().to_string(), usage.clone());
        self.per_task.insert(role.key().to_string(), usage.clone());
    }
}

/// Output of a full pipeline run: raw artifacts for downstream post-processing ([`crate::script_processor`])
/// plus the collected metrics.
#[derive(Debug, Clone)]
pub struct AgentRunOutput {
    pub plan: String,
    pub locators: Vec<Locator>,
    pub draft_script: String,
    pub validator_raw_output: String,
    pub metrics: RunTokenMetrics,
}

/// Drives the four agents against a shared [`ClientWrapper`] and [`ContextOptimizer`].
pub struct AgentRunner {
    client: Arc<dyn ClientWrapper>,
    context_optimizer: Arc<ContextOptimizer>,
    probe: Arc<dyn ElementProbe>,
    max_iterations: u8,
}

impl AgentRunner {
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        context_optimizer: Arc<ContextOptimizer>,
        probe: Arc<dyn ElementProbe>,
        max_iterations: u8,
    ) -> Self {
        AgentRunner {
            client,
            context_optimizer,
            probe,
            max_iterations: max_iterations.clamp(1, 5),
        }
    }

    /// Run all four agents in order for `query`, returning the raw artifacts plus collected
    /// metrics. Bails out with a [`PipelineError::Generation`] as soon as a delegating agent
    /// exhausts its retries.
    pub async fn run(&self, query: &str) -> Result<AgentRunOutput, PipelineError> {
        self.run_with_progress(query, |_| {}).await
    }

    /// As [`Self::run`], additionally invoking `on_stage` just before each agent starts. The
    /// orchestrator uses this to drive its fixed stage-progress map (§4.1) without this module
    /// needing to know anything about events, percentages, or streaming.
    pub async fn run_with_progress<F>(
        &self,
        query: &str,
        mut on_stage: F,
    ) -> Result<AgentRunOutput, PipelineError>
    where
        F: FnMut(AgentStage),
    {
        let mut metrics = RunTokenMetrics::default();

        on_stage(AgentStage::Planning);
        let plan = self.run_planner(query, &mut metrics).await?;

        on_stage(AgentStage::Identifying);
        let (locators, identifier_output) = self.run_identifier(query, &plan, &mut metrics).await?;

        on_stage(AgentStage::Generating);
        let draft_script = self
            .run_assembler(query, &plan, &locators, &identifier_output, &mut metrics)
            .await?;

        on_stage(AgentStage::Validating);
        let validator_raw_output = self.run_validator(query, &draft_script, &mut metrics).await?;

        Ok(AgentRunOutput {
            plan,
            locators,
            draft_script,
            validator_raw_output,
            metrics,
        })
    }

    async fn run_planner(
        &self,
        query: &str,
        metrics: &mut RunTokenMetrics,
    ) -> Result<String, PipelineError> {
        let context = self.context_optimizer.build_context(query, AgentRole::Planner);
        let user = format!(
            "Break the following test request into an ordered list of atomic browser actions:\n\n{query}"
        );
        let result = self
            .call_with_retries(AgentRole::Planner, &context, &user, None)
            .await?;
        metrics.record(AgentRole::Planner, &result.usage);
        Ok(result.raw_output)
    }

    async fn run_identifier(
        &self,
        query: &str,
        plan: &str,
        metrics: &mut RunTokenMetrics,
    ) -> Result<(Vec<Locator>, String), PipelineError> {
        let context = self.context_optimizer.build_context(query, AgentRole::Identifier);
        let url = extract_url(query);
        let user = format!("Plan:\n{plan}\n\nTarget site: {url}\n\nDescribe, in one short sentence per step, what elements you need located on the page.");
        let result = self
            .call_with_retries(AgentRole::Identifier, &context, &user, None)
            .await?;
        metrics.record(AgentRole::Identifier, &result.usage);

        let locators = self.probe.probe(&url, plan).await.unwrap_or_else(|e| {
            log::warn!("agent_runner::run_identifier: element probe failed, proceeding with no locators: {e}");
            Vec::new()
        });

        Ok((locators, result.raw_output))
    }

    async fn run_assembler(
        &self,
        query: &str,
        plan: &str,
        locators: &[Locator],
        identifier_notes: &str,
        metrics: &mut RunTokenMetrics,
    ) -> Result<String, PipelineError> {
        let context = self.context_optimizer.build_context(query, AgentRole::Assembler);
        let locator_lines: Vec<String> = locators
            .iter()
            .map(|l| format!("- {} -> {}:{}", l.description, l.strategy, l.value))
            .collect();
        let user = format!(
            "Plan:\n{plan}\n\nIdentifier notes:\n{identifier_notes}\n\nAvailable locators:\n{}\n\nAssemble the complete Robot Framework script.",
            if locator_lines.is_empty() {
                "(none provided — use the search tool if you need a keyword)".to_string()
            } else {
                locator_lines.join("\n")
            }
        );
        let result = self
            .call_with_retries(AgentRole::Assembler, &context, &user, None)
            .await?;
        metrics.record(AgentRole::Assembler, &result.usage);
        Ok(result.raw_output)
    }

    async fn run_validator(
        &self,
        query: &str,
        draft_script: &str,
        metrics: &mut RunTokenMetrics,
    ) -> Result<String, PipelineError> {
        let context = self.context_optimizer.build_context(query, AgentRole::Validator);
        let user = format!(
            "Validate the following script. Reply with a JSON object {{\"valid\": bool, \"reason\": string}}.\n\n{draft_script}"
        );
        // The validator never retries (§4.3).
        let result = self.call_once(AgentRole::Validator, &context, &user, None).await?;
        metrics.record(AgentRole::Validator, &result.usage);
        Ok(result.raw_output)
    }

    async fn call_with_retries(
        &self,
        role: AgentRole,
        context: &str,
        user_message: &str,
        tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
    ) -> Result<AgentTaskResult, PipelineError> {
        let mut last_error: Option<PipelineError> = None;
        for attempt in 1..=self.max_iterations {
            match self.call_once(role, context, user_message, tools.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    log::warn!(
                        "agent_runner: {} attempt {attempt}/{} failed: {e}",
                        role.key(),
                        self.max_iterations
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            PipelineError::Generation(format!("{} exhausted retries with no recorded error", role.key()))
        }))
    }

    async fn call_once(
        &self,
        role: AgentRole,
        context: &str,
        user_message: &str,
        tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
    ) -> Result<AgentTaskResult, PipelineError> {
        let messages = [
            Message {
                role: Role::System,
                content: std::sync::Arc::from(context),
            },
            Message {
                role: Role::User,
                content: std::sync::Arc::from(user_message),
            },
        ];

        let response = self
            .client
            .send_message(&messages, tools)
            .await
            .map_err(|e| PipelineError::Generation(format!("{} call failed: {e}", role.key())))?;

        let usage = self.client.get_last_usage().await.unwrap_or(TokenUsage {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        });

        Ok(AgentTaskResult {
            role,
            raw_output: response.content.to_string(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::keyword_store::KeywordStore;
    use crate::pattern_journal::PatternJournal;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedClient {
        replies: AsyncMutex<Vec<&'static str>>,
        usage: AsyncMutex<Option<TokenUsage>>,
        fail_first_n: usize,
        calls: AsyncMutex<usize>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<&'static str>) -> Self {
            ScriptedClient {
                replies: AsyncMutex::new(replies),
                usage: AsyncMutex::new(None),
                fail_first_n: 0,
                calls: AsyncMutex::new(0),
            }
        }

        fn failing(replies: Vec<&'static str>, fail_first_n: usize) -> Self {
            ScriptedClient {
                replies: AsyncMutex::new(replies),
                usage: AsyncMutex::new(None),
                fail_first_n,
                calls: AsyncMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
        ) -> Result<Message, Box<dyn std::error::Error>> {
            let mut calls = self.calls.lock().await;
            *calls += 1;
            if *calls <= self.fail_first_n {
                return Err("simulated transient failure".into());
            }
            let mut replies = self.replies.lock().await;
            let reply = if replies.is_empty() {
                "".to_string()
            } else {
                replies.remove(0).to_string()
            };
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            });
            Ok(Message {
                role: Role::Assistant,
                content: std::sync::Arc::from(reply.as_str()),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn usage_slot(&self) -> Option<&tokio::sync::Mutex<Option<TokenUsage>>> {
            Some(&self.usage)
        }
    }

    fn context_optimizer() -> (Arc<ContextOptimizer>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kw = Arc::new(KeywordStore::new(dir.path().join("kw.json")));
        let pj = Arc::new(PatternJournal::new(dir.path().join("patterns.jsonl")));
        (Arc::new(ContextOptimizer::new(&Config::default(), kw, pj)), dir)
    }

    #[tokio::test]
    async fn runs_all_four_agents_and_collects_metrics() {
        let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::new(vec![
            "1. open browser\n2. search",
            "looking for a search box",
            "*** Settings ***\nLibrary    Browser\n*** Test Cases ***\nSearch\n    Click    css:.x\n",
            "{\"valid\": true, \"reason\": \"ok\"}",
        ]));
        let (optimizer, _dir) = context_optimizer();
        let runner = AgentRunner::new(client, optimizer, Arc::new(NoopProbe), 3);

        let output = runner
            .run("Search for 'robot framework' on https://www.google.com")
            .await
            .unwrap();

        assert!(output.draft_script.contains("*** Settings ***"));
        assert!(output.validator_raw_output.contains("valid"));
        assert_eq!(output.metrics.successful_requests, 4);
        assert_eq!(output.metrics.per_agent.len(), 4);
    }

    #[tokio::test]
    async fn planner_retries_up_to_the_configured_bound() {
        let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::failing(
            vec!["plan after retry", "notes", "script", "{\"valid\": true, \"reason\": \"ok\"}"],
            2,
        ));
        let (optimizer, _dir) = context_optimizer();
        let runner = AgentRunner::new(client, optimizer, Arc::new(NoopProbe), 3);

        let output = runner.run("search for cats").await.unwrap();
        assert_eq!(output.plan, "plan after retry");
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_a_generation_error() {
        let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::failing(vec!["never reached"], 99));
        let (optimizer, _dir) = context_optimizer();
        let runner = AgentRunner::new(client, optimizer, Arc::new(NoopProbe), 2);

        let err = runner.run("search for cats").await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[tokio::test]
    async fn run_with_progress_reports_stages_in_order() {
        let client: Arc<dyn ClientWrapper> = Arc::new(ScriptedClient::new(vec![
            "plan",
            "notes",
            "script",
            "{\"valid\": true, \"reason\": \"ok\"}",
        ]));
        let (optimizer, _dir) = context_optimizer();
        let runner = AgentRunner::new(client, optimizer, Arc::new(NoopProbe), 3);

        let stages = std::sync::Mutex::new(Vec::new());
        runner
            .run_with_progress("search for cats", |stage| stages.lock().unwrap().push(stage))
            .await
            .unwrap();

        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                AgentStage::Planning,
                AgentStage::Identifying,
                AgentStage::Generating,
                AgentStage::Validating,
            ]
        );
    }
}
