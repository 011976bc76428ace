use crate::analytics::PerformanceReport;
use crate::error::{BloomError, Result};
use crate::models::{Agent, Bounty, PerformanceMetrics};
use futures::executor::block_on;
use rig::client::{completion::CompletionClient, ProviderClient};
use rig::completion::{Prompt, Usage};
use rig::providers::openai;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: &'static str,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u64>,
}

/// A text-completion endpoint. Errors are reported as plain messages and
/// labeled by the caller.
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, String>;
}

/// Completion backend over rig's OpenAI provider.
#[derive(Clone, Debug)]
pub struct RigBackend {
    config: LlmConfig,
}

impl RigBackend {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl CompletionBackend for RigBackend {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, String> {
        let config = &self.config;
        if config.provider.to_lowercase() != "openai" {
            return Err(format!("unsupported llm provider '{}'", config.provider));
        }

        let client = if config.api_key_env == "OPENAI_API_KEY" {
            openai::Client::from_env()
        } else {
            let api_key = std::env::var(&config.api_key_env)
                .map_err(|_| format!("missing env var {}", config.api_key_env))?;
            openai::Client::new(&api_key).map_err(|e| format!("openai client error: {e}"))?
        };

        let agent = client
            .agent(&config.model)
            .preamble(request.system)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build();

        let fut = agent
            .prompt(request.prompt.as_str())
            .extended_details()
            .into_future();
        let response = block_on(fut).map_err(|e| format!("llm prompt failed: {e}"))?;
        Ok(Completion {
            text: response.output,
            tokens_used: tokens_reported(&response.total_usage),
        })
    }
}

/// Total tokens from a provider usage report; zero means not reported.
fn tokens_reported(usage: &Usage) -> Option<u64> {
    // some providers only report the two halves
    let total = if usage.total_tokens > 0 {
        usage.total_tokens
    } else {
        usage.input_tokens + usage.output_tokens
    };
    (total > 0).then_some(total)
}

/// Result of a structured call: either the validated model output or the
/// hard-coded fallback that replaced it.
#[derive(Clone, Debug, PartialEq)]
pub enum LlmOutcome<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> LlmOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            LlmOutcome::Parsed(value) | LlmOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            LlmOutcome::Parsed(value) | LlmOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, LlmOutcome::Fallback { .. })
    }
}

/// Output shape the model is asked to produce.
pub trait StructuredOutput: DeserializeOwned + JsonSchema {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunOutput {
    pub output: String,
    pub tokens_used: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptimization {
    pub optimized_prompt: String,
    pub improvements: Vec<String>,
    pub expected_improvement: f64,
}

impl StructuredOutput for PromptOptimization {
    fn validate(&self) -> Result<(), String> {
        if self.optimized_prompt.trim().is_empty() {
            return Err("optimizedPrompt is empty".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionScore {
    /// Models sometimes answer with a fractional score; it is rounded.
    #[serde(deserialize_with = "rounded_score")]
    #[schemars(with = "f64")]
    pub score: u32,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

impl StructuredOutput for SubmissionScore {
    fn validate(&self) -> Result<(), String> {
        if self.score > 100 {
            return Err(format!("score {} outside 0..=100", self.score));
        }
        Ok(())
    }
}

fn rounded_score<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw < 0.0 || raw > f64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!("score {raw} is not a valid score")));
    }
    Ok(raw.round() as u32)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInsights {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl StructuredOutput for PerformanceInsights {
    fn validate(&self) -> Result<(), String> {
        if self.insights.is_empty() {
            return Err("no insights returned".into());
        }
        Ok(())
    }
}

const AGENT_SYSTEM: &str = "You are an autonomous AI agent running on AgentBloom. \
     Follow the task instructions precisely and answer concisely.";
const OPTIMIZER_SYSTEM: &str =
    "You are an expert prompt engineer. Respond with JSON only, no prose.";
const JUDGE_SYSTEM: &str =
    "You are an impartial bounty reviewer. Respond with JSON only, no prose.";
const ANALYST_SYSTEM: &str =
    "You are a performance analyst for AI agents. Respond with JSON only, no prose.";

const INPUT_PLACEHOLDER: &str = "{{input}}";

pub fn run_agent(
    backend: &dyn CompletionBackend,
    agent: &Agent,
    input: &str,
) -> Result<AgentRunOutput> {
    let prompt = render_template(&agent.prompt_template, input);
    let completion = send(
        backend,
        "agent run",
        CompletionRequest {
            system: AGENT_SYSTEM,
            prompt,
            temperature: 0.7,
            max_tokens: 1000,
        },
    )?;

    Ok(AgentRunOutput {
        output: completion.text,
        tokens_used: completion.tokens_used,
    })
}

pub fn optimize_prompt(
    backend: &dyn CompletionBackend,
    prompt: &str,
    metrics: &PerformanceMetrics,
) -> Result<LlmOutcome<PromptOptimization>> {
    let instruction = format!(
        "Improve the following agent prompt.\n\
         Current prompt:\n{prompt}\n\n\
         Performance: success rate {:.2}, total runs {}, average reward {:.2}.\n\
         Return JSON matching this schema:\n{}",
        metrics.success_rate,
        metrics.total_runs,
        metrics.average_reward,
        schema_of::<PromptOptimization>()?,
    );

    let completion = send(
        backend,
        "prompt optimization",
        CompletionRequest {
            system: OPTIMIZER_SYSTEM,
            prompt: instruction,
            temperature: 0.3,
            max_tokens: 800,
        },
    )?;

    Ok(parse_structured(&completion.text, || PromptOptimization {
        optimized_prompt: prompt.to_string(),
        improvements: Vec::new(),
        expected_improvement: 0.0,
    }))
}

pub fn score_submission(
    backend: &dyn CompletionBackend,
    bounty: &Bounty,
    submission: &str,
) -> Result<LlmOutcome<SubmissionScore>> {
    let instruction = format!(
        "Score this submission for the bounty below from 0 to 100.\n\
         Bounty: {}\n\
         Requirements: {}\n\
         Reward: {}\n\n\
         Submission:\n{submission}\n\n\
         Return JSON matching this schema:\n{}",
        bounty.title,
        bounty.description,
        bounty.reward,
        schema_of::<SubmissionScore>()?,
    );

    let completion = send(
        backend,
        "submission scoring",
        CompletionRequest {
            system: JUDGE_SYSTEM,
            prompt: instruction,
            temperature: 0.2,
            max_tokens: 500,
        },
    )?;

    Ok(parse_structured(&completion.text, || SubmissionScore {
        score: 0,
        feedback: "Submission could not be evaluated automatically.".into(),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
    }))
}

pub fn performance_insights(
    backend: &dyn CompletionBackend,
    report: &PerformanceReport,
) -> Result<LlmOutcome<PerformanceInsights>> {
    let instruction = format!(
        "Analyze these agent performance statistics and suggest improvements.\n\
         Total bounties: {}\n\
         Completed bounties: {}\n\
         Total earnings: {}\n\
         Average success rate: {:.2}\n\
         Top agent: {}\n\n\
         Return JSON matching this schema:\n{}",
        report.total_bounties,
        report.completed_bounties,
        report.total_earnings,
        report.average_success_rate,
        report
            .top_agent
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("none"),
        schema_of::<PerformanceInsights>()?,
    );

    let completion = send(
        backend,
        "performance insights",
        CompletionRequest {
            system: ANALYST_SYSTEM,
            prompt: instruction,
            temperature: 0.5,
            max_tokens: 600,
        },
    )?;

    Ok(parse_structured(&completion.text, || PerformanceInsights {
        insights: vec!["Not enough data to generate insights yet.".into()],
        recommendations: vec![
            "Run your agents on more bounties to build a performance history.".into(),
        ],
    }))
}

fn send(
    backend: &dyn CompletionBackend,
    label: &str,
    request: CompletionRequest,
) -> Result<Completion> {
    tracing::debug!(
        call = label,
        temperature = request.temperature,
        max_tokens = request.max_tokens,
        "sending completion request"
    );
    backend
        .complete(&request)
        .map_err(|e| BloomError::Llm(format!("{label} failed: {e}")))
}

fn render_template(template: &str, input: &str) -> String {
    if template.contains(INPUT_PLACEHOLDER) {
        template.replace(INPUT_PLACEHOLDER, input)
    } else {
        format!("{template}\n\nInput:\n{input}")
    }
}

fn schema_of<T: JsonSchema>() -> Result<String> {
    Ok(serde_json::to_string(&schemars::schema_for!(T))?)
}

fn parse_structured<T: StructuredOutput>(raw: &str, fallback: impl FnOnce() -> T) -> LlmOutcome<T> {
    let parsed = serde_json::from_str::<T>(extract_json(raw))
        .map_err(|e| format!("invalid json: {e}"))
        .and_then(|value| value.validate().map(|()| value));

    match parsed {
        Ok(value) => LlmOutcome::Parsed(value),
        Err(reason) => {
            tracing::warn!(%reason, "completion output rejected; using fallback");
            LlmOutcome::Fallback {
                value: fallback(),
                reason,
            }
        }
    }
}

/// Models often wrap JSON in a fenced block or a sentence. Take the outermost
/// object if there is one.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentStatus, BountyStatus};
    use chrono::Utc;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn ok(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(msg: &str) -> Self {
            Self {
                reply: Err(msg.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last(&self) -> CompletionRequest {
            self.seen.lock().expect("lock").last().cloned().expect("request")
        }
    }

    #[test]
    fn usage_falls_back_to_token_halves() {
        let mut usage = Usage::new();
        assert_eq!(tokens_reported(&usage), None);

        usage.input_tokens = 120;
        usage.output_tokens = 30;
        assert_eq!(tokens_reported(&usage), Some(150));

        usage.total_tokens = 160;
        assert_eq!(tokens_reported(&usage), Some(160));
    }

    impl CompletionBackend for Scripted {
        fn complete(&self, request: &CompletionRequest) -> Result<Completion, String> {
            self.seen.lock().expect("lock").push(request.clone());
            self.reply.clone().map(|text| Completion {
                text,
                tokens_used: Some(17),
            })
        }
    }

    fn agent(template: &str) -> Agent {
        Agent {
            id: "a1".into(),
            user_id: "u1".into(),
            name: "Researcher".into(),
            description: "finds things".into(),
            prompt_template: template.into(),
            performance: PerformanceMetrics::default(),
            status: AgentStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn bounty() -> Bounty {
        Bounty {
            id: "b1".into(),
            creator_id: "u1".into(),
            title: "Summarize the paper".into(),
            description: "Under 200 words".into(),
            reward: 50.0,
            status: BountyStatus::Open,
            assigned_agent_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn run_agent_interpolates_input() {
        let backend = Scripted::ok("done");
        let out = run_agent(&backend, &agent("Summarize: {{input}}"), "rust ownership").expect("run");
        assert_eq!(out.output, "done");
        assert_eq!(out.tokens_used, Some(17));

        let req = backend.last();
        assert_eq!(req.prompt, "Summarize: rust ownership");
        assert_eq!(req.temperature, 0.7);
        assert_eq!(req.max_tokens, 1000);
    }

    #[test]
    fn run_agent_appends_input_without_placeholder() {
        let backend = Scripted::ok("done");
        run_agent(&backend, &agent("Be helpful."), "hello").expect("run");
        assert_eq!(backend.last().prompt, "Be helpful.\n\nInput:\nhello");
    }

    #[test]
    fn backend_failure_is_labeled() {
        let backend = Scripted::failing("connection reset");
        let err = run_agent(&backend, &agent("x"), "y").expect_err("should fail");
        assert_eq!(err.to_string(), "agent run failed: connection reset");
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "Here you go:\n```json\n{\"score\": 88, \"feedback\": \"solid\", \"strengths\": [\"clear\"], \"weaknesses\": []}\n```";
        let backend = Scripted::ok(raw);
        let outcome = score_submission(&backend, &bounty(), "my answer").expect("score");
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.value().score, 88);
        assert_eq!(backend.last().temperature, 0.2);
    }

    #[test]
    fn malformed_json_yields_fallback() {
        let backend = Scripted::ok("I think this deserves an 8/10!");
        let outcome = score_submission(&backend, &bounty(), "my answer").expect("score");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.value().score, 0);

        let backend = Scripted::ok("{\"optimizedPrompt\": ");
        let outcome =
            optimize_prompt(&backend, "original prompt", &PerformanceMetrics::default()).expect("opt");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_value().optimized_prompt, "original prompt");
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let backend =
            Scripted::ok(r#"{"score": 250, "feedback": "wow", "strengths": [], "weaknesses": []}"#);
        let outcome = score_submission(&backend, &bounty(), "x").expect("score");
        match outcome {
            LlmOutcome::Fallback { reason, .. } => assert!(reason.contains("250")),
            LlmOutcome::Parsed(_) => panic!("expected fallback"),
        }
    }

    #[test]
    fn fractional_scores_are_rounded() {
        let backend =
            Scripted::ok(r#"{"score": 87.5, "feedback": "close", "strengths": [], "weaknesses": []}"#);
        let outcome = score_submission(&backend, &bounty(), "x").expect("score");
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.value().score, 88);

        let backend =
            Scripted::ok(r#"{"score": -3, "feedback": "", "strengths": [], "weaknesses": []}"#);
        let outcome = score_submission(&backend, &bounty(), "x").expect("score");
        assert!(outcome.is_fallback());
    }

    #[test]
    fn insights_parse_and_embed_schema() {
        let backend = Scripted::ok(
            r#"{"insights": ["agents succeed on short tasks"], "recommendations": ["post smaller bounties"]}"#,
        );
        let report = crate::analytics::performance_report("u1", &[], &[], &[]);
        let outcome = performance_insights(&backend, &report).expect("insights");
        assert_eq!(
            outcome,
            LlmOutcome::Parsed(PerformanceInsights {
                insights: vec!["agents succeed on short tasks".into()],
                recommendations: vec!["post smaller bounties".into()],
            })
        );
        let req = backend.last();
        assert!(req.prompt.contains("recommendations"));
        assert_eq!(req.max_tokens, 600);
    }

    #[test]
    fn empty_insights_fall_back() {
        let backend = Scripted::ok(r#"{"insights": [], "recommendations": []}"#);
        let report = crate::analytics::performance_report("u1", &[], &[], &[]);
        let outcome = performance_insights(&backend, &report).expect("insights");
        assert!(outcome.is_fallback());
        assert!(!outcome.value().insights.is_empty());
    }
}
