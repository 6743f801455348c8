use crate::memory::TaskMemory;
use crate::observe::{truncate_chars, Observation};
use crate::planner::{decode_action, Action, PlanError, Planner};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

const MAX_PROMPT_CANDIDATES: usize = 81;
const PROMPT_SNAPSHOT_CHARS: usize = 1000;

pub const SYSTEM_PROMPT: &str = r#"
You are a web-automation agent that controls a real browser page.
You must choose EXACTLY ONE next tool call in JSON, no extra text.
Pick selectors ONLY from the provided candidates.
Prefer stable selectors: [id=...], [data-qa], a[href*=...], placeholders/aria-labels. Avoid raw text unless necessary.
If the task requires reading emails and classifying spam, navigate the mailbox UI, open Inbox, read the latest messages (subject/sender/preview), decide spam vs important, move spam to Trash/Spam, and then summarize to the user.
If you need user input (e.g., missing info or login), return tool=answer_or_ask_user with a short question in "comment".
If a navigation item like Inbox is already selected, do NOT click it again. Call open_first_main_item to open the newest message from the main content area.

Available tools:
- goto_url {url}
- click {selector}
- type {selector, text, pressEnter?}
- press {key}
- scroll {y? or selector?}
- extract {}
- open_first_main_item {}
- answer_or_ask_user {}

Return strictly:
{"tool":"...", "args":{...}, "comment":"...optional human-readable note..."}
"#;

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_base: String,    // e.g. "https://api.openai.com/v1"
    pub api_key: String,     // env OPENAI_API_KEY
    pub model: String,       // env OPENAI_MODEL
    pub temperature: f64,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            temperature: 0.2,
            timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Planner backed by an OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct LlmPlanner {
    http: Client,
    cfg: LlmConfig,
}

/// `- #<n> sel="<selector>" | <description>` per candidate. Only quotes are
/// escaped: that is exactly what the normalizer undoes when a line is echoed
/// back.
fn candidate_listing(obs: &Observation) -> String {
    let mut out = String::new();
    for (i, c) in obs.candidates.iter().take(MAX_PROMPT_CANDIDATES).enumerate() {
        let sel = c.selector.replace('"', "\\\"");
        let _ = writeln!(out, "- #{} sel=\"{}\" | {}", i + 1, sel, c.description);
    }
    out
}

/// The JSON object sent as the user message.
pub fn user_message(task: &str, obs: &Observation, memory: &TaskMemory) -> Value {
    let snapshot = if obs.snapshot.is_empty() {
        String::new()
    } else {
        truncate_chars(&obs.snapshot, PROMPT_SNAPSHOT_CHARS)
    };
    let mut msg = json!({
        "task": task,
        "page": { "url": obs.url, "title": obs.title },
        "last_action": memory.last_action(),
        "candidates": candidate_listing(obs),
        "page_snapshot": snapshot,
    });
    if memory.repeat_count() > 0 {
        msg["repeat_count"] = json!(memory.repeat_count());
    }
    msg
}

impl LlmPlanner {
    pub fn new(cfg: LlmConfig) -> Result<Self, PlanError> {
        let http = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }

    pub fn request_body(&self, task: &str, obs: &Observation, memory: &TaskMemory) -> Value {
        json!({
            "model": self.cfg.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_message(task, obs, memory).to_string() },
            ],
            "response_format": { "type": "json_object" },
            "temperature": self.cfg.temperature,
        })
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        task: &str,
        observation: &Observation,
        memory: &TaskMemory,
    ) -> Result<Action, PlanError> {
        let url = format!("{}/chat/completions", self.cfg.api_base.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&self.request_body(task, observation, memory))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(PlanError::Status { status: status.as_u16(), body: text });
        }
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| PlanError::Parse(format!("response body: {e}")))?;
        let choice = parsed.choices.into_iter().next().ok_or(PlanError::EmptyChoices)?;
        let content = choice.message.content.unwrap_or_default();
        debug!(content = %content, "planner reply");
        decode_action(&content).into_result()
    }
}
