use crate::candidates::Candidate;
use crate::llm::{LlmConfig, LlmPlanner};
use crate::memory::TaskMemory;
use crate::observe::Observation;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One planner decision as it travels over the wire:
/// `{"tool": "...", "args": {...}, "comment": "..."}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub tool: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(d)?.unwrap_or_default())
}

impl Action {
    /// `args` is expected to be a JSON object; anything else yields no args.
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args: args.as_object().cloned().unwrap_or_default(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn comment(&self) -> &str {
        self.comment.as_deref().map(str::trim).unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("planner backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("planner backend returned no choices")]
    EmptyChoices,
    #[error("planner reply is not an action: {0}")]
    Parse(String),
    #[error("planner returned an empty tool")]
    EmptyTool,
}

/// Outcome of decoding free-form model output.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Action(Action),
    ParseError(String),
    EmptyTool,
}

impl Decoded {
    pub fn into_result(self) -> Result<Action, PlanError> {
        match self {
            Decoded::Action(action) => Ok(action),
            Decoded::ParseError(msg) => Err(PlanError::Parse(msg)),
            Decoded::EmptyTool => Err(PlanError::EmptyTool),
        }
    }
}

/// Returns the first balanced `{...}` in `s`, skipping braces inside JSON
/// strings.
pub fn first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strict parse first; if that fails, parse the first balanced object found
/// in the text.
pub fn decode_action(content: &str) -> Decoded {
    let action = match serde_json::from_str::<Action>(content.trim()) {
        Ok(action) => action,
        Err(strict) => match first_json_object(content) {
            Some(fragment) => match serde_json::from_str::<Action>(fragment) {
                Ok(action) => action,
                Err(err) => return Decoded::ParseError(format!("{strict}; embedded object: {err}")),
            },
            None => return Decoded::ParseError(strict.to_string()),
        },
    };
    if action.tool.trim().is_empty() {
        Decoded::EmptyTool
    } else {
        Decoded::Action(action)
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        task: &str,
        observation: &Observation,
        memory: &TaskMemory,
    ) -> Result<Action, PlanError>;
}

/// Rule-based planner used when no model credential is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicPlanner;

const INBOX_MARKERS: [&str; 2] = ["входящие", "inbox"];
const LOGIN_WORDS: [&str; 4] = ["войти", "логин", "login", "sign in"];
const LOGIN_FIELD_HINTS: [&str; 5] = ["email", "login", "username", "почта", "телефон"];
const MAIL_WORDS: [&str; 5] = ["почт", "mail", "email", "входящие", "яндекс"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn find_candidate<'a>(candidates: &'a [Candidate], needles: &[&str]) -> Option<&'a Candidate> {
    candidates.iter().find(|c| {
        let hay = format!("{} {}", c.text, c.description).to_lowercase();
        needles.iter().any(|n| hay.contains(&n.to_lowercase()))
    })
}

fn looks_like_inbox(obs: &Observation) -> bool {
    let all = format!("{} {} {}", obs.title, obs.url, obs.snapshot).to_lowercase();
    contains_any(&all, &INBOX_MARKERS)
}

fn guess_mail_url(task: &str) -> &'static str {
    if task.contains("яндекс") || task.contains("yandex") {
        "https://mail.yandex.ru/"
    } else if task.contains("gmail") || task.contains("google") {
        "https://mail.google.com/mail/u/0/#inbox"
    } else {
        "https://mail.yandex.ru/"
    }
}

impl HeuristicPlanner {
    /// Evaluates the rule chain top to bottom; the first rule that applies
    /// decides.
    pub fn decide(&self, task: &str, obs: &Observation, memory: &TaskMemory) -> Action {
        let task = task.to_lowercase();
        let last = memory.last_action().to_lowercase();

        if looks_like_inbox(obs) {
            return Action::new("open_first_main_item", Value::Object(Map::new()))
                .with_comment("Opening the first message in the main list");
        }

        if contains_any(&task, &LOGIN_WORDS) || obs.title.to_lowercase().contains("логин") {
            if let Some(field) = find_candidate(&obs.candidates, &LOGIN_FIELD_HINTS) {
                return Action::new("type", serde_json::json!({"selector": field.selector, "text": ""}))
                    .with_comment("Waiting for the user's login");
            }
        }

        if contains_any(&task, &MAIL_WORDS) && !obs.url.to_lowercase().contains("mail") {
            return Action::new("goto_url", serde_json::json!({"url": guess_mail_url(&task)}))
                .with_comment("Going to the mail service");
        }

        if let Some(inbox) = find_candidate(&obs.candidates, &["Входящие", "Inbox"]) {
            if !last.contains("inbox") {
                return Action::new("click", serde_json::json!({"selector": inbox.selector}))
                    .with_comment("Opening Inbox");
            }
        }

        let snapshot = obs.snapshot.to_lowercase();
        if snapshot.contains("inbox") || snapshot.contains("письм") {
            return Action::new("scroll", serde_json::json!({"y": 800.0}))
                .with_comment("Scrolling the message list");
        }

        Action::new("answer_or_ask_user", Value::Object(Map::new()))
            .with_comment("Need more information: are you signed in and is the Inbox open?")
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(
        &self,
        task: &str,
        observation: &Observation,
        memory: &TaskMemory,
    ) -> Result<Action, PlanError> {
        Ok(self.decide(task, observation, memory))
    }
}

/// The planner chosen for a task: the model when a credential is present,
/// the rule chain otherwise.
pub enum AnyPlanner {
    Llm(LlmPlanner),
    Heuristic(HeuristicPlanner),
}

impl AnyPlanner {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, PlanError> {
        if cfg.api_key.trim().is_empty() {
            Ok(AnyPlanner::Heuristic(HeuristicPlanner))
        } else {
            Ok(AnyPlanner::Llm(LlmPlanner::new(cfg.clone())?))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnyPlanner::Llm(_) => "llm",
            AnyPlanner::Heuristic(_) => "heuristic",
        }
    }
}

#[async_trait]
impl Planner for AnyPlanner {
    async fn plan(
        &self,
        task: &str,
        observation: &Observation,
        memory: &TaskMemory,
    ) -> Result<Action, PlanError> {
        match self {
            AnyPlanner::Llm(p) => p.plan(task, observation, memory).await,
            AnyPlanner::Heuristic(p) => p.plan(task, observation, memory).await,
        }
    }
}
