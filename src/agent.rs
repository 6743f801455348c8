use crate::driver::PageDriver;
use crate::llm::LlmConfig;
use crate::memory::TaskMemory;
use crate::observe::{observe, Fingerprint, Observation};
use crate::planner::{Action, AnyPlanner, PlanError, Planner};
use crate::tools::{ScrollTarget, Tool, ToolError, Tools};
use nanoid::nanoid;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

// ========================= Core Types =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Consecutive unchanged steps before a forced recovery.
    pub stagnation_threshold: usize,
    pub first_candidates: usize,
    pub step_candidates: usize,
    /// Idle wait after each action, on top of the driver's load wait.
    pub settle_delay: Duration,
    pub step_pause: Duration,
    pub recovery_scroll_y: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 40,
            stagnation_threshold: 2,
            first_candidates: 24,
            step_candidates: 36,
            settle_delay: Duration::from_millis(200),
            step_pause: Duration::from_millis(150),
            recovery_scroll_y: 800.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("planning failed at step {step}: {source}")]
    Planner {
        step: usize,
        #[source]
        source: PlanError,
    },
    #[error("step limit of {0} reached without an answer")]
    StepLimit(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    OpenedMainItem,
    Scrolled,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepLog {
    pub step: usize,
    pub tool: String,
    pub args: Map<String, Value>,
    pub comment: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub url_changed: bool,
    pub content_changed: bool,
    pub recovery: Option<Recovery>,
}

impl StepLog {
    fn new(step: usize, action: &Action) -> Self {
        Self {
            step,
            tool: action.tool.clone(),
            args: action.args.clone(),
            comment: action.comment.clone(),
            result: None,
            error: None,
            url_changed: false,
            content_changed: false,
            recovery: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskReport {
    pub run_id: String,
    pub task: String,
    /// Comment of the final `answer_or_ask_user` action, if it had one.
    pub answer: Option<String>,
    pub steps: Vec<StepLog>,
    pub final_url: String,
    pub final_title: String,
}

/// Progress tracking owned by the loop.
struct Stagnation {
    last_url: String,
    last_fingerprint: Fingerprint,
    no_progress: usize,
}

impl Stagnation {
    fn new(obs: &Observation) -> Self {
        Self { last_url: obs.url.clone(), last_fingerprint: obs.fingerprint(), no_progress: 0 }
    }

    fn adopt(&mut self, obs: &Observation) {
        self.last_url = obs.url.clone();
        self.last_fingerprint = obs.fingerprint();
    }
}

// ========================= Agent Core =========================

/// Drives one page toward a task: observe, plan, act, evaluate.
pub struct Agent<D: PageDriver> {
    page: D,
    cfg: AgentConfig,
    llm: LlmConfig,
}

impl<D: PageDriver> Agent<D> {
    pub fn new(page: D, cfg: AgentConfig, llm: LlmConfig) -> Self {
        Self { page, cfg, llm }
    }

    pub fn page(&self) -> &D {
        &self.page
    }

    /// Runs a task with the planner implied by the configured credential.
    pub async fn run(&self, task: &str) -> Result<TaskReport, AgentError> {
        let planner =
            AnyPlanner::from_config(&self.llm).map_err(|source| AgentError::Planner { step: 0, source })?;
        info!(planner = planner.kind(), "planner selected");
        self.run_with(&planner, task).await
    }

    pub async fn run_with<P: Planner + ?Sized>(
        &self,
        planner: &P,
        task: &str,
    ) -> Result<TaskReport, AgentError> {
        let run_id = nanoid!();
        let tools = Tools::new(&self.page);
        let mut memory = TaskMemory::new();
        let mut steps: Vec<StepLog> = Vec::new();

        let mut obs = observe(&self.page, self.cfg.first_candidates).await;
        info!(run_id = %run_id, task, url = %obs.url, title = %obs.title, "task started");
        let mut stagnation = Stagnation::new(&obs);

        for step in 1..=self.cfg.max_steps {
            let action = planner
                .plan(task, &obs, &memory)
                .await
                .map_err(|source| AgentError::Planner { step, source })?;
            let args = Value::Object(action.args.clone());
            info!(
                step,
                tool = %action.tool,
                args = %args,
                comment = action.comment(),
                "agent step"
            );
            let mut log = StepLog::new(step, &action);

            let outcome = match Tool::try_from(&action) {
                Ok(tool) => {
                    let repeats = memory.note_call(&tool.call_key(), &stagnation.last_fingerprint);
                    if repeats > 0 {
                        warn!(step, repeats, "repeating the previous call on an unchanged page");
                    }
                    tools.call(&tool).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(result) => {
                    debug!(step, result = %result, "tool ok");
                    memory.record_success(&action.tool, &result);
                    log.result = Some(result);
                }
                Err(err) => {
                    warn!(step, error = %err, "tool failed");
                    memory.record_error(&err);
                    log.error = Some(err.to_string());
                }
            }

            self.settle().await;
            let next = observe(&self.page, self.cfg.step_candidates).await;
            let fingerprint = next.fingerprint();
            log.url_changed = next.url != stagnation.last_url;
            log.content_changed = fingerprint != stagnation.last_fingerprint;
            if log.url_changed {
                info!(step, from = %stagnation.last_url, to = %next.url, "url changed");
            }
            if log.content_changed {
                stagnation.no_progress = 0;
            } else {
                stagnation.no_progress += 1;
                debug!(step, no_progress = stagnation.no_progress, "content unchanged");
            }

            if action.tool.trim() == Tool::AnswerOrAskUser.name() {
                let answer = Some(action.comment().to_string()).filter(|s| !s.is_empty());
                steps.push(log);
                info!(run_id = %run_id, step, "task finished");
                return Ok(TaskReport {
                    run_id,
                    task: task.to_string(),
                    answer,
                    steps,
                    final_url: next.url,
                    final_title: next.title,
                });
            }

            if stagnation.no_progress >= self.cfg.stagnation_threshold {
                warn!(step, no_progress = stagnation.no_progress, "no progress, forcing open_first_main_item");
                match self.recover(&tools).await {
                    Ok(forced) => {
                        stagnation.adopt(&forced);
                        stagnation.no_progress = 0;
                        obs = forced;
                        log.recovery = Some(Recovery::OpenedMainItem);
                        steps.push(log);
                        continue;
                    }
                    Err(err) => {
                        warn!(step, error = %err, "forced open failed, scrolling instead");
                        let scroll = Tool::Scroll(ScrollTarget::By(self.cfg.recovery_scroll_y));
                        if let Err(err) = tools.call(&scroll).await {
                            debug!(step, error = %err, "forced scroll failed");
                        }
                        self.settle().await;
                        log.recovery = Some(Recovery::Scrolled);
                    }
                }
            }

            stagnation.adopt(&next);
            obs = next;
            steps.push(log);
            sleep(self.cfg.step_pause).await;
        }

        warn!(run_id = %run_id, max_steps = self.cfg.max_steps, "step limit reached");
        Err(AgentError::StepLimit(self.cfg.max_steps))
    }

    async fn recover(&self, tools: &Tools<'_, D>) -> Result<Observation, ToolError> {
        tools.call(&Tool::OpenFirstMainItem).await?;
        self.settle().await;
        Ok(observe(&self.page, self.cfg.step_candidates).await)
    }

    async fn settle(&self) {
        if let Err(err) = self.page.wait_until_settled().await {
            debug!(error = %err, "settle wait failed");
        }
        sleep(self.cfg.settle_delay).await;
    }
}
