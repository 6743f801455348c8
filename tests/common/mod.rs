#![allow(dead_code)]

use async_trait::async_trait;
use browser_pilot::driver::{BoundingBox, DriverError, ElementRef, ElementSnapshot, PageDriver};
use browser_pilot::memory::TaskMemory;
use browser_pilot::observe::Observation;
use browser_pilot::planner::{Action, PlanError, Planner};
use browser_pilot::selector::synthesize;
use browser_pilot::AgentConfig;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct FakeElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub visible: bool,
    pub bounds: Option<BoundingBox>,
    pub goes_to: Option<usize>,
}

impl FakeElement {
    pub fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            text: text.into(),
            visible: true,
            bounds: Some(BoundingBox { x: 400.0, y: 120.0, width: 600.0, height: 40.0 }),
            goes_to: None,
        }
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bounds = Some(BoundingBox { x, y, width, height });
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn goes_to(mut self, screen: usize) -> Self {
        self.goes_to = Some(screen);
        self
    }

    fn snapshot(&self, handle: ElementRef) -> ElementSnapshot {
        ElementSnapshot {
            handle,
            tag: self.tag.clone(),
            attributes: self.attrs.iter().cloned().collect(),
            inner_text: self.text.clone(),
            text_content: self.text.clone(),
            visible: self.visible,
            bounds: self.bounds,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Screen {
    pub title: String,
    pub url: String,
    pub body: String,
    pub elements: Vec<FakeElement>,
}

impl Screen {
    pub fn new(title: &str, url: &str, body: &str) -> Self {
        Self { title: title.into(), url: url.into(), body: body.into(), elements: Vec::new() }
    }

    pub fn with(mut self, el: FakeElement) -> Self {
        self.elements.push(el);
        self
    }
}

struct State {
    screens: Vec<Screen>,
    current: usize,
    generation: u64,
    calls: Vec<String>,
    failing: bool,
}

/// In-memory page: a list of screens, with clicks moving between them.
/// Every driver call is recorded for assertions.
pub struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    pub fn new(screens: Vec<Screen>) -> Self {
        Self {
            state: Mutex::new(State { screens, current: 0, generation: 0, calls: Vec::new(), failing: false }),
        }
    }

    /// Every read fails.
    pub fn failing(self) -> Self {
        self.state.lock().unwrap().failing = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn current(&self) -> usize {
        self.state.lock().unwrap().current
    }

    fn read<T>(&self, f: impl FnOnce(&Screen) -> T) -> Result<T, DriverError> {
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(DriverError::Browser("read failed".into()));
        }
        Ok(f(&state.screens[state.current]))
    }

    fn element_selector(el: &FakeElement) -> String {
        synthesize(&el.snapshot(ElementRef::new(0, 0)), &el.text)
    }

    /// Resolves a live handle and records `<verb>:<selector>`.
    fn touch(&self, handle: ElementRef, verb: &str) -> Result<Option<usize>, DriverError> {
        let mut state = self.state.lock().unwrap();
        if handle.generation() != state.generation {
            return Err(DriverError::StaleElement(handle));
        }
        let screen = &state.screens[state.current];
        let el = screen.elements.get(handle.index()).ok_or(DriverError::StaleElement(handle))?;
        let goes_to = el.goes_to;
        let call = format!("{verb}:{}", Self::element_selector(el));
        state.calls.push(call);
        Ok(goes_to)
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("goto:{url}"));
        if let Some(i) = state.screens.iter().position(|s| s.url == url) {
            state.current = i;
        }
        Ok(())
    }

    async fn title(&self) -> Result<String, DriverError> {
        self.read(|s| s.title.clone())
    }

    async fn url(&self) -> Result<String, DriverError> {
        self.read(|s| s.url.clone())
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        self.read(|s| s.body.clone())
    }

    async fn query_all(&self, _selector: &str) -> Result<Vec<ElementSnapshot>, DriverError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(DriverError::Browser("query failed".into()));
        }
        state.generation += 1;
        let generation = state.generation;
        Ok(state.screens[state.current]
            .elements
            .iter()
            .enumerate()
            .map(|(i, el)| el.snapshot(ElementRef::new(generation, i)))
            .collect())
    }

    async fn query(&self, selector: &str) -> Result<Option<ElementSnapshot>, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        let generation = state.generation;
        Ok(state.screens[state.current]
            .elements
            .iter()
            .enumerate()
            .find(|(_, el)| Self::element_selector(el) == selector)
            .map(|(i, el)| el.snapshot(ElementRef::new(generation, i))))
    }

    async fn click(&self, element: ElementRef) -> Result<(), DriverError> {
        if let Some(next) = self.touch(element, "click")? {
            self.state.lock().unwrap().current = next;
        }
        Ok(())
    }

    async fn fill(&self, element: ElementRef, text: &str) -> Result<(), DriverError> {
        self.touch(element, &format!("fill[{text}]"))?;
        Ok(())
    }

    async fn press_on(&self, element: ElementRef, key: &str) -> Result<(), DriverError> {
        self.touch(element, &format!("press[{key}]"))?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), DriverError> {
        self.state.lock().unwrap().calls.push(format!("press:{key}"));
        Ok(())
    }

    async fn scroll_into_view(&self, element: ElementRef) -> Result<(), DriverError> {
        self.touch(element, "scroll")?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        self.state.lock().unwrap().calls.push(format!("eval:{script}"));
        if script.contains("innerWidth") {
            return Ok(json!(1280));
        }
        Ok(Value::Null)
    }

    async fn wait_until_settled(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Replays a fixed list of actions, then repeats `fallback`. Records the
/// last-action summary it was shown on every call.
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<Action>>,
    fallback: Action,
    seen: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<Action>, fallback: Action) -> Self {
        Self { script: Mutex::new(script.into()), fallback, seen: Mutex::new(Vec::new()) }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        _task: &str,
        _observation: &Observation,
        memory: &TaskMemory,
    ) -> Result<Action, PlanError> {
        self.seen.lock().unwrap().push(memory.last_action().to_string());
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

pub struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(
        &self,
        _task: &str,
        _observation: &Observation,
        _memory: &TaskMemory,
    ) -> Result<Action, PlanError> {
        Err(PlanError::Status { status: 500, body: "backend down".into() })
    }
}

pub fn press() -> Action {
    Action::new("press", json!({}))
}

pub fn answer(comment: &str) -> Action {
    Action::new("answer_or_ask_user", json!({})).with_comment(comment)
}

pub fn fast_config() -> AgentConfig {
    AgentConfig { settle_delay: Duration::ZERO, step_pause: Duration::ZERO, ..AgentConfig::default() }
}
