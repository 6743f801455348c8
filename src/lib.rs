pub mod agent;
pub mod browser;
pub mod candidates;
pub mod driver;
pub mod llm;
pub mod memory;
pub mod observe;
pub mod planner;
pub mod selector;
pub mod tools;

pub use agent::{Agent, AgentConfig, AgentError, TaskReport};
pub use browser::{Browser, BrowserConfig};
pub use driver::{ElementRef, ElementSnapshot, PageDriver};
pub use llm::{LlmConfig, LlmPlanner};
pub use planner::{Action, AnyPlanner, HeuristicPlanner, Planner};
