use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Opaque handle to an element returned by the last query on a page.
///
/// Handles carry the generation of the query that produced them; a driver
/// rejects handles from an older generation with [`DriverError::StaleElement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    generation: u64,
    index: usize,
}

impl ElementRef {
    pub fn new(generation: u64, index: usize) -> Self {
        Self { generation, index }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Everything the planner-side heuristics need to know about one element,
/// captured in a single round trip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub handle: ElementRef,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub inner_text: String,
    pub text_content: String,
    pub visible: bool,
    pub bounds: Option<BoundingBox>,
}

impl ElementSnapshot {
    /// Attribute value, or an empty string when the attribute is absent.
    pub fn attr(&self, name: &str) -> &str {
        self.attributes.get(name).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("stale element handle {0:?}")]
    StaleElement(ElementRef),
}

/// The page primitives the agent relies on. Implemented by the Chromium
/// adapter in [`crate::browser`] and by in-memory pages in tests.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    async fn title(&self) -> Result<String, DriverError>;
    async fn url(&self) -> Result<String, DriverError>;
    async fn body_text(&self) -> Result<String, DriverError>;
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementSnapshot>, DriverError>;
    async fn query(&self, selector: &str) -> Result<Option<ElementSnapshot>, DriverError>;
    async fn click(&self, element: ElementRef) -> Result<(), DriverError>;
    async fn fill(&self, element: ElementRef, text: &str) -> Result<(), DriverError>;
    async fn press_on(&self, element: ElementRef, key: &str) -> Result<(), DriverError>;
    async fn press_key(&self, key: &str) -> Result<(), DriverError>;
    async fn scroll_into_view(&self, element: ElementRef) -> Result<(), DriverError>;
    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;
    async fn wait_until_settled(&self) -> Result<(), DriverError>;
}
