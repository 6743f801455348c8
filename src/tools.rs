use crate::driver::{DriverError, ElementSnapshot, PageDriver};
use crate::observe::truncate_chars;
use crate::planner::Action;
use crate::selector::normalize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Broad structural query used to find the first item of the main list.
pub const MAIN_ITEM_SELECTOR: &str =
    "a, div, [role=listitem], [role=row], [role=treeitem], [role=option], [role=tab]";
pub const EXTRACT_MAX_CHARS: usize = 6000;
pub const DEFAULT_SCROLL_Y: f64 = 600.0;
const DEFAULT_VIEWPORT_WIDTH: f64 = 1280.0;
const HEADER_BAND: f64 = 60.0;

#[derive(Clone, Debug, PartialEq)]
pub enum ScrollTarget {
    Element(String),
    By(f64),
}

/// The closed tool vocabulary. Names only exist at the [`Action`] boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum Tool {
    GotoUrl { url: String },
    Click { selector: String },
    Type { selector: String, text: String, press_enter: bool },
    Press { key: String },
    Scroll(ScrollTarget),
    Extract,
    OpenFirstMainItem,
    AnswerOrAskUser,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("goto_url: empty url")]
    EmptyUrl,
    #[error("{0}: empty selector")]
    EmptySelector(&'static str),
    #[error("{tool}: element not found: {selector}")]
    NotFound { tool: &'static str, selector: String },
    #[error("open_first_main_item: no candidates")]
    NoCandidates,
    #[error("open_first_main_item: no element in main region")]
    NoMainItem,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

fn str_arg(args: &Map<String, Value>, key: &str) -> String {
    args.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::GotoUrl { .. } => "goto_url",
            Tool::Click { .. } => "click",
            Tool::Type { .. } => "type",
            Tool::Press { .. } => "press",
            Tool::Scroll(_) => "scroll",
            Tool::Extract => "extract",
            Tool::OpenFirstMainItem => "open_first_main_item",
            Tool::AnswerOrAskUser => "answer_or_ask_user",
        }
    }

    /// Tool name plus its target, used to spot identical consecutive calls.
    pub fn call_key(&self) -> String {
        match self {
            Tool::GotoUrl { url } => format!("goto_url {url}"),
            Tool::Click { selector } | Tool::Type { selector, .. } => {
                format!("{} {}", self.name(), normalize(selector))
            }
            Tool::Press { key } => format!("press {key}"),
            Tool::Scroll(ScrollTarget::Element(selector)) => format!("scroll {}", normalize(selector)),
            other => other.name().to_string(),
        }
    }
}

impl TryFrom<&Action> for Tool {
    type Error = ToolError;

    fn try_from(action: &Action) -> Result<Self, Self::Error> {
        let args = &action.args;
        let tool = match action.tool.trim() {
            "goto_url" => Tool::GotoUrl { url: str_arg(args, "url") },
            "click" => Tool::Click { selector: str_arg(args, "selector") },
            "type" => Tool::Type {
                selector: str_arg(args, "selector"),
                text: str_arg(args, "text"),
                press_enter: args
                    .get("pressEnter")
                    .or_else(|| args.get("press_enter"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            "press" => {
                let key = str_arg(args, "key");
                Tool::Press { key: if key.is_empty() { "Escape".to_string() } else { key } }
            }
            "scroll" => {
                let selector = str_arg(args, "selector");
                if selector.is_empty() {
                    let y = args
                        .get("y")
                        .and_then(Value::as_f64)
                        .filter(|y| *y != 0.0)
                        .unwrap_or(DEFAULT_SCROLL_Y);
                    Tool::Scroll(ScrollTarget::By(y))
                } else {
                    Tool::Scroll(ScrollTarget::Element(selector))
                }
            }
            "extract" => Tool::Extract,
            "open_first_main_item" => Tool::OpenFirstMainItem,
            "answer_or_ask_user" => Tool::AnswerOrAskUser,
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(tool)
    }
}

/// Left edge of the main content region: a quarter of the viewport, never
/// more than 280px.
pub fn main_region_left(viewport_width: f64) -> f64 {
    (0.25 * viewport_width).min(280.0)
}

/// Picks the topmost visible element inside the main content region.
pub fn pick_main_item(elements: &[ElementSnapshot], viewport_width: f64) -> Option<&ElementSnapshot> {
    let left = main_region_left(viewport_width);
    let mut best: Option<(&ElementSnapshot, f64)> = None;
    for el in elements {
        if !el.visible {
            continue;
        }
        let Some(b) = el.bounds else { continue };
        if b.x < left || b.width < 50.0 || b.height < 20.0 || b.y < HEADER_BAND {
            continue;
        }
        let text = el.inner_text.to_lowercase();
        if text.contains("уведомлен") || text.contains("notification") {
            continue;
        }
        if best.map_or(true, |(_, y)| b.y < y) {
            best = Some((el, b.y));
        }
    }
    best.map(|(el, _)| el)
}

/// Executes tools against one page.
pub struct Tools<'a, D: ?Sized> {
    page: &'a D,
}

impl<'a, D: PageDriver + ?Sized> Tools<'a, D> {
    pub fn new(page: &'a D) -> Self {
        Self { page }
    }

    pub async fn call(&self, tool: &Tool) -> Result<String, ToolError> {
        match tool {
            Tool::GotoUrl { url } => {
                if url.trim().is_empty() {
                    return Err(ToolError::EmptyUrl);
                }
                self.page.navigate(url.trim()).await?;
                Ok("navigated".into())
            }
            Tool::Click { selector } => {
                let selector = normalize(selector);
                let el = self.locate("click", &selector).await?;
                self.page.click(el.handle).await?;
                Ok(format!("clicked selector={selector}"))
            }
            Tool::Type { selector, text, press_enter } => {
                let selector = normalize(selector);
                let el = self.locate("type", &selector).await?;
                self.page.fill(el.handle, text).await?;
                if *press_enter {
                    self.page.press_on(el.handle, "Enter").await?;
                }
                Ok("typed".into())
            }
            Tool::Press { key } => {
                self.page.press_key(key).await?;
                Ok("pressed".into())
            }
            Tool::Scroll(ScrollTarget::Element(selector)) => {
                let selector = normalize(selector);
                let el = self.locate("scroll", &selector).await?;
                self.page.scroll_into_view(el.handle).await?;
                Ok("scrolled-to".into())
            }
            Tool::Scroll(ScrollTarget::By(y)) => {
                self.page.evaluate(&format!("window.scrollBy(0, {y})")).await?;
                Ok("scrolled".into())
            }
            Tool::Extract => {
                let title = self.page.title().await.unwrap_or_default();
                let body = self.page.body_text().await.unwrap_or_default();
                Ok(format!(
                    "TITLE: {title}\nSNAPSHOT:\n{}",
                    truncate_chars(&body, EXTRACT_MAX_CHARS)
                ))
            }
            Tool::OpenFirstMainItem => self.open_first_main_item().await,
            Tool::AnswerOrAskUser => Ok("done".into()),
        }
    }

    async fn locate(&self, tool: &'static str, selector: &str) -> Result<ElementSnapshot, ToolError> {
        if selector.is_empty() {
            return Err(ToolError::EmptySelector(tool));
        }
        self.page
            .query(selector)
            .await?
            .ok_or_else(|| ToolError::NotFound { tool, selector: selector.to_string() })
    }

    async fn open_first_main_item(&self) -> Result<String, ToolError> {
        let elements = self.page.query_all(MAIN_ITEM_SELECTOR).await?;
        if elements.is_empty() {
            return Err(ToolError::NoCandidates);
        }
        let viewport_width = match self.page.evaluate("window.innerWidth || 1280").await {
            Ok(v) => v.as_f64().unwrap_or(DEFAULT_VIEWPORT_WIDTH),
            Err(err) => {
                debug!(error = %err, "viewport width unavailable");
                DEFAULT_VIEWPORT_WIDTH
            }
        };
        let target = pick_main_item(&elements, viewport_width).ok_or(ToolError::NoMainItem)?;
        self.page.click(target.handle).await?;
        Ok("opened_first_main_item".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BoundingBox, ElementRef};
    use serde_json::json;

    fn action(value: Value) -> Action {
        serde_json::from_value(value).unwrap()
    }

    fn boxed(index: usize, text: &str, x: f64, y: f64, w: f64, h: f64) -> ElementSnapshot {
        ElementSnapshot {
            handle: ElementRef::new(3, index),
            tag: "div".into(),
            attributes: Default::default(),
            inner_text: text.into(),
            text_content: text.into(),
            visible: true,
            bounds: Some(BoundingBox { x, y, width: w, height: h }),
        }
    }

    #[test]
    fn decodes_known_tools() {
        let tool = Tool::try_from(&action(json!({"tool": "goto_url", "args": {"url": "https://mail.yandex.ru/"}})));
        assert_eq!(tool.unwrap(), Tool::GotoUrl { url: "https://mail.yandex.ru/".into() });

        let tool = Tool::try_from(&action(json!({
            "tool": "type",
            "args": {"selector": "#q", "text": "hello", "pressEnter": true}
        })))
        .unwrap();
        assert_eq!(tool, Tool::Type { selector: "#q".into(), text: "hello".into(), press_enter: true });

        let tool = Tool::try_from(&action(json!({"tool": "open_first_main_item"}))).unwrap();
        assert_eq!(tool, Tool::OpenFirstMainItem);
    }

    #[test]
    fn applies_argument_defaults() {
        let press = Tool::try_from(&action(json!({"tool": "press", "args": {}}))).unwrap();
        assert_eq!(press, Tool::Press { key: "Escape".into() });

        let scroll = Tool::try_from(&action(json!({"tool": "scroll", "args": {"y": 0}}))).unwrap();
        assert_eq!(scroll, Tool::Scroll(ScrollTarget::By(DEFAULT_SCROLL_Y)));

        let scroll = Tool::try_from(&action(json!({"tool": "scroll", "args": {"y": 800.0}}))).unwrap();
        assert_eq!(scroll, Tool::Scroll(ScrollTarget::By(800.0)));

        let scroll = Tool::try_from(&action(json!({"tool": "scroll", "args": {"selector": "#list"}}))).unwrap();
        assert_eq!(scroll, Tool::Scroll(ScrollTarget::Element("#list".into())));
    }

    #[test]
    fn rejects_unknown_tool() {
        let err = Tool::try_from(&action(json!({"tool": "hover", "args": {}}))).unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: hover");
    }

    #[test]
    fn call_key_uses_normalized_target() {
        let a = Tool::Click { selector: "#16 sel=\"#42\"".into() };
        let b = Tool::Click { selector: "[id=\"42\"]".into() };
        assert_eq!(a.call_key(), b.call_key());
        assert_eq!(Tool::Extract.call_key(), "extract");
    }

    #[test]
    fn main_region_boundary() {
        assert_eq!(main_region_left(800.0), 200.0);
        assert_eq!(main_region_left(1920.0), 280.0);
    }

    #[test]
    fn picks_topmost_main_item() {
        let elements = vec![
            boxed(0, "Sidebar", 10.0, 100.0, 200.0, 30.0),
            boxed(1, "Header", 400.0, 10.0, 600.0, 40.0),
            boxed(2, "Уведомления", 400.0, 70.0, 300.0, 30.0),
            boxed(3, "Tiny", 400.0, 75.0, 20.0, 30.0),
            boxed(4, "Second letter", 400.0, 160.0, 600.0, 40.0),
            boxed(5, "First letter", 400.0, 120.0, 600.0, 40.0),
        ];
        let picked = pick_main_item(&elements, 1280.0).unwrap();
        assert_eq!(picked.handle.index(), 5);
    }

    #[test]
    fn nothing_in_main_region() {
        let mut hidden = boxed(0, "Letter", 400.0, 120.0, 600.0, 40.0);
        hidden.visible = false;
        let elements = vec![hidden, boxed(1, "Nav", 20.0, 120.0, 200.0, 40.0)];
        assert!(pick_main_item(&elements, 1280.0).is_none());
    }
}
