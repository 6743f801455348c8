use crate::driver::{BoundingBox, DriverError, ElementRef, ElementSnapshot, PageDriver};
use crate::selector::{parse_has_text, relax_cropped, text_contains};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub profile_dir: PathBuf,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        let headless = env::var("BROWSER_PILOT_HEADLESS")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let profile_dir = env::var("BROWSER_PILOT_PROFILE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_profile_dir("browser-pilot"));
        Self { headless, profile_dir, user_agent: None }
    }
}

/// `~/.<app>/profile`, falling back to the temp dir when there is no home.
pub fn default_profile_dir(app: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(format!(".{app}"))
        .join("profile")
}

const DESCRIBE_FN: &str = r#"function() {
  const r = this.getBoundingClientRect();
  const st = window.getComputedStyle(this);
  const attributes = {};
  for (const a of this.attributes) attributes[a.name] = a.value;
  return JSON.stringify({
    tag: (this.tagName || '').toLowerCase(),
    attributes,
    innerText: this.innerText || '',
    textContent: this.textContent || '',
    visible: r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none',
    x: r.x, y: r.y, width: r.width, height: r.height,
  });
}"#;

const CLEAR_FN: &str = r#"function() {
  this.focus();
  if ('value' in this) this.value = '';
  this.dispatchEvent(new Event('input', { bubbles: true }));
}"#;

const SETTLE_JS: &str = r#"new Promise(resolve => {
  if (document.readyState === 'complete') { resolve(true); return; }
  const done = () => resolve(true);
  window.addEventListener('load', done, { once: true });
  setTimeout(done, 5000);
})"#;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    tag: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    inner_text: String,
    #[serde(default)]
    text_content: String,
    #[serde(default)]
    visible: bool,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl RawElement {
    fn into_snapshot(self, handle: ElementRef) -> ElementSnapshot {
        let bounds = (self.width > 0.0 && self.height > 0.0).then_some(BoundingBox {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        });
        ElementSnapshot {
            handle,
            tag: self.tag,
            attributes: self.attributes,
            inner_text: self.inner_text,
            text_content: self.text_content,
            visible: self.visible,
            bounds,
        }
    }
}

/// Element handles from the most recent query. Each query starts a new
/// generation, invalidating older handles.
#[derive(Default)]
struct Handles {
    generation: u64,
    elements: Vec<Element>,
}

/// CDP fields for a named key. Unknown names are sent as-is with no text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct KeyStroke<'a> {
    code: &'a str,
    text: Option<&'static str>,
    key_code: Option<i64>,
}

impl<'a> KeyStroke<'a> {
    fn for_key(key: &'a str) -> Self {
        let (code, text, key_code) = match key {
            "Enter" => ("Enter", Some("\r"), Some(13)),
            "Tab" => ("Tab", Some("\t"), Some(9)),
            "Escape" => ("Escape", None, Some(27)),
            "Backspace" => ("Backspace", None, Some(8)),
            "Delete" => ("Delete", None, Some(46)),
            "ArrowUp" => ("ArrowUp", None, Some(38)),
            "ArrowDown" => ("ArrowDown", None, Some(40)),
            "ArrowLeft" => ("ArrowLeft", None, Some(37)),
            "ArrowRight" => ("ArrowRight", None, Some(39)),
            "Home" => ("Home", None, Some(36)),
            "End" => ("End", None, Some(35)),
            "PageUp" => ("PageUp", None, Some(33)),
            "PageDown" => ("PageDown", None, Some(34)),
            "Space" | " " => ("Space", Some(" "), Some(32)),
            other => (other, None, None),
        };
        Self { code, text, key_code }
    }
}

fn browser_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Browser(e.to_string())
}

/// A single Chromium page driven over CDP.
pub struct Browser {
    page: Page,
    handles: Mutex<Handles>,
    _browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.profile_dir)
            .with_context(|| format!("create profile dir {}", cfg.profile_dir.display()))?;
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        builder = builder
            .user_data_dir(cfg.profile_dir.clone())
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(1280)
            .height(800)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        if let Err(err) = page.execute(metrics).await {
            debug!(error = %err, "viewport override failed");
        }
        Ok(Self { page, handles: Mutex::new(Handles::default()), _browser: browser })
    }

    async fn describe(el: &Element) -> Result<RawElement, DriverError> {
        let ret = el.call_js_fn(DESCRIBE_FN, false).await.map_err(browser_err)?;
        let json = ret
            .result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| DriverError::Script("element description missing".into()))?;
        serde_json::from_str(&json).map_err(|e| DriverError::Script(e.to_string()))
    }

    /// Runs the query, resolving `:has-text("…")` by filtering on text, and
    /// registers the matches under a fresh generation.
    async fn collect(&self, selector: &str, first_only: bool) -> Result<Vec<ElementSnapshot>, DriverError> {
        let (css, needle) = match parse_has_text(selector) {
            Some((base, text)) => (base, Some(text)),
            None => (relax_cropped(selector), None),
        };
        let found = self.page.find_elements(css.as_str()).await.map_err(browser_err)?;

        let mut handles = self.handles.lock().await;
        handles.generation += 1;
        handles.elements.clear();
        let generation = handles.generation;

        let mut out = Vec::new();
        for el in found {
            let raw = match Self::describe(&el).await {
                Ok(raw) => raw,
                Err(err) => {
                    debug!(error = %err, "skipping element");
                    continue;
                }
            };
            if let Some(needle) = &needle {
                if !text_contains(&[raw.inner_text.as_str(), raw.text_content.as_str()], needle) {
                    continue;
                }
            }
            let handle = ElementRef::new(generation, handles.elements.len());
            handles.elements.push(el);
            out.push(raw.into_snapshot(handle));
            if first_only {
                break;
            }
        }
        Ok(out)
    }

    /// Locks the handle registry after checking that `handle` is still live.
    async fn live(&self, handle: ElementRef) -> Result<MutexGuard<'_, Handles>, DriverError> {
        let handles = self.handles.lock().await;
        if handle.generation() != handles.generation || handle.index() >= handles.elements.len() {
            return Err(DriverError::StaleElement(handle));
        }
        Ok(handles)
    }

    /// keyDown, a char event for keys that produce text, then keyUp.
    async fn dispatch_key(&self, key: &str) -> Result<(), DriverError> {
        let stroke = KeyStroke::for_key(key);
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::Char, DispatchKeyEventType::KeyUp] {
            let is_char = matches!(kind, DispatchKeyEventType::Char);
            if is_char && stroke.text.is_none() {
                continue;
            }
            let mut builder = DispatchKeyEventParams::builder().r#type(kind).key(key).code(stroke.code);
            if let Some(text) = stroke.text.filter(|_| is_char) {
                builder = builder.text(text);
            }
            if let Some(vk) = stroke.key_code {
                builder = builder.windows_virtual_key_code(vk).native_virtual_key_code(vk);
            }
            let cmd = builder.build().map_err(DriverError::Browser)?;
            self.page.execute(cmd).await.map_err(browser_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for Browser {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await.map_err(browser_err)?;
        self.page.wait_for_navigation().await.map_err(browser_err)?;
        Ok(())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.page.get_title().await.map_err(browser_err)?.unwrap_or_default())
    }

    async fn url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await.map_err(browser_err)?.unwrap_or_default())
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        let value = self.evaluate("document.body ? document.body.textContent : ''").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementSnapshot>, DriverError> {
        self.collect(selector, false).await
    }

    async fn query(&self, selector: &str) -> Result<Option<ElementSnapshot>, DriverError> {
        Ok(self.collect(selector, true).await?.into_iter().next())
    }

    async fn click(&self, element: ElementRef) -> Result<(), DriverError> {
        let handles = self.live(element).await?;
        handles.elements[element.index()].click().await.map_err(browser_err)?;
        Ok(())
    }

    async fn fill(&self, element: ElementRef, text: &str) -> Result<(), DriverError> {
        let handles = self.live(element).await?;
        let el = &handles.elements[element.index()];
        el.call_js_fn(CLEAR_FN, false).await.map_err(browser_err)?;
        if !text.is_empty() {
            el.type_str(text).await.map_err(browser_err)?;
        }
        Ok(())
    }

    async fn press_on(&self, element: ElementRef, key: &str) -> Result<(), DriverError> {
        let handles = self.live(element).await?;
        handles.elements[element.index()].press_key(key).await.map_err(browser_err)?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), DriverError> {
        self.dispatch_key(key).await
    }

    async fn scroll_into_view(&self, element: ElementRef) -> Result<(), DriverError> {
        let handles = self.live(element).await?;
        handles.elements[element.index()].scroll_into_view().await.map_err(browser_err)?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn wait_until_settled(&self) -> Result<(), DriverError> {
        let eval = EvaluateParams::builder()
            .expression(SETTLE_JS)
            .await_promise(true)
            .build()
            .map_err(DriverError::Script)?;
        self.page.execute(eval).await.map_err(browser_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_carries_text_and_code() {
        let stroke = KeyStroke::for_key("Enter");
        assert_eq!(stroke, KeyStroke { code: "Enter", text: Some("\r"), key_code: Some(13) });
    }

    #[test]
    fn unknown_keys_pass_through() {
        let stroke = KeyStroke::for_key("F5");
        assert_eq!(stroke.code, "F5");
        assert_eq!(stroke.text, None);
        assert_eq!(stroke.key_code, None);
        assert_eq!(KeyStroke::for_key("Escape").text, None);
    }

    #[test]
    fn raw_element_becomes_snapshot() {
        let raw: RawElement = serde_json::from_str(
            r#"{"tag":"li","attributes":{"role":"tab"},"innerText":"Inbox\n3","visible":true,
               "x":10,"y":20,"width":0,"height":30}"#,
        )
        .unwrap();
        let snap = raw.into_snapshot(ElementRef::new(4, 1));
        assert_eq!(snap.tag, "li");
        assert_eq!(snap.attr("role"), "tab");
        assert_eq!(snap.inner_text, "Inbox\n3");
        assert!(snap.text_content.is_empty());
        assert!(snap.bounds.is_none());
        assert_eq!(snap.handle, ElementRef::new(4, 1));
    }
}
