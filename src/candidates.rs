use crate::driver::{ElementSnapshot, PageDriver};
use crate::selector::{crop, synthesize};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Interactive tags, ARIA interactive roles and test-id attributes.
pub const CANDIDATE_SELECTOR: &str = "button, a, input, textarea, select, li, \
[role=button],[role=link],[role=menuitem],[role=option],[role=radio],[role=checkbox],\
[role=combobox],[role=textbox],[role=listitem],[role=treeitem],[role=tab], \
[data-qa],[data-testid],[data-test]";

/// A visible, interactive element summarized for the planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub selector: String,
    pub tag: String,
    pub role: String,
    pub text: String,
    pub description: String,
    pub bounding_box: String,
    pub href: String,
    pub selected: bool,
}

/// Queries the page and extracts at most `limit` candidates (0 means no
/// limit). A failed query yields an empty list.
pub async fn collect_candidates<D: PageDriver + ?Sized>(page: &D, limit: usize) -> Vec<Candidate> {
    match page.query_all(CANDIDATE_SELECTOR).await {
        Ok(elements) => extract_candidates(&elements, limit),
        Err(err) => {
            debug!(error = %err, "candidate query failed");
            Vec::new()
        }
    }
}

/// Turns element snapshots into deduplicated candidates, in DOM order.
pub fn extract_candidates(elements: &[ElementSnapshot], limit: usize) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for el in elements {
        let Some(candidate) = describe(el) else { continue };
        if !seen.insert(candidate.selector.clone()) {
            continue;
        }
        out.push(candidate);
        if limit > 0 && out.len() >= limit {
            break;
        }
    }
    out
}

fn is_selected(el: &ElementSnapshot) -> bool {
    let class = el.attr("class").to_lowercase();
    el.attr("aria-selected").eq_ignore_ascii_case("true")
        || el.attr("aria-current").eq_ignore_ascii_case("page")
        || ["selected", "active", "current"].iter().any(|m| class.contains(m))
}

fn guess_role(tag: &str, kind: &str, href: &str) -> &'static str {
    if tag == "a" || !href.is_empty() {
        return "link";
    }
    match tag {
        "input" | "textarea" if kind == "submit" => "button",
        "input" | "textarea" => "textbox",
        "button" => "button",
        _ => "",
    }
}

fn field(key: &str, value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(format!("{key}={value}"))
    }
}

fn describe(el: &ElementSnapshot) -> Option<Candidate> {
    if !el.visible {
        return None;
    }
    let tag = el.tag.trim().to_lowercase();
    let explicit_role = el.attr("role");

    let raw_text = if el.inner_text.trim().is_empty() { &el.text_content } else { &el.inner_text };
    let text = raw_text.replace('\u{a0}', " ");

    let kind = el.attr("type");
    let href = el.attr("href");
    let role = if explicit_role.is_empty() {
        guess_role(&tag, kind, href).to_string()
    } else {
        explicit_role.to_string()
    };
    let selected = is_selected(el);
    if selected && (tag == "a" || matches!(role.as_str(), "link" | "menuitem" | "tab")) {
        return None;
    }

    let selector = synthesize(el, &text).trim().to_string();
    if selector.is_empty() {
        return None;
    }

    let cropped = crop(&text, 80);
    let description = [
        field("tag", &tag),
        field("role", &role),
        field("type", kind),
        field("text", &cropped),
        field("placeholder", el.attr("placeholder")),
        field("href", &crop(href, 80)),
        field("data-qa", el.attr("data-qa")),
        field("data-testid", el.attr("data-testid")),
        field("data-test", el.attr("data-test")),
        selected.then(|| "state=selected".to_string()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("; ");

    let bounding_box = el
        .bounds
        .map(|b| format!("{:.0},{:.0},{:.0},{:.0}", b.x, b.y, b.width, b.height))
        .unwrap_or_default();

    Some(Candidate {
        selector,
        tag,
        role,
        text: cropped,
        description,
        bounding_box,
        href: href.to_string(),
        selected,
    })
}
