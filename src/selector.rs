//! Selector synthesis for extracted elements and repair of selectors that
//! come back from a planner.

use crate::driver::ElementSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;

/// Used when an element carries no usable attribute and no tag name.
pub const FALLBACK_SELECTOR: &str = "input,button,a,textarea,select";

const ELLIPSIS: char = '…';

static SEL_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|\s)sel\s*=\s*"((?:\\.|[^"\\])*)""#).unwrap());
static BACKSLASH_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\\+""#).unwrap());
static ATTR_CASE_I: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\[[^\]]+?)\s+i\]").unwrap());
static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#(\d+)$").unwrap());
static HAS_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(.*?):has-text\("((?:\\.|[^"\\])*)"\)$"#).unwrap());

/// Replaces newlines with spaces and keeps at most `max` characters,
/// appending an ellipsis when something was cut.
pub fn crop(s: &str, max: usize) -> String {
    let flat = s.replace("\r\n", " ").replace(['\n', '\r'], " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut out: String = flat.chars().take(max).collect();
    out.push(ELLIPSIS);
    out
}

/// Double-quotes a CSS string. Quotes and backslashes become hex escapes
/// (`\22 `, `\5c `) so the unescape pass in [`normalize`] leaves them alone.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\22 "),
            '\\' => out.push_str("\\5c "),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Decodes CSS string escapes: hex escapes (with their optional trailing
/// space) and backslash-escaped characters.
pub fn unescape_css(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut hex = String::new();
        while hex.len() < 6 {
            match chars.peek() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(*h);
                    chars.next();
                }
                _ => break,
            }
        }
        if hex.is_empty() {
            if let Some(next) = chars.next() {
                out.push(next);
            }
            continue;
        }
        if chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
        out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    out
}

/// NBSP becomes a space and whitespace runs collapse to one space.
pub fn collapse_whitespace(s: &str) -> String {
    s.replace('\u{a0}', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether any of `texts` contains `needle`, ignoring line breaks and
/// whitespace differences.
pub fn text_contains(texts: &[&str], needle: &str) -> bool {
    let needle = collapse_whitespace(needle);
    texts.iter().any(|t| collapse_whitespace(t).contains(&needle))
}

fn strip_query_and_fragment(href: &str) -> &str {
    match href.find(['?', '#']) {
        Some(i) => &href[..i],
        None => href,
    }
}

/// Builds the most stable selector available for `el`.
///
/// `text` is the element's already-normalized visible text. Attributes are
/// tried in order of how well they survive a redesign: ids and test ids
/// first, then link targets and form hints, and finally visible text.
pub fn synthesize(el: &ElementSnapshot, text: &str) -> String {
    let base = if el.tag.is_empty() { FALLBACK_SELECTOR } else { el.tag.as_str() };

    for attr in ["id", "data-qa", "data-testid", "data-test"] {
        let value = el.attr(attr);
        if !value.is_empty() {
            return format!("[{attr}={}]", quote(value));
        }
    }

    let href = el.attr("href");
    if !href.is_empty() {
        return format!("a[href*={}]", quote(&crop(strip_query_and_fragment(href), 40)));
    }

    for attr in ["placeholder", "aria-label"] {
        let value = el.attr(attr);
        if !value.is_empty() {
            return format!("{base}[{attr}*={}]", quote(&crop(value, 40)));
        }
    }

    let short = crop(text, 60);
    let short = short.trim();
    if !short.is_empty() {
        return format!("{base}:has-text({})", quote(short));
    }
    base.to_string()
}

/// Keeps the contents of the last `sel="…"` fragment, if any.
pub fn last_quoted_selector(s: &str) -> String {
    match SEL_QUOTED.captures_iter(s).last() {
        Some(caps) => caps[1].to_string(),
        None => s.to_string(),
    }
}

/// `\"` and `\\"` become a plain `"`.
pub fn unescape_quotes(s: &str) -> String {
    BACKSLASH_QUOTE.replace_all(s, "\"").into_owned()
}

/// Drops the CSS4 ` i` flag from attribute selectors.
pub fn strip_case_modifier(s: &str) -> String {
    ATTR_CASE_I.replace_all(s, "$1]").into_owned()
}

/// `#123` is not a valid id selector; rewrite it as an attribute match.
pub fn numeric_id_to_attr(s: &str) -> String {
    match NUMERIC_ID.captures(s) {
        Some(caps) => format!("[id=\"{}\"]", &caps[1]),
        None => s.to_string(),
    }
}

fn normalize_once(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let s = last_quoted_selector(s);
    let s = unescape_quotes(&s);
    let s = strip_case_modifier(&s);
    let s = numeric_id_to_attr(&s);
    s.trim().to_string()
}

/// Repairs a selector that may be wrapped in planner scaffolding.
///
/// The passes run until the string stops changing, so the result is a fixed
/// point: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let next = normalize_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Splits `base:has-text("needle")` into the CSS part and the text to match.
///
/// A trailing ellipsis left by [`crop`] is dropped so the needle matches as a
/// prefix of the element text.
pub fn parse_has_text(selector: &str) -> Option<(String, String)> {
    let caps = HAS_TEXT.captures(selector.trim())?;
    let base = caps[1].trim();
    let base = if base.is_empty() { "*" } else { base };
    let needle = unescape_css(&caps[2]);
    let needle = needle.trim_end_matches(ELLIPSIS).to_string();
    Some((base.to_string(), needle))
}

/// Substring attribute matches built from cropped values end in an ellipsis
/// that never occurs in the page; drop it so the prefix still matches.
pub fn relax_cropped(selector: &str) -> String {
    selector.replace("…\"]", "\"]")
}
