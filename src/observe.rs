use crate::candidates::{collect_candidates, Candidate};
use crate::driver::PageDriver;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const SNAPSHOT_MAX_CHARS: usize = 3000;
const FINGERPRINT_CHARS: usize = 512;

/// What the agent saw on the page at one point in time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Observation {
    pub title: String,
    pub url: String,
    pub snapshot: String,
    pub candidates: Vec<Candidate>,
}

impl Observation {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.snapshot)
    }
}

/// Keeps the first `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}

/// Non-breaking spaces become spaces, then surrounding whitespace goes.
pub fn clean_text(s: &str) -> String {
    s.replace('\u{a0}', " ").trim().to_string()
}

/// Snapshots the page. Sub-fetch failures degrade to empty values so that a
/// flaky read never fails a step.
pub async fn observe<D: PageDriver + ?Sized>(page: &D, max_candidates: usize) -> Observation {
    let title = page.title().await.unwrap_or_else(|err| {
        debug!(error = %err, "title fetch failed");
        String::new()
    });
    let url = page.url().await.unwrap_or_else(|err| {
        debug!(error = %err, "url fetch failed");
        String::new()
    });
    let body = page.body_text().await.unwrap_or_else(|err| {
        debug!(error = %err, "body fetch failed");
        String::new()
    });
    let candidates = collect_candidates(page, max_candidates).await;
    Observation {
        title,
        url,
        snapshot: clean_text(&truncate_chars(&body, SNAPSHOT_MAX_CHARS)),
        candidates,
    }
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

/// Cheap "did the visible text change" marker: character count and FNV-1a
/// hash of the first 512 characters of the trimmed text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        let text = text.trim();
        let head = match text.char_indices().nth(FINGERPRINT_CHARS) {
            Some((cut, _)) => &text[..cut],
            None => text,
        };
        Self(format!("{}|{:08x}", head.chars().count(), fnv1a32(head.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a32(b""), 0x811c9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn fingerprint_format() {
        assert_eq!(Fingerprint::of("").as_str(), "0|811c9dc5");
        assert_eq!(Fingerprint::of("  a \n").as_str(), "1|e40c292c");
    }

    #[test]
    fn fingerprint_stable_for_same_text() {
        let text = "Входящие: 3 новых письма";
        assert_eq!(Fingerprint::of(text), Fingerprint::of(text));
        assert_eq!(Fingerprint::of(text), Fingerprint::of(&format!("  {text}  ")));
    }

    #[test]
    fn fingerprint_tracks_first_512_chars() {
        let base = "x".repeat(600);
        let mut early = base.clone();
        early.replace_range(10..11, "y");
        let mut late = base.clone();
        late.replace_range(590..591, "y");
        assert_ne!(Fingerprint::of(&base), Fingerprint::of(&early));
        assert_eq!(Fingerprint::of(&base), Fingerprint::of(&late));
        assert!(Fingerprint::of(&base).as_str().starts_with("512|"));
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("абвг", 2), "аб…");
        let long = "я".repeat(SNAPSHOT_MAX_CHARS + 5);
        assert_eq!(truncate_chars(&long, SNAPSHOT_MAX_CHARS).chars().count(), SNAPSHOT_MAX_CHARS + 1);
    }

    #[test]
    fn clean_text_handles_nbsp() {
        assert_eq!(clean_text("\u{a0} Почта\u{a0}Яндекс \n"), "Почта Яндекс");
    }
}
