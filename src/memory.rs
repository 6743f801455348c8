use crate::observe::Fingerprint;

/// Short rolling state for one task. Created when a task starts and dropped
/// when it ends.
#[derive(Clone, Debug, Default)]
pub struct TaskMemory {
    last_action: String,
    last_call: Option<(String, Fingerprint)>,
    repeat_count: usize,
}

impl TaskMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary of the previous step, `"<tool>: <result>"` or `"error: <msg>"`.
    pub fn last_action(&self) -> &str {
        &self.last_action
    }

    pub fn record_success(&mut self, tool: &str, result: &str) {
        self.last_action = format!("{tool}: {result}");
    }

    pub fn record_error(&mut self, err: impl std::fmt::Display) {
        self.last_action = format!("error: {err}");
    }

    /// Notes a call key (tool plus target) issued against a page with the
    /// given fingerprint and returns how many times in a row the same call
    /// hit the same page.
    pub fn note_call(&mut self, key: &str, page: &Fingerprint) -> usize {
        match &self.last_call {
            Some((last_key, last_page)) if last_key == key && last_page == page => {
                self.repeat_count += 1;
            }
            _ => {
                self.last_call = Some((key.to_string(), page.clone()));
                self.repeat_count = 0;
            }
        }
        self.repeat_count
    }

    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_last_action() {
        let mut memory = TaskMemory::new();
        assert_eq!(memory.last_action(), "");
        memory.record_success("click", "clicked selector=#a");
        assert_eq!(memory.last_action(), "click: clicked selector=#a");
        memory.record_error("click: element not found: #b");
        assert_eq!(memory.last_action(), "error: click: element not found: #b");
    }

    #[test]
    fn counts_repeats_on_same_page() {
        let mut memory = TaskMemory::new();
        let page = Fingerprint::of("inbox");
        assert_eq!(memory.note_call("click [id=\"a\"]", &page), 0);
        assert_eq!(memory.note_call("click [id=\"a\"]", &page), 1);
        assert_eq!(memory.note_call("click [id=\"a\"]", &page), 2);
        assert_eq!(memory.note_call("click [id=\"a\"]", &Fingerprint::of("letter")), 0);
        assert_eq!(memory.note_call("scroll", &Fingerprint::of("letter")), 0);
        assert_eq!(memory.repeat_count(), 0);
    }
}
