use crate::models::RetrievedPassage;

pub const PASSAGE_DELIMITER: &str = "\n\n";
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 6_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassageFormat {
    /// Passage text only.
    Plain,
    /// A `Document: <id> (part <n>)` line above the passage text.
    #[default]
    WithSource,
}

impl PassageFormat {
    /// Line placed above the passage text, newline included.
    pub fn header(self, passage: &RetrievedPassage) -> Option<String> {
        match self {
            Self::Plain => None,
            Self::WithSource => Some(format!(
                "Document: {} (part {})\n",
                passage.document_id(),
                passage.chunk_id.index + 1
            )),
        }
    }
}

/// Passages accepted so far and the characters they use, delimiters
/// included.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    max_chars: usize,
    used_chars: usize,
    passages: Vec<String>,
}

impl ContextBudget {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            used_chars: 0,
            passages: Vec::new(),
        }
    }

    /// Accept `passage` if it fits. The first passage is truncated instead of
    /// rejected. Returns `false` once the budget is closed.
    pub fn push(&mut self, passage: &str) -> bool {
        self.push_with_header("", passage)
    }

    /// Like [`push`](Self::push) for a passage rendered as `header` + `body`.
    /// Truncation only ever shortens the body: an oversized first passage
    /// keeps its full header when that leaves room for body text, and drops
    /// the header otherwise.
    pub fn push_with_header(&mut self, header: &str, body: &str) -> bool {
        let header_len = header.chars().count();
        let length = header_len + body.chars().count();

        if self.passages.is_empty() {
            if length <= self.max_chars {
                self.used_chars = length;
                self.passages.push(format!("{header}{body}"));
                return true;
            }
            if self.max_chars == 0 {
                return false;
            }

            let truncated = if header_len < self.max_chars {
                let room = self.max_chars - header_len;
                format!("{header}{}", body.chars().take(room).collect::<String>())
            } else {
                body.chars().take(self.max_chars).collect()
            };
            self.used_chars = truncated.chars().count();
            self.passages.push(truncated);
            return false;
        }

        let needed = PASSAGE_DELIMITER.len() + length;
        if self.used_chars + needed > self.max_chars {
            return false;
        }
        self.used_chars += needed;
        self.passages.push(format!("{header}{body}"));
        true
    }

    pub fn used_chars(&self) -> usize {
        self.used_chars
    }

    pub fn remaining_chars(&self) -> usize {
        self.max_chars - self.used_chars
    }

    pub fn passages(&self) -> &[String] {
        &self.passages
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn into_context(self) -> String {
        self.passages.join(PASSAGE_DELIMITER)
    }
}

/// Join passages in the order given until `max_chars` would be exceeded.
pub fn build_context(
    passages: &[RetrievedPassage],
    max_chars: usize,
    format: PassageFormat,
) -> String {
    let mut budget = ContextBudget::new(max_chars);
    for passage in passages {
        let header = format.header(passage).unwrap_or_default();
        if !budget.push_with_header(&header, &passage.text) {
            break;
        }
    }
    budget.into_context()
}
