/// Content predicate consulted before chat messages and names are accepted.
pub trait Moderation: Send + Sync {
    fn is_blocked(&self, text: &str) -> bool;
}

/// Substring blocklist matched against a normalized form of the text:
/// lowercased, with everything but letters and digits stripped, so that
/// spacing or punctuation tricks do not slip past.
#[derive(Debug, Clone, Default)]
pub struct WordBlocklist {
    words: Vec<String>,
}

impl WordBlocklist {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| normalize(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Moderation for WordBlocklist {
    fn is_blocked(&self, text: &str) -> bool {
        if self.words.is_empty() {
            return false;
        }
        let normalized = normalize(text);
        self.words.iter().any(|w| normalized.contains(w.as_str()))
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_blocks_nothing() {
        assert!(!WordBlocklist::default().is_blocked("anything at all"));
    }

    #[test]
    fn matches_case_and_punctuation_insensitively() {
        let list = WordBlocklist::new(["badword"]);
        assert!(list.is_blocked("this is a BADWORD"));
        assert!(list.is_blocked("b.a.d w-o-r-d"));
        assert!(!list.is_blocked("perfectly fine"));
    }

    #[test]
    fn blank_entries_are_ignored() {
        let list = WordBlocklist::new(["", "  ", "!!"]);
        assert!(list.is_empty());
        assert!(!list.is_blocked("hello"));
    }
}
