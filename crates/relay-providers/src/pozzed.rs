use std::sync::OnceLock;

use regex::Regex;

/// Table-driven "pozzed" detector: a key is flagged when an Anthropic probe
/// completion matches any of these refusal-boilerplate patterns. Data, not
/// inline control flow, so the set can be extended without touching the
/// checker (§4.2, resolved Open Question in §11).
const PATTERNS: &[(&str, &str)] = &[
    ("verbatim-refusal", r"(?i)I (?:can't|cannot|won't) (?:reproduce|repeat|share) the (?:text|prompt) (?:above|verbatim)"),
    ("policy-boilerplate", r"(?i)goes against (?:my|Anthropic's) (?:guidelines|policies)"),
    ("safety-deflection", r"(?i)I (?:don't|do not) (?:feel comfortable|think it'?s appropriate)"),
    ("system-prompt-refusal", r"(?i)I'm not able to (?:disclose|reveal) (?:my|the) (?:system prompt|instructions)"),
];

fn compiled() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        PATTERNS
            .iter()
            .map(|(_, pattern)| Regex::new(pattern).expect("pozzed pattern is valid regex"))
            .collect()
    })
}

/// True if `completion` matches any table entry.
pub fn is_pozzed(completion: &str) -> bool {
    compiled().iter().any(|re| re.is_match(completion))
}

/// The label of the first matching entry, if any — useful for logging which
/// heuristic fired without leaking the probe completion itself.
pub fn matched_label(completion: &str) -> Option<&'static str> {
    compiled()
        .iter()
        .zip(PATTERNS.iter())
        .find(|(re, _)| re.is_match(completion))
        .map(|(_, (label, _))| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_verbatim_refusal() {
        assert!(is_pozzed("I can't reproduce the text above verbatim, as that would go against guidelines."));
    }

    #[test]
    fn detects_policy_boilerplate() {
        assert!(is_pozzed("Doing that goes against Anthropic's guidelines."));
    }

    #[test]
    fn clean_completion_is_not_pozzed() {
        assert!(!is_pozzed("Here is the text above verbatim: hello world"));
    }

    #[test]
    fn matched_label_identifies_the_rule() {
        assert_eq!(
            matched_label("I can't reproduce the prompt verbatim"),
            Some("verbatim-refusal")
        );
        assert_eq!(matched_label("totally fine completion"), None);
    }
}
