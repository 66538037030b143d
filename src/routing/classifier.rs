//! Request classification
//!
//! A [`Classifier`] maps input text to an agent key using only the text and
//! the current config snapshot. The keyword classifier matches each agent's
//! key and keywords as whole words, case-insensitively, checking agents in key
//! order. Falling back to `default_agent` is the pipeline's job, not the
//! classifier's.

use crate::config::{AgentConfig, ConfigSnapshot, RoutingMode};
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Pure mapping from input text to an agent key
pub trait Classifier: Send + Sync {
    /// Return the key of the agent that should handle `text`, if any
    fn classify(&self, text: &str, snapshot: &ConfigSnapshot) -> Option<String>;
}

/// Whole-word keyword matcher
#[derive(Debug, Default)]
pub struct KeywordClassifier {
    warned_unsupported_mode: AtomicBool,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn warn_unsupported_mode(&self, mode: RoutingMode) {
        if !self.warned_unsupported_mode.swap(true, Ordering::Relaxed) {
            warn!(
                mode = ?mode,
                "Routing mode not implemented, falling back to keyword matching"
            );
        }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str, snapshot: &ConfigSnapshot) -> Option<String> {
        if snapshot.routing.mode != RoutingMode::Keywords {
            self.warn_unsupported_mode(snapshot.routing.mode);
        }

        snapshot.agents.values().find_map(|agent| {
            let pattern = keyword_pattern(agent)?;
            let found = pattern.find(text)?;
            debug!(
                agent_key = %agent.key,
                matched = found.as_str().trim(),
                "Classified by keyword"
            );
            Some(agent.key.clone())
        })
    }
}

/// One case-insensitive alternation of the agent's terms, bounded by
/// non-word characters or the ends of the text
fn keyword_pattern(agent: &AgentConfig) -> Option<Regex> {
    let terms: Vec<String> = agent
        .match_terms()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(regex::escape)
        .collect();

    if terms.is_empty() {
        return None;
    }

    let pattern = format!(r"(?i)(?:^|\W)(?:{})(?:\W|$)", terms.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(agent_key = %agent.key, error = %e, "Skipping agent with unusable keywords");
            None
        }
    }
}
