//! Hierarchical, per-platform registry of regular expressions.
//!
//! The registry is a two-level mapping `platform -> pattern name -> entry`
//! with the special platform `generic` acting as fallback for every name a
//! platform does not override. It also hosts the prompt-based platform
//! classifier driven by the ordered `generic.prompt_detection` list.
//!
//! A registry is constructed per [`Connection`](crate::Connection) and
//! shared down the stack as an `Arc`; there is no global instance.

use indexmap::{IndexMap, IndexSet};
use log::debug;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::{Error, Result};

/// The default pattern document compiled into the library.
const DEFAULT_PATTERNS: &str = include_str!("patterns.yaml");

/// One raw value from the pattern document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatternValue {
    /// Plain regex text.
    Text(String),
    /// Regex with a human-readable description.
    Detailed { pattern: String, description: String },
    /// Names of platforms whose patterns for the same key are unioned.
    Union(Vec<String>),
}

type PatternDoc = IndexMap<String, IndexMap<String, PatternValue>>;

/// A preprocessed pattern: source text, compiled form, description.
///
/// Template patterns (text containing the `{prompt}` placeholder) are kept
/// as text only; they are expanded and compiled per device by the drivers.
#[derive(Debug)]
pub struct PatternEntry {
    text: String,
    compiled: Option<Regex>,
    description: String,
}

/// Per-platform pattern registry with `generic` fallback.
#[derive(Debug)]
pub struct PatternRegistry {
    platforms: IndexMap<String, IndexMap<String, PatternEntry>>,
    prompt_detection: Vec<String>,
}

impl PatternRegistry {
    /// Build the registry from the embedded default document.
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(DEFAULT_PATTERNS)
    }

    /// Build a registry from a YAML pattern document.
    pub fn from_yaml(document: &str) -> Result<Self> {
        let doc: PatternDoc = serde_yaml::from_str(document)
            .map_err(|e| Error::General(format!("pattern document parse error: {}", e)))?;

        let mut platforms = IndexMap::new();
        let mut prompt_detection = Vec::new();

        for (platform, entries) in &doc {
            let mut compiled_entries = IndexMap::new();
            for (name, value) in entries {
                if platform == "generic" && name == "prompt_detection" {
                    if let PatternValue::Union(order) = value {
                        prompt_detection = order.clone();
                    }
                    continue;
                }

                let (text, description) = match value {
                    PatternValue::Text(text) => (text.clone(), name.clone()),
                    PatternValue::Detailed {
                        pattern,
                        description,
                    } => (pattern.clone(), description.clone()),
                    PatternValue::Union(references) => {
                        (union_pattern(&doc, name, references), name.clone())
                    }
                };

                let compiled = if text.contains("{prompt}") {
                    None
                } else {
                    Some(compile(&text).map_err(|e| {
                        Error::General(format!(
                            "pattern compile error: {} ({}:{})",
                            e, platform, name
                        ))
                    })?)
                };

                compiled_entries.insert(
                    name.clone(),
                    PatternEntry {
                        text,
                        compiled,
                        description,
                    },
                );
            }
            platforms.insert(platform.clone(), compiled_entries);
        }

        if !platforms.contains_key("generic") {
            return Err(Error::General(
                "pattern document has no generic platform".to_string(),
            ));
        }

        Ok(Self {
            platforms,
            prompt_detection,
        })
    }

    fn entry(&self, platform: &str, name: &str) -> Result<&PatternEntry> {
        self.platforms
            .get(platform)
            .and_then(|p| p.get(name))
            .or_else(|| self.platforms.get("generic").and_then(|p| p.get(name)))
            .ok_or_else(|| {
                Error::General(format!(
                    "pattern registry corrupted. Platform: {}, key: {}",
                    platform, name
                ))
            })
    }

    /// Compiled pattern for a platform, falling back to `generic`.
    ///
    /// # Errors
    ///
    /// A miss on both levels, or a template-only entry, is a configuration
    /// error.
    pub fn pattern(&self, platform: &str, name: &str) -> Result<Regex> {
        let entry = self.entry(platform, name)?;
        entry.compiled.clone().ok_or_else(|| {
            Error::General(format!(
                "pattern {}:{} is a template and has no compiled form",
                platform, name
            ))
        })
    }

    /// Source text of a pattern, falling back to `generic`.
    pub fn pattern_text(&self, platform: &str, name: &str) -> Result<&str> {
        Ok(&self.entry(platform, name)?.text)
    }

    /// Pattern description, if the entry exists on either level.
    pub fn description(&self, platform: &str, name: &str) -> Option<&str> {
        self.entry(platform, name).ok().map(|e| e.description.as_str())
    }

    /// Classify a prompt sample by trying each platform from the
    /// `prompt_detection` order and returning the first whose `prompt`
    /// pattern matches.
    pub fn platform_for_prompt(&self, sample: &str) -> Option<&str> {
        for platform in &self.prompt_detection {
            if let Ok(prompt) = self.pattern(platform, "prompt") {
                if prompt.is_match(sample) {
                    debug!("prompt {:?} classified as {}", sample, platform);
                    return Some(platform);
                }
            }
        }
        debug!("prompt {:?} matched no known platform", sample);
        None
    }

    /// Ordered platform list used by the classifier.
    pub fn prompt_detection_order(&self) -> &[String] {
        &self.prompt_detection
    }
}

/// Compile with multi-line semantics, matching how the document patterns
/// are written.
fn compile(text: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(text).multi_line(true).build()
}

/// Union the referenced platforms' patterns for `name`, `|`-joined with
/// stable order and duplicates removed.
fn union_pattern(doc: &PatternDoc, name: &str, references: &[String]) -> String {
    let mut alternatives: IndexSet<String> = IndexSet::new();
    for platform in references {
        let text = match doc.get(platform).and_then(|p| p.get(name)) {
            Some(PatternValue::Text(text)) => text.as_str(),
            Some(PatternValue::Detailed { pattern, .. }) => pattern.as_str(),
            _ => continue,
        };
        for alternative in text.split('|') {
            alternatives.insert(alternative.to_string());
        }
    }
    alternatives.into_iter().collect::<Vec<_>>().join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PatternRegistry {
        PatternRegistry::embedded().unwrap()
    }

    #[test]
    fn test_embedded_document_loads() {
        let reg = registry();
        assert!(!reg.prompt_detection_order().is_empty());
    }

    #[test]
    fn test_generic_fallback() {
        let reg = registry();
        // XE does not override `more`; the generic pattern must be served.
        assert_eq!(
            reg.pattern_text("XE", "more").unwrap(),
            reg.pattern_text("generic", "more").unwrap()
        );
    }

    #[test]
    fn test_platform_override_wins() {
        let reg = registry();
        assert_ne!(
            reg.pattern_text("XR", "prompt").unwrap(),
            reg.pattern_text("generic", "prompt").unwrap()
        );
    }

    #[test]
    fn test_unknown_name_is_error() {
        let reg = registry();
        assert!(reg.pattern("XR", "no_such_pattern").is_err());
    }

    #[test]
    fn test_union_list_value() {
        let reg = registry();
        let standby = reg.pattern_text("generic", "standby").unwrap();
        assert!(standby.contains("RP Node is not ready"));
        assert!(standby.contains("tandby console disabled"));
    }

    #[test]
    fn test_template_has_no_compiled_form() {
        let reg = registry();
        assert!(reg.pattern_text("generic", "prompt_dynamic").is_ok());
        assert!(reg.pattern("generic", "prompt_dynamic").is_err());
    }

    #[test]
    fn test_description() {
        let reg = registry();
        let dscr = reg.description("generic", "syntax_error").unwrap();
        assert_eq!(dscr, "Command rejected by the CLI parser");
        // Scalar entries use the key as description.
        assert_eq!(reg.description("generic", "more").unwrap(), "more");
    }

    #[test]
    fn test_platform_classification() {
        let reg = registry();
        assert_eq!(
            reg.platform_for_prompt("RP/0/RP0/CPU0:ios#"),
            Some("XR")
        );
        assert_eq!(reg.platform_for_prompt("Router#"), Some("IOS"));
        assert_eq!(reg.platform_for_prompt("Router>"), Some("IOS"));
        assert_eq!(
            reg.platform_for_prompt("sysadmin-vm:0_RSP0#"),
            Some("Calvados")
        );
        assert_eq!(
            reg.platform_for_prompt("[sysadmin-vm:0_RSP0:~]$"),
            Some("Calvados")
        );
        assert_eq!(
            reg.platform_for_prompt("[xr-vm_node0_RSP0_CPU0:~]$"),
            Some("Windriver")
        );
        assert_eq!(reg.platform_for_prompt("no prompt here"), None);
    }

    #[test]
    fn test_hostname_capture() {
        let reg = registry();
        let prompt = reg.pattern("XR", "prompt").unwrap();
        let caps = prompt.captures("RP/0/RP0/CPU0:ios#").unwrap();
        assert_eq!(&caps["hostname"], "ios");
    }

    #[test]
    fn test_compilation_stable() {
        let a = PatternRegistry::embedded().unwrap();
        let b = PatternRegistry::embedded().unwrap();
        assert_eq!(
            a.pattern_text("generic", "standby").unwrap(),
            b.pattern_text("generic", "standby").unwrap()
        );
        assert_eq!(a.prompt_detection_order(), b.prompt_detection_order());
    }
}
