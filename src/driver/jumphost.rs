//! Unix jump host driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::patterns::PatternRegistry;

/// Driver for the Unix hosts sitting between the operator and the
/// device. No discovery beyond `uname` and `hostname` is attempted.
#[derive(Debug)]
pub struct JumphostDriver {
    core: DriverCore,
}

impl JumphostDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "jumphost")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for JumphostDriver {
    fn platform(&self) -> &'static str {
        "jumphost"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn prepare_terminal_session(&self) -> &'static [&'static str] {
        &[]
    }

    async fn get_version_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        Ok(Some(
            device
                .send(ctrl, "uname -sr", Duration::from_secs(10), None)
                .await?,
        ))
    }

    async fn get_hostname_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        match device
            .send(ctrl, "hostname", Duration::from_secs(10), None)
            .await
        {
            Ok(text) => {
                if let Some(first) = text.lines().next() {
                    device.hostname = first.trim().to_string();
                }
                Ok(Some(text))
            }
            Err(e) if e.is_command() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn update_hostname(&self, _prompt: &str, fallback: &str) -> String {
        fallback.to_string()
    }

    /// Unix prompts carry no reliable terminal punctuation, so the whole
    /// prompt is escaped into the matcher.
    fn make_dynamic_prompt(&self, prompt: &str) -> Result<Regex> {
        let template = self.registry().pattern_text(self.platform(), "prompt_dynamic")?;
        let joined = template.replace("{prompt}", &regex::escape(prompt));
        RegexBuilder::new(&joined)
            .multi_line(true)
            .build()
            .map_err(|e| {
                Error::General(format!(
                    "pattern compile error: {} ({}:{})",
                    e,
                    self.platform(),
                    joined
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_prompt_keeps_whole_prompt() {
        let registry = Arc::new(PatternRegistry::embedded().unwrap());
        let driver = JumphostDriver::new(&registry).unwrap();
        let dynamic = driver.make_dynamic_prompt("user@jump:~$").unwrap();
        assert!(dynamic.is_match("\nuser@jump:~$"));
        assert!(dynamic.is_match("user@jump:~$ "));
        assert!(!dynamic.is_match("user@jump:~# extra text"));
    }
}
