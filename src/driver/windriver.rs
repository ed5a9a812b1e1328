//! Wind River Linux driver (IOS XR host OS shell).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::Result;
use crate::patterns::PatternRegistry;

#[derive(Debug)]
pub struct WindriverDriver {
    core: DriverCore,
}

impl WindriverDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "Windriver")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for WindriverDriver {
    fn platform(&self) -> &'static str {
        "Windriver"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn target_prompt_components(&self) -> &'static [&'static str] {
        &["prompt_dynamic", "prompt_default", "calvados", "lc"]
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
                .send(ctrl, "cat /etc/issue", Duration::from_secs(10), None)
                .await?,
        ))
    }

    fn get_os_type(&self, _version_text: &str) -> String {
        "Windriver".to_string()
    }
}
