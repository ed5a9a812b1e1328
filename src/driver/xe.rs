//! Cisco IOS XE driver, an IOS dialect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::ios::{ios_enable, ios_reload};
use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::Result;
use crate::patterns::PatternRegistry;

#[derive(Debug)]
pub struct XeDriver {
    core: DriverCore,
}

impl XeDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "XE")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for XeDriver {
    fn platform(&self) -> &'static str {
        "XE"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn inventory_cmd(&self) -> Option<&'static str> {
        Some("show inventory")
    }

    fn users_cmd(&self) -> Option<&'static str> {
        Some("show users")
    }

    fn reload_cmd(&self) -> Option<&'static str> {
        Some("reload")
    }

    fn target_prompt_components(&self) -> &'static [&'static str] {
        &["prompt_dynamic", "prompt_default", "rommon"]
    }

    fn prepare_terminal_session(&self) -> &'static [&'static str] {
        &["terminal len 0", "terminal width 0"]
    }

    fn families(&self) -> &'static [(&'static str, &'static str)] {
        &[("ASR-9", "ASR900")]
    }

    async fn get_version_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        Ok(Some(
            device
                .send(ctrl, "show version", Duration::from_secs(120), None)
                .await?,
        ))
    }

    /// XE and IOS share the prompt shape; the classifier's IOS verdict
    /// must not demote this driver.
    fn update_driver(&self, prompt: &str) -> String {
        match self.registry().platform_for_prompt(prompt) {
            Some("IOS") | None => {
                debug!("no update: {}", self.platform());
                self.platform().to_string()
            }
            Some(platform) => {
                debug!("{} -> {}", self.platform(), platform);
                platform.to_string()
            }
        }
    }

    async fn enable(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        enable_password: Option<String>,
    ) -> Result<()> {
        ios_enable(self, device, ctrl, enable_password).await
    }

    async fn reload(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        reload_timeout: Duration,
        save_config: bool,
    ) -> Result<bool> {
        ios_reload(self, device, ctrl, reload_timeout, save_config).await
    }
}
