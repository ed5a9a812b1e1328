//! Cisco NX-OS driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::Result;
use crate::patterns::PatternRegistry;

static REBOOT_CONFIRM: Lazy<Regex> =
    Lazy::new(|| Regex::new("This command will reboot the system").unwrap());

#[derive(Debug)]
pub struct NxosDriver {
    core: DriverCore,
}

impl NxosDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "NX-OS")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for NxosDriver {
    fn platform(&self) -> &'static str {
        "NX-OS"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn inventory_cmd(&self) -> Option<&'static str> {
        Some("show inventory chassis")
    }

    fn users_cmd(&self) -> Option<&'static str> {
        Some("show users")
    }

    fn target_prompt_components(&self) -> &'static [&'static str] {
        &["prompt_dynamic", "prompt_default", "rommon"]
    }

    fn prepare_terminal_session(&self) -> &'static [&'static str] {
        &["terminal len 0", "terminal width 511"]
    }

    fn families(&self) -> &'static [(&'static str, &'static str)] {
        &[("Nexus9", "N9K"), ("N9K-C9", "N9K")]
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

    /// NX-OS prompts look like plain IOS prompts; the classifier's IOS
    /// verdict must not demote this driver.
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

    async fn reload(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        reload_timeout: Duration,
        save_config: bool,
    ) -> Result<bool> {
        if save_config {
            device
                .send(
                    ctrl,
                    "copy running-config startup-config",
                    Duration::from_secs(60),
                    None,
                )
                .await?;
        }
        device
            .send(ctrl, "reload", reload_timeout, Some(REBOOT_CONFIRM.clone()))
            .await?;
        ctrl.sendline("y").await?;
        device.connected = false;
        Ok(true)
    }
}
