//! Calvados (IOS XR admin plane) driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use regex::Regex;

use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::Result;
use crate::patterns::PatternRegistry;

#[derive(Debug)]
pub struct CalvadosDriver {
    core: DriverCore,
    connected_locally: Regex,
}

impl CalvadosDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            connected_locally: registry.pattern("Calvados", "connected_locally")?,
            core: DriverCore::new(registry, "Calvados")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for CalvadosDriver {
    fn platform(&self) -> &'static str {
        "Calvados"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn inventory_cmd(&self) -> Option<&'static str> {
        Some("show inventory chassis")
    }

    fn target_prompt_components(&self) -> &'static [&'static str] {
        &["prompt_dynamic", "prompt_default", "exr", "windriver"]
    }

    fn prepare_terminal_session(&self) -> &'static [&'static str] {
        &["terminal len 0", "terminal width 0"]
    }

    fn families(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("ASR9K", "ASR9K"),
            ("ASR-9", "ASR9K"),
            ("ASR9", "ASR9K"),
            ("NCS-6", "NCS6K"),
            ("NCS-4", "NCS4K"),
            ("NCS-50", "NCS5K"),
            ("NCS-55", "NCS5500"),
            ("NCS1", "NCS1K"),
            ("NCS-1", "NCS1K"),
        ]
    }

    async fn get_version_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        Ok(Some(
            device
                .send(ctrl, "show version", Duration::from_secs(60), None)
                .await?,
        ))
    }

    fn update_driver(&self, prompt: &str) -> String {
        match self.registry().platform_for_prompt(prompt) {
            // XR and eXR prompts are the same shape; the admin plane
            // always belongs to a 64 bit system.
            Some("XR") => "eXR".to_string(),
            Some(platform) => {
                debug!("{} -> {}", self.platform(), platform);
                platform.to_string()
            }
            None => {
                debug!("no update: {}", self.platform());
                self.platform().to_string()
            }
        }
    }

    /// A local login lands in the admin shell directly; step out of it
    /// so the dialog runs against the XR plane.
    async fn after_connect(&self, device: &mut Device, ctrl: &mut Controller) -> Result<bool> {
        let show_users = device
            .send(ctrl, "show users", Duration::from_secs(120), None)
            .await?;
        if self.connected_locally.is_match(&show_users) {
            debug!("locally connected to Calvados, exiting");
            device.send(ctrl, "exit", Duration::from_secs(60), None).await?;
            return Ok(true);
        }
        Ok(false)
    }
}
