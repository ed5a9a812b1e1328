//! Cisco IOS driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fsm::{
    Disconnect, ExpectedPrompt, Fsm, FsmAction, FsmEvent, SendLine, SendPassword, SendText,
    Transition,
};
use crate::patterns::PatternRegistry;

static SAVE_CONFIG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&regex::escape(
        "System configuration has been modified. Save? [yes/no]: ",
    ))
    .unwrap()
});
static PROCEED: Lazy<Regex> =
    Lazy::new(|| Regex::new(&regex::escape("Proceed with reload? [confirm]")).unwrap());

#[derive(Debug)]
pub struct IosDriver {
    core: DriverCore,
}

impl IosDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "IOS")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for IosDriver {
    fn platform(&self) -> &'static str {
        "IOS"
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
        &[("A9", "ASR900")]
    }

    async fn get_version_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        // No brief form on IOS.
        Ok(Some(
            device
                .send(ctrl, "show version", Duration::from_secs(120), None)
                .await?,
        ))
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

/// Privilege escalation dialog shared by the IOS dialects.
pub(crate) async fn ios_enable(
    driver: &dyn PlatformDriver,
    device: &mut Device,
    ctrl: &mut Controller,
    enable_password: Option<String>,
) -> Result<()> {
    if device.prompt.as_deref().is_some_and(|p| p.ends_with('#')) {
        debug!("device is already in privileged mode");
        return Ok(());
    }

    let patterns = driver.patterns().clone();
    let prompt_re = device
        .prompt_re
        .clone()
        .unwrap_or_else(|| patterns.prompt.clone());
    let host = device.hostname.clone();

    let events: Vec<FsmEvent> = vec![
        patterns.password.clone().into(),
        prompt_re.into(),
        FsmEvent::Timeout,
        FsmEvent::Eof,
    ];
    let raise_auth = |message: &'static str| {
        let host = host.clone();
        FsmAction::raise(move || Error::authentication(message, Some(&host)))
    };
    let transitions = vec![
        Transition::new(
            0,
            &[0],
            1,
            FsmAction::run(SendPassword(enable_password)),
            Duration::from_secs(10),
        ),
        Transition::new(0, &[1], -1, raise_auth("Incorrect enable password"), Duration::ZERO),
        Transition::new(
            1,
            &[0, 1, 2, 3],
            -1,
            FsmAction::run(ExpectedPrompt),
            Duration::ZERO,
        ),
        Transition::new(
            2,
            &[0, 1, 2],
            -1,
            raise_auth("Unable to get privileged mode"),
            Duration::ZERO,
        ),
        Transition::new(3, &[0, 1, 2], -1, {
            let host = host.clone();
            FsmAction::raise(move || Error::connection("Device disconnected", Some(&host)))
        }, Duration::ZERO),
    ];

    ctrl.send_command(driver.enable_cmd()).await?;
    let mut fsm = Fsm::new("IOS-ENABLE", events, transitions, Duration::from_secs(10))
        .with_max_transitions(5);
    fsm.run(device, ctrl).await?;

    if !device.prompt.as_deref().is_some_and(|p| p.ends_with('#')) {
        return Err(Error::authentication(
            "Privileged mode not set",
            Some(&device.hostname),
        ));
    }
    Ok(())
}

/// Reload dialog shared by the IOS dialects: answer the save-config
/// question, confirm the reload, and drop the session.
pub(crate) async fn ios_reload(
    driver: &dyn PlatformDriver,
    device: &mut Device,
    ctrl: &mut Controller,
    _reload_timeout: Duration,
    save_config: bool,
) -> Result<bool> {
    let response = if save_config { "yes" } else { "no" };
    let reload_cmd = driver.reload_cmd().unwrap_or("reload");

    let events: Vec<FsmEvent> = vec![
        SAVE_CONFIG.clone().into(),
        PROCEED.clone().into(),
        FsmEvent::Timeout,
        FsmEvent::Eof,
    ];
    let transitions = vec![
        Transition::new(
            0,
            &[0],
            1,
            FsmAction::run(SendLine::new(response)),
            Duration::from_secs(60),
        ),
        Transition::new(
            1,
            &[0, 1],
            2,
            FsmAction::run(SendText::new("\r")),
            Duration::from_secs(10),
        ),
        // No save-config question seen yet: nudge the reload command again.
        Transition::new(
            2,
            &[0],
            0,
            FsmAction::run(SendLine::new(reload_cmd)),
            Duration::from_secs(10),
        ),
        Transition::new(2, &[2], -1, FsmAction::run(Disconnect), Duration::ZERO),
        Transition::new(3, &[0, 1, 2], -1, FsmAction::run(Disconnect), Duration::ZERO),
    ];

    let mut fsm = Fsm::new("IOS-RELOAD", events, transitions, Duration::from_secs(10))
        .with_max_transitions(5);
    Ok(fsm.run(device, ctrl).await?.success)
}
