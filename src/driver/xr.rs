//! Cisco IOS XR Classic driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fsm::{
    Fsm, FsmAction, FsmEvent, MessageCallback, Reconnect, ReloadNa, SendBoot, SendPassword,
    SendText, SendUsername, Transition,
};
use crate::patterns::PatternRegistry;

static PROCEED: Lazy<Regex> =
    Lazy::new(|| Regex::new(&regex::escape("Proceed with reload? [confirm]")).unwrap());
static DONE: Lazy<Regex> = Lazy::new(|| Regex::new(&regex::escape("[Done]")).unwrap());
static CONFIGURATION_COMPLETED: Lazy<Regex> =
    Lazy::new(|| Regex::new("SYSTEM CONFIGURATION COMPLETED").unwrap());
static CONFIGURATION_IN_PROCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new("SYSTEM CONFIGURATION IN PROCESS").unwrap());
static CONSOLE: Lazy<Regex> =
    Lazy::new(|| Regex::new("ios con[01]/(?:RS?P)?[01]/CPU0 is now available").unwrap());
static RECONFIGURE_USERNAME_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new("[Nn][Oo] root-system username is configured").unwrap());
static ROOT_USERNAME_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new("Enter root-system username: ").unwrap());
static ROOT_PASSWORD_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new("Enter secret( again)?: ").unwrap());
static CANDIDATE_BOOT_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new("Candidate Boot Image num 0 is .*vm").unwrap());
static RELOAD_NA: Lazy<Regex> =
    Lazy::new(|| Regex::new("Reload to the ROM monitor disallowed from a telnet line").unwrap());

#[derive(Debug)]
pub struct XrDriver {
    core: DriverCore,
}

impl XrDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            core: DriverCore::new(registry, "XR")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for XrDriver {
    fn platform(&self) -> &'static str {
        "XR"
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn inventory_cmd(&self) -> Option<&'static str> {
        Some("admin show inventory chassis")
    }

    fn users_cmd(&self) -> Option<&'static str> {
        Some("show users")
    }

    fn reload_cmd(&self) -> Option<&'static str> {
        Some("admin reload location all")
    }

    fn target_prompt_components(&self) -> &'static [&'static str] {
        &["prompt_dynamic", "prompt_default", "rommon", "xml"]
    }

    fn prepare_terminal_session(&self) -> &'static [&'static str] {
        &[
            "terminal exec prompt no-timestamp",
            "terminal len 0",
            "terminal width 0",
        ]
    }

    fn families(&self) -> &'static [(&'static str, &'static str)] {
        &[("ASR9K", "ASR9K"), ("ASR-9", "ASR9K"), ("CRS", "CRS")]
    }

    /// Full recovery cycle: confirmation, optional rommon boot, console
    /// availability, optional root-system reconfiguration, reconnection.
    async fn reload(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        reload_timeout: Duration,
        _save_config: bool,
    ) -> Result<bool> {
        let patterns = self.patterns().clone();
        let host = device.hostname.clone();
        let username = device.node.username.clone();
        let password = device.node.password_str();
        let reload_cmd_re = Regex::new(&regex::escape(
            self.reload_cmd().unwrap_or_default(),
        ))?;

        let events: Vec<FsmEvent> = vec![
            RELOAD_NA.clone().into(),                   // 0
            DONE.clone().into(),                        // 1
            PROCEED.clone().into(),                     // 2
            CONFIGURATION_IN_PROCESS.clone().into(),    // 3
            patterns.rommon.clone().into(),             // 4
            patterns.press_return.clone().into(),       // 5
            CONSOLE.clone().into(),                     // 6
            CONFIGURATION_COMPLETED.clone().into(),     // 7
            RECONFIGURE_USERNAME_PROMPT.clone().into(), // 8
            FsmEvent::Timeout,                          // 9
            FsmEvent::Eof,                              // 10
            reload_cmd_re.into(),                       // 11
            ROOT_USERNAME_PROMPT.clone().into(),        // 12
            ROOT_PASSWORD_PROMPT.clone().into(),        // 13
            CANDIDATE_BOOT_IMAGE.clone().into(),        // 14
        ];

        let raise_auth = |message: &'static str| {
            let host = host.clone();
            FsmAction::raise(move || Error::authentication(message, Some(&host)))
        };
        let raise_disconnect = {
            let host = host.clone();
            FsmAction::raise(move || Error::connection("Device disconnected", Some(&host)))
        };

        let transitions = vec![
            Transition::new(0, &[0], -1, FsmAction::run(ReloadNa), Duration::ZERO),
            Transition::new(1, &[0], 2, FsmAction::None, Duration::from_secs(120)),
            Transition::new(
                2,
                &[2],
                3,
                FsmAction::run(SendText::new("\r")),
                reload_timeout,
            ),
            Transition::new(
                4,
                &[0, 3],
                3,
                FsmAction::run(SendBoot::new("boot")),
                Duration::from_secs(600),
            ),
            Transition::new(
                14,
                &[0, 3],
                4,
                FsmAction::run(MessageCallback),
                Duration::from_secs(600),
            ),
            Transition::new(6, &[0, 1, 3, 4], 5, FsmAction::None, Duration::from_secs(600)),
            Transition::new(
                5,
                &[5],
                6,
                FsmAction::run(SendText::new("\r")),
                Duration::from_secs(300),
            ),
            // Root credentials are reconfigured with the ones used for
            // the connection.
            Transition::new(8, &[6, 7], 8, FsmAction::None, Duration::from_secs(10)),
            Transition::new(
                12,
                &[8],
                9,
                FsmAction::run(SendUsername(username)),
                Duration::from_secs(1),
            ),
            Transition::new(
                13,
                &[9],
                9,
                FsmAction::run(SendPassword(password)),
                Duration::from_secs(1),
            ),
            Transition::new(3, &[6, 9], 7, FsmAction::None, Duration::from_secs(180)),
            Transition::new(7, &[7], -1, FsmAction::run(Reconnect), Duration::ZERO),
            Transition::new(9, &[0, 1, 2], -1, raise_auth("Unable to reload"), Duration::ZERO),
            Transition::new(
                10,
                &[0, 1, 2, 3, 4, 5],
                -1,
                raise_disconnect,
                Duration::ZERO,
            ),
            Transition::new(
                9,
                &[6],
                7,
                FsmAction::run(SendText::new("\r")),
                Duration::from_secs(180),
            ),
            Transition::new(
                9,
                &[7],
                -1,
                raise_auth("Unable to reconnect after reloading"),
                Duration::ZERO,
            ),
        ];

        let mut fsm = Fsm::new("RELOAD", events, transitions, Duration::from_secs(600));
        Ok(fsm.run(device, ctrl).await?.success)
    }
}
