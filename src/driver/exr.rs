//! Cisco IOS XR 64 bit driver.
//!
//! The 64 bit platforms run a Calvados admin plane next to the XR
//! control plane. `wait_for_string` carries a mini-automaton crossing
//! the admin shell boundary: synthetic newlines fetch the admin prompt,
//! a `terminal length` command is injected, and the intervening noise is
//! cut out of the command result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{raise_cmd_timeout, raise_disconnect, raise_syntax, DriverCore, PlatformDriver};
use crate::controller::Controller;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fsm::{
    ConnectionClosed, ConsumePager, ExpectedPrompt, Fsm, FsmAction, FsmEvent, MessageCallback,
    Reconnect, SendBoot, SendLine, SendText, StaysConnected, StoreCommandResult, Transition,
    UnexpectedPrompt,
};
use crate::patterns::PatternRegistry;

static RELOAD_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(&regex::escape("Reload hardware module ? [no,yes]")).unwrap());
static START_TO_BACKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new("Status report.*START TO BACKUP").unwrap());
static BACKUP_COMPLETED: Lazy<Regex> =
    Lazy::new(|| Regex::new("Status report.*BACKUP HAS COMPLETED SUCCESSFULLY").unwrap());
static DONE: Lazy<Regex> = Lazy::new(|| Regex::new(&regex::escape("[Done]")).unwrap());
static CONSOLE: Lazy<Regex> =
    Lazy::new(|| Regex::new("ios con[01]/(?:RS?P)?[01]/CPU0 is now available").unwrap());
static CONFIGURATION_COMPLETED: Lazy<Regex> =
    Lazy::new(|| Regex::new("SYSTEM CONFIGURATION COMPLETED").unwrap());
static CONFIGURATION_IN_PROCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new("SYSTEM CONFIGURATION IN PROCESS").unwrap());
static BOOTING: Lazy<Regex> =
    Lazy::new(|| Regex::new("Booting IOS-XR 64 bit Boot previously installed image").unwrap());

#[derive(Debug)]
pub struct ExrDriver {
    core: DriverCore,
    calvados: Regex,
    calvados_connect: Regex,
    calvados_term_length: Regex,
}

impl ExrDriver {
    pub fn new(registry: &Arc<PatternRegistry>) -> Result<Self> {
        Ok(Self {
            calvados: registry.pattern("eXR", "calvados")?,
            calvados_connect: registry.pattern("eXR", "calvados_connect")?,
            calvados_term_length: registry.pattern("eXR", "calvados_term_length")?,
            core: DriverCore::new(registry, "eXR")?,
        })
    }
}

#[async_trait]
impl PlatformDriver for ExrDriver {
    fn platform(&self) -> &'static str {
        "eXR"
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
        Some("admin hw-module location all reload")
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
                .send(ctrl, "show version", Duration::from_secs(120), None)
                .await?,
        ))
    }

    /// XR and eXR prompts are identical; the classifier's XR verdict
    /// must not demote this driver.
    fn update_driver(&self, prompt: &str) -> String {
        match self.registry().platform_for_prompt(prompt) {
            Some("XR") | None => {
                debug!("no update: {}", self.platform());
                self.platform().to_string()
            }
            Some(platform) => {
                debug!("{} -> {}", self.platform(), platform);
                platform.to_string()
            }
        }
    }

    async fn wait_for_string(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        expected: Regex,
        timeout: Duration,
    ) -> Result<bool> {
        let patterns = self.patterns().clone();
        let host = device.hostname.clone();
        let calvados_term_wait = device.config.calvados_term_wait;
        debug!("expecting: {}", expected.as_str());
        debug!("calvados prompt: {}", self.calvados.as_str());

        let mut events: Vec<FsmEvent> = vec![
            patterns.syntax_error.clone().into(),      // 0
            patterns.connection_closed.clone().into(), // 1
            expected.into(),                           // 2
            patterns.press_return.clone().into(),      // 3
            patterns.more.clone().into(),              // 4
            FsmEvent::Timeout,                         // 5
            FsmEvent::Eof,                             // 6
            self.calvados.clone().into(),              // 7
            self.calvados_connect.clone().into(),      // 8
            self.calvados_term_length.clone().into(),  // 9
        ];
        let previous_prompts = device.previous_prompts.clone();
        for prompt in &previous_prompts {
            events.push(prompt.clone().into());
        }

        let mut transitions = vec![
            Transition::new(0, &[0], -1, raise_syntax(&host, "Command unknown"), Duration::ZERO),
            Transition::new(
                1,
                &[0],
                1,
                FsmAction::run(ConnectionClosed),
                Duration::from_secs(10),
            ),
            Transition::new(5, &[0, 2], -1, raise_cmd_timeout(&host), Duration::ZERO),
            Transition::new(6, &[0, 1], -1, raise_disconnect(&host), Duration::ZERO),
            Transition::new(
                4,
                &[0],
                0,
                FsmAction::run(ConsumePager),
                Duration::from_secs(10),
            ),
            Transition::new(2, &[0, 1], -1, FsmAction::run(ExpectedPrompt), Duration::ZERO),
            Transition::new(7, &[0], -1, FsmAction::run(ExpectedPrompt), Duration::ZERO),
            Transition::new(3, &[0], -1, FsmAction::run(StaysConnected), Duration::ZERO),
            // `admin` switches to the Calvados shell.
            Transition::new(8, &[0], 2, FsmAction::None, Duration::ZERO),
            Transition::new(7, &[2], 3, FsmAction::None, calvados_term_wait),
            // Getting the prompt only.
            Transition::new(5, &[3], 0, FsmAction::run(SendText::new("\r")), Duration::ZERO),
            // The injected terminal length command.
            Transition::new(9, &[3], 4, FsmAction::None, Duration::ZERO),
            // Ignore for command start.
            Transition::new(7, &[4], 5, FsmAction::None, Duration::ZERO),
            Transition::new(
                7,
                &[5],
                0,
                FsmAction::run(StoreCommandResult),
                Duration::ZERO,
            ),
        ];
        for index in 0..previous_prompts.len() {
            transitions.push(Transition::new(
                10 + index,
                &[0, 1],
                0,
                FsmAction::run(UnexpectedPrompt),
                Duration::ZERO,
            ));
        }

        let mut fsm = Fsm::new("WAIT-4-STRING", events, transitions, timeout);
        Ok(fsm.run(device, ctrl).await?.success)
    }

    /// Reload with backup-status reporting and the hardware-module
    /// confirmation specific to the 64 bit platforms.
    async fn reload(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        _reload_timeout: Duration,
        _save_config: bool,
    ) -> Result<bool> {
        let patterns = self.patterns().clone();
        let host = device.hostname.clone();
        let reload_cmd_re = Regex::new(&regex::escape(self.reload_cmd().unwrap_or_default()))?;

        let events: Vec<FsmEvent> = vec![
            reload_cmd_re.into(),                    // 0
            RELOAD_PROMPT.clone().into(),            // 1
            START_TO_BACKUP.clone().into(),          // 2
            BACKUP_COMPLETED.clone().into(),         // 3
            DONE.clone().into(),                     // 4
            BOOTING.clone().into(),                  // 5
            CONSOLE.clone().into(),                  // 6
            patterns.press_return.clone().into(),    // 7
            CONFIGURATION_COMPLETED.clone().into(),  // 8
            CONFIGURATION_IN_PROCESS.clone().into(), // 9
            FsmEvent::Eof,                           // 10
            patterns.rommon.clone().into(),          // 11
        ];

        let transitions = vec![
            Transition::new(
                1,
                &[0],
                1,
                FsmAction::run(SendLine::new("yes")),
                Duration::from_secs(30),
            ),
            Transition::new(
                2,
                &[1],
                2,
                FsmAction::run(MessageCallback),
                Duration::from_secs(60),
            ),
            Transition::new(
                3,
                &[2],
                3,
                FsmAction::run(MessageCallback),
                Duration::from_secs(10),
            ),
            Transition::new(4, &[3], 4, FsmAction::None, Duration::from_secs(600)),
            Transition::new(
                11,
                &[0, 4],
                5,
                FsmAction::run(SendBoot::new("boot")),
                Duration::from_secs(600),
            ),
            Transition::new(
                5,
                &[0, 4],
                5,
                FsmAction::run(MessageCallback),
                Duration::from_secs(600),
            ),
            Transition::new(6, &[0, 5], 6, FsmAction::None, Duration::from_secs(600)),
            Transition::new(
                7,
                &[6],
                7,
                FsmAction::run(SendText::new("\r")),
                Duration::from_secs(300),
            ),
            Transition::new(9, &[7], 8, FsmAction::None, Duration::from_secs(180)),
            Transition::new(8, &[8], -1, FsmAction::run(Reconnect), Duration::ZERO),
            Transition::new(10, &[0, 1, 2, 3, 4, 5], -1, {
                let host = host.clone();
                FsmAction::raise(move || Error::connection("Device disconnected", Some(&host)))
            }, Duration::ZERO),
        ];

        let mut fsm = Fsm::new("RELOAD", events, transitions, Duration::from_secs(600));
        Ok(fsm.run(device, ctrl).await?.success)
    }
}
