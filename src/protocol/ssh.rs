//! SSH protocol adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{console_disconnect, Protocol};
use crate::config::Config;
use crate::controller::Controller;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fsm::{
    Action, AuthenticationError, Fsm, FsmAction, FsmContext, FsmEvent, SaveLastPattern,
    SendLine, SendPassword, SendText, Transition, UnableToConnect,
};
use crate::hop::HopInfo;

static MODULUS_TOO_SMALL: Lazy<Regex> = Lazy::new(|| Regex::new("modulus too small").unwrap());
static PROTOCOL_DIFFER: Lazy<Regex> =
    Lazy::new(|| Regex::new("Protocol major versions differ").unwrap());
static NEW_SSH_KEY: Lazy<Regex> = Lazy::new(|| Regex::new("fingerprint is").unwrap());
static KNOWN_HOSTS: Lazy<Regex> =
    Lazy::new(|| Regex::new("added.*to the list of known hosts").unwrap());
static HOST_KEY_FAILED: Lazy<Regex> = Lazy::new(|| Regex::new("key verification failed").unwrap());

/// SSH adapter; `console` switches in the console-port disconnect.
pub struct Ssh {
    hop: HopInfo,
    config: Arc<Config>,
    console: bool,
    last_pattern: Option<Regex>,
}

impl Ssh {
    pub fn new(hop: HopInfo, config: Arc<Config>, console: bool) -> Self {
        Self {
            hop,
            config,
            console,
            last_pattern: None,
        }
    }

    fn command_for_version(&self, version: u8) -> String {
        match self.hop.username {
            Some(ref username) => format!(
                "ssh -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no -{} -p {} {}@{}",
                version, self.hop.port, username, self.hop.host
            ),
            None => format!(
                "ssh -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no -{} -p {} {}",
                version, self.hop.port, self.hop.host
            ),
        }
    }
}

/// Respawn the ssh client pinned to protocol version 1.
///
/// Old key exchange (small modulus) or a version mismatch cannot be
/// negotiated away by the modern client; the dialog restarts on SSHv1.
struct FallbackToSshV1 {
    command: String,
}

#[async_trait]
impl Action for FallbackToSshV1 {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        debug!("falling back to SSHv1");
        ctx.ctrl.close();
        ctx.ctrl.spawn_session(&self.command).await?;
        Ok(true)
    }
}

#[async_trait]
impl Protocol for Ssh {
    fn get_command(&self) -> String {
        self.command_for_version(2)
    }

    async fn connect(&mut self, device: &mut Device, ctrl: &mut Controller) -> Result<bool> {
        let patterns = device.driver.patterns().clone();
        let prompt_re = device
            .prompt_re
            .clone()
            .unwrap_or_else(|| patterns.prompt.clone());
        debug!("EXPECTED_PROMPT={}", prompt_re.as_str());
        let host = device.hostname.clone();

        let events: Vec<FsmEvent> = vec![
            patterns.password.clone().into(),          // 0
            prompt_re.into(),                          // 1
            patterns.unable_to_connect.clone().into(), // 2
            NEW_SSH_KEY.clone().into(),                // 3
            KNOWN_HOSTS.clone().into(),                // 4
            HOST_KEY_FAILED.clone().into(),            // 5
            MODULUS_TOO_SMALL.clone().into(),          // 6
            PROTOCOL_DIFFER.clone().into(),            // 7
            patterns.timeout.clone().into(),           // 8
            FsmEvent::Timeout,                         // 9
        ];

        let fallback = || {
            FsmAction::run(FallbackToSshV1 {
                command: self.command_for_version(1),
            })
        };
        let raise_conn = |message: &'static str| {
            let host = host.clone();
            FsmAction::raise(move || Error::connection(message, Some(&host)))
        };
        let raise_timeout = || {
            let host = host.clone();
            FsmAction::raise(move || Error::connection_timeout("Connection timeout", Some(&host)))
        };

        // States: 0 fresh, 4 after a v1 fallback (one retry only),
        // 5 after a timeout nudge.
        let transitions = vec![
            Transition::new(
                0,
                &[0, 1, 4, 5],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ),
            Transition::new(
                1,
                &[0, 4, 5],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ),
            // Covers all messages indicating the link never came up.
            Transition::new(2, &[0, 4], -1, FsmAction::run(UnableToConnect), Duration::ZERO),
            Transition::new(
                3,
                &[0, 4],
                1,
                FsmAction::run(SendLine::new("yes")),
                Duration::from_secs(10),
            ),
            Transition::new(4, &[0, 1], 0, FsmAction::None, Duration::ZERO),
            Transition::new(4, &[4], 4, FsmAction::None, Duration::ZERO),
            Transition::new(5, &[0, 4], -1, raise_conn("Host key failed"), Duration::ZERO),
            Transition::new(6, &[0], 4, fallback(), Duration::ZERO),
            Transition::new(6, &[4], -1, raise_conn("SSH version fallback failed"), Duration::ZERO),
            Transition::new(7, &[0], 4, fallback(), Duration::ZERO),
            Transition::new(
                7,
                &[4],
                -1,
                raise_conn("Protocol version differs"),
                Duration::ZERO,
            ),
            Transition::new(
                9,
                &[0, 4],
                5,
                FsmAction::run(SendText::new("\r\n")),
                Duration::from_secs(10),
            ),
            Transition::new(9, &[5], -1, raise_timeout(), Duration::ZERO),
            Transition::new(8, &[0, 4], -1, raise_timeout(), Duration::ZERO),
        ];

        let mut fsm = Fsm::new("SSH-CONNECT", events, transitions, self.config.connect_timeout)
            .with_search_window(160);
        let outcome = fsm.run(device, ctrl).await?;
        if outcome.saved_pattern.is_some() {
            self.last_pattern = outcome.saved_pattern;
        }
        Ok(outcome.success)
    }

    async fn authenticate(&mut self, device: &mut Device, ctrl: &mut Controller) -> Result<bool> {
        let patterns = device.driver.patterns().clone();
        let prompt_re = device
            .prompt_re
            .clone()
            .unwrap_or_else(|| patterns.prompt.clone());
        debug!("EXPECTED_PROMPT={}", prompt_re.as_str());
        let host = device.hostname.clone();

        let events: Vec<FsmEvent> = vec![
            patterns.press_return.clone().into(), // 0
            patterns.password.clone().into(),     // 1
            prompt_re.into(),                     // 2
            FsmEvent::Timeout,                    // 3
        ];

        // On a jump host a quiet line gets one newline nudge; on the
        // target it means the prompt never came.
        let quiet_line_action = if device.is_target {
            let host = host.clone();
            FsmAction::raise(move || {
                Error::connection("Error getting device prompt", Some(&host))
            })
        } else {
            FsmAction::run(SendText::new("\r\n"))
        };

        let transitions = vec![
            Transition::new(
                0,
                &[0, 1],
                1,
                FsmAction::run(SendText::new("\r\n")),
                Duration::from_secs(10),
            ),
            Transition::new(
                1,
                &[0],
                1,
                FsmAction::run(SendPassword(self.hop.password_str())),
                self.config.first_prompt_timeout,
            ),
            Transition::new(1, &[1], -1, FsmAction::run(AuthenticationError), Duration::ZERO),
            Transition::new(2, &[0, 1], -1, FsmAction::None, Duration::ZERO),
            Transition::new(3, &[1], -1, quiet_line_action, Duration::ZERO),
        ];

        let mut fsm = Fsm::new("SSH-AUTH", events, transitions, Duration::from_secs(30))
            .with_init_pattern(self.last_pattern.take());
        Ok(fsm.run(device, ctrl).await?.success)
    }

    async fn disconnect(&mut self, device: &mut Device, ctrl: &mut Controller) -> Result<()> {
        if self.console {
            console_disconnect(device, ctrl).await
        } else {
            ctrl.sendline("\x03").await?;
            ctrl.sendline("\x04").await
        }
    }
}
