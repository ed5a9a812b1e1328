//! Telnet protocol adapter.

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
    AuthenticationError, Fsm, FsmAction, FsmEvent, SaveLastPattern, SendPassword, SendText,
    SendUsername, StandbyConsole, Transition, UnableToConnect,
};
use crate::hop::HopInfo;
use crate::util::pattern_to_str;

/// Telnet connection established.
static ESCAPE_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new("Escape character is|Open").unwrap());
/// Terminal servers acknowledge a line password this way.
static PASSWORD_OK: Lazy<Regex> = Lazy::new(|| Regex::new("[Pp]assword [Oo][Kk]").unwrap());

/// Telnet adapter; `console` switches in the console-port dialog quirks.
pub struct Telnet {
    hop: HopInfo,
    config: Arc<Config>,
    console: bool,
    last_pattern: Option<Regex>,
}

impl Telnet {
    pub fn new(hop: HopInfo, config: Arc<Config>, console: bool) -> Self {
        Self {
            hop,
            config,
            console,
            last_pattern: None,
        }
    }

    fn raise_timeout(&self, host: &str) -> FsmAction {
        let host = host.to_string();
        FsmAction::raise(move || Error::connection_timeout("Connection timeout", Some(&host)))
    }
}

#[async_trait]
impl Protocol for Telnet {
    fn get_command(&self) -> String {
        format!("telnet {} {}", self.hop.host, self.hop.port)
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
            ESCAPE_CHAR.clone().into(),                // 0
            patterns.press_return.clone().into(),      // 1
            patterns.standby.clone().into(),           // 2
            patterns.username.clone().into(),          // 3
            patterns.password.clone().into(),          // 4
            patterns.more.clone().into(),              // 5
            prompt_re.into(),                          // 6
            patterns.rommon.clone().into(),            // 7
            patterns.unable_to_connect.clone().into(), // 8
            patterns.timeout.clone().into(),           // 9
            FsmEvent::Timeout,                         // 10
            PASSWORD_OK.clone().into(),                // 11
        ];

        let escape_action = if self.console {
            FsmAction::run(SendText::new("\r\n"))
        } else {
            FsmAction::None
        };
        let standby_action = if self.console {
            let host = host.clone();
            FsmAction::raise(move || Error::connection("Standby console", Some(&host)))
        } else {
            FsmAction::run(StandbyConsole)
        };

        let mut transitions = vec![
            Transition::new(0, &[0], 1, escape_action, self.config.esc_char_timeout),
            Transition::new(
                1,
                &[0, 1],
                1,
                FsmAction::run(SendText::new("\r\n")),
                Duration::from_secs(10),
            ),
            Transition::new(
                11,
                &[0, 1],
                1,
                FsmAction::run(SendText::new("\r\n")),
                Duration::from_secs(10),
            ),
            Transition::new(2, &[0, 5], -1, standby_action, Duration::ZERO),
            Transition::new(
                3,
                &[0, 1, 5, 6],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ),
            Transition::new(
                4,
                &[0, 1, 5],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ),
            Transition::new(
                5,
                &[0, 5],
                7,
                FsmAction::run(SendText::new("q")),
                Duration::from_secs(10),
            ),
            // The pager redraws once more to erase itself.
            Transition::new(5, &[7], 8, FsmAction::None, Duration::from_secs(10)),
            Transition::new(
                7,
                &[0, 1, 5],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ),
            Transition::new(8, &[0, 1], -1, FsmAction::run(UnableToConnect), Duration::ZERO),
            Transition::new(9, &[0, 1], -1, self.raise_timeout(&host), Duration::ZERO),
            Transition::new(
                10,
                &[0, 1],
                5,
                FsmAction::run(SendText::new("\r\n")),
                Duration::from_secs(10),
            ),
            Transition::new(10, &[5], -1, self.raise_timeout(&host), Duration::ZERO),
        ];
        if self.console {
            // Console echoes can redisplay the prompt; a prompt seen in
            // an intermediate state still terminates the dialog.
            transitions.push(Transition::new(6, &[0, 5], 0, FsmAction::None, Duration::from_secs(10)));
            transitions.push(Transition::new(
                6,
                &[1, 6, 8, 5],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ));
        } else {
            transitions.push(Transition::new(6, &[0, 1, 5], 0, FsmAction::None, Duration::from_secs(10)));
            transitions.push(Transition::new(
                6,
                &[6, 8, 5],
                -1,
                FsmAction::run(SaveLastPattern),
                Duration::ZERO,
            ));
        }

        let name = if self.console {
            "TELNET-CONNECT-CONSOLE"
        } else {
            "TELNET-CONNECT"
        };
        let mut fsm = Fsm::new(name, events, transitions, self.config.connect_timeout)
            .with_init_pattern(self.last_pattern.take());
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
        debug!("EXPECTED_PROMPT={}", pattern_to_str(Some(&prompt_re)));
        let host = device.hostname.clone();

        let events: Vec<FsmEvent> = vec![
            patterns.username.clone().into(),             // 0
            patterns.password.clone().into(),             // 1
            prompt_re.into(),                             // 2
            patterns.rommon.clone().into(),               // 3
            patterns.unable_to_connect.clone().into(),    // 4
            patterns.authentication_error.clone().into(), // 5
            FsmEvent::Timeout,                            // 6
            FsmEvent::Eof,                                // 7
        ];

        let transitions = vec![
            Transition::new(
                0,
                &[0],
                1,
                FsmAction::run(SendUsername(self.hop.username.clone())),
                Duration::from_secs(10),
            ),
            Transition::new(0, &[1], 1, FsmAction::None, Duration::from_secs(10)),
            Transition::new(
                1,
                &[0, 1],
                2,
                FsmAction::run(SendPassword(self.hop.password_str())),
                self.config.first_prompt_timeout,
            ),
            Transition::new(0, &[2], -1, FsmAction::run(AuthenticationError), Duration::ZERO),
            Transition::new(1, &[2], -1, FsmAction::run(AuthenticationError), Duration::ZERO),
            Transition::new(
                5,
                &[1, 2],
                -1,
                FsmAction::run(AuthenticationError),
                Duration::ZERO,
            ),
            Transition::new(2, &[0, 1, 2], -1, FsmAction::None, Duration::ZERO),
            Transition::new(
                3,
                &[0],
                -1,
                FsmAction::run(SendText::new("\r\n")),
                Duration::ZERO,
            ),
            // One chance to recover from a silent line.
            Transition::new(
                6,
                &[0],
                1,
                FsmAction::run(SendText::new("\r\n")),
                Duration::from_secs(10),
            ),
            Transition::new(6, &[2], -1, FsmAction::None, Duration::ZERO),
            Transition::new(6, &[3], -1, self.raise_timeout(&host), Duration::ZERO),
            Transition::new(4, &[0, 1, 2], -1, FsmAction::run(UnableToConnect), Duration::ZERO),
        ];

        let mut fsm = Fsm::new("TELNET-AUTH", events, transitions, self.config.connect_timeout)
            .with_init_pattern(self.last_pattern.take());
        let outcome = fsm.run(device, ctrl).await?;
        Ok(outcome.success)
    }

    async fn disconnect(&mut self, device: &mut Device, ctrl: &mut Controller) -> Result<()> {
        if self.console {
            console_disconnect(device, ctrl).await
        } else {
            ctrl.send("\x04").await
        }
    }
}
