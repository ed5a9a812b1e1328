//! Per-platform behavior behind a common contract.
//!
//! A driver supplies the commands, regexes, and dialog machines for one
//! command-line operating system. The device holds its current driver as
//! an `Arc<dyn PlatformDriver>` strategy and swaps it whenever the prompt
//! classifier re-identifies the platform, so a session that lands on an
//! IOS XR admin shell seamlessly switches dialect mid-flight.

mod calvados;
mod exr;
mod generic;
mod ios;
mod jumphost;
mod nxos;
mod windriver;
mod xe;
mod xr;

pub use calvados::CalvadosDriver;
pub use exr::ExrDriver;
pub use generic::GenericDriver;
pub use ios::IosDriver;
pub use jumphost::JumphostDriver;
pub use nxos::NxosDriver;
pub use windriver::WindriverDriver;
pub use xe::XeDriver;
pub use xr::XrDriver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::controller::Controller;
use crate::device::{Device, Mode, Udi};
use crate::error::{Error, Result};
use crate::fsm::{
    ConnectionClosed, ConsumePager, ExpectedPrompt, Fsm, FsmAction, FsmEvent, StaysConnected,
    Transition, UnexpectedPrompt,
};
use crate::patterns::PatternRegistry;

/// Matches the OS family token inside a version banner.
static OS_TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new("(XR|XE|NX-OS)").unwrap());

/// The per-platform pattern set every driver resolves at construction.
#[derive(Debug, Clone)]
pub struct DriverPatterns {
    pub prompt: Regex,
    pub syntax_error: Regex,
    pub connection_closed: Regex,
    pub press_return: Regex,
    pub more: Regex,
    pub rommon: Regex,
    pub buffer_overflow: Regex,
    pub username: Regex,
    pub password: Regex,
    pub authentication_error: Regex,
    pub unable_to_connect: Regex,
    pub timeout: Regex,
    pub standby: Regex,
    pub pid2platform: Regex,
    pub platform: Regex,
    pub version: Regex,
    pub vty: Regex,
    pub console: Regex,
}

impl DriverPatterns {
    pub fn from_registry(registry: &PatternRegistry, platform: &str) -> Result<Self> {
        Ok(Self {
            prompt: registry.pattern(platform, "prompt")?,
            syntax_error: registry.pattern(platform, "syntax_error")?,
            connection_closed: registry.pattern(platform, "connection_closed")?,
            press_return: registry.pattern(platform, "press_return")?,
            more: registry.pattern(platform, "more")?,
            rommon: registry.pattern(platform, "rommon")?,
            buffer_overflow: registry.pattern(platform, "buffer_overflow")?,
            username: registry.pattern(platform, "username")?,
            password: registry.pattern(platform, "password")?,
            authentication_error: registry.pattern(platform, "authentication_error")?,
            unable_to_connect: registry.pattern(platform, "unable_to_connect")?,
            timeout: registry.pattern(platform, "timeout")?,
            standby: registry.pattern(platform, "standby")?,
            pid2platform: registry.pattern(platform, "pid2platform")?,
            platform: registry.pattern(platform, "platform")?,
            version: registry.pattern(platform, "version")?,
            vty: registry.pattern(platform, "vty")?,
            console: registry.pattern(platform, "console")?,
        })
    }
}

/// Registry handle plus resolved patterns shared by every driver.
#[derive(Debug)]
pub struct DriverCore {
    pub registry: Arc<PatternRegistry>,
    pub patterns: DriverPatterns,
}

impl DriverCore {
    pub fn new(registry: &Arc<PatternRegistry>, platform: &str) -> Result<Self> {
        Ok(Self {
            registry: registry.clone(),
            patterns: DriverPatterns::from_registry(registry, platform)?,
        })
    }
}

/// Behavioral contract shared by all platforms.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    fn platform(&self) -> &'static str;
    fn core(&self) -> &DriverCore;

    fn patterns(&self) -> &DriverPatterns {
        &self.core().patterns
    }

    fn registry(&self) -> &Arc<PatternRegistry> {
        &self.core().registry
    }

    fn inventory_cmd(&self) -> Option<&'static str> {
        None
    }

    fn users_cmd(&self) -> Option<&'static str> {
        None
    }

    fn enable_cmd(&self) -> &'static str {
        "enable"
    }

    fn reload_cmd(&self) -> Option<&'static str> {
        None
    }

    /// Pattern names composed into the dynamic prompt matcher.
    fn target_prompt_components(&self) -> &'static [&'static str] {
        &["prompt_dynamic"]
    }

    /// Commands issued once after login to tame the terminal.
    fn prepare_terminal_session(&self) -> &'static [&'static str] {
        &["terminal len 0"]
    }

    /// Prefix map from platform strings to normalized hardware families.
    fn families(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Collect the version banner, falling back from the brief form where
    /// the platform lacks it.
    async fn get_version_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        let timeout = Duration::from_secs(120);
        match device.send(ctrl, "show version brief", timeout, None).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_command() => {
                // Not every dialect has the brief form.
                Ok(Some(device.send(ctrl, "show version", timeout, None).await?))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_inventory_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        let Some(cmd) = self.inventory_cmd() else {
            debug!("no inventory command for {}", self.platform());
            return Ok(None);
        };
        match device.send(ctrl, cmd, Duration::from_secs(120), None).await {
            Ok(text) => {
                debug!("inventory collected");
                Ok(Some(text))
            }
            Err(e) if e.is_command() => {
                debug!("unable to collect inventory");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_users_text(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        let Some(cmd) = self.users_cmd() else {
            debug!("no users command for {}", self.platform());
            return Ok(None);
        };
        match device.send(ctrl, cmd, Duration::from_secs(60), None).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_command() => {
                debug!("unable to collect connected users information");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_hostname_text(
        &self,
        _device: &mut Device,
        _ctrl: &mut Controller,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    /// Classify the OS from a version banner.
    fn get_os_type(&self, version_text: &str) -> String {
        let mut os_type = match OS_TYPE_RE.find(version_text) {
            Some(m) => m.as_str().to_string(),
            None => "IOS".to_string(),
        };
        if os_type == "XR" {
            if version_text.contains("Build Information") {
                os_type = "eXR".to_string();
            }
            if version_text.contains("XR Admin Software") {
                os_type = "Calvados".to_string();
            }
        }
        os_type
    }

    fn get_os_version(&self, version_text: &str) -> Option<String> {
        self.patterns()
            .version
            .captures(version_text)
            .and_then(|caps| caps.name("version"))
            .map(|m| m.as_str().to_string())
    }

    fn get_hw_family(&self, version_text: &str) -> Option<String> {
        let platform = self
            .patterns()
            .platform
            .captures(version_text)
            .and_then(|caps| caps.name("platform"))
            .map(|m| m.as_str().to_string())?;
        debug!("platform string: {}", platform);
        for (prefix, family) in self.families() {
            if platform.starts_with(prefix) {
                return Some((*family).to_string());
            }
        }
        Some(platform)
    }

    fn get_hw_platform(&self, udi: &Udi) -> Option<String> {
        self.patterns()
            .pid2platform
            .captures(&udi.pid)
            .and_then(|caps| caps.name("platform"))
            .map(|m| m.as_str().to_string())
    }

    /// Whether the session entered over the console line, judged from the
    /// caller's `*` row of the users listing.
    fn is_console(&self, users_text: &str) -> Option<bool> {
        for line in users_text.lines() {
            if !line.contains('*') {
                continue;
            }
            if self.patterns().vty.is_match(line) {
                debug!("detected connection to vty");
                return Some(false);
            }
            if self.patterns().console.is_match(line) {
                debug!("detected connection to console");
                return Some(true);
            }
        }
        debug!("connection port unknown");
        None
    }

    /// Re-classify the platform from a prompt. A driver never demotes
    /// itself to a sibling sharing the same prompt shape; specializations
    /// override accordingly.
    fn update_driver(&self, prompt: &str) -> String {
        match self.registry().platform_for_prompt(prompt) {
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

    /// Extract the base prompt recorded in discovery data.
    fn base_prompt(&self, prompt: &str, is_target: bool) -> String {
        if !is_target {
            return prompt.to_string();
        }
        let Ok(template) = self
            .registry()
            .pattern_text(self.platform(), "prompt_dynamic")
        else {
            return prompt.to_string();
        };
        let pattern = template.replace("{prompt}", "(?P<prompt>.*?)");
        let Ok(re) = RegexBuilder::new(&pattern).multi_line(true).build() else {
            return prompt.to_string();
        };
        match re.captures(prompt).and_then(|caps| caps.name("prompt")) {
            Some(base) => format!("{}#", base.as_str()),
            None => prompt.to_string(),
        }
    }

    /// Compose the mode-flexible prompt matcher from the captured base
    /// prompt (escaped minus its terminal punctuation).
    fn make_dynamic_prompt(&self, prompt: &str) -> Result<Regex> {
        let mut components = Vec::new();
        for name in self.target_prompt_components() {
            components.push(
                self.registry()
                    .pattern_text(self.platform(), name)?
                    .to_string(),
            );
        }
        let base: String = {
            let mut chars: Vec<char> = prompt.chars().collect();
            chars.pop();
            chars.into_iter().collect()
        };
        let joined = components.join("|").replace("{prompt}", &regex::escape(&base));
        let compiled = RegexBuilder::new(&joined)
            .multi_line(true)
            .build()
            .map_err(|e| {
                Error::General(format!(
                    "pattern compile error: {} ({}:{})",
                    e,
                    self.platform(),
                    joined
                ))
            })?;
        debug!(
            "platform: {} -> dynamic prompt: '{}'",
            self.platform(),
            compiled.as_str()
        );
        Ok(compiled)
    }

    /// Derive the configuration mode from a prompt.
    fn update_config_mode(&self, prompt: &str) -> Mode {
        let mode = if prompt.contains("config") {
            Mode::Config
        } else if prompt.contains("admin") {
            Mode::Admin
        } else {
            Mode::Global
        };
        debug!("mode: {}", mode);
        mode
    }

    /// Extract the hostname from the base prompt; the hop's host string
    /// is the fallback.
    fn update_hostname(&self, prompt: &str, fallback: &str) -> String {
        match self
            .patterns()
            .prompt
            .captures(prompt)
            .and_then(|caps| caps.name("hostname"))
        {
            Some(hostname) => {
                debug!("hostname detected: {}", hostname.as_str());
                hostname.as_str().to_string()
            }
            None => {
                debug!("hostname not set: {}", prompt);
                fallback.to_string()
            }
        }
    }

    /// Canonical send-and-expect machine.
    async fn wait_for_string(
        &self,
        device: &mut Device,
        ctrl: &mut Controller,
        expected: Regex,
        timeout: Duration,
    ) -> Result<bool> {
        wait_for_string_fsm(self.patterns(), device, ctrl, expected, timeout).await
    }

    /// Escalate to privileged mode. Platforms without one log and return.
    async fn enable(
        &self,
        _device: &mut Device,
        _ctrl: &mut Controller,
        _enable_password: Option<String>,
    ) -> Result<()> {
        info!(
            "privileged mode not supported on {} platform",
            self.platform()
        );
        Ok(())
    }

    /// Reload the device and wait for it to boot back up.
    async fn reload(
        &self,
        _device: &mut Device,
        _ctrl: &mut Controller,
        _reload_timeout: Duration,
        _save_config: bool,
    ) -> Result<bool> {
        info!("reload not implemented on {} platform", self.platform());
        Ok(false)
    }

    /// Hook executed right after connecting to the device.
    async fn after_connect(&self, _device: &mut Device, _ctrl: &mut Controller) -> Result<bool> {
        Ok(false)
    }
}

/// Driver factory keyed by platform name; unknown names fall back to the
/// generic driver.
pub fn make_driver(
    name: &str,
    registry: &Arc<PatternRegistry>,
) -> Result<Arc<dyn PlatformDriver>> {
    let driver: Arc<dyn PlatformDriver> = match name {
        "generic" => Arc::new(GenericDriver::new(registry)?),
        "jumphost" => Arc::new(JumphostDriver::new(registry)?),
        "IOS" => Arc::new(IosDriver::new(registry)?),
        "XE" => Arc::new(XeDriver::new(registry)?),
        "XR" => Arc::new(XrDriver::new(registry)?),
        "eXR" => Arc::new(ExrDriver::new(registry)?),
        "Calvados" => Arc::new(CalvadosDriver::new(registry)?),
        "NX-OS" => Arc::new(NxosDriver::new(registry)?),
        "Windriver" => Arc::new(WindriverDriver::new(registry)?),
        unknown => {
            warn!("platform {} not supported, using generic driver", unknown);
            Arc::new(GenericDriver::new(registry)?)
        }
    };
    debug!("made driver: {}", driver.platform());
    Ok(driver)
}

/// The shared wait-for-string machine: waits for the expected terminator
/// while consuming pagers, tolerating a close notice, and failing fast on
/// syntax errors, timeouts, disconnects, and previous-hop prompts.
pub(crate) async fn wait_for_string_fsm(
    patterns: &DriverPatterns,
    device: &mut Device,
    ctrl: &mut Controller,
    expected: Regex,
    timeout: Duration,
) -> Result<bool> {
    let host = device.hostname.clone();
    debug!("expecting: {}", expected.as_str());

    let mut events: Vec<FsmEvent> = vec![
        patterns.syntax_error.clone().into(),      // 0
        patterns.connection_closed.clone().into(), // 1
        expected.into(),                           // 2
        patterns.press_return.clone().into(),      // 3
        patterns.more.clone().into(),              // 4
        FsmEvent::Timeout,                         // 5
        FsmEvent::Eof,                             // 6
        patterns.buffer_overflow.clone().into(),   // 7
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
        Transition::new(5, &[0], -1, raise_cmd_timeout(&host), Duration::ZERO),
        Transition::new(6, &[0, 1], -1, raise_disconnect(&host), Duration::ZERO),
        Transition::new(
            4,
            &[0],
            0,
            FsmAction::run(ConsumePager),
            Duration::from_secs(10),
        ),
        Transition::new(2, &[0, 1], -1, FsmAction::run(ExpectedPrompt), Duration::ZERO),
        Transition::new(3, &[0], -1, FsmAction::run(StaysConnected), Duration::ZERO),
        Transition::new(7, &[0], -1, raise_syntax(&host, "Command too long"), Duration::ZERO),
    ];
    for index in 0..previous_prompts.len() {
        transitions.push(Transition::new(
            8 + index,
            &[0, 1],
            0,
            FsmAction::run(UnexpectedPrompt),
            Duration::ZERO,
        ));
    }

    let mut fsm = Fsm::new("WAIT-4-STRING", events, transitions, timeout);
    Ok(fsm.run(device, ctrl).await?.success)
}

pub(crate) fn raise_syntax(host: &str, message: &'static str) -> FsmAction {
    let host = host.to_string();
    FsmAction::raise(move || Error::command_syntax(message, Some(&host)))
}

pub(crate) fn raise_cmd_timeout(host: &str) -> FsmAction {
    let host = host.to_string();
    FsmAction::raise(move || Error::command_timeout("Timeout waiting for prompt", Some(&host)))
}

pub(crate) fn raise_disconnect(host: &str) -> FsmAction {
    let host = host.to_string();
    FsmAction::raise(move || Error::connection("Unexpected device disconnect", Some(&host)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<PatternRegistry> {
        Arc::new(PatternRegistry::embedded().unwrap())
    }

    #[test]
    fn test_make_driver_known_platforms() {
        let registry = registry();
        for name in [
            "generic",
            "jumphost",
            "IOS",
            "XE",
            "XR",
            "eXR",
            "Calvados",
            "NX-OS",
            "Windriver",
        ] {
            let driver = make_driver(name, &registry).unwrap();
            assert_eq!(driver.platform(), name);
        }
    }

    #[test]
    fn test_make_driver_unknown_falls_back() {
        let driver = make_driver("VMS", &registry()).unwrap();
        assert_eq!(driver.platform(), "generic");
    }

    #[test]
    fn test_os_type_classification() {
        let driver = make_driver("generic", &registry()).unwrap();
        assert_eq!(
            driver.get_os_type("Cisco IOS XR Software, Version 5.3.3"),
            "XR"
        );
        assert_eq!(
            driver.get_os_type("Cisco IOS XR Software, Version 6.1.2\nBuild Information:"),
            "eXR"
        );
        assert_eq!(
            driver.get_os_type("Cisco IOS XR Admin Software, Version 6.1.2"),
            "Calvados"
        );
        assert_eq!(
            driver.get_os_type("Cisco IOS-XE Software, Version 16.9.4"),
            "XE"
        );
        assert_eq!(
            driver.get_os_type("Cisco Nexus Operating System (NX-OS) Software"),
            "NX-OS"
        );
        assert_eq!(
            driver.get_os_type("Cisco IOS Software, C2900 Software"),
            "IOS"
        );
    }

    #[test]
    fn test_os_type_idempotent() {
        let driver = make_driver("generic", &registry()).unwrap();
        let banner = "Cisco IOS XR Software, Version 5.3.3\nBuild Information:";
        assert_eq!(driver.get_os_type(banner), driver.get_os_type(banner));
    }

    #[test]
    fn test_dynamic_prompt_matches_base_prompt() {
        let registry = registry();
        for (platform, prompt) in [
            ("XR", "RP/0/RP0/CPU0:ios#"),
            ("IOS", "Router#"),
            ("NX-OS", "switch#"),
            ("eXR", "RP/0/RP0/CPU0:ios#"),
        ] {
            let driver = make_driver(platform, &registry).unwrap();
            let dynamic = driver.make_dynamic_prompt(prompt).unwrap();
            assert!(
                dynamic.is_match(prompt),
                "{} prompt {:?} not matched by {:?}",
                platform,
                prompt,
                dynamic.as_str()
            );
        }
    }

    #[test]
    fn test_dynamic_prompt_matches_modes() {
        let driver = make_driver("XR", &registry()).unwrap();
        let dynamic = driver.make_dynamic_prompt("RP/0/RP0/CPU0:ios#").unwrap();
        assert!(dynamic.is_match("\nRP/0/RP0/CPU0:ios(config)#"));
        assert!(dynamic.is_match("\nRP/0/RP0/CPU0:ios(config-if)#"));
    }

    #[test]
    fn test_update_config_mode() {
        let driver = make_driver("XR", &registry()).unwrap();
        assert_eq!(
            driver.update_config_mode("RP/0/RP0/CPU0:ios(config)#"),
            Mode::Config
        );
        assert_eq!(
            driver.update_config_mode("RP/0/RP0/CPU0:ios(admin)#"),
            Mode::Admin
        );
        assert_eq!(driver.update_config_mode("RP/0/RP0/CPU0:ios#"), Mode::Global);
    }

    #[test]
    fn test_update_hostname() {
        let driver = make_driver("XR", &registry()).unwrap();
        assert_eq!(
            driver.update_hostname("RP/0/RP0/CPU0:ios#", "10.0.0.1:23"),
            "ios"
        );
        assert_eq!(
            driver.update_hostname("garbage prompt", "10.0.0.1:23"),
            "10.0.0.1:23"
        );
    }

    #[test]
    fn test_is_console() {
        let driver = make_driver("XR", &registry()).unwrap();
        let via_console = "   Line       User    Service\n*  con0/RP0/CPU0  admin  telnet";
        let via_vty = "   Line       User    Service\n*  vty0  admin  ssh";
        assert_eq!(driver.is_console(via_console), Some(true));
        assert_eq!(driver.is_console(via_vty), Some(false));
        assert_eq!(driver.is_console("no caller line"), None);
    }

    #[test]
    fn test_hw_family_mapping() {
        let driver = make_driver("XR", &registry()).unwrap();
        let banner = "cisco ASR9K Series (Intel 686 F2) processor with 12582912K bytes";
        assert_eq!(driver.get_hw_family(banner).as_deref(), Some("ASR9K"));
    }

    #[test]
    fn test_hw_platform_from_udi() {
        let driver = make_driver("XR", &registry()).unwrap();
        let udi = Udi {
            name: "Rack 0".to_string(),
            description: "ASR-9904 AC Chassis".to_string(),
            pid: "ASR-9904-AC".to_string(),
            vid: "V01".to_string(),
            sn: "FOX1830GT5W".to_string(),
        };
        assert_eq!(driver.get_hw_platform(&udi).as_deref(), Some("ASR-9904"));
    }

    #[test]
    fn test_os_version_extraction() {
        let registry = registry();
        let xr = make_driver("XR", &registry).unwrap();
        assert_eq!(
            xr.get_os_version("Cisco IOS XR Software, Version 5.3.3[Default]")
                .as_deref(),
            Some("5.3.3")
        );
        let nxos = make_driver("NX-OS", &registry).unwrap();
        assert_eq!(
            nxos.get_os_version("  NXOS: version 7.0(3)I4(2)").as_deref(),
            Some("7.0(3)I4(2)")
        );
    }

    #[test]
    fn test_base_prompt() {
        let driver = make_driver("XR", &registry()).unwrap();
        assert_eq!(
            driver.base_prompt("RP/0/RP0/CPU0:ios(config)#", true),
            "RP/0/RP0/CPU0:ios#"
        );
        assert_eq!(driver.base_prompt("jump$", false), "jump$");
    }
}
