//! Device: per-hop state for jump hosts and the target.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::controller::Controller;
use crate::driver::{make_driver, PlatformDriver};
use crate::error::{Error, Result};
use crate::fsm::{Fsm, FsmEvent, Transition};
use crate::hop::HopInfo;
use crate::patterns::PatternRegistry;
use crate::protocol::Protocol;

/// Caller-supplied sink for human-readable progress messages.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration mode derived from the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Global,
    Config,
    Admin,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Global => f.write_str("global"),
            Mode::Config => f.write_str("config"),
            Mode::Admin => f.write_str("admin"),
        }
    }
}

/// Unique Device Identifier of the chassis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Udi {
    pub name: String,
    pub description: String,
    pub pid: String,
    pub vid: String,
    pub sn: String,
}

static UDI_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)name: (?P<name>.*?),? descr").unwrap());
static UDI_DESCR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)descr: (?P<description>.*)").unwrap());
static UDI_PID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)pid: (?P<pid>[^,\s]+)").unwrap());
static UDI_VID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)vid: (?P<vid>[^,\s]+)").unwrap());
static UDI_SN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)sn: (?P<sn>\S+)").unwrap());

/// Parse the chassis UDI out of an inventory listing.
///
/// When the listing covers multiple modules, the record whose name
/// mentions the chassis is preferred.
pub fn parse_inventory(inventory_output: &str) -> Udi {
    let lines: Vec<&str> = inventory_output.lines().collect();
    let record = lines
        .iter()
        .position(|line| {
            let lower = line.to_lowercase();
            lower.contains("chassis") && lower.contains("name")
        })
        .map(|index| {
            let next = lines.get(index + 1).copied().unwrap_or("");
            format!("{}\n{}", lines[index], next)
        })
        .unwrap_or_else(|| inventory_output.to_string());

    let group = |re: &Regex, name: &str| {
        re.captures(&record)
            .and_then(|caps| caps.name(name).map(|m| m.as_str().to_string()))
            .unwrap_or_default()
    };

    Udi {
        name: group(&UDI_NAME_RE, "name").trim_matches(['"', ' ', ',']).to_string(),
        description: group(&UDI_DESCR_RE, "description")
            .trim_matches(['"', ' '])
            .to_string(),
        pid: group(&UDI_PID_RE, "pid"),
        vid: group(&UDI_VID_RE, "vid"),
        sn: group(&UDI_SN_RE, "sn").trim().to_string(),
    }
}

/// Serializable snapshot of one device, memoized in the result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub family: Option<String>,
    pub platform: Option<String>,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub udi: Option<Udi>,
    pub driver_name: String,
    pub mode: Option<Mode>,
    pub is_console: Option<bool>,
    pub is_target: bool,
    pub prompt: Option<String>,
    pub hostname: String,
}

/// A single hop: jump host or target device.
pub struct Device {
    pub node: HopInfo,
    /// `host:port` until a real hostname is discovered from the prompt.
    pub hostname: String,
    pub is_target: bool,
    pub is_console: Option<bool>,
    pub prompt: Option<String>,
    /// Composed matcher recognizing the prompt in any mode.
    pub prompt_re: Option<Regex>,
    pub mode: Option<Mode>,
    pub connected: bool,
    pub driver: Arc<dyn PlatformDriver>,
    pub protocol: Option<Box<dyn Protocol>>,
    /// Sentinel plus the matchers of every earlier hop in the chain,
    /// refreshed by the chain before each connect.
    pub previous_prompts: Vec<Regex>,
    pub last_command_result: Option<String>,
    /// Pager pages accumulated while waiting for the terminator.
    pub pending_output: String,
    pub last_error_msg: Option<String>,
    pub config: Arc<Config>,

    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub family: Option<String>,
    pub platform: Option<String>,
    pub udi: Option<Udi>,

    registry: Arc<PatternRegistry>,
    msg_callback: Option<MessageCallback>,
    version_text: Option<String>,
    inventory_text: Option<String>,
    users_text: Option<String>,
    hostname_text: Option<String>,
}

impl Device {
    pub fn new(
        node: HopInfo,
        driver_name: &str,
        is_target: bool,
        registry: Arc<PatternRegistry>,
        config: Arc<Config>,
    ) -> Result<Self> {
        let driver = make_driver(driver_name, &registry)?;
        Ok(Self {
            hostname: format!("{}:{}", node.host, node.port),
            node,
            is_target,
            is_console: None,
            prompt: None,
            prompt_re: None,
            mode: None,
            connected: false,
            driver,
            protocol: None,
            previous_prompts: Vec::new(),
            last_command_result: None,
            pending_output: String::new(),
            last_error_msg: None,
            config,
            os_type: None,
            os_version: None,
            family: None,
            platform: None,
            udi: None,
            registry,
            msg_callback: None,
            version_text: None,
            inventory_text: None,
            users_text: None,
            hostname_text: None,
        })
    }

    pub fn set_msg_callback(&mut self, callback: Option<MessageCallback>) {
        self.msg_callback = callback;
    }

    /// Push a progress message to the caller and the log.
    pub fn emit_info(&self, message: &str) {
        if let Some(ref callback) = self.msg_callback {
            callback(message);
        }
        info!("{}", message);
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.platform()
    }

    /// Swap the driver strategy; the prompt matcher is recomposed under
    /// the new driver.
    pub fn set_driver_name(&mut self, driver_name: &str) -> Result<()> {
        if driver_name != self.driver.platform() {
            self.driver = make_driver(driver_name, &self.registry)?;
            debug!("driver switched to {}", self.driver.platform());
            self.recompose_prompt()?;
        }
        Ok(())
    }

    /// Record a freshly captured prompt and re-classify the platform
    /// from it.
    pub fn update_driver(&mut self, prompt: &str) -> Result<()> {
        debug!("{}: new prompt '{}'", self.driver.platform(), prompt);
        self.prompt = Some(prompt.to_string());
        let driver_name = self.driver.update_driver(prompt);
        self.set_driver_name(&driver_name)
    }

    fn recompose_prompt(&mut self) -> Result<()> {
        if let Some(prompt) = self.prompt.clone() {
            self.prompt_re = Some(self.driver.make_dynamic_prompt(&prompt)?);
        }
        Ok(())
    }

    pub fn update_config_mode(&mut self, prompt: Option<&str>) {
        let from = match prompt {
            Some(p) => p.to_string(),
            None => self.prompt.clone().unwrap_or_default(),
        };
        self.mode = Some(self.driver.update_config_mode(&from));
    }

    pub fn update_hostname(&mut self) {
        let prompt = self.prompt.clone().unwrap_or_default();
        self.hostname = self.driver.update_hostname(&prompt, &self.hostname);
    }

    /// Snapshot for the result cache.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: self.family.clone(),
            platform: self.platform.clone(),
            os_type: self.os_type.clone(),
            os_version: self.os_version.clone(),
            udi: self.udi.clone(),
            driver_name: self.driver.platform().to_string(),
            mode: self.mode,
            is_console: self.is_console,
            is_target: self.is_target,
            prompt: self
                .prompt
                .as_ref()
                .map(|p| self.driver.base_prompt(p, self.is_target)),
            hostname: self.hostname.clone(),
        }
    }

    /// Repopulate discovery state from a cached snapshot.
    pub fn apply_info(&mut self, info: &DeviceInfo) -> Result<()> {
        debug!("update [{}] from cached info", self.hostname);
        self.family = info.family.clone();
        self.platform = info.platform.clone();
        self.os_type = info.os_type.clone();
        self.os_version = info.os_version.clone();
        self.udi = info.udi.clone();
        self.mode = info.mode;
        self.is_console = info.is_console;
        self.prompt = info.prompt.clone();
        self.hostname = info.hostname.clone();
        self.set_driver_name(&info.driver_name)?;
        self.recompose_prompt()
    }

    /// Forget everything discovery produced; forces rediscovery.
    pub fn clear_info(&mut self) {
        self.version_text = None;
        self.inventory_text = None;
        self.users_text = None;
        self.hostname_text = None;
        self.os_version = None;
        self.os_type = None;
        self.family = None;
        self.platform = None;
        self.udi = None;
        self.prompt = None;
        self.prompt_re = None;
    }

    /// Protocol name for this hop; console-attached hops use the console
    /// adapter variant.
    pub fn protocol_name(&self) -> String {
        let mut name = self.node.scheme.as_str().to_string();
        if self.is_console == Some(true) {
            name.push_str("_console");
        }
        name
    }

    /// Connect this hop: protocol handshake, authentication, prompt
    /// capture, then discovery when this is the target.
    pub async fn connect(&mut self, ctrl: &mut Controller) -> Result<()> {
        ctrl.set_host(&self.hostname);
        self.prompt_re = match self.prompt {
            Some(ref prompt) => Some(self.driver.make_dynamic_prompt(prompt)?),
            None => Some(self.driver.patterns().prompt.clone()),
        };

        let mut protocol = self
            .protocol
            .take()
            .ok_or_else(|| Error::General("device has no protocol adapter".to_string()))?;
        let outcome = self.connect_inner(ctrl, protocol.as_mut()).await;
        self.protocol = Some(protocol);
        if outcome.is_err() {
            self.connected = false;
        }
        outcome
    }

    async fn connect_inner(
        &mut self,
        ctrl: &mut Controller,
        protocol: &mut dyn Protocol,
    ) -> Result<()> {
        if !protocol.connect(self, ctrl).await? {
            let message = self
                .last_error_msg
                .take()
                .unwrap_or_else(|| "Connection error".to_string());
            return Err(Error::connection(message, Some(&self.hostname)));
        }
        if !protocol.authenticate(self, ctrl).await? {
            let message = self
                .last_error_msg
                .take()
                .unwrap_or_else(|| "Authentication error".to_string());
            return Err(Error::authentication(message, Some(&self.hostname)));
        }

        ctrl.try_read_prompt(1.0).await?;
        if self.prompt.is_none() {
            self.prompt = ctrl.detect_prompt().await?;
        }
        let Some(prompt) = self.prompt.clone() else {
            return Err(Error::connection(
                "Unable to detect the prompt",
                Some(&self.hostname),
            ));
        };

        if self.is_target {
            self.update_config_mode(None);
            if let Some(mode) = self.mode {
                if mode != Mode::Global {
                    let message = "Device is not in global mode. Disconnected.";
                    self.last_error_msg = Some(message.to_string());
                    return Err(Error::connection(message, Some(&self.hostname)));
                }
            }
        }

        self.prompt_re = Some(self.driver.make_dynamic_prompt(&prompt)?);
        self.connected = true;

        if self.is_target {
            self.connected_to_target(ctrl).await?;
        } else {
            if self.os_version.is_none() {
                self.update_os_version(ctrl).await?;
            }
            self.update_hostname();
        }
        Ok(())
    }

    /// Target-side discovery pipeline.
    ///
    /// Terminal preparation deliberately runs after the os-type switch so
    /// it happens once, under the driver that knows the dialect.
    async fn connected_to_target(&mut self, ctrl: &mut Controller) -> Result<()> {
        let prompt = self.prompt.clone().unwrap_or_default();
        self.update_driver(&prompt)?;

        let driver = self.driver.clone();
        driver.after_connect(self, ctrl).await?;

        if self.os_type.is_none() {
            self.update_os_type(ctrl).await?;
        }
        if let Some(os_type) = self.os_type.clone() {
            self.set_driver_name(&os_type)?;
        }

        self.prepare_terminal_session(ctrl).await?;

        if self.os_version.is_none() {
            self.update_os_version(ctrl).await?;
        }
        self.recompose_prompt()?;

        if self.udi.is_none() {
            self.update_udi(ctrl).await?;
        }
        if self.family.is_none() {
            self.update_family(ctrl).await?;
        }
        if self.platform.is_none() {
            self.update_platform();
        }
        if self.is_console.is_none() {
            self.update_console(ctrl).await?;
        }

        let enable_password = self.node.enable_password_str();
        let driver = self.driver.clone();
        driver.enable(self, ctrl, enable_password).await
    }

    /// Issue the driver's terminal-preparation commands, tolerating the
    /// dialects that reject some of them.
    pub async fn prepare_terminal_session(&mut self, ctrl: &mut Controller) -> Result<()> {
        for cmd in self.driver.prepare_terminal_session() {
            match self.send(ctrl, cmd, Duration::from_secs(60), None).await {
                Ok(_) => {}
                Err(Error::CommandSyntax(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.protocol = None;
        self.connected = false;
    }

    /// Send a command and return its output.
    ///
    /// The output is the text strictly between the command echo and the
    /// terminator (the dynamic prompt unless `wait_for_string` overrides
    /// it), with carriage returns stripped.
    ///
    /// # Errors
    ///
    /// [`Error::CommandSyntax`] for rejected commands,
    /// [`Error::CommandTimeout`] when the terminator never arrives, and
    /// [`Error::Connection`] if the session breaks mid-command.
    pub async fn send(
        &mut self,
        ctrl: &mut Controller,
        cmd: &str,
        timeout: Duration,
        wait_for_string: Option<Regex>,
    ) -> Result<String> {
        if !self.connected {
            return Err(Error::connection("Device not connected", Some(&self.hostname)));
        }
        debug!("sending command: '{}'", cmd);
        let output = self
            .execute_command(ctrl, cmd, timeout, wait_for_string)
            .await?;
        info!("command executed successfully: '{}'", cmd);
        Ok(output)
    }

    async fn execute_command(
        &mut self,
        ctrl: &mut Controller,
        cmd: &str,
        timeout: Duration,
        wait_for_string: Option<Regex>,
    ) -> Result<String> {
        self.last_command_result = None;
        self.pending_output.clear();
        ctrl.send_command(cmd).await?;

        let expected = match wait_for_string {
            Some(pattern) => pattern,
            None => self.prompt_re.clone().ok_or_else(|| {
                Error::General("no prompt matcher composed for the device".to_string())
            })?,
        };

        let driver = self.driver.clone();
        let ok = match driver.wait_for_string(self, ctrl, expected, timeout).await {
            Ok(ok) => ok,
            Err(e) if e.is_command() => {
                error!("{}: '{}'", e, cmd);
                return Err(e.with_command(cmd));
            }
            Err(e) => {
                error!("{}: '{}'", e, cmd);
                return Err(e);
            }
        };
        if !ok {
            error!(
                "unexpected session disconnect during '{}' command execution",
                cmd
            );
            return Err(Error::connection(
                "Unexpected session disconnect",
                Some(&self.hostname),
            ));
        }

        let output = match self.last_command_result.take() {
            Some(result) => result,
            None => {
                let mut combined = std::mem::take(&mut self.pending_output);
                combined.push_str(ctrl.before());
                combined.replace('\r', "")
            }
        };
        let second_line_index = output.find('\n').map_or(0, |index| index + 1);
        Ok(output[second_line_index..].to_string())
    }

    /// Run a user-supplied dialog machine after sending `command`.
    pub async fn run_fsm(
        &mut self,
        ctrl: &mut Controller,
        name: &str,
        command: &str,
        events: Vec<FsmEvent>,
        transitions: Vec<Transition>,
        timeout: Duration,
        max_transitions: usize,
    ) -> Result<bool> {
        ctrl.send_command(command).await?;
        let mut fsm = Fsm::new(name, events, transitions, timeout)
            .with_max_transitions(max_transitions);
        Ok(fsm.run(self, ctrl).await?.success)
    }

    /// Version banner, collected on first use.
    pub async fn version_text(&mut self, ctrl: &mut Controller) -> Result<Option<String>> {
        if self.version_text.is_none() {
            debug!("collecting version information");
            let driver = self.driver.clone();
            self.version_text = driver.get_version_text(self, ctrl).await?;
            if self.version_text.is_none() {
                warn!("version info not collected");
            }
        }
        Ok(self.version_text.clone())
    }

    /// Inventory listing, collected on first use.
    pub async fn inventory_text(&mut self, ctrl: &mut Controller) -> Result<Option<String>> {
        if self.inventory_text.is_none() {
            debug!("collecting inventory information");
            let driver = self.driver.clone();
            self.inventory_text = driver.get_inventory_text(self, ctrl).await?;
        }
        Ok(self.inventory_text.clone())
    }

    /// Logged-in users listing, collected on first use.
    pub async fn users_text(&mut self, ctrl: &mut Controller) -> Result<Option<String>> {
        if self.users_text.is_none() {
            debug!("collecting connected users information");
            let driver = self.driver.clone();
            self.users_text = driver.get_users_text(self, ctrl).await?;
        }
        Ok(self.users_text.clone())
    }

    /// Hostname command output, collected on first use.
    pub async fn hostname_text(&mut self, ctrl: &mut Controller) -> Result<Option<String>> {
        if self.hostname_text.is_none() {
            let driver = self.driver.clone();
            self.hostname_text = driver.get_hostname_text(self, ctrl).await?;
        }
        Ok(self.hostname_text.clone())
    }

    pub async fn update_os_type(&mut self, ctrl: &mut Controller) -> Result<()> {
        if let Some(text) = self.version_text(ctrl).await? {
            let os_type = self.driver.get_os_type(&text);
            debug!("SW type: {}", os_type);
            self.os_type = Some(os_type);
        }
        Ok(())
    }

    pub async fn update_os_version(&mut self, ctrl: &mut Controller) -> Result<()> {
        if let Some(text) = self.version_text(ctrl).await? {
            if let Some(os_version) = self.driver.get_os_version(&text) {
                debug!("SW version: {}", os_version);
                self.os_version = Some(os_version);
            }
        }
        Ok(())
    }

    pub async fn update_udi(&mut self, ctrl: &mut Controller) -> Result<()> {
        if let Some(text) = self.inventory_text(ctrl).await? {
            debug!("parsing inventory");
            self.udi = Some(parse_inventory(&text));
        }
        Ok(())
    }

    pub async fn update_family(&mut self, ctrl: &mut Controller) -> Result<()> {
        if let Some(text) = self.version_text(ctrl).await? {
            if let Some(family) = self.driver.get_hw_family(&text) {
                debug!("HW family: {}", family);
                self.family = Some(family);
            }
        }
        Ok(())
    }

    pub fn update_platform(&mut self) {
        if let Some(ref udi) = self.udi {
            if let Some(platform) = self.driver.get_hw_platform(udi) {
                debug!("HW platform: {}", platform);
                self.platform = Some(platform);
            }
        }
    }

    pub async fn update_console(&mut self, ctrl: &mut Controller) -> Result<()> {
        if let Some(text) = self.users_text(ctrl).await? {
            if let Some(is_console) = self.driver.is_console(&text) {
                self.is_console = Some(is_console);
            }
        }
        Ok(())
    }

    /// Escalate to privileged mode using the current driver.
    pub async fn enable(
        &mut self,
        ctrl: &mut Controller,
        enable_password: Option<String>,
    ) -> Result<()> {
        let driver = self.driver.clone();
        driver.enable(self, ctrl, enable_password).await
    }

    /// Reload the device and drive its recovery dialog.
    pub async fn reload(
        &mut self,
        ctrl: &mut Controller,
        reload_timeout: Duration,
        save_config: bool,
        no_reload_cmd: bool,
    ) -> Result<bool> {
        if !no_reload_cmd {
            if let Some(cmd) = self.driver.reload_cmd() {
                ctrl.send_command(cmd).await?;
            }
        }
        let driver = self.driver.clone();
        driver.reload(self, ctrl, reload_timeout, save_config).await
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("node", &self.node.to_string())
            .field("hostname", &self.hostname)
            .field("is_target", &self.is_target)
            .field("connected", &self.connected)
            .field("driver", &self.driver.platform())
            .field("mode", &self.mode)
            .finish()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XR_INVENTORY: &str = r#"NAME: "Rack 0", DESCR: "ASR-9904 AC Chassis"
PID: ASR-9904-AC, VID: V01, SN: FOX1830GT5W
"#;

    #[test]
    fn test_parse_inventory() {
        let udi = parse_inventory(XR_INVENTORY);
        assert_eq!(udi.name, "Rack 0");
        assert_eq!(udi.description, "ASR-9904 AC Chassis");
        assert_eq!(udi.pid, "ASR-9904-AC");
        assert_eq!(udi.vid, "V01");
        assert_eq!(udi.sn, "FOX1830GT5W");
    }

    #[test]
    fn test_parse_inventory_prefers_chassis_record() {
        let listing = format!(
            "NAME: \"module 0/RSP0/CPU0\", DESCR: \"ASR9K Route Switch Processor\"\n\
             PID: A9K-RSP440-TR, VID: V05, SN: FOC1911N41B\n{}",
            XR_INVENTORY
        );
        let udi = parse_inventory(&listing);
        // Both records mention NAME, only the second one is the chassis.
        assert_eq!(udi.pid, "ASR-9904-AC");
    }

    #[test]
    fn test_parse_inventory_empty() {
        let udi = parse_inventory("");
        assert_eq!(udi, Udi::default());
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&Mode::Global).unwrap(), "\"global\"");
        let mode: Mode = serde_json::from_str("\"config\"").unwrap();
        assert_eq!(mode, Mode::Config);
    }
}
