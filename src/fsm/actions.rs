//! Predefined actions for the dialog state machines.

use async_trait::async_trait;
use log::debug;

use super::{Action, FsmContext};
use crate::error::{Error, Result};

/// Send raw text to the session.
pub struct SendText(String);

impl SendText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

#[async_trait]
impl Action for SendText {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.ctrl.send(&self.0).await?;
        Ok(true)
    }
}

/// Send a full line to the session.
pub struct SendLine(String);

impl SendLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }
}

#[async_trait]
impl Action for SendLine {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.ctrl.sendline(&self.0).await?;
        Ok(true)
    }
}

/// Answer a username prompt; a missing username tears the session down.
pub struct SendUsername(pub Option<String>);

#[async_trait]
impl Action for SendUsername {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        match self.0 {
            Some(ref username) => {
                ctx.ctrl.sendline(username).await?;
                Ok(true)
            }
            None => {
                ctx.ctrl.close();
                Err(Error::authentication(
                    "Username not provided",
                    Some(ctx.ctrl.host()),
                ))
            }
        }
    }
}

/// Answer a password prompt; a missing password tears the session down.
pub struct SendPassword(pub Option<String>);

#[async_trait]
impl Action for SendPassword {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        match self.0 {
            Some(ref password) => {
                ctx.ctrl.sendline(password).await?;
                Ok(true)
            }
            None => {
                ctx.ctrl.close();
                Err(Error::authentication(
                    "Password not provided",
                    Some(ctx.ctrl.host()),
                ))
            }
        }
    }
}

/// Authentication failed for good; disconnect and raise.
pub struct AuthenticationError;

#[async_trait]
impl Action for AuthenticationError {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.ctrl.close();
        Err(Error::authentication(
            "Authentication failed",
            Some(ctx.ctrl.host()),
        ))
    }
}

/// Record the remote side's explanation of why the link never came up
/// and stop the machine without raising.
pub struct UnableToConnect;

#[async_trait]
impl Action for UnableToConnect {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        let message = format!("{}{}", ctx.ctrl.before(), ctx.ctrl.after());
        ctx.msg = message
            .trim()
            .lines()
            .last()
            .unwrap_or("Connection error")
            .to_string();
        ctx.device.last_error_msg = Some(ctx.msg.clone());
        Ok(false)
    }
}

/// Landed on the standby console; the hop is unusable.
pub struct StandbyConsole;

#[async_trait]
impl Action for StandbyConsole {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.device.is_console = Some(true);
        Err(Error::connection("Standby console", Some(ctx.ctrl.host())))
    }
}

/// The device is going down on purpose (reload); drop the session.
pub struct Disconnect;

#[async_trait]
impl Action for Disconnect {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.msg = "Device is reloading".to_string();
        ctx.ctrl.close();
        ctx.device.connected = false;
        Ok(true)
    }
}

/// Reload refused by the device configuration.
pub struct ReloadNa;

#[async_trait]
impl Action for ReloadNa {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.msg = "Reload to the ROM monitor disallowed from a telnet line. \
                   Set the configuration register boot bits to be non-zero."
            .to_string();
        Ok(false)
    }
}

/// The remote host announced it is closing the connection. The machine
/// keeps running so a jump host prompt can still be detected.
pub struct ConnectionClosed;

#[async_trait]
impl Action for ConnectionClosed {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.msg = "Device disconnected".to_string();
        ctx.device.connected = false;
        Ok(true)
    }
}

/// The device asks for RETURN: the session survives but the device-level
/// dialog is over.
pub struct StaysConnected;

#[async_trait]
impl Action for StaysConnected {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.ctrl.connected = true;
        ctx.device.connected = false;
        Ok(true)
    }
}

/// A previous hop's prompt surfaced: the dialog fell back one hop.
pub struct UnexpectedPrompt;

#[async_trait]
impl Action for UnexpectedPrompt {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        let prompt = ctx.ctrl.after().trim().to_string();
        ctx.msg = format!("Received the jump host prompt: '{}'", prompt);
        ctx.device.connected = false;
        ctx.finished = true;
        Err(Error::connection(
            format!("Unable to connect to the device: got prompt '{}'", prompt),
            Some(ctx.ctrl.host()),
        ))
    }
}

/// The expected prompt arrived: refresh driver, mode, and hostname from
/// its shape.
pub struct ExpectedPrompt;

#[async_trait]
impl Action for ExpectedPrompt {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        let prompt = ctx.ctrl.after().trim().to_string();
        ctx.device.update_driver(&prompt)?;
        ctx.device.update_config_mode(None);
        ctx.device.update_hostname();
        ctx.finished = true;
        Ok(true)
    }
}

/// Consume one pager page: keep the page text, answer the pager with a
/// space.
pub struct ConsumePager;

#[async_trait]
impl Action for ConsumePager {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        let page = ctx.ctrl.before().to_string();
        ctx.device.pending_output.push_str(&page);
        ctx.ctrl.send(" ").await?;
        Ok(true)
    }
}

/// Stash the pattern that fired so the next dialog can start from it.
pub struct SaveLastPattern;

#[async_trait]
impl Action for SaveLastPattern {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.saved_pattern = ctx.pattern.clone();
        Ok(true)
    }
}

/// Kick a boot from the ROM monitor.
pub struct SendBoot(String);

impl SendBoot {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }
}

#[async_trait]
impl Action for SendBoot {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.ctrl.sendline(&self.0).await?;
        Ok(true)
    }
}

/// Re-run the device connect sequence from inside a recovery dialog.
pub struct Reconnect;

#[async_trait]
impl Action for Reconnect {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        ctx.device.connect(ctx.ctrl).await?;
        Ok(true)
    }
}

/// Capture the text before the match as the command result.
///
/// Used by machines whose command output is embedded in a larger dialog,
/// so the caller sees only the command's own output.
pub struct StoreCommandResult;

#[async_trait]
impl Action for StoreCommandResult {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        let mut result = ctx.ctrl.before().to_string();
        if let Some(index) = result.find('\n') {
            result = result[index + 1..].to_string();
        }
        ctx.device.last_command_result = Some(result.replace('\r', ""));
        Ok(true)
    }
}

/// Surface the matched line through the connection's message callback.
pub struct MessageCallback;

#[async_trait]
impl Action for MessageCallback {
    async fn run(&self, ctx: &mut FsmContext<'_>) -> Result<bool> {
        let message = ctx
            .ctrl
            .after()
            .trim()
            .lines()
            .last()
            .unwrap_or("")
            .to_string();
        debug!("status: {}", message);
        ctx.device.emit_info(&message);
        Ok(true)
    }
}
