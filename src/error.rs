//! Error types for viaduct.

use std::fmt;
use std::io;

use thiserror::Error;

/// Main error type for viaduct operations.
///
/// Errors split into three recoverability classes: transport-level errors
/// (`Connection*`) bubble out of a chain connect and are retried by the
/// [`Connection`](crate::Connection) facade, command-level errors
/// (`Command*`) propagate to the caller of `send` without closing the
/// session, and programmer errors (`InvalidHopInfo`, `Pattern`, `General`)
/// fail fast.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid device connection parameters (bad URL, unknown scheme).
    #[error("invalid hop information: {0}")]
    InvalidHopInfo(String),

    /// General connection error.
    #[error("connection error: {0}")]
    Connection(Detail),

    /// Connection authentication error.
    #[error("authentication error: {0}")]
    ConnectionAuthentication(Detail),

    /// Connection timeout error.
    #[error("connection timeout: {0}")]
    ConnectionTimeout(Detail),

    /// Command execution error.
    #[error("command error: {0}")]
    Command(Detail),

    /// Command syntax error or unknown command.
    #[error("command syntax error: {0}")]
    CommandSyntax(Detail),

    /// Timeout during command execution.
    #[error("command timeout: {0}")]
    CommandTimeout(Detail),

    /// Invalid regular expression in the pattern registry or a driver.
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O error from the pseudo-terminal or the cache file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Everything else.
    #[error("{0}")]
    General(String),
}

/// Host and command context attached to connection and command errors.
#[derive(Debug, Default, Clone)]
pub struct Detail {
    pub message: String,
    pub host: Option<String>,
    pub command: Option<String>,
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref host) = self.host {
            write!(f, "{}: ", host)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(ref command) = self.command {
            write!(f, ": '{}'", command)?;
        }
        Ok(())
    }
}

impl Error {
    pub fn connection(message: impl Into<String>, host: Option<&str>) -> Self {
        Error::Connection(Detail {
            message: message.into(),
            host: host.map(str::to_string),
            command: None,
        })
    }

    pub fn authentication(message: impl Into<String>, host: Option<&str>) -> Self {
        Error::ConnectionAuthentication(Detail {
            message: message.into(),
            host: host.map(str::to_string),
            command: None,
        })
    }

    pub fn connection_timeout(message: impl Into<String>, host: Option<&str>) -> Self {
        Error::ConnectionTimeout(Detail {
            message: message.into(),
            host: host.map(str::to_string),
            command: None,
        })
    }

    pub fn command(message: impl Into<String>, host: Option<&str>) -> Self {
        Error::Command(Detail {
            message: message.into(),
            host: host.map(str::to_string),
            command: None,
        })
    }

    pub fn command_syntax(message: impl Into<String>, host: Option<&str>) -> Self {
        Error::CommandSyntax(Detail {
            message: message.into(),
            host: host.map(str::to_string),
            command: None,
        })
    }

    pub fn command_timeout(message: impl Into<String>, host: Option<&str>) -> Self {
        Error::CommandTimeout(Detail {
            message: message.into(),
            host: host.map(str::to_string),
            command: None,
        })
    }

    /// Attach the offending command to a command-class error.
    pub fn with_command(mut self, cmd: &str) -> Self {
        if let Error::Command(ref mut d)
        | Error::CommandSyntax(ref mut d)
        | Error::CommandTimeout(ref mut d) = self
        {
            d.command = Some(cmd.to_string());
        }
        self
    }

    /// Whether the error is a transport-level error the connection facade
    /// may retry on an alternate chain or across time.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::ConnectionAuthentication(_) | Error::ConnectionTimeout(_)
        )
    }

    /// Whether the error is a command-level error; the session stays usable.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Error::Command(_) | Error::CommandSyntax(_) | Error::CommandTimeout(_)
        )
    }
}

/// Result type alias using viaduct's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_display() {
        let err = Error::command_syntax("Command unknown", Some("router:23"))
            .with_command("wrongcommand");
        let text = err.to_string();
        assert!(text.contains("router:23"));
        assert!(text.contains("Command unknown"));
        assert!(text.contains("'wrongcommand'"));
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::connection("down", None).is_transport());
        assert!(Error::authentication("denied", None).is_transport());
        assert!(Error::connection_timeout("slow", None).is_transport());
        assert!(!Error::command("failed", None).is_transport());
        assert!(Error::command_timeout("slow", None).is_command());
    }
}
