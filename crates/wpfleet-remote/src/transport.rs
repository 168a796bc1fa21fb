//! Remote command channel.
//!
//! A [`Transport`] opens one [`Connection`] per host. Connections run shell
//! command strings and hand back captured output; a non-zero exit status is
//! an error. Nothing above this layer knows how the bytes travel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use wpfleet_core::HostTarget;

use crate::error::TransportError;

/// Boxed future alias used by the object-safe transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Captured output of a successful remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// An open command channel to a single host.
///
/// Connections are owned by one worker and never shared across hosts.
pub trait Connection: Send + Sync {
    /// Hostname this connection talks to.
    fn host(&self) -> &str;

    /// Run a shell command on the host.
    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<CommandOutput, TransportError>>;

    /// Tear the connection down. Errors are logged, not returned.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens connections to hosts.
pub trait Transport: Send + Sync {
    fn connect<'a>(
        &'a self,
        target: &'a HostTarget,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>>;
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn host(&self) -> &str {
        (**self).host()
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<CommandOutput, TransportError>> {
        (**self).execute(command)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        (**self).close()
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn host(&self) -> &str {
        (**self).host()
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<CommandOutput, TransportError>> {
        (**self).execute(command)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        (**self).close()
    }
}

/// Quote a string for a POSIX shell.
///
/// Everything is wrapped in single quotes; embedded single quotes become
/// `'\''`.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
