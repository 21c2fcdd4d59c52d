// SPDX-License-Identifier: GPL-3.0-only

//! Service manager notification protocol (`sd_notify` datagrams)

use std::fmt;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use crate::Result;

const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// A single notification line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Ready,
    Stopping,
    Status(String),
    Errno(i32),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Ready => f.write_str("READY=1"),
            Notification::Stopping => f.write_str("STOPPING=1"),
            Notification::Status(text) => write!(f, "STATUS={}", text.replace('\n', " ")),
            Notification::Errno(code) => write!(f, "ERRNO={code}"),
        }
    }
}

/// Sends notifications to the socket named by `$NOTIFY_SOCKET`.
///
/// When the variable is unset (not running under a service manager) every
/// call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ServiceNotifier {
    socket: Option<String>,
}

impl ServiceNotifier {
    pub fn from_env() -> Self {
        Self {
            socket: std::env::var(NOTIFY_SOCKET_ENV)
                .ok()
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self { socket: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.socket.is_some()
    }

    pub fn notify(&self, notifications: &[Notification]) -> Result<()> {
        let Some(socket) = self.socket.as_deref() else {
            return Ok(());
        };

        let payload = render(notifications);
        let datagram = UnixDatagram::unbound()?;

        if let Some(name) = socket.strip_prefix('@') {
            send_abstract(&datagram, name, payload.as_bytes())?;
        } else {
            datagram.send_to(payload.as_bytes(), PathBuf::from(socket))?;
        }

        tracing::trace!(payload = %payload, "sent service notification");
        Ok(())
    }

    /// Best-effort variant used on shutdown and status paths.
    pub fn notify_quietly(&self, notifications: &[Notification]) {
        if let Err(e) = self.notify(notifications) {
            tracing::debug!("service notification failed: {}", e);
        }
    }
}

#[cfg(target_os = "linux")]
fn send_abstract(datagram: &UnixDatagram, name: &str, payload: &[u8]) -> std::io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let address = SocketAddr::from_abstract_name(name.as_bytes())?;
    datagram.send_to_addr(payload, &address)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_datagram: &UnixDatagram, _name: &str, _payload: &[u8]) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract notification sockets require Linux",
    ))
}

fn render(notifications: &[Notification]) -> String {
    notifications
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_protocol_lines() {
        let payload = render(&[
            Notification::Ready,
            Notification::Status("Watching 2 directories".to_string()),
        ]);
        assert_eq!(payload, "READY=1\nSTATUS=Watching 2 directories");
        assert_eq!(Notification::Stopping.to_string(), "STOPPING=1");
        assert_eq!(Notification::Errno(5).to_string(), "ERRNO=5");
    }

    #[test]
    fn disabled_notifier_is_a_no_op() {
        let notifier = ServiceNotifier::disabled();
        assert!(!notifier.is_enabled());
        notifier.notify(&[Notification::Ready]).unwrap();
    }

    #[test]
    fn delivers_to_path_socket() {
        let dir = std::env::temp_dir().join(format!("snapboot-notify-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("notify.sock");
        let _ = std::fs::remove_file(&path);
        let receiver = UnixDatagram::bind(&path).unwrap();

        let notifier = ServiceNotifier {
            socket: Some(path.to_string_lossy().to_string()),
        };
        notifier.notify(&[Notification::Stopping]).unwrap();

        let mut buffer = [0u8; 64];
        let read = receiver.recv(&mut buffer).unwrap();
        assert_eq!(&buffer[..read], b"STOPPING=1");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
