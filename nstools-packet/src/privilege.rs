use thiserror::Error;

/// What the process may do with packet sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    /// Effective uid 0.
    Root,
    /// CAP_NET_RAW in the effective set without being root.
    NetRaw,
    /// No packet sockets; multicast membership still works.
    Unprivileged,
}

impl PrivilegeLevel {
    pub fn has_raw_socket_access(&self) -> bool {
        !matches!(self, PrivilegeLevel::Unprivileged)
    }
}

impl std::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivilegeLevel::Root => write!(f, "root"),
            PrivilegeLevel::NetRaw => write!(f, "CAP_NET_RAW"),
            PrivilegeLevel::Unprivileged => write!(f, "unprivileged"),
        }
    }
}

/// Detect whether `AF_PACKET` sockets can be opened.
pub fn check_privileges() -> PrivilegeLevel {
    #[cfg(target_os = "linux")]
    {
        if unsafe { libc::geteuid() } == 0 {
            return PrivilegeLevel::Root;
        }
        match caps::has_cap(None, caps::CapSet::Effective, caps::Capability::CAP_NET_RAW) {
            Ok(true) => PrivilegeLevel::NetRaw,
            _ => PrivilegeLevel::Unprivileged,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        PrivilegeLevel::Unprivileged
    }
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("insufficient privileges for raw packet operations")]
    InsufficientPrivileges,
    #[error("packet send failed: {0}")]
    SendFailed(String),
    /// EINTR / EAGAIN from the transport; the caller may retry.
    #[error("packet send interrupted")]
    Interrupted,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("interface error: {0}")]
    Interface(String),
    #[error("socket option failed: {0}")]
    SocketOption(String),
    #[error("no suitable network interface found")]
    NoInterface,
    #[error("raw packet sending not supported on this platform")]
    Unsupported,
    #[error("capture setup failed: {0}")]
    CaptureSetup(String),
    #[error("capture stopped")]
    CaptureStopped,
}

impl PacketError {
    /// Classify a transport error from a send call.
    pub fn from_send(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
                PacketError::Interrupted
            }
            std::io::ErrorKind::PermissionDenied => PacketError::InsufficientPrivileges,
            _ => PacketError::SendFailed(err.to_string()),
        }
    }

    /// True for errors after which another attempt is reasonable.
    pub fn is_transient(&self) -> bool {
        matches!(self, PacketError::Interrupted)
    }
}
