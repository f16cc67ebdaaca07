use std::mem::{MaybeUninit, size_of};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::link::Interface;
use crate::privilege::PacketError;
use crate::sender_linux::link_address;
use crate::traits::FrameTap;

/// Read timeout of the capture thread, bounding how long a stop request waits.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const SNAPLEN: usize = 65536;
const CHANNEL_SIZE: usize = 1024;

/// Promiscuous `AF_PACKET`/`SOCK_RAW` tap on one interface.
///
/// A background OS thread reads frames and forwards them over a tokio mpsc
/// channel. Frames this host transmits are skipped, so injected replies are
/// never fed back. Requires CAP_NET_RAW or root.
pub struct FrameCapture {
    socket: Arc<Socket>,
    interface: Interface,
    rx: mpsc::Receiver<Vec<u8>>,
    stop_flag: Arc<AtomicBool>,
}

impl FrameCapture {
    pub fn open(interface: Interface) -> Result<Self, PacketError> {
        let all = libc::ETH_P_ALL as u16;
        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from(i32::from(all.to_be()))),
        )
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => PacketError::InsufficientPrivileges,
            _ => PacketError::CaptureSetup(format!("packet socket creation failed: {e}")),
        })?;

        socket
            .bind(&link_address(interface.index, all, None))
            .map_err(|e| PacketError::Interface(format!("bind to {} failed: {e}", interface.name)))?;
        enable_promiscuous(&socket, &interface);
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| PacketError::CaptureSetup(format!("read timeout: {e}")))?;

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let reader = socket.clone();
        let stop = stop_flag.clone();
        std::thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || capture_loop(&reader, tx, stop))
            .map_err(|e| PacketError::CaptureSetup(format!("failed to spawn thread: {e}")))?;

        debug!(interface = %interface.name, ifindex = interface.index, "frame capture started");
        Ok(Self {
            socket,
            interface,
            rx,
            stop_flag,
        })
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }
}

fn enable_promiscuous(socket: &Socket, interface: &Interface) {
    let mreq = libc::packet_mreq {
        mr_ifindex: interface.index as libc::c_int,
        mr_type: libc::PACKET_MR_PROMISC as libc::c_ushort,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            (&mreq as *const libc::packet_mreq).cast(),
            size_of::<libc::packet_mreq>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        warn!(
            interface = %interface.name,
            error = %std::io::Error::last_os_error(),
            "promiscuous mode unavailable, capturing only frames addressed to this host"
        );
    }
}

fn capture_loop(socket: &Socket, tx: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
    debug!("capture thread started");
    let mut buf = vec![MaybeUninit::<u8>::uninit(); SNAPLEN];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                if is_outgoing(&from) {
                    continue;
                }
                // recv_from initialised the first `len` bytes.
                let frame = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };
                if tx.blocking_send(frame.to_vec()).is_err() {
                    debug!("capture channel closed, stopping");
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                warn!(error = %e, "frame capture error");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    debug!("capture thread stopped");
}

fn is_outgoing(from: &SockAddr) -> bool {
    // Packet sockets always report a sockaddr_ll.
    let sll = unsafe { &*(from.as_ptr() as *const libc::sockaddr_ll) };
    sll.sll_pkttype == libc::PACKET_OUTGOING
}

#[async_trait]
impl FrameTap for FrameCapture {
    async fn recv(&mut self) -> Result<Vec<u8>, PacketError> {
        self.rx.recv().await.ok_or(PacketError::CaptureStopped)
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<(), PacketError> {
        let sent = self.socket.send(frame).map_err(PacketError::from_send)?;
        if sent != frame.len() {
            return Err(PacketError::SendFailed(format!(
                "short write: {sent} of {} bytes",
                frame.len()
            )));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

impl Drop for FrameCapture {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
