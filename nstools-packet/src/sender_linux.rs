use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::layout::IpFamily;
use crate::link::{Interface, MacAddr};
use crate::privilege::PacketError;
use crate::traits::PacketSender;

/// Link-layer sender for Linux.
///
/// Uses an `AF_PACKET`/`SOCK_DGRAM` socket: the kernel writes the Ethernet
/// header from the destination in the `sockaddr_ll`, so the datagram is sent
/// exactly as built, corrupted IP headers included. Requires CAP_NET_RAW or
/// root.
pub struct LinkSender {
    socket: Socket,
    interface: Interface,
    destination: SockAddr,
}

/// `sockaddr_ll` for `ifindex`, optionally carrying a hardware address.
pub(crate) fn link_address(ifindex: u32, ethertype: u16, mac: Option<MacAddr>) -> SockAddr {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = {
        // sockaddr_storage is large and aligned enough for any sockaddr.
        let sll = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_ll) };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = ethertype.to_be();
        sll.sll_ifindex = ifindex as i32;
        if let Some(mac) = mac {
            sll.sll_halen = 6;
            sll.sll_addr[..6].copy_from_slice(&mac.octets());
        }
        std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t
    };
    unsafe { SockAddr::new(storage, len) }
}

impl LinkSender {
    /// Open a sender on `interface` that delivers `family` datagrams to
    /// `destination`.
    pub fn new(
        interface: Interface,
        family: IpFamily,
        destination: MacAddr,
    ) -> Result<Self, PacketError> {
        let ethertype = family.ethertype();
        let protocol = Protocol::from(i32::from(ethertype.to_be()));

        let socket = Socket::new(Domain::PACKET, Type::DGRAM, Some(protocol)).map_err(|e| {
            match e.kind() {
                std::io::ErrorKind::PermissionDenied => PacketError::InsufficientPrivileges,
                _ => PacketError::SendFailed(format!("packet socket creation failed: {e}")),
            }
        })?;

        socket
            .bind(&link_address(interface.index, ethertype, None))
            .map_err(|e| PacketError::Interface(format!("bind to {} failed: {e}", interface.name)))?;

        debug!(
            interface = %interface.name,
            ifindex = interface.index,
            %family,
            dst_mac = %destination,
            "link sender created"
        );

        Ok(Self {
            socket,
            destination: link_address(interface.index, ethertype, Some(destination)),
            interface,
        })
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }
}

#[async_trait]
impl PacketSender for LinkSender {
    async fn send_datagram(&self, datagram: &[u8]) -> Result<(), PacketError> {
        let sent = self
            .socket
            .send_to(datagram, &self.destination)
            .map_err(PacketError::from_send)?;
        if sent != datagram.len() {
            return Err(PacketError::SendFailed(format!(
                "short write: {sent} of {} bytes",
                datagram.len()
            )));
        }
        Ok(())
    }

    fn interface_name(&self) -> Option<&str> {
        Some(&self.interface.name)
    }
}
