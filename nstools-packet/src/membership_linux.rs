use std::mem::{offset_of, size_of};
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;

use socket2::{Domain, SockAddr, Socket, Type};
use tracing::debug;

use crate::group::{GroupRequest, SourceFilter};
use crate::layout::IpFamily;
use crate::privilege::PacketError;

/// `struct group_filter` as declared in `<netinet/in.h>`; the source list
/// extends past the single declared slot.
#[repr(C)]
#[allow(non_camel_case_types)]
struct group_filter {
    gf_interface: u32,
    gf_group: libc::sockaddr_storage,
    gf_fmode: u32,
    gf_numsrc: u32,
    gf_slist: [libc::sockaddr_storage; 1],
}

/// `GROUP_FILTER_SIZE(n)`.
pub fn group_filter_size(sources: usize) -> usize {
    offset_of!(group_filter, gf_slist) + sources * size_of::<libc::sockaddr_storage>()
}

/// `sockaddr_in` / `sockaddr_in6` with port zero.
fn storage_for(addr: IpAddr) -> libc::sockaddr_storage {
    SockAddr::from(SocketAddr::new(addr, 0)).as_storage()
}

fn group_req(request: &GroupRequest) -> libc::group_req {
    libc::group_req {
        gr_interface: request.interface,
        gr_group: storage_for(request.group),
    }
}

/// `struct group_filter` bytes sized to the source count.
fn group_filter_bytes(filter: &SourceFilter) -> Vec<u8> {
    let mode = if filter.mode.is_include() {
        libc::MCAST_INCLUDE
    } else {
        libc::MCAST_EXCLUDE
    };
    let slot = size_of::<libc::sockaddr_storage>();
    let slist = offset_of!(group_filter, gf_slist);
    let mut buf = vec![0u8; group_filter_size(filter.sources.len())];
    let base = buf.as_mut_ptr();
    // Every write lands inside `buf`, which is sized by group_filter_size.
    unsafe {
        base.add(offset_of!(group_filter, gf_interface))
            .cast::<u32>()
            .write_unaligned(filter.request.interface);
        base.add(offset_of!(group_filter, gf_group))
            .cast::<libc::sockaddr_storage>()
            .write_unaligned(storage_for(filter.request.group));
        base.add(offset_of!(group_filter, gf_fmode))
            .cast::<u32>()
            .write_unaligned(mode as u32);
        base.add(offset_of!(group_filter, gf_numsrc))
            .cast::<u32>()
            .write_unaligned(filter.sources.len() as u32);
        for (i, source) in filter.sources.iter().enumerate() {
            base.add(slist + i * slot)
                .cast::<libc::sockaddr_storage>()
                .write_unaligned(storage_for(*source));
        }
    }
    buf
}

/// Open a datagram socket to hang memberships on.
pub fn membership_socket(family: IpFamily) -> Result<Socket, PacketError> {
    let domain = match family {
        IpFamily::V4 => Domain::IPV4,
        IpFamily::V6 => Domain::IPV6,
    };
    Socket::new(domain, Type::DGRAM, None)
        .map_err(|e| PacketError::SocketOption(format!("{family} socket creation failed: {e}")))
}

fn level(family: IpFamily) -> libc::c_int {
    match family {
        IpFamily::V4 => libc::IPPROTO_IP,
        IpFamily::V6 => libc::IPPROTO_IPV6,
    }
}

fn set_option(
    socket: &Socket,
    family: IpFamily,
    name: libc::c_int,
    label: &str,
    value: *const libc::c_void,
    len: usize,
) -> Result<(), PacketError> {
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level(family),
            name,
            value,
            len as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(PacketError::SocketOption(format!(
            "{label} failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn set_group_req(
    socket: &Socket,
    request: &GroupRequest,
    name: libc::c_int,
    label: &str,
) -> Result<(), PacketError> {
    let req = group_req(request);
    set_option(
        socket,
        request.family(),
        name,
        label,
        (&req as *const libc::group_req).cast(),
        size_of::<libc::group_req>(),
    )
}

pub fn join_group(socket: &Socket, request: &GroupRequest) -> Result<(), PacketError> {
    set_group_req(socket, request, libc::MCAST_JOIN_GROUP, "MCAST_JOIN_GROUP")?;
    debug!(group = %request.group, ifindex = request.interface, "joined group");
    Ok(())
}

pub fn leave_group(socket: &Socket, request: &GroupRequest) -> Result<(), PacketError> {
    set_group_req(socket, request, libc::MCAST_LEAVE_GROUP, "MCAST_LEAVE_GROUP")?;
    debug!(group = %request.group, ifindex = request.interface, "left group");
    Ok(())
}

/// Replace the source filter of a joined group.
pub fn set_source_filter(socket: &Socket, filter: &SourceFilter) -> Result<(), PacketError> {
    let payload = group_filter_bytes(filter);
    set_option(
        socket,
        filter.request.family(),
        libc::MCAST_MSFILTER,
        "MCAST_MSFILTER",
        payload.as_ptr().cast(),
        payload.len(),
    )?;
    debug!(
        group = %filter.request.group,
        mode = %filter.mode,
        sources = filter.sources.len(),
        "source filter applied"
    );
    Ok(())
}
