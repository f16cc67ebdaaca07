use crate::layout::IpFamily;
use crate::link::{Interface, MacAddr};
use crate::privilege::PacketError;
use crate::traits::{FrameTap, PacketSender};

/// Create a platform-appropriate link-layer sender.
///
/// - Linux: `AF_PACKET` datagram socket bound to `interface`
/// - elsewhere: unsupported
pub fn create_sender(
    interface: Interface,
    family: IpFamily,
    destination: MacAddr,
) -> Result<Box<dyn PacketSender>, PacketError> {
    #[cfg(target_os = "linux")]
    {
        use crate::sender_linux::LinkSender;
        let sender = LinkSender::new(interface, family, destination)?;
        Ok(Box::new(sender))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (interface, family, destination);
        Err(PacketError::Unsupported)
    }
}

/// Open a promiscuous frame tap on `interface`.
pub fn open_frame_tap(interface: Interface) -> Result<Box<dyn FrameTap>, PacketError> {
    #[cfg(target_os = "linux")]
    {
        use crate::capture_linux::FrameCapture;
        Ok(Box::new(FrameCapture::open(interface)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = interface;
        Err(PacketError::Unsupported)
    }
}
