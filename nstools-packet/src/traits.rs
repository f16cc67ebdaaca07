use async_trait::async_trait;

use crate::privilege::PacketError;

/// Transmit primitive for finished datagrams.
#[async_trait]
pub trait PacketSender: Send + Sync {
    /// Send one network-layer datagram. The link header, if any, is supplied
    /// by the sender.
    async fn send_datagram(&self, datagram: &[u8]) -> Result<(), PacketError>;

    /// Get the network interface name this sender is bound to.
    fn interface_name(&self) -> Option<&str> {
        None
    }
}

/// Link-layer tap that captures and injects whole Ethernet frames.
#[async_trait]
pub trait FrameTap: Send + Sync {
    /// Wait for and return the next frame received on the interface.
    async fn recv(&mut self) -> Result<Vec<u8>, PacketError>;

    /// Inject one frame, Ethernet header included.
    async fn send_frame(&self, frame: &[u8]) -> Result<(), PacketError>;

    /// Signal the capture loop to stop.
    fn stop(&self);
}
