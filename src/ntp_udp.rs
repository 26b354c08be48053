//! [`TimeSource`] over an `embassy-net` UDP socket.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_time::{Duration, with_timeout};

use crate::log::{debug, warn};
use crate::time_sync::{NTP_PACKET_LEN, NTP_PORT, NtpPacket, TimeSource};

/// Server used when none is given.
pub const DEFAULT_NTP_SERVER: &str = "time.nist.gov";
/// How long to wait for the reply.
pub const NTP_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Why an exchange failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NtpUdpError {
    /// The server name did not resolve.
    Dns,
    /// The socket could not be bound.
    Bind,
    /// The request could not be sent.
    Send,
    /// No reply before [`NTP_TIMEOUT`].
    Timeout,
    /// The reply could not be read.
    Receive,
    /// The reply was shorter than an NTP packet.
    Short,
}

/// Resolves `server` and exchanges one packet with it per call.
pub struct NtpUdp<'a> {
    stack: Stack<'static>,
    server: &'a str,
}

impl<'a> NtpUdp<'a> {
    /// Talk to `server` over `stack`.
    #[must_use]
    pub const fn new(stack: Stack<'static>, server: &'a str) -> Self {
        Self { stack, server }
    }

    /// Talk to [`DEFAULT_NTP_SERVER`].
    #[must_use]
    pub const fn with_default_server(stack: Stack<'static>) -> NtpUdp<'static> {
        NtpUdp::new(stack, DEFAULT_NTP_SERVER)
    }
}

impl TimeSource for NtpUdp<'_> {
    type Error = NtpUdpError;

    async fn exchange(
        &mut self,
        request: &NtpPacket,
        response: &mut NtpPacket,
    ) -> Result<(), NtpUdpError> {
        let addresses = self
            .stack
            .dns_query(self.server, DnsQueryType::A)
            .await
            .map_err(|_| NtpUdpError::Dns)?;
        let server = *addresses.first().ok_or(NtpUdpError::Dns)?;
        debug!("NTP: {} resolved", self.server);

        let mut rx_meta = [PacketMetadata::EMPTY; 1];
        let mut rx_buffer = [0; 128];
        let mut tx_meta = [PacketMetadata::EMPTY; 1];
        let mut tx_buffer = [0; 128];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NtpUdpError::Bind)?;

        socket
            .send_to(request, (server, NTP_PORT))
            .await
            .map_err(|_| NtpUdpError::Send)?;

        let (len, _) = with_timeout(NTP_TIMEOUT, socket.recv_from(response))
            .await
            .map_err(|_| {
                warn!("NTP: no reply from {} in time", self.server);
                NtpUdpError::Timeout
            })?
            .map_err(|_| NtpUdpError::Receive)?;
        if len < NTP_PACKET_LEN {
            return Err(NtpUdpError::Short);
        }
        Ok(())
    }
}
