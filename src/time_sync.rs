//! NTP time sync and a local clock that formats timestamps.
//!
//! [`sync`] performs one request/response exchange through a [`TimeSource`]
//! and, on success, re-bases the [`Clock`]. There is no retry loop: a failed
//! sync leaves the previous base (the Unix epoch at boot, if never synced)
//! in effect.

use core::fmt::Write as _;

use embassy_time::{Duration, Instant};
use heapless::String;
use time::OffsetDateTime;

use crate::log::{info, warn};
use crate::{Error, Result};

/// Seconds since 1970-01-01 00:00:00 UTC.
pub type UnixSeconds = i64;

/// Size of an NTP request or response.
pub const NTP_PACKET_LEN: usize = 48;
/// NTP server port.
pub const NTP_PORT: u16 = 123;
/// Seconds from the NTP era (1900) to the Unix epoch (1970).
pub const NTP_TO_UNIX_OFFSET: i64 = 2_208_988_800;
/// Seconds per hour of time zone offset.
pub const SECONDS_PER_HOUR: i32 = 3_600;

/// Clock offset in seconds for a time zone `hours` from UTC.
#[must_use]
pub fn timezone_offset_seconds(hours: i8) -> i32 {
    i32::from(hours).saturating_mul(SECONDS_PER_HOUR)
}

/// Offset of the transmit timestamp's seconds field in a response.
const TRANSMIT_SECONDS_AT: usize = 40;

/// One NTP packet.
pub type NtpPacket = [u8; NTP_PACKET_LEN];

/// Build a client request: LI unsynchronized, version 4, client mode,
/// poll 6, precision 0xEC, reference ID "1N14".
#[must_use]
pub const fn ntp_request() -> NtpPacket {
    let mut packet = [0; NTP_PACKET_LEN];
    packet[0] = 0b1110_0011; // LI, Version, Mode
    packet[1] = 0; // Stratum
    packet[2] = 6; // Polling interval
    packet[3] = 0xEC; // Peer clock precision
    packet[12] = 49;
    packet[13] = 0x4E;
    packet[14] = 49;
    packet[15] = 52;
    packet
}

/// Extract the transmit time from a server response.
///
/// # Errors
///
/// Returns [`Error::InvalidTimeResponse`] if `response` is shorter than a
/// packet or its timestamp predates the Unix epoch (an unset server clock
/// answers with zero).
pub fn parse_ntp_response(response: &[u8]) -> Result<UnixSeconds> {
    let seconds: [u8; 4] = response
        .get(TRANSMIT_SECONDS_AT..TRANSMIT_SECONDS_AT + 4)
        .filter(|_| response.len() >= NTP_PACKET_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::InvalidTimeResponse)?;
    let since_1900 = i64::from(u32::from_be_bytes(seconds));
    let unix_seconds = since_1900
        .checked_sub(NTP_TO_UNIX_OFFSET)
        .filter(|unix_seconds| *unix_seconds >= 0)
        .ok_or(Error::InvalidTimeResponse)?;
    Ok(unix_seconds)
}

/// The UDP transport to a time server.
pub trait TimeSource {
    /// Error reported by the transport.
    type Error;

    /// Send `request` and wait (bounded) for one reply in `response`.
    async fn exchange(
        &mut self,
        request: &NtpPacket,
        response: &mut NtpPacket,
    ) -> Result<(), Self::Error>;
}

/// Monotonic time since boot.
pub trait Uptime {
    /// Current uptime.
    fn now(&self) -> Instant;
}

/// [`Uptime`] backed by the embassy time driver.
#[cfg(feature = "arm")]
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbassyUptime;

#[cfg(feature = "arm")]
impl Uptime for EmbassyUptime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Wall clock derived from the last sync plus uptime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clock {
    base_unix: UnixSeconds,
    base_uptime: Instant,
    offset_seconds: i32,
    synced: bool,
}

impl Clock {
    /// A clock reading the Unix epoch at boot, in UTC.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base_unix: 0,
            base_uptime: Instant::from_ticks(0),
            offset_seconds: 0,
            synced: false,
        }
    }

    /// Set the offset from UTC applied to local time.
    pub const fn set_offset_seconds(&mut self, offset_seconds: i32) {
        self.offset_seconds = offset_seconds;
    }

    /// Offset from UTC in seconds.
    #[must_use]
    pub const fn offset_seconds(&self) -> i32 {
        self.offset_seconds
    }

    /// Record that it was `unix_seconds` UTC at uptime `now`.
    pub const fn set_utc_time(&mut self, unix_seconds: UnixSeconds, now: Instant) {
        self.base_unix = unix_seconds;
        self.base_uptime = now;
        self.synced = true;
    }

    /// Whether a sync has ever succeeded.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.synced
    }

    /// Time since the last successful sync, or `None` if never synced.
    #[must_use]
    pub fn since_last_sync(&self, now: Instant) -> Option<Duration> {
        self.synced
            .then(|| now.checked_duration_since(self.base_uptime))
            .flatten()
    }

    /// UTC seconds at uptime `now`.
    #[must_use]
    pub fn utc_seconds(&self, now: Instant) -> UnixSeconds {
        let elapsed = now
            .checked_duration_since(self.base_uptime)
            .map_or(0, |elapsed| elapsed.as_secs());
        self.base_unix
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }

    /// Local time at uptime `now`: UTC plus the offset.
    #[must_use]
    pub fn local_time(&self, now: Instant) -> Option<OffsetDateTime> {
        let local = self
            .utc_seconds(now)
            .saturating_add(i64::from(self.offset_seconds));
        OffsetDateTime::from_unix_timestamp(local).ok()
    }

    /// Local time as `HH:MM:SS`.
    #[must_use]
    pub fn formatted_time(&self, now: Instant) -> String<8> {
        let mut text = String::new();
        if let Some(local) = self.local_time(now) {
            // 8 bytes always fit "HH:MM:SS".
            let _ = write!(
                text,
                "{:02}:{:02}:{:02}",
                local.hour(),
                local.minute(),
                local.second()
            );
        }
        text
    }

    /// Console timestamp `Y-M-D HH:MM:SS` in local time.
    #[must_use]
    pub fn timestamp(&self, now: Instant) -> String<24> {
        let mut text = String::new();
        if let Some(local) = self.local_time(now) {
            let _ = write!(
                text,
                "{}-{}-{} {}",
                local.year(),
                u8::from(local.month()),
                local.day(),
                self.formatted_time(now).as_str()
            );
        }
        text
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `timezone_hours`, then sync `clock` with one NTP exchange.
///
/// The offset is applied first and stays in effect whether or not the
/// exchange succeeds.
///
/// # Errors
///
/// Returns [`Error::TimeSyncFailed`] if the exchange fails, or
/// [`Error::InvalidTimeResponse`] if the reply is unusable. The clock's
/// base is unchanged in both cases.
pub async fn sync<T, U>(
    source: &mut T,
    uptime: &U,
    clock: &mut Clock,
    timezone_hours: i8,
) -> Result<UnixSeconds>
where
    T: TimeSource,
    U: Uptime,
{
    info!("NTP: syncing, time zone {} h", timezone_hours);
    clock.set_offset_seconds(timezone_offset_seconds(timezone_hours));

    let request = ntp_request();
    let mut response = [0; NTP_PACKET_LEN];
    if source.exchange(&request, &mut response).await.is_err() {
        warn!("NTP: no response, time NOT set");
        return Err(Error::TimeSyncFailed);
    }
    let unix_seconds = parse_ntp_response(&response).inspect_err(|_| {
        warn!("NTP: invalid response, time NOT set");
    })?;

    let now = uptime.now();
    clock.set_utc_time(unix_seconds, now);
    info!("NTP: time set to {}", clock.formatted_time(now).as_str());
    Ok(unix_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_seconds(since_1900: u32) -> NtpPacket {
        let mut packet = [0; NTP_PACKET_LEN];
        packet[40..44].copy_from_slice(&since_1900.to_be_bytes());
        packet
    }

    #[test]
    fn request_matches_wire_layout() {
        let packet = ntp_request();
        assert_eq!(packet[0], 0xE3);
        assert_eq!(&packet[1..4], &[0, 6, 0xEC]);
        assert_eq!(&packet[4..12], &[0; 8]);
        assert_eq!(&packet[12..16], b"1N14");
        assert!(packet[16..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn response_converts_ntp_era_to_unix() {
        // 2024-01-01T00:00:00Z
        let packet = response_with_seconds(3_913_056_000);
        assert_eq!(parse_ntp_response(&packet), Ok(1_704_067_200));
    }

    #[test]
    fn short_or_unset_response_is_rejected() {
        let packet = response_with_seconds(3_913_056_000);
        assert_eq!(
            parse_ntp_response(&packet[..44]),
            Err(Error::InvalidTimeResponse)
        );
        assert_eq!(
            parse_ntp_response(&response_with_seconds(0)),
            Err(Error::InvalidTimeResponse)
        );
    }

    #[test]
    fn unsynced_clock_counts_from_epoch() {
        let clock = Clock::new();
        let now = Instant::from_secs(3_725);
        assert_eq!(clock.utc_seconds(now), 3_725);
        assert_eq!(clock.formatted_time(now).as_str(), "01:02:05");
        assert_eq!(clock.timestamp(now).as_str(), "1970-1-1 01:02:05");
        assert_eq!(clock.since_last_sync(now), None);
    }

    #[test]
    fn synced_clock_applies_offset_and_elapsed_uptime() {
        let mut clock = Clock::new();
        clock.set_utc_time(1_704_067_200, Instant::from_secs(10));
        clock.set_offset_seconds(timezone_offset_seconds(-5));
        let now = Instant::from_secs(70);
        assert_eq!(clock.utc_seconds(now), 1_704_067_260);
        assert_eq!(clock.timestamp(now).as_str(), "2023-12-31 19:01:00");
        assert_eq!(clock.since_last_sync(now), Some(Duration::from_secs(60)));
    }

    #[test]
    fn timezone_offset_covers_the_whole_hour_range() {
        assert_eq!(timezone_offset_seconds(0), 0);
        assert_eq!(timezone_offset_seconds(2), 7_200);
        assert_eq!(timezone_offset_seconds(i8::MIN), -460_800);
        assert_eq!(timezone_offset_seconds(i8::MAX), 457_200);
    }
}
