//! Wi-Fi association with a bounded retry budget and a one-time fallback to
//! an alternate network.
//!
//! See [`connect`] for the policy and [`WifiLink`] for what the Wi-Fi stack
//! must provide.

use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;
use heapless::String;

use crate::config::{SSID_LEN, WifiConfig, WifiCredentials};
use crate::log::{info, warn};
use crate::{Error, Result};

/// The Wi-Fi stack, as seen by the supervisor.
pub trait WifiLink {
    /// Error reported by a failed join.
    type Error;

    /// Try to associate with `credentials` and bring the interface up.
    ///
    /// Returns once the stack has an outcome for this attempt.
    async fn join(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error>;

    /// Whether the link is currently associated.
    fn is_connected(&self) -> bool;

    /// The interface's IPv4 address, once one is assigned.
    fn local_address(&self) -> Option<Ipv4Addr>;
}

/// Which configured network we ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Network {
    /// The primary network.
    Primary,
    /// The alternate network, after the primary's budget ran out.
    Alternate,
}

/// An established Wi-Fi link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiConnection {
    /// Which configured network accepted us.
    pub network: Network,
    /// Its name.
    pub ssid: String<SSID_LEN>,
    /// Our address on it.
    pub address: Ipv4Addr,
}

/// Associate with the primary network, falling back to the alternate once.
///
/// Each network gets `config.retry.attempts` attempts. After every failed
/// attempt the loop waits `config.retry.delay`. When the primary's budget is
/// spent and an alternate is configured, the counter resets and the alternate
/// gets a full budget of its own. The alternate is tried at most once per call.
///
/// This only reports the outcome. Whether exhaustion restarts the device is
/// decided by [`Supervisor::escalation`](crate::supervisor::Supervisor::escalation)
/// from `config.reboot_on_failure`.
///
/// # Errors
///
/// Returns [`Error::WifiRetriesExhausted`] when every network failed.
pub async fn connect<L, D>(link: &mut L, delay: &mut D, config: &WifiConfig) -> Result<WifiConnection>
where
    L: WifiLink,
    D: DelayNs,
{
    info!(
        "Wi-Fi config: primary={} alternate={} attempts={} delay_ms={}",
        config.primary.ssid.as_str(),
        config.alternate.as_ref().map_or("-", |alt| alt.ssid.as_str()),
        config.retry.attempts,
        config.retry.delay.as_millis()
    );

    let mut total_attempts: u16 = 0;
    let networks = [
        Some((Network::Primary, &config.primary)),
        config.alternate.as_ref().map(|alt| (Network::Alternate, alt)),
    ];

    for (network, credentials) in networks.into_iter().flatten() {
        if network == Network::Alternate {
            info!(
                "Wi-Fi: switching to alternate network {}",
                credentials.ssid.as_str()
            );
        } else {
            info!("Wi-Fi: connecting to {}", credentials.ssid.as_str());
        }

        for attempt in 1..=config.retry.attempts {
            total_attempts = total_attempts.saturating_add(1);
            info!(
                "Wi-Fi: attempt {}/{} on {}",
                attempt,
                config.retry.attempts,
                credentials.ssid.as_str()
            );
            if let Some(address) = try_join(link, credentials).await {
                let [a, b, c, d] = address.octets();
                info!(
                    "Wi-Fi: connected to {} as {}.{}.{}.{}",
                    credentials.ssid.as_str(),
                    a,
                    b,
                    c,
                    d
                );
                return Ok(WifiConnection {
                    network,
                    ssid: credentials.ssid.clone(),
                    address,
                });
            }
            warn!("Wi-Fi: attempt {} on {} failed", attempt, credentials.ssid.as_str());
            config.retry.wait(delay).await;
        }
    }

    warn!("Wi-Fi: not connected after {} attempts", total_attempts);
    Err(Error::WifiRetriesExhausted {
        attempts: total_attempts,
    })
}

async fn try_join<L: WifiLink>(link: &mut L, credentials: &WifiCredentials) -> Option<Ipv4Addr> {
    link.join(credentials).await.ok()?;
    if !link.is_connected() {
        return None;
    }
    link.local_address()
}
