//! MQTT session establishment, publishing, and inbound message servicing.
//!
//! Connecting is a mandatory precondition: exhausting its budget is reported
//! as [`Error::BrokerRetriesExhausted`], which the supervisor turns into a
//! restart. Publishing is recoverable and only reports failure.

use core::net::SocketAddrV4;

use embedded_hal_async::delay::DelayNs;

use crate::config::BrokerCredentials;
use crate::log::{debug, info, warn};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// The MQTT client, as seen by the supervisor.
pub trait BrokerClient {
    /// Error reported by the client.
    type Error;

    /// Open a session with the broker at `broker` as `client_id`.
    async fn connect(
        &mut self,
        broker: SocketAddrV4,
        client_id: &str,
        credentials: Option<&BrokerCredentials>,
    ) -> Result<(), Self::Error>;

    /// Subscribe to `topic` on the open session.
    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Publish `payload` to `topic`.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    /// Whether a session is open.
    fn is_connected(&self) -> bool;

    /// Hand every message received since the last call to `on_message`.
    /// Must not wait for new messages.
    async fn poll(&mut self, on_message: &mut dyn FnMut(&str, &[u8])) -> Result<(), Self::Error>;
}

/// An open broker session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokerSession {
    /// Broker address used.
    pub broker: SocketAddrV4,
    /// Attempt that succeeded (1-based).
    pub attempts: u8,
    /// Whether the control topic subscription is in place.
    pub subscribed: bool,
}

/// What to connect to and as whom.
#[derive(Clone, Copy, Debug)]
pub struct ConnectRequest<'a> {
    /// Broker address.
    pub broker: SocketAddrV4,
    /// Client identity, normally the node name.
    pub client_id: &'a str,
    /// Optional login.
    pub credentials: Option<&'a BrokerCredentials>,
    /// Topic to subscribe to after connecting, if any.
    pub subscribe_to: Option<&'a str>,
}

/// Open a session, subscribing if asked, within `retry`'s budget.
///
/// An attempt connects (unless the client is already connected) and then
/// subscribes to `request.subscribe_to`. A failed subscription makes the
/// attempt fail just like a failed connect. After each failed attempt the
/// loop waits `retry.delay`.
///
/// # Errors
///
/// Returns [`Error::BrokerRetriesExhausted`] once every attempt failed.
pub async fn connect<C, D>(
    client: &mut C,
    delay: &mut D,
    request: &ConnectRequest<'_>,
    retry: &RetryPolicy,
) -> Result<BrokerSession>
where
    C: BrokerClient,
    D: DelayNs,
{
    let [a, b, c, d] = request.broker.ip().octets();
    info!(
        "MQTT: connecting to {}.{}.{}.{}:{} as {}",
        a,
        b,
        c,
        d,
        request.broker.port(),
        request.client_id
    );

    for attempt in 1..=retry.attempts {
        if try_connect(client, request).await {
            info!("MQTT: connected on attempt {}/{}", attempt, retry.attempts);
            return Ok(BrokerSession {
                broker: request.broker,
                attempts: attempt,
                subscribed: request.subscribe_to.is_some(),
            });
        }
        warn!(
            "MQTT: attempt {}/{} failed, retrying in {} ms",
            attempt,
            retry.attempts,
            retry.delay.as_millis()
        );
        retry.wait(delay).await;
    }

    warn!("MQTT: not connected after {} attempts", retry.attempts);
    Err(Error::BrokerRetriesExhausted {
        attempts: retry.attempts,
    })
}

async fn try_connect<C: BrokerClient>(client: &mut C, request: &ConnectRequest<'_>) -> bool {
    if !client.is_connected()
        && client
            .connect(request.broker, request.client_id, request.credentials)
            .await
            .is_err()
    {
        return false;
    }

    let Some(topic) = request.subscribe_to else {
        return true;
    };
    if client.subscribe(topic).await.is_err() {
        warn!("MQTT: subscription to {} failed", topic);
        return false;
    }
    info!("MQTT: subscribed to {}", topic);
    true
}

/// Publish once, then retry up to `retry.attempts` times.
///
/// Each retry is preceded by `retry.delay`. Stops at the first success.
/// Returns the number of publish calls made.
///
/// # Errors
///
/// Returns [`Error::PublishFailed`] only if every call failed.
pub async fn publish<C, D>(
    client: &mut C,
    delay: &mut D,
    topic: &str,
    payload: &[u8],
    retry: &RetryPolicy,
) -> Result<u16>
where
    C: BrokerClient,
    D: DelayNs,
{
    let max_calls = u16::from(retry.attempts).saturating_add(1);
    let mut calls: u16 = 1;
    loop {
        if client.publish(topic, payload).await.is_ok() {
            debug!("MQTT: published {} bytes to {}", payload.len(), topic);
            return Ok(calls);
        }
        if calls >= max_calls {
            warn!("MQTT: publish to {} failed after {} attempts", topic, calls);
            return Err(Error::PublishFailed { attempts: calls });
        }
        debug!("MQTT: publish to {} failed, retrying", topic);
        retry.wait(delay).await;
        calls = calls.saturating_add(1);
    }
}
