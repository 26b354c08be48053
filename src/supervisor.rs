//! The connection supervisor: sequences bring-up and decides what a failure
//! means.
//!
//! See [`Supervisor`] for the sequence and [`Escalation`] for the policy.

use core::fmt;
use core::fmt::Write as _;
use core::net::SocketAddrV4;

use derive_more::Display;
use embedded_hal_async::delay::DelayNs;
use heapless::String;

use crate::broker::{self, BrokerClient, BrokerSession, ConnectRequest};
use crate::config::{BrokerAddress, BrokerCredentials, MessageBuffer, NetConfig};
use crate::discovery::{self, ServiceDiscovery, ServiceMatch, ServiceRecords};
use crate::log::{debug, error, info, warn};
use crate::ota::{Ota, OtaEvent, OtaEvents, OtaUpdater};
use crate::time_sync::{
    self, Clock, NtpPacket, TimeSource, UnixSeconds, Uptime, timezone_offset_seconds,
};
use crate::wifi::{self, WifiConnection, WifiLink};
use crate::{Error, Result};

/// A bring-up step, used to label errors.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Wi-Fi association.
    #[display("Wi-Fi")]
    Wifi,
    /// mDNS registration.
    #[display("mDNS")]
    Discovery,
    /// Broker connect and subscribe.
    #[display("MQTT")]
    Broker,
    /// OTA arming.
    #[display("OTA")]
    Ota,
    /// NTP sync.
    #[display("NTP")]
    TimeSync,
}

/// Where the supervisor is in the bring-up sequence.
///
/// ```text
/// Idle -> WifiConnecting -> WifiConnected | WifiFailed
/// WifiFailed -> Restarting | Degraded
/// WifiConnected -> BrokerConnecting -> BrokerConnected | Restarting
/// BrokerConnected (or WifiConnected, no broker) -> TimeSyncing -> Ready | ReadyWithStaleTime
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SupervisorState {
    /// Nothing attempted yet.
    Idle,
    /// Associating with Wi-Fi.
    WifiConnecting,
    /// Wi-Fi is up.
    WifiConnected,
    /// Every Wi-Fi network failed.
    WifiFailed,
    /// Wi-Fi failed and restart on failure is off. Terminal.
    Degraded,
    /// Opening the broker session.
    BrokerConnecting,
    /// Broker session (and subscription, if required) is up.
    BrokerConnected,
    /// A mandatory step failed; the device must restart. Terminal.
    Restarting,
    /// Syncing the clock.
    TimeSyncing,
    /// Fully up. Terminal.
    Ready,
    /// Up, but the clock was not synced. Terminal.
    ReadyWithStaleTime,
}

impl SupervisorState {
    /// Whether bring-up has finished in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Degraded | Self::Restarting | Self::Ready | Self::ReadyWithStaleTime
        )
    }
}

/// What a failure calls for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Escalation {
    /// A mandatory precondition is unmet; restart the device.
    Restart,
    /// Keep running without the network.
    Degrade,
    /// Report to the caller and carry on.
    Report,
}

/// The collaborators a [`Supervisor`] drives.
///
/// Implement this on a marker type to name the concrete Wi-Fi stack, mDNS
/// responder, MQTT client, OTA updater, time transport, uptime source, and
/// delay. Use [`Unsupported`] for services the device does not have.
pub trait Platform {
    /// Wi-Fi stack.
    type Wifi: WifiLink;
    /// mDNS responder.
    type Discovery: ServiceDiscovery;
    /// MQTT client.
    type Broker: BrokerClient;
    /// OTA updater.
    type Ota: OtaUpdater;
    /// NTP transport.
    type Time: TimeSource;
    /// Monotonic uptime.
    type Uptime: Uptime;
    /// Delay used between retries.
    type Delay: DelayNs;
}

/// Concrete collaborators for a [`Platform`].
pub struct Parts<P: Platform> {
    /// Wi-Fi stack.
    pub wifi: P::Wifi,
    /// mDNS responder.
    pub discovery: P::Discovery,
    /// MQTT client.
    pub broker: P::Broker,
    /// OTA updater.
    pub ota: P::Ota,
    /// NTP transport.
    pub time: P::Time,
    /// Monotonic uptime.
    pub uptime: P::Uptime,
    /// Retry delay.
    pub delay: P::Delay,
}

/// Stand-in for a service the device does not provide. Every operation fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unsupported;

impl ServiceDiscovery for Unsupported {
    type Error = Self;

    async fn register(&mut self, _node_name: &str) -> Result<(), Self> {
        Err(Self)
    }

    async fn query(
        &mut self,
        _service_type: &str,
        _protocol: &str,
        _found: &mut ServiceRecords,
    ) -> Result<(), Self> {
        Err(Self)
    }
}

impl BrokerClient for Unsupported {
    type Error = Self;

    async fn connect(
        &mut self,
        _broker: SocketAddrV4,
        _client_id: &str,
        _credentials: Option<&BrokerCredentials>,
    ) -> Result<(), Self> {
        Err(Self)
    }

    async fn subscribe(&mut self, _topic: &str) -> Result<(), Self> {
        Err(Self)
    }

    async fn publish(&mut self, _topic: &str, _payload: &[u8]) -> Result<(), Self> {
        Err(Self)
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn poll(&mut self, _on_message: &mut dyn FnMut(&str, &[u8])) -> Result<(), Self> {
        Err(Self)
    }
}

impl OtaUpdater for Unsupported {
    type Error = Self;

    fn configure(&mut self, _port: u16, _password: Option<&str>) {}

    fn begin(&mut self) -> Result<(), Self> {
        Err(Self)
    }

    fn handle(&mut self, _on_event: &mut dyn FnMut(OtaEvent)) {}
}

impl TimeSource for Unsupported {
    type Error = Self;

    async fn exchange(&mut self, _request: &NtpPacket, _response: &mut NtpPacket) -> Result<(), Self> {
        Err(Self)
    }
}

/// Brings the network up in order and enforces the retry/escalation policy.
///
/// The sequence is Wi-Fi → (optional) mDNS announce → (optional) broker
/// connect/subscribe → (optional) OTA arm → NTP sync. Each step can also be
/// driven on its own.
///
/// The supervisor never restarts the device itself. Failures come back as
/// [`Error`]s; [`Supervisor::escalation`] says which ones require a restart,
/// and [`Supervisor::bring_up`] reports [`SupervisorState::Restarting`]. On
/// ARM targets, `bring_up_or_restart` acts on it.
///
/// # Example
///
/// ```rust,ignore
/// let ota_events = OtaEvents::new();
/// let mut supervisor = Supervisor::<PicoW>::new(config, parts, &ota_events)?;
/// match supervisor.bring_up().await {
///     SupervisorState::Restarting => restart_device(),
///     SupervisorState::Degraded => run_offline().await,
///     _ => loop {
///         supervisor.poll_ota();
///         supervisor.service_broker(&mut |topic, payload| handle(topic, payload)).await?;
///         Timer::after_millis(50).await;
///     },
/// }
/// ```
pub struct Supervisor<'a, P: Platform> {
    config: NetConfig,
    wifi: P::Wifi,
    discovery: P::Discovery,
    broker: P::Broker,
    ota: Option<Ota<'a, P::Ota>>,
    time: P::Time,
    uptime: P::Uptime,
    delay: P::Delay,
    clock: Clock,
    state: SupervisorState,
    wifi_connection: Option<WifiConnection>,
    broker_session: Option<BrokerSession>,
}

impl<'a, P: Platform> Supervisor<'a, P> {
    /// Create a supervisor in [`SupervisorState::Idle`].
    ///
    /// `ota_events` receives OTA lifecycle events when OTA is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroRetryBudget`] if a retry policy allows no attempts.
    pub fn new(config: NetConfig, parts: Parts<P>, ota_events: &'a OtaEvents) -> Result<Self> {
        config.validate()?;
        let ota = config
            .ota
            .clone()
            .map(|ota_config| Ota::new(parts.ota, ota_config, ota_events));
        let mut clock = Clock::new();
        clock.set_offset_seconds(timezone_offset_seconds(config.timezone_hours));
        Ok(Self {
            config,
            wifi: parts.wifi,
            discovery: parts.discovery,
            broker: parts.broker,
            ota,
            time: parts.time,
            uptime: parts.uptime,
            delay: parts.delay,
            clock,
            state: SupervisorState::Idle,
            wifi_connection: None,
            broker_session: None,
        })
    }

    /// Current state.
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Configuration in use.
    pub const fn config(&self) -> &NetConfig {
        &self.config
    }

    /// The local clock.
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The Wi-Fi link, once connected.
    pub const fn wifi_connection(&self) -> Option<&WifiConnection> {
        self.wifi_connection.as_ref()
    }

    /// The broker session, once connected.
    pub const fn broker_session(&self) -> Option<&BrokerSession> {
        self.broker_session.as_ref()
    }

    /// Whether the OTA updater is listening.
    pub fn is_ota_armed(&self) -> bool {
        self.ota.as_ref().is_some_and(Ota::is_armed)
    }

    /// Console timestamp `Y-M-D HH:MM:SS` in local time.
    pub fn timestamp(&self) -> String<24> {
        self.clock.timestamp(self.uptime.now())
    }

    /// Local time as `HH:MM:SS`.
    pub fn formatted_time(&self) -> String<8> {
        self.clock.formatted_time(self.uptime.now())
    }

    fn enter(&mut self, state: SupervisorState) {
        debug!("Supervisor: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Map a failure to the action it calls for.
    ///
    /// Wi-Fi exhaustion restarts only when `reboot_on_failure` is set and
    /// otherwise degrades. Broker connect exhaustion and a missing broker
    /// always restart. Everything else is reported.
    pub const fn escalation(&self, error: &Error) -> Escalation {
        match error {
            Error::WifiRetriesExhausted { .. } if self.config.wifi.reboot_on_failure => {
                Escalation::Restart
            }
            Error::WifiRetriesExhausted { .. } => Escalation::Degrade,
            Error::BrokerRetriesExhausted { .. } | Error::BrokerNotFound => Escalation::Restart,
            _ => Escalation::Report,
        }
    }

    /// Run the whole sequence and return the terminal state.
    pub async fn bring_up(&mut self) -> SupervisorState {
        info!("Supervisor: bringing up {}", self.config.node_name.as_str());

        if let Err(err) = self.connect_wifi().await {
            let state = match self.escalation(&err) {
                Escalation::Restart => {
                    error!("Supervisor: {}, restart required", err);
                    SupervisorState::Restarting
                }
                Escalation::Degrade | Escalation::Report => {
                    warn!("Supervisor: {}, continuing offline", err);
                    SupervisorState::Degraded
                }
            };
            self.enter(state);
            return state;
        }

        if self.config.announce {
            // Best-effort; failure is already logged.
            let _ = self.announce().await;
        }

        if self.config.broker.is_some() {
            if let Err(err) = self.connect_broker().await {
                error!("Supervisor: {}, restart required", err);
                return self.state;
            }
        }

        if self.ota.is_some() {
            let _ = self.arm_ota();
        }

        let _ = self.sync_time().await;
        info!("Supervisor: bring-up finished in {:?}", self.state);
        self.state
    }

    /// Associate with Wi-Fi, falling back to the alternate network once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WifiRetriesExhausted`]; see [`escalation`](Self::escalation).
    pub async fn connect_wifi(&mut self) -> Result<WifiConnection> {
        self.enter(SupervisorState::WifiConnecting);
        match wifi::connect(&mut self.wifi, &mut self.delay, &self.config.wifi).await {
            Ok(connection) => {
                self.wifi_connection = Some(connection.clone());
                self.enter(SupervisorState::WifiConnected);
                Ok(connection)
            }
            Err(err) => {
                error!("Wi-Fi not connected: {}", err);
                self.wifi_connection = None;
                self.enter(SupervisorState::WifiFailed);
                Err(err)
            }
        }
    }

    /// Register the node name with mDNS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DiscoveryRejected`]; never escalates.
    pub async fn announce(&mut self) -> Result<()> {
        discovery::announce(&mut self.discovery, self.config.node_name.as_str()).await
    }

    /// Query mDNS and return the first answer, or `None`.
    pub async fn find_service(&mut self, service_type: &str, protocol: &str) -> Option<ServiceMatch> {
        discovery::find_service(&mut self.discovery, service_type, protocol).await
    }

    async fn resolve_broker(&mut self) -> Result<SocketAddrV4> {
        let broker_config = self.config.broker.as_ref().ok_or(Error::BrokerNotConfigured)?;
        match &broker_config.address {
            BrokerAddress::Static(address) => Ok(*address),
            BrokerAddress::Discover {
                service_type,
                protocol,
            } => {
                let found = discovery::find_service(
                    &mut self.discovery,
                    service_type.as_str(),
                    protocol.as_str(),
                )
                .await
                .ok_or(Error::BrokerNotFound)?;
                Ok(SocketAddrV4::new(found.record.address, found.record.port))
            }
        }
    }

    /// Open the broker session, subscribing to the control topic if configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerNotConfigured`], [`Error::BrokerNotFound`], or
    /// [`Error::BrokerRetriesExhausted`]. The last two leave the supervisor
    /// in [`SupervisorState::Restarting`].
    pub async fn connect_broker(&mut self) -> Result<BrokerSession> {
        if self.config.broker.is_none() {
            return Err(Error::BrokerNotConfigured);
        }
        self.enter(SupervisorState::BrokerConnecting);
        self.broker_session = None;

        let result = match self.resolve_broker().await {
            Ok(address) => self.connect_broker_at(address).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(session) => {
                self.broker_session = Some(session);
                self.enter(SupervisorState::BrokerConnected);
                Ok(session)
            }
            Err(err) => {
                error!("MQTT: {}", err);
                self.enter(SupervisorState::Restarting);
                Err(err)
            }
        }
    }

    async fn connect_broker_at(&mut self, address: SocketAddrV4) -> Result<BrokerSession> {
        let broker_config = self.config.broker.as_ref().ok_or(Error::BrokerNotConfigured)?;
        let request = ConnectRequest {
            broker: address,
            client_id: self.config.node_name.as_str(),
            credentials: broker_config.credentials.as_ref(),
            subscribe_to: broker_config
                .subscribe
                .then_some(broker_config.control_topic.as_str()),
        };
        broker::connect(&mut self.broker, &mut self.delay, &request, &broker_config.retry).await
    }

    /// Publish `payload` to `topic` with the broker's retry policy.
    ///
    /// Returns the number of publish calls made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerNotConfigured`] or [`Error::PublishFailed`];
    /// never escalates.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<u16> {
        let broker_config = self.config.broker.as_ref().ok_or(Error::BrokerNotConfigured)?;
        broker::publish(
            &mut self.broker,
            &mut self.delay,
            topic,
            payload,
            &broker_config.retry,
        )
        .await
    }

    /// Format a message into a [`MessageBuffer`] and publish it to the data topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLong`] if the message does not fit, otherwise
    /// as [`publish`](Self::publish).
    pub async fn publish_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<u16> {
        let broker_config = self.config.broker.as_ref().ok_or(Error::BrokerNotConfigured)?;
        let mut message = MessageBuffer::new();
        message.write_fmt(args).map_err(|_| Error::MessageTooLong)?;
        broker::publish(
            &mut self.broker,
            &mut self.delay,
            broker_config.data_topic.as_str(),
            message.as_bytes(),
            &broker_config.retry,
        )
        .await
    }

    /// Keep the broker session alive and deliver inbound messages.
    ///
    /// Reconnects (with the connect policy) if the session dropped, then hands
    /// pending messages to `on_message(topic, payload)` without waiting. A
    /// successful reconnect returns the supervisor to its ready state.
    ///
    /// # Errors
    ///
    /// As [`connect_broker`](Self::connect_broker) when a reconnect fails.
    pub async fn service_broker(&mut self, on_message: &mut dyn FnMut(&str, &[u8])) -> Result<()> {
        if self.config.broker.is_none() {
            return Err(Error::BrokerNotConfigured);
        }
        if !self.broker.is_connected() {
            warn!("MQTT: session lost, reconnecting");
            let resumed = self.state;
            self.connect_broker().await?;
            if matches!(
                resumed,
                SupervisorState::Ready | SupervisorState::ReadyWithStaleTime
            ) {
                self.enter(resumed);
            }
        }
        if self.broker.poll(on_message).await.is_err() {
            warn!("MQTT: polling for messages failed");
        }
        Ok(())
    }

    /// Arm the OTA updater. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OtaNotConfigured`] or [`Error::OtaBeginFailed`];
    /// never escalates.
    pub fn arm_ota(&mut self) -> Result<()> {
        self.ota.as_mut().ok_or(Error::OtaNotConfigured)?.arm()
    }

    /// Service the OTA updater once, arming it first if needed. Call from
    /// the main loop; does nothing when OTA is not configured.
    pub fn poll_ota(&mut self) {
        if let Some(ota) = self.ota.as_mut() {
            ota.poll();
        }
    }

    /// Apply the configured time zone and sync the clock once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeSyncFailed`] or [`Error::InvalidTimeResponse`];
    /// never escalates. The supervisor ends in [`SupervisorState::ReadyWithStaleTime`].
    pub async fn sync_time(&mut self) -> Result<UnixSeconds> {
        self.enter(SupervisorState::TimeSyncing);
        let result = time_sync::sync(
            &mut self.time,
            &self.uptime,
            &mut self.clock,
            self.config.timezone_hours,
        )
        .await;
        self.enter(if result.is_ok() {
            SupervisorState::Ready
        } else {
            SupervisorState::ReadyWithStaleTime
        });
        result
    }

    /// Format a console line prefixed with the local timestamp and node name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLong`] if the line does not fit.
    pub fn console_line(&self, args: fmt::Arguments<'_>) -> Result<MessageBuffer> {
        let mut line = MessageBuffer::new();
        write!(
            line,
            "{} {} {}",
            self.timestamp().as_str(),
            self.config.node_name.as_str(),
            args
        )
        .map_err(|_| Error::MessageTooLong)?;
        Ok(line)
    }
}

#[cfg(feature = "arm")]
impl<P: Platform> Supervisor<'_, P> {
    /// Run [`bring_up`](Self::bring_up) and restart the device if it ends in
    /// [`SupervisorState::Restarting`].
    pub async fn bring_up_or_restart(&mut self) -> SupervisorState {
        let state = self.bring_up().await;
        if state == SupervisorState::Restarting {
            error!("Supervisor: rebooting...");
            restart_device();
        }
        state
    }
}

/// Reset the microcontroller. Does not return.
#[cfg(feature = "arm")]
pub fn restart_device() -> ! {
    info!("Supervisor: resetting device now");
    cortex_m::peripheral::SCB::sys_reset()
}
