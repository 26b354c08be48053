//! Configuration passed to [`Supervisor::new`](crate::supervisor::Supervisor::new).
//!
//! Values are set once before bring-up and are read-only afterwards.
//! Loading them (flash, build-time secrets, provisioning) is the caller's job.

use core::net::{Ipv4Addr, SocketAddrV4};

use heapless::String;

use crate::retry::RetryPolicy;
use crate::supervisor::Step;
use crate::{Error, Result};

/// Length of the buffer used to format outgoing messages.
pub const MESSAGE_BUFFER_LEN: usize = 500;
/// Capacity of the node name (also the MQTT client identity and mDNS hostname).
pub const NODE_NAME_LEN: usize = 24;
/// Capacity of a Wi-Fi network name.
pub const SSID_LEN: usize = 32;
/// Capacity of a Wi-Fi or OTA password.
pub const PASSWORD_LEN: usize = 64;
/// Capacity of an MQTT topic.
pub const TOPIC_LEN: usize = 128;
/// Capacity of an mDNS service type or protocol label.
pub const SERVICE_LABEL_LEN: usize = 32;

/// Default MQTT broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Default OTA listening port.
pub const DEFAULT_OTA_PORT: u16 = 8266;

/// Buffer for a formatted outgoing message.
pub type MessageBuffer = String<MESSAGE_BUFFER_LEN>;
/// Node name buffer.
pub type NodeName = String<NODE_NAME_LEN>;
/// MQTT topic buffer.
pub type Topic = String<TOPIC_LEN>;

pub(crate) fn bounded<const N: usize>(field: &'static str, value: &str) -> Result<String<N>> {
    String::try_from(value).map_err(|()| Error::FieldTooLong { field, max: N })
}

/// Network name and password for one Wi-Fi network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiCredentials {
    /// Network name.
    pub ssid: String<SSID_LEN>,
    /// Passphrase; empty for an open network.
    pub password: String<PASSWORD_LEN>,
}

impl WifiCredentials {
    /// Create credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] if either value exceeds its capacity.
    pub fn new(ssid: &str, password: &str) -> Result<Self> {
        Ok(Self {
            ssid: bounded("ssid", ssid)?,
            password: bounded("password", password)?,
        })
    }
}

/// Wi-Fi association settings.
#[derive(Clone, Debug)]
pub struct WifiConfig {
    /// Network tried first.
    pub primary: WifiCredentials,
    /// Network tried once the primary's budget is spent.
    pub alternate: Option<WifiCredentials>,
    /// Attempt budget per network.
    pub retry: RetryPolicy,
    /// Whether exhausting every network should restart the device.
    pub reboot_on_failure: bool,
}

impl WifiConfig {
    /// Primary network only, default policy, reboot on failure.
    #[must_use]
    pub fn new(primary: WifiCredentials) -> Self {
        Self {
            primary,
            alternate: None,
            retry: RetryPolicy::WIFI,
            reboot_on_failure: true,
        }
    }

    /// Add an alternate network.
    #[must_use]
    pub fn with_alternate(mut self, alternate: WifiCredentials) -> Self {
        self.alternate = Some(alternate);
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Choose whether failure restarts the device.
    #[must_use]
    pub fn with_reboot_on_failure(mut self, reboot_on_failure: bool) -> Self {
        self.reboot_on_failure = reboot_on_failure;
        self
    }
}

/// Where the broker lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerAddress {
    /// A fixed address and port.
    Static(SocketAddrV4),
    /// Look the broker up with an mDNS service query and use the first answer.
    Discover {
        /// Service type, for example `mqtt`.
        service_type: String<SERVICE_LABEL_LEN>,
        /// Protocol, for example `tcp`.
        protocol: String<SERVICE_LABEL_LEN>,
    },
}

impl BrokerAddress {
    /// A fixed broker on [`DEFAULT_BROKER_PORT`].
    #[must_use]
    pub const fn host(address: Ipv4Addr) -> Self {
        Self::Static(SocketAddrV4::new(address, DEFAULT_BROKER_PORT))
    }

    /// Discover the broker via mDNS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] if a label exceeds its capacity.
    pub fn discover(service_type: &str, protocol: &str) -> Result<Self> {
        Ok(Self::Discover {
            service_type: bounded("service_type", service_type)?,
            protocol: bounded("protocol", protocol)?,
        })
    }
}

/// Broker login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerCredentials {
    /// User name.
    pub username: String<NODE_NAME_LEN>,
    /// Password.
    pub password: String<PASSWORD_LEN>,
}

impl BrokerCredentials {
    /// Create broker credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] if either value exceeds its capacity.
    pub fn new(username: &str, password: &str) -> Result<Self> {
        Ok(Self {
            username: bounded("broker username", username)?,
            password: bounded("broker password", password)?,
        })
    }
}

/// MQTT broker settings.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Broker location.
    pub address: BrokerAddress,
    /// Optional login.
    pub credentials: Option<BrokerCredentials>,
    /// Topic used for outgoing data.
    pub data_topic: Topic,
    /// Topic subscribed to for control messages.
    pub control_topic: Topic,
    /// Whether to subscribe to the control topic after connecting.
    pub subscribe: bool,
    /// Connect and publish budget.
    pub retry: RetryPolicy,
}

impl BrokerConfig {
    /// Create broker settings with the default policy and subscription enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] if a topic exceeds its capacity.
    pub fn new(address: BrokerAddress, data_topic: &str, control_topic: &str) -> Result<Self> {
        Ok(Self {
            address,
            credentials: None,
            data_topic: bounded("data_topic", data_topic)?,
            control_topic: bounded("control_topic", control_topic)?,
            subscribe: true,
            retry: RetryPolicy::BROKER,
        })
    }

    /// Add a login.
    #[must_use]
    pub fn with_credentials(mut self, credentials: BrokerCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Choose whether to subscribe to the control topic.
    #[must_use]
    pub fn with_subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// OTA updater settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtaConfig {
    /// Listening port.
    pub port: u16,
    /// Password required from the uploader; `None` disables authentication.
    pub password: Option<String<PASSWORD_LEN>>,
}

impl OtaConfig {
    /// Default port, no authentication.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            port: DEFAULT_OTA_PORT,
            password: None,
        }
    }

    /// Require a password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] if the password exceeds its capacity.
    pub fn with_password(mut self, password: &str) -> Result<Self> {
        self.password = Some(bounded("ota password", password)?);
        Ok(self)
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the supervisor needs to bring the network up.
#[derive(Clone, Debug)]
pub struct NetConfig {
    /// Device name on the network.
    pub node_name: NodeName,
    /// Wi-Fi settings.
    pub wifi: WifiConfig,
    /// Whether to register the node name with mDNS after Wi-Fi is up.
    pub announce: bool,
    /// Broker settings; `None` skips the broker step.
    pub broker: Option<BrokerConfig>,
    /// OTA settings; `None` disables OTA.
    pub ota: Option<OtaConfig>,
    /// Offset from UTC in whole hours.
    pub timezone_hours: i8,
}

impl NetConfig {
    /// Wi-Fi only, no mDNS, broker, or OTA, UTC.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] if `node_name` exceeds its capacity.
    pub fn new(node_name: &str, wifi: WifiConfig) -> Result<Self> {
        Ok(Self {
            node_name: bounded("node_name", node_name)?,
            wifi,
            announce: false,
            broker: None,
            ota: None,
            timezone_hours: 0,
        })
    }

    /// Register the node name with mDNS.
    #[must_use]
    pub fn with_announce(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    /// Add a broker.
    #[must_use]
    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Enable OTA.
    #[must_use]
    pub fn with_ota(mut self, ota: OtaConfig) -> Self {
        self.ota = Some(ota);
        self
    }

    /// Set the time zone offset.
    #[must_use]
    pub fn with_timezone_hours(mut self, timezone_hours: i8) -> Self {
        self.timezone_hours = timezone_hours;
        self
    }

    /// Check the retry budgets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroRetryBudget`] if a policy allows no attempts.
    pub fn validate(&self) -> Result<()> {
        self.wifi.retry.validate(Step::Wifi)?;
        if let Some(broker) = &self.broker {
            broker.retry.validate(Step::Broker)?;
        }
        Ok(())
    }
}
