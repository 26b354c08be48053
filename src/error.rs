use derive_more::{Display, Error};

use crate::supervisor::Step;

/// A specialized [`Result`] where the error is this crate's [`Error`] type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised while bringing up or using network services.
///
/// Errors that mark a mandatory precondition as unmet (Wi-Fi, broker) are
/// mapped to a restart by [`Supervisor::escalation`](crate::supervisor::Supervisor::escalation).
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A configuration string does not fit its fixed-capacity buffer.
    #[display("{field} is longer than {max} bytes")]
    FieldTooLong {
        /// Name of the configuration field.
        field: &'static str,
        /// Capacity of the field in bytes.
        max: usize,
    },

    /// A retry policy allows zero attempts.
    #[display("{step} retry policy must allow at least one attempt")]
    ZeroRetryBudget {
        /// The bring-up step that owns the policy.
        step: Step,
    },

    /// Neither the primary nor the alternate network accepted us.
    #[display("Wi-Fi not connected after {attempts} attempts")]
    WifiRetriesExhausted {
        /// Total association attempts across all networks.
        attempts: u16,
    },

    /// The mDNS responder refused to register the node name.
    #[display("mDNS registration rejected")]
    DiscoveryRejected,

    /// The broker address was to be discovered, but no service answered.
    #[display("no broker service found")]
    BrokerNotFound,

    /// A broker operation was requested but no broker is configured.
    #[display("no broker configured")]
    BrokerNotConfigured,

    /// The broker session (and required subscription) never came up.
    #[display("broker not connected after {attempts} attempts")]
    BrokerRetriesExhausted {
        /// Connect attempts made.
        attempts: u8,
    },

    /// Every publish attempt failed.
    #[display("publish failed after {attempts} attempts")]
    PublishFailed {
        /// Publish attempts made.
        attempts: u16,
    },

    /// A formatted message does not fit the message buffer.
    #[display("message exceeds the message buffer")]
    MessageTooLong,

    /// An OTA operation was requested but OTA is not configured.
    #[display("OTA not configured")]
    OtaNotConfigured,

    /// The OTA updater could not start listening.
    #[display("OTA begin failed")]
    OtaBeginFailed,

    /// The time server's reply was short or predates the Unix epoch.
    #[display("invalid NTP response")]
    InvalidTimeResponse,

    /// The time server round-trip failed.
    #[display("NTP round-trip failed")]
    TimeSyncFailed,

    /// An embassy task could not be spawned.
    #[display("task spawn failed")]
    TaskSpawn,
}
