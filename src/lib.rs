//! Bring up Wi-Fi, mDNS, MQTT, OTA, and NTP on a microcontroller, in order,
//! with a retry-then-escalate policy.
//!
//! The [`Supervisor`](supervisor::Supervisor) runs the sequence. Each service
//! sits behind a small trait ([`WifiLink`](wifi::WifiLink),
//! [`ServiceDiscovery`](discovery::ServiceDiscovery),
//! [`BrokerClient`](broker::BrokerClient), [`OtaUpdater`](ota::OtaUpdater),
//! [`TimeSource`](time_sync::TimeSource)), so the sequencing and retry logic
//! runs unchanged on the host with fakes.
//!
//! # Policy
//!
//! | Step | Failure | Result |
//! |------|---------|--------|
//! | Wi-Fi | every network exhausted | restart, or degrade if `reboot_on_failure` is off |
//! | mDNS announce | rejected | reported |
//! | Broker connect/subscribe | attempts exhausted, or not discovered | restart |
//! | Publish | every retry failed | reported |
//! | OTA arm | begin failed | reported |
//! | NTP | no or bad reply | reported, clock stays stale |
//!
//! # Features
//!
//! - `defmt`: log through `defmt`.
//! - `arm`: Cortex-M support, including [`restart_device`](supervisor::restart_device).
//! - `pico1` / `pico2`: select the RP chip.
//! - `wifi`: CYW43 Wi-Fi and UDP NTP adapters.
//! - `embedded`: `defmt` + `pico1` + `arm`.
#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait, reason = "single-threaded embedded")]

#[cfg(all(feature = "pico1", feature = "pico2"))]
compile_error!("Cannot enable both 'pico1' and 'pico2' features simultaneously");

#[cfg(all(feature = "wifi", not(any(feature = "pico1", feature = "pico2"))))]
compile_error!("The 'wifi' feature needs a board feature: 'pico1' or 'pico2'");

pub(crate) mod log;

pub mod broker;
pub mod config;
pub mod discovery;
mod error;
#[cfg(feature = "wifi")]
pub mod ntp_udp;
pub mod ota;
pub mod retry;
pub mod supervisor;
pub mod time_sync;
pub mod wifi;
#[cfg(feature = "wifi")]
pub mod wifi_cyw43;

pub use crate::error::{Error, Result};
