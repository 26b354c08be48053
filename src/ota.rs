//! Over-the-air update arming and cooperative servicing.
//!
//! The updater reports its lifecycle as [`OtaEvent`]s. [`Ota::poll`] pushes
//! them into an [`OtaEvents`] channel that the application drains at its own
//! pace. Transfer errors are reported, never retried here.
//!
//! # Example
//!
//! ```rust,ignore
//! let ota_events = OtaEvents::new();
//! let mut ota = Ota::new(updater, OtaConfig::new(), &ota_events);
//! loop {
//!     ota.poll();
//!     while let Ok(event) = ota_events.try_receive() {
//!         // show progress, flush state before End, ...
//!     }
//!     Timer::after_millis(50).await;
//! }
//! ```

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

use crate::config::OtaConfig;
use crate::log::{error, info, warn};
use crate::{Error, Result};

/// Events buffered between drains; further events are dropped until the application catches up.
pub const OTA_EVENT_CAPACITY: usize = 8;

/// Channel carrying [`OtaEvent`]s from [`Ota::poll`] to the application.
pub type OtaEvents = Channel<NoopRawMutex, OtaEvent, OTA_EVENT_CAPACITY>;

/// Why an update transfer failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaErrorKind {
    /// The uploader's password was wrong.
    Auth,
    /// The updater could not prepare flash for the image.
    Begin,
    /// The updater could not reach the uploader.
    Connect,
    /// The image transfer broke off.
    Receive,
    /// The image could not be finalized.
    End,
}

impl OtaErrorKind {
    const fn describe(self) -> &'static str {
        match self {
            Self::Auth => "Auth Failed",
            Self::Begin => "Begin Failed",
            Self::Connect => "Connect Failed",
            Self::Receive => "Receive Failed",
            Self::End => "End Failed",
        }
    }
}

/// One step of an update transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaEvent {
    /// An uploader started a transfer.
    Start,
    /// Share of the image received so far.
    Progress {
        /// 0 to 100.
        percent: u8,
    },
    /// The transfer failed.
    Error {
        /// Failure category.
        kind: OtaErrorKind,
    },
    /// The image is written; the updater will reboot into it.
    End,
}

impl OtaEvent {
    /// Progress event for `received` of `total` bytes. An unknown (zero)
    /// total reports 0 %.
    #[must_use]
    pub fn progress(received: u32, total: u32) -> Self {
        let percent = u64::from(received)
            .saturating_mul(100)
            .checked_div(u64::from(total))
            .unwrap_or(0)
            .min(100);
        Self::Progress {
            percent: u8::try_from(percent).unwrap_or(100),
        }
    }
}

/// The OTA updater, as seen by the supervisor.
pub trait OtaUpdater {
    /// Error reported by `begin`.
    type Error;

    /// Set the listening port and, if given, the password uploaders must send.
    fn configure(&mut self, port: u16, password: Option<&str>);

    /// Start listening for update pushes.
    fn begin(&mut self) -> Result<(), Self::Error>;

    /// Service any pending transfer without blocking, reporting lifecycle
    /// events to `on_event`.
    fn handle(&mut self, on_event: &mut dyn FnMut(OtaEvent));
}

/// Arms an [`OtaUpdater`] once and services it from the main loop.
pub struct Ota<'a, U> {
    updater: U,
    config: OtaConfig,
    events: &'a OtaEvents,
    armed: bool,
    begin_failed: bool,
}

impl<'a, U: OtaUpdater> Ota<'a, U> {
    /// Wrap `updater`. Nothing happens until [`arm`](Self::arm) or [`poll`](Self::poll).
    pub fn new(updater: U, config: OtaConfig, events: &'a OtaEvents) -> Self {
        Self {
            updater,
            config,
            events,
            armed: false,
            begin_failed: false,
        }
    }

    /// Whether the updater is listening.
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Configure the updater and start listening. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OtaBeginFailed`] if the updater cannot start; the
    /// next call tries again. Only the first failure in a row is logged.
    pub fn arm(&mut self) -> Result<()> {
        if self.armed {
            return Ok(());
        }
        if !self.begin_failed {
            info!("OTA: arming on port {}", self.config.port);
        }
        self.updater
            .configure(self.config.port, self.config.password.as_deref());
        if self.updater.begin().is_err() {
            // Logged once per failure streak.
            if !self.begin_failed {
                error!("OTA: begin failed");
                self.begin_failed = true;
            }
            return Err(Error::OtaBeginFailed);
        }
        self.armed = true;
        self.begin_failed = false;
        info!("OTA: ready");
        Ok(())
    }

    /// Arm if needed, then service the updater once.
    ///
    /// Call this from the main loop at a bounded interval. Events that do not
    /// fit in the channel are dropped with a warning.
    pub fn poll(&mut self) {
        if self.arm().is_err() {
            return;
        }
        let events = self.events;
        self.updater.handle(&mut |event: OtaEvent| {
            log_event(event);
            if events.try_send(event).is_err() {
                warn!("OTA: event channel full, dropping event");
            }
        });
    }

    /// Whether the last attempt to start the updater failed.
    pub const fn begin_failed(&self) -> bool {
        self.begin_failed
    }

    /// Give back the wrapped updater.
    pub fn into_inner(self) -> U {
        self.updater
    }
}

fn log_event(event: OtaEvent) {
    match event {
        OtaEvent::Start => info!("OTA Start"),
        OtaEvent::Progress { percent } => info!("OTA Progress: {}%", percent),
        OtaEvent::Error { kind } => error!("OTA Error: {}", kind.describe()),
        OtaEvent::End => info!("OTA End"),
    }
}
