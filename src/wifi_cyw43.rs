//! [`WifiLink`] for the Pico W's CYW43 radio, on top of `embassy-net`.
//!
//! [`Cyw43Link::start`] powers the radio, loads its firmware, starts DHCP, and
//! spawns the driver and network tasks. The returned link joins networks on
//! demand; the [`Stack`] it hands out is what the MQTT client and
//! [`NtpUdp`](crate::ntp_udp::NtpUdp) run on.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

use cyw43::JoinOptions;
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use embassy_executor::Spawner;
use embassy_net::{Config, Stack, StackResources};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::{Peri, bind_interrupts};
use embassy_time::{Duration, with_timeout};
use static_cell::StaticCell;

use crate::config::WifiCredentials;
use crate::log::{info, warn};
use crate::wifi::WifiLink;
use crate::{Error, Result};

/// How long to wait for a DHCP lease after associating.
const DHCP_TIMEOUT: Duration = Duration::from_secs(10);
/// Sockets the network stack can hold at once (DNS, NTP, MQTT, mDNS, OTA).
const SOCKET_COUNT: usize = 5;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

/// Why a join attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cyw43Error {
    /// The radio refused the join; carries the firmware status code.
    Join {
        /// CYW43 status.
        status: u32,
    },
    /// Associated, but no DHCP lease arrived in time.
    DhcpTimeout,
}

/// The Pico W's fixed CYW43 wiring.
pub struct Cyw43Pins {
    /// Power (GPIO 23).
    pub power: Peri<'static, PIN_23>,
    /// Chip select (GPIO 25).
    pub chip_select: Peri<'static, PIN_25>,
    /// Data (GPIO 24).
    pub data: Peri<'static, PIN_24>,
    /// Clock (GPIO 29).
    pub clock: Peri<'static, PIN_29>,
    /// PIO block driving the SPI bus.
    pub pio: Peri<'static, PIO0>,
    /// DMA channel for the SPI bus.
    pub dma: Peri<'static, DMA_CH0>,
}

/// CYW43 radio plus its `embassy-net` stack.
pub struct Cyw43Link {
    control: cyw43::Control<'static>,
    stack: Stack<'static>,
}

impl Cyw43Link {
    /// Bring the radio up in station mode with DHCP. Does not join a network.
    ///
    /// Call at most once; the driver state lives in statics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskSpawn`] if the driver or network task cannot be spawned.
    pub async fn start(pins: Cyw43Pins, seed: u64, spawner: Spawner) -> Result<Self> {
        info!("Wi-Fi: starting CYW43");
        let firmware = cyw43_firmware::CYW43_43439A0;
        let clm = cyw43_firmware::CYW43_43439A0_CLM;

        let power = Output::new(pins.power, Level::Low);
        let chip_select = Output::new(pins.chip_select, Level::High);
        let mut pio = Pio::new(pins.pio, Irqs);
        let spi = PioSpi::new(
            &mut pio.common,
            pio.sm0,
            DEFAULT_CLOCK_DIVIDER,
            pio.irq0,
            chip_select,
            pins.data,
            pins.clock,
            pins.dma,
        );

        static STATE: StaticCell<cyw43::State> = StaticCell::new();
        let state = STATE.init(cyw43::State::new());
        let (net_device, mut control, runner) = cyw43::new(state, power, spi, firmware).await;
        spawner.spawn(wifi_task(runner).map_err(|_| Error::TaskSpawn)?);

        control.init(clm).await;
        control
            .set_power_management(cyw43::PowerManagementMode::PowerSave)
            .await;

        static RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();
        let (stack, runner) = embassy_net::new(
            net_device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            seed,
        );
        spawner.spawn(net_task(runner).map_err(|_| Error::TaskSpawn)?);

        Ok(Self { control, stack })
    }

    /// The network stack, for sockets.
    #[must_use]
    pub const fn stack(&self) -> Stack<'static> {
        self.stack
    }
}

impl WifiLink for Cyw43Link {
    type Error = Cyw43Error;

    async fn join(&mut self, credentials: &WifiCredentials) -> Result<(), Cyw43Error> {
        if let Err(err) = self
            .control
            .join(
                credentials.ssid.as_str(),
                JoinOptions::new(credentials.password.as_bytes()),
            )
            .await
        {
            warn!("Wi-Fi: join failed with status {}", err.status);
            return Err(Cyw43Error::Join { status: err.status });
        }

        if with_timeout(DHCP_TIMEOUT, self.stack.wait_config_up())
            .await
            .is_err()
        {
            warn!("Wi-Fi: no DHCP lease, leaving network");
            self.control.leave().await;
            return Err(Cyw43Error::DhcpTimeout);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.stack.config_v4().map(|config| config.address.address())
    }
}

#[embassy_executor::task]
async fn wifi_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}
