#![allow(missing_docs)]
//! Pico W bring-up demo: joins Wi-Fi (with an optional alternate network),
//! syncs the clock over NTP, then logs the local time every minute.
//!
//! Build with `WIFI_SSID`/`WIFI_PASS` (and optionally `WIFI_ALT_SSID`/`WIFI_ALT_PASS`,
//! `TZ_HOURS`) set in the environment.

#![no_std]
#![no_main]
#![cfg(feature = "wifi")]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::{convert::Infallible, panic};
use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_time::{Delay, Duration, Timer};
use net_envoy::{
    Result,
    config::{NetConfig, WifiConfig, WifiCredentials},
    ntp_udp::NtpUdp,
    ota::OtaEvents,
    supervisor::{Parts, Platform, Supervisor, SupervisorState, Unsupported},
    time_sync::EmbassyUptime,
    wifi_cyw43::{Cyw43Link, Cyw43Pins},
};
use {defmt_rtt as _, panic_probe as _};

const NODE_NAME: &str = "pico-envoy";
const NETWORK_SEED: u64 = 0x7c8f_3a2e_9d14_6b5a;

struct PicoW;

impl Platform for PicoW {
    type Wifi = Cyw43Link;
    type Discovery = Unsupported;
    type Broker = Unsupported;
    type Ota = Unsupported;
    type Time = NtpUdp<'static>;
    type Uptime = EmbassyUptime;
    type Delay = Delay;
}

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    info!("Net bring-up demo - starting");
    let p = embassy_rp::init(Default::default());

    let link = Cyw43Link::start(
        Cyw43Pins {
            power: p.PIN_23,
            chip_select: p.PIN_25,
            data: p.PIN_24,
            clock: p.PIN_29,
            pio: p.PIO0,
            dma: p.DMA_CH0,
        },
        NETWORK_SEED,
        spawner,
    )
    .await?;
    let stack = link.stack();

    let mut wifi = WifiConfig::new(WifiCredentials::new(env!("WIFI_SSID"), env!("WIFI_PASS"))?);
    if let (Some(ssid), Some(password)) = (option_env!("WIFI_ALT_SSID"), option_env!("WIFI_ALT_PASS")) {
        wifi = wifi.with_alternate(WifiCredentials::new(ssid, password)?);
    }
    let timezone_hours = option_env!("TZ_HOURS")
        .and_then(|hours| hours.parse().ok())
        .unwrap_or(0);
    let config = NetConfig::new(NODE_NAME, wifi)?.with_timezone_hours(timezone_hours);

    let ota_events = OtaEvents::new();
    let mut supervisor = Supervisor::<PicoW>::new(
        config,
        Parts {
            wifi: link,
            discovery: Unsupported,
            broker: Unsupported,
            ota: Unsupported,
            time: NtpUdp::with_default_server(stack),
            uptime: EmbassyUptime,
            delay: Delay,
        },
        &ota_events,
    )?;

    if supervisor.bring_up_or_restart().await == SupervisorState::ReadyWithStaleTime {
        warn!("Clock not synced; times count from boot");
    }

    loop {
        let line = supervisor.console_line(format_args!("still here"))?;
        info!("{}", line.as_str());
        Timer::after(Duration::from_secs(60)).await;
    }
}
