//! Scripted collaborators shared by the integration tests.
//!
//! Every fake writes what it was asked to do into a shared [`Log`], and
//! [`FakeDelay`] advances a shared [`FakeTime`] instead of sleeping, so tests
//! can assert both call order and elapsed time.
#![allow(dead_code, reason = "each test binary uses a subset")]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;
use net_envoy::broker::BrokerClient;
use net_envoy::config::{BrokerCredentials, WifiCredentials};
use net_envoy::discovery::{ServiceDiscovery, ServiceRecord, ServiceRecords};
use net_envoy::ota::{OtaEvent, OtaUpdater};
use net_envoy::supervisor::Platform;
use net_envoy::time_sync::{NTP_PACKET_LEN, NtpPacket, TimeSource, Uptime};
use net_envoy::wifi::WifiLink;

/// Ordered record of collaborator calls.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Fake monotonic time in nanoseconds.
#[derive(Clone, Default)]
pub struct FakeTime(Rc<Cell<u64>>);

impl FakeTime {
    pub fn elapsed_ms(&self) -> u64 {
        self.0.get() / 1_000_000
    }

    pub fn advance_ns(&self, ns: u64) {
        self.0.set(self.0.get() + ns);
    }

    pub fn delay(&self, log: &Log) -> FakeDelay {
        FakeDelay {
            time: self.clone(),
            log: log.clone(),
        }
    }

    pub fn uptime(&self) -> FakeUptime {
        FakeUptime(self.clone())
    }
}

/// Advances [`FakeTime`] and logs `delay <ms>`.
pub struct FakeDelay {
    time: FakeTime,
    log: Log,
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.time.advance_ns(u64::from(ns));
    }

    async fn delay_us(&mut self, us: u32) {
        self.time.advance_ns(u64::from(us) * 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.log.push(format!("delay {ms}"));
        self.time.advance_ns(u64::from(ms) * 1_000_000);
    }
}

/// Reads [`FakeTime`].
pub struct FakeUptime(FakeTime);

impl Uptime for FakeUptime {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.0.get() / 1_000)
    }
}

/// Wi-Fi stack that accepts a network after a scripted number of failures.
pub struct FakeWifi {
    log: Log,
    failures_before_join: HashMap<String, usize>,
    joins: HashMap<String, usize>,
    connected: bool,
    address: Option<Ipv4Addr>,
}

impl FakeWifi {
    /// Every network refuses.
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            failures_before_join: HashMap::new(),
            joins: HashMap::new(),
            connected: false,
            address: Some(Ipv4Addr::new(192, 168, 1, 42)),
        }
    }

    /// `ssid` refuses `failures` times, then accepts.
    pub fn accept_after(mut self, ssid: &str, failures: usize) -> Self {
        self.failures_before_join.insert(ssid.to_string(), failures);
        self
    }

    /// Joins succeed but DHCP never hands out an address.
    pub fn without_address(mut self) -> Self {
        self.address = None;
        self
    }
}

impl WifiLink for FakeWifi {
    type Error = ();

    async fn join(&mut self, credentials: &WifiCredentials) -> Result<(), ()> {
        let ssid = credentials.ssid.as_str();
        self.log.push(format!("join {ssid}"));
        let joins = self.joins.entry(ssid.to_string()).or_insert(0);
        *joins += 1;
        match self.failures_before_join.get(ssid) {
            Some(failures) if *joins > *failures => {
                self.connected = true;
                Ok(())
            }
            _ => Err(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.address
    }
}

/// mDNS responder with canned answers.
pub struct FakeDiscovery {
    log: Log,
    pub accept_registration: bool,
    pub query_fails: bool,
    pub records: Vec<ServiceRecord>,
}

impl FakeDiscovery {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            accept_registration: true,
            query_fails: false,
            records: Vec::new(),
        }
    }

    pub fn with_record(mut self, hostname: &str, address: Ipv4Addr, port: u16) -> Self {
        self.records.push(ServiceRecord {
            hostname: hostname.try_into().unwrap(),
            address,
            port,
        });
        self
    }
}

impl ServiceDiscovery for FakeDiscovery {
    type Error = ();

    async fn register(&mut self, node_name: &str) -> Result<(), ()> {
        self.log.push(format!("register {node_name}"));
        if self.accept_registration { Ok(()) } else { Err(()) }
    }

    async fn query(
        &mut self,
        service_type: &str,
        protocol: &str,
        found: &mut ServiceRecords,
    ) -> Result<(), ()> {
        self.log.push(format!("query _{service_type}._{protocol}"));
        if self.query_fails {
            return Err(());
        }
        for record in &self.records {
            found.push(record.clone());
        }
        Ok(())
    }
}

/// MQTT client whose failures are scripted per operation.
pub struct FakeBroker {
    log: Log,
    pub connect_failures: usize,
    pub subscribe_failures: usize,
    pub publish_failures: usize,
    pub connected: Rc<Cell<bool>>,
    pub inbox: Rc<RefCell<VecDeque<(String, Vec<u8>)>>>,
}

impl FakeBroker {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            connect_failures: 0,
            subscribe_failures: 0,
            publish_failures: 0,
            connected: Rc::default(),
            inbox: Rc::default(),
        }
    }
}

impl BrokerClient for FakeBroker {
    type Error = ();

    async fn connect(
        &mut self,
        broker: SocketAddrV4,
        client_id: &str,
        credentials: Option<&BrokerCredentials>,
    ) -> Result<(), ()> {
        match credentials {
            Some(credentials) => self.log.push(format!(
                "connect {broker} as {client_id} user {}",
                credentials.username.as_str()
            )),
            None => self.log.push(format!("connect {broker} as {client_id}")),
        }
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(());
        }
        self.connected.set(true);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), ()> {
        self.log.push(format!("subscribe {topic}"));
        if self.subscribe_failures > 0 {
            self.subscribe_failures -= 1;
            return Err(());
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ()> {
        self.log.push(format!(
            "publish {topic} {}",
            String::from_utf8_lossy(payload)
        ));
        if self.publish_failures > 0 {
            self.publish_failures -= 1;
            return Err(());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    async fn poll(&mut self, on_message: &mut dyn FnMut(&str, &[u8])) -> Result<(), ()> {
        self.log.push("poll");
        while let Some((topic, payload)) = self.inbox.borrow_mut().pop_front() {
            on_message(&topic, &payload);
        }
        Ok(())
    }
}

/// OTA updater that replays queued events on each `handle`.
pub struct FakeOta {
    log: Log,
    pub begin_failures: usize,
    pub pending: Rc<RefCell<VecDeque<OtaEvent>>>,
}

impl FakeOta {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            begin_failures: 0,
            pending: Rc::default(),
        }
    }
}

impl OtaUpdater for FakeOta {
    type Error = ();

    fn configure(&mut self, port: u16, password: Option<&str>) {
        self.log
            .push(format!("ota configure {port} {}", password.unwrap_or("-")));
    }

    fn begin(&mut self) -> Result<(), ()> {
        self.log.push("ota begin");
        if self.begin_failures > 0 {
            self.begin_failures -= 1;
            return Err(());
        }
        Ok(())
    }

    fn handle(&mut self, on_event: &mut dyn FnMut(OtaEvent)) {
        while let Some(event) = self.pending.borrow_mut().pop_front() {
            on_event(event);
        }
    }
}

/// Time server that answers with a fixed packet, or not at all.
pub struct FakeTimeServer {
    log: Log,
    pub response: Option<NtpPacket>,
    pub last_request: Rc<RefCell<Option<NtpPacket>>>,
}

impl FakeTimeServer {
    /// Answers with `since_1900` as the transmit time.
    pub fn answering(log: &Log, since_1900: u32) -> Self {
        Self {
            log: log.clone(),
            response: Some(ntp_response(since_1900)),
            last_request: Rc::default(),
        }
    }

    /// Never answers.
    pub fn silent(log: &Log) -> Self {
        Self {
            log: log.clone(),
            response: None,
            last_request: Rc::default(),
        }
    }
}

impl TimeSource for FakeTimeServer {
    type Error = ();

    async fn exchange(&mut self, request: &NtpPacket, response: &mut NtpPacket) -> Result<(), ()> {
        self.log.push("ntp");
        *self.last_request.borrow_mut() = Some(*request);
        let answer = self.response.ok_or(())?;
        *response = answer;
        Ok(())
    }
}

/// NTP response carrying `since_1900` in the transmit timestamp.
pub fn ntp_response(since_1900: u32) -> NtpPacket {
    let mut packet = [0; NTP_PACKET_LEN];
    packet[40..44].copy_from_slice(&since_1900.to_be_bytes());
    packet
}

/// 2024-01-01T00:00:00Z in NTP seconds.
pub const NEW_YEAR_2024_NTP: u32 = 3_913_056_000;
/// 2024-01-01T00:00:00Z in Unix seconds.
pub const NEW_YEAR_2024_UNIX: i64 = 1_704_067_200;

/// All fakes wired together.
pub struct Fakes;

impl Platform for Fakes {
    type Wifi = FakeWifi;
    type Discovery = FakeDiscovery;
    type Broker = FakeBroker;
    type Ota = FakeOta;
    type Time = FakeTimeServer;
    type Uptime = FakeUptime;
    type Delay = FakeDelay;
}

pub fn credentials(ssid: &str) -> WifiCredentials {
    WifiCredentials::new(ssid, "password").unwrap()
}
