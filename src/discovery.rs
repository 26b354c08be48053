//! mDNS registration and service lookup. Both are best-effort: failures are
//! reported to the caller and never retried.

use core::net::Ipv4Addr;

use heapless::{String, Vec};

use crate::log::{debug, info, warn};
use crate::{Error, Result};

/// Most records kept from one query.
pub const MAX_SERVICE_RECORDS: usize = 8;
/// Capacity of a discovered host name.
pub const HOSTNAME_LEN: usize = 64;

/// One answer to a service query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Advertised host name.
    pub hostname: String<HOSTNAME_LEN>,
    /// Host address.
    pub address: Ipv4Addr,
    /// Service port.
    pub port: u16,
}

/// Answers collected by [`ServiceDiscovery::query`].
///
/// Keeps the first [`MAX_SERVICE_RECORDS`] records and counts every answer,
/// so a crowded network never turns into a failed query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRecords {
    records: Vec<ServiceRecord, MAX_SERVICE_RECORDS>,
    total: usize,
}

impl ServiceRecords {
    /// No answers yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
            total: 0,
        }
    }

    /// Record one answer. Answers past capacity are counted, not kept.
    pub fn push(&mut self, record: ServiceRecord) {
        self.total = self.total.saturating_add(1);
        if self.records.push(record).is_err() {
            debug!("mDNS: answer {} not kept", self.total);
        }
    }

    /// Number of answers received, kept or not.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// The answers kept, in arrival order.
    #[must_use]
    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }
}

/// The mDNS responder, as seen by the supervisor.
pub trait ServiceDiscovery {
    /// Error reported by the responder.
    type Error;

    /// Advertise this device as `node_name`.
    async fn register(&mut self, node_name: &str) -> Result<(), Self::Error>;

    /// Send one query and [`push`](ServiceRecords::push) every answer into `found`.
    async fn query(
        &mut self,
        service_type: &str,
        protocol: &str,
        found: &mut ServiceRecords,
    ) -> Result<(), Self::Error>;
}

/// The first answer to a service query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceMatch {
    /// Index of the record among the answers. Always the first.
    pub index: usize,
    /// Number of answers received.
    pub found: usize,
    /// The record itself.
    pub record: ServiceRecord,
}

/// Register `node_name` on the local network.
///
/// # Errors
///
/// Returns [`Error::DiscoveryRejected`] if the responder refuses the name.
pub async fn announce<S: ServiceDiscovery>(discovery: &mut S, node_name: &str) -> Result<()> {
    info!("mDNS: registering {}", node_name);
    if discovery.register(node_name).await.is_err() {
        warn!("mDNS: responder rejected {}", node_name);
        return Err(Error::DiscoveryRejected);
    }
    info!("mDNS: registered {}", node_name);
    Ok(())
}

/// Query for `service_type`/`protocol` and return the first answer.
///
/// Only the first match is returned; the rest are counted but not enumerated.
/// `None` means nothing answered or the query itself failed.
pub async fn find_service<S: ServiceDiscovery>(
    discovery: &mut S,
    service_type: &str,
    protocol: &str,
) -> Option<ServiceMatch> {
    let mut found = ServiceRecords::new();
    if discovery
        .query(service_type, protocol, &mut found)
        .await
        .is_err()
    {
        warn!("mDNS: query for _{}._{} failed", service_type, protocol);
        return None;
    }

    let count = found.total();
    let Some(record) = found.records().first().cloned() else {
        info!("mDNS: no _{}._{} services found", service_type, protocol);
        return None;
    };

    let [a, b, c, d] = record.address.octets();
    info!(
        "mDNS: {} service(s) found, service 0: {} {}.{}.{}.{}:{}",
        count,
        record.hostname.as_str(),
        a,
        b,
        c,
        d,
        record.port
    );
    Some(ServiceMatch {
        index: 0,
        found: count,
        record,
    })
}
