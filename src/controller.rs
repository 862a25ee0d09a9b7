//! Device operations run on the worker, reporting back to the front-end.
//!
//! The controller never owns the device list. Callers pass in the snapshots
//! they want acted upon and receive discrete [`Update`]s over a bounded
//! channel, which the UI thread applies to its own store.

use std::{
    collections::HashSet,
    fmt,
    future::Future,
    net::IpAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    sync::{mpsc, Semaphore},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeviceClient, DiscoveryOptions},
    config::Settings,
    credentials::Credentials,
    device::DeviceRecord,
    error::{Error, Result},
};

/// Capacity of the worker-to-UI channel.
pub const UPDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Status(String),
    Alert { title: String, message: String },
    /// Result of a discovery pass; replaces the whole device list.
    DevicesReplaced(Vec<DeviceRecord>),
    DeviceAdded(DeviceRecord),
    DeviceUpdated(DeviceRecord),
    /// The device stopped answering; its last known state is kept.
    DeviceUnreachable(IpAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    TurnOn,
    TurnOff,
    Refresh,
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BatchAction::TurnOn => "on",
            BatchAction::TurnOff => "off",
            BatchAction::Refresh => "refresh",
        })
    }
}

/// Per-device outcomes of one batch operation, in submission order.
#[derive(Debug)]
pub struct BatchReport {
    pub action: BatchAction,
    pub outcomes: Vec<(IpAddr, Result<()>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, result)| result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (IpAddr, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(addr, result)| result.as_ref().err().map(|e| (*addr, e)))
    }

    pub fn status_message(&self) -> String {
        let (succeeded, failed) = (self.succeeded(), self.failed());
        match (self.action, failed) {
            (BatchAction::Refresh, 0) => format!("Status refreshed for all {} devices", succeeded),
            (BatchAction::Refresh, _) => format!(
                "Status refreshed for {} devices, {} failed",
                succeeded, failed
            ),
            (action, 0) => format!("All {} devices turned {}", succeeded, action),
            (action, _) => format!("{} devices turned {}, {} failed", succeeded, action, failed),
        }
    }
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn DeviceClient>,
    settings: Settings,
    credentials: Credentials,
    updates: mpsc::Sender<Update>,
    limiter: Semaphore,
    busy: Mutex<HashSet<IpAddr>>,
    batch: tokio::sync::Mutex<()>,
}

/// Marks a device as having an operation in flight until dropped.
struct DeviceClaim<'a> {
    busy: &'a Mutex<HashSet<IpAddr>>,
    addr: IpAddr,
}

impl Drop for DeviceClaim<'_> {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.addr);
    }
}

async fn bounded<T, F>(limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, future)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

impl Controller {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        settings: Settings,
        credentials: Credentials,
        updates: mpsc::Sender<Update>,
    ) -> Controller {
        let permits = settings.concurrency.max(1);
        Controller {
            inner: Arc::new(Inner {
                client,
                settings,
                credentials,
                updates,
                limiter: Semaphore::new(permits),
                busy: Mutex::new(HashSet::new()),
                batch: tokio::sync::Mutex::new(()),
            }),
        }
    }

    async fn send(&self, update: Update) {
        if self.inner.updates.send(update).await.is_err() {
            debug!("front-end has gone away; dropping update");
        }
    }

    async fn status<S: Into<String>>(&self, status: S) {
        self.send(Update::Status(status.into())).await;
    }

    async fn alert<T: Into<String>, M: Into<String>>(&self, title: T, message: M) {
        self.send(Update::Alert {
            title: title.into(),
            message: message.into(),
        })
        .await;
    }

    fn claim(&self, addr: IpAddr) -> Result<DeviceClaim<'_>> {
        let mut busy = self
            .inner
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(addr) {
            return Err(Error::Busy(addr));
        }
        Ok(DeviceClaim {
            busy: &self.inner.busy,
            addr,
        })
    }

    /// Run one device call under the concurrency limit and a timeout.
    async fn limited<T, F>(&self, limit: Duration, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .inner
            .limiter
            .acquire()
            .await
            .map_err(|_| Error::Other(String::from("controller is shutting down")))?;
        bounded(limit, future).await
    }

    /// Broadcast for devices, keep the ones that answer a state query, and
    /// replace the front-end's device list with them.
    pub async fn discover(&self) -> Result<Vec<DeviceRecord>> {
        let _batch = match self.inner.batch.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.status("Another operation is still running").await;
                return Err(Error::BatchInProgress);
            }
        };
        self.status("Discovering devices...").await;

        let settings = &self.inner.settings;
        let options = DiscoveryOptions::new(settings, &self.inner.credentials);
        let overall = settings.discovery_timeout + settings.timeout;

        let found = match bounded(overall, self.inner.client.discover(&options)).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "discovery failed");
                self.status(format!("Discovery failed: {}", e)).await;
                self.alert("Discovery Error", format!("Failed to discover devices:\n{}", e))
                    .await;
                return Err(e);
            }
        };
        debug!(count = found.len(), "discovery replies received");

        let checks = found.iter().map(|device| async move {
            let _claim = self.claim(device.addr)?;
            self.limited(settings.update_timeout, self.inner.client.update(device))
                .await
        });
        let mut working = Vec::new();
        for (device, result) in found.iter().zip(join_all(checks).await) {
            match result {
                Ok(fresh) => {
                    info!(device = %device.addr, name = %fresh.name(), "connected to device");
                    working.push(fresh);
                }
                // its own operation will report the fresh state when it lands
                Err(Error::Busy(_)) => {
                    debug!(device = %device.addr, "device busy; keeping its discovery reply");
                    working.push(device.clone());
                }
                Err(e) => {
                    warn!(device = %device.addr, error = %e, "skipping device that did not answer");
                }
            }
        }

        self.send(Update::DevicesReplaced(working.clone())).await;
        if working.is_empty() {
            self.status(
                "No working devices found. Check network connection or try setting credentials.",
            )
            .await;
        } else {
            self.status(format!("Found {} working device(s)", working.len()))
                .await;
        }

        Ok(working)
    }

    async fn fetch(&self, addr: IpAddr) -> Result<DeviceRecord> {
        let connect_timeout = self.inner.settings.timeout;
        let options = DiscoveryOptions::new(&self.inner.settings, &self.inner.credentials);
        let _claim = self.claim(addr)?;
        let device = self
            .limited(connect_timeout, self.inner.client.discover_single(addr, &options))
            .await?;
        self.limited(connect_timeout, self.inner.client.update(&device))
            .await
    }

    /// Read one device by address without touching the front-end's list.
    pub async fn connect(&self, addr: IpAddr) -> Result<DeviceRecord> {
        self.status(format!("Connecting to device at {}...", addr))
            .await;
        let device = self.fetch(addr).await;
        if let Err(e) = &device {
            warn!(device = %addr, error = %e, "could not connect to device");
        }
        device
    }

    /// Connect to one device by address and add it to the list.
    pub async fn add_device(&self, addr: IpAddr) -> Result<DeviceRecord> {
        self.status(format!("Connecting to device at {}...", addr))
            .await;

        let result = self.fetch(addr).await;

        match result {
            Ok(device) => {
                info!(device = %addr, name = %device.name(), "added device");
                self.send(Update::DeviceAdded(device.clone())).await;
                self.status(format!("Successfully added device: {}", device.name()))
                    .await;
                Ok(device)
            }
            Err(e) => {
                error!(device = %addr, error = %e, "failed to add device");
                self.status(format!("Failed to add device at {}: {}", addr, e))
                    .await;
                self.alert(
                    "Add Device Error",
                    format!("Failed to add device at {}:\n{}", addr, e),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Flip a device: read its current state, switch to the opposite, then
    /// re-read it once it has had a moment to settle. Returns the new power state.
    pub async fn toggle(&self, device: DeviceRecord) -> Result<bool> {
        let _claim = match self.claim(device.addr) {
            Ok(claim) => claim,
            Err(e) => {
                self.status(format!("Device {} is busy", device.name())).await;
                return Err(e);
            }
        };

        let update_timeout = self.inner.settings.update_timeout;
        let current = match self
            .limited(update_timeout, self.inner.client.update(&device))
            .await
        {
            Ok(current) => current,
            Err(e) => {
                warn!(device = %device.addr, error = %e, "could not read device state");
                self.send(Update::DeviceUnreachable(device.addr)).await;
                self.status(format!(
                    "Device {} communication error: {}",
                    device.addr,
                    e.kind()
                ))
                .await;
                return Err(e);
            }
        };

        let turn_on = !current.is_on().unwrap_or(false);
        self.switch_claimed(current, turn_on).await?;
        Ok(turn_on)
    }

    /// Turn one device on or off and report its refreshed state.
    pub async fn switch(&self, device: DeviceRecord, on: bool) -> Result<DeviceRecord> {
        let _claim = match self.claim(device.addr) {
            Ok(claim) => claim,
            Err(e) => {
                self.status(format!("Device {} is busy", device.name())).await;
                return Err(e);
            }
        };
        self.switch_claimed(device, on).await
    }

    async fn switch_claimed(&self, device: DeviceRecord, on: bool) -> Result<DeviceRecord> {
        let settings = &self.inner.settings;
        let client = &self.inner.client;

        let switched = if on {
            self.limited(settings.update_timeout, client.turn_on(&device))
                .await
        } else {
            self.limited(settings.update_timeout, client.turn_off(&device))
                .await
        };
        if let Err(e) = switched {
            warn!(device = %device.addr, error = %e, "failed to switch device");
            self.send(Update::DeviceUpdated(device)).await;
            self.status(format!("Failed to toggle device: {}", e.kind()))
                .await;
            return Err(e);
        }

        info!(device = %device.addr, on, "switched device");
        self.status(format!(
            "Device {} Turned {}",
            device.name(),
            if on { "ON" } else { "OFF" }
        ))
        .await;

        sleep(settings.toggle_settle).await;
        match self
            .limited(settings.update_timeout, client.update(&device))
            .await
        {
            Ok(fresh) => {
                self.send(Update::DeviceUpdated(fresh.clone())).await;
                Ok(fresh)
            }
            Err(e) => {
                debug!(device = %device.addr, error = %e, "could not refresh after switching");
                self.send(Update::DeviceUnreachable(device.addr)).await;
                Ok(device.unreachable())
            }
        }
    }

    /// Turn every given device on or off, then refresh them all.
    pub async fn set_all(&self, devices: Vec<DeviceRecord>, on: bool) -> Result<BatchReport> {
        let _batch = match self.inner.batch.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.status("Another operation is still running").await;
                return Err(Error::BatchInProgress);
            }
        };
        let action = if on {
            BatchAction::TurnOn
        } else {
            BatchAction::TurnOff
        };
        self.status(format!("Turning all devices {}...", action)).await;

        let settings = &self.inner.settings;
        let client = &self.inner.client;
        let controls = devices.iter().map(|device| async move {
            let _claim = self.claim(device.addr)?;
            if on {
                self.limited(settings.batch_timeout, client.turn_on(device))
                    .await
            } else {
                self.limited(settings.batch_timeout, client.turn_off(device))
                    .await
            }
        });
        let results = join_all(controls).await;

        let report = BatchReport {
            action,
            outcomes: devices
                .iter()
                .map(|device| device.addr)
                .zip(results)
                .collect(),
        };
        for (addr, e) in report.failures() {
            warn!(device = %addr, error = %e, "failed to control device");
        }

        sleep(settings.batch_settle).await;
        self.refresh_round(&devices).await;

        let status = report.status_message();
        info!(%status, "batch finished");
        self.status(status).await;
        Ok(report)
    }

    /// Re-read the state of every given device.
    pub async fn refresh(&self, devices: Vec<DeviceRecord>) -> Result<BatchReport> {
        let _batch = match self.inner.batch.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.status("Another operation is still running").await;
                return Err(Error::BatchInProgress);
            }
        };
        self.status("Refreshing device status...").await;

        let report = BatchReport {
            action: BatchAction::Refresh,
            outcomes: self.refresh_round(&devices).await,
        };
        for (addr, e) in report.failures() {
            warn!(device = %addr, error = %e, "failed to update device");
        }

        self.status(report.status_message()).await;
        Ok(report)
    }

    async fn refresh_round(&self, devices: &[DeviceRecord]) -> Vec<(IpAddr, Result<()>)> {
        let batch_timeout = self.inner.settings.batch_timeout;
        let updates = devices.iter().map(|device| async move {
            let _claim = self.claim(device.addr)?;
            self.limited(batch_timeout, self.inner.client.update(device))
                .await
        });
        let results = join_all(updates).await;

        let mut outcomes = Vec::with_capacity(devices.len());
        for (device, result) in devices.iter().zip(results) {
            match result {
                Ok(fresh) => {
                    self.send(Update::DeviceUpdated(fresh)).await;
                    outcomes.push((device.addr, Ok(())));
                }
                Err(e) => {
                    if !matches!(e, Error::Busy(_)) {
                        self.send(Update::DeviceUnreachable(device.addr)).await;
                    }
                    outcomes.push((device.addr, Err(e)));
                }
            }
        }
        outcomes
    }
}
