use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use kasactl::{
    bridge::Bridge,
    client::{DeviceClient, DiscoveryOptions},
    controller::{Controller, Update, UPDATE_CAPACITY},
    credentials::Credentials,
    datatypes::SysInfo,
    device::DeviceRecord,
    error::{Error, Result},
    store::DeviceStore,
    Settings,
};

/// In-memory plugs. Addresses in `hung` never answer.
#[derive(Default)]
struct FakeClient {
    aliases: Mutex<HashMap<IpAddr, String>>,
    states: Mutex<HashMap<IpAddr, bool>>,
    network: Mutex<Vec<IpAddr>>,
    hung: Mutex<HashSet<IpAddr>>,
    stuck_relays: Mutex<HashSet<IpAddr>>,
    discovery_broken: Mutex<bool>,
    delay: Mutex<Duration>,
    switching: AtomicUsize,
    peak_switching: AtomicUsize,
    calls: Mutex<HashMap<IpAddr, usize>>,
    peak_calls_per_device: AtomicUsize,
}

fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

impl FakeClient {
    fn with_devices(devices: &[(&str, &str, bool)]) -> Arc<FakeClient> {
        let fake = FakeClient::default();
        for (addr, alias, on) in devices {
            fake.plug_in(ip(addr), alias, *on);
        }
        Arc::new(fake)
    }

    fn plug_in(&self, addr: IpAddr, alias: &str, on: bool) {
        self.aliases.lock().unwrap().insert(addr, alias.to_string());
        self.states.lock().unwrap().insert(addr, on);
        self.network.lock().unwrap().push(addr);
    }

    fn unplug_all(&self) {
        self.network.lock().unwrap().clear();
    }

    fn hang(&self, addr: &str) {
        self.hung.lock().unwrap().insert(ip(addr));
    }

    fn jam_relay(&self, addr: &str) {
        self.stuck_relays.lock().unwrap().insert(ip(addr));
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn record(&self, addr: IpAddr) -> DeviceRecord {
        let on = self.states.lock().unwrap().get(&addr).copied().unwrap_or(false);
        DeviceRecord::reachable(
            addr,
            SysInfo {
                alias: self.aliases.lock().unwrap().get(&addr).cloned().unwrap_or_default(),
                hw_type: String::from("IOT.SMARTPLUGSWITCH"),
                model: String::from("HS100(UK)"),
                relay_state: Some(u8::from(on)),
                ..Default::default()
            },
        )
    }

    async fn answer(&self, addr: IpAddr) {
        let calls = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(addr).or_insert(0);
            *count += 1;
            *count
        };
        self.peak_calls_per_device.fetch_max(calls, Ordering::SeqCst);

        let hung = self.hung.lock().unwrap().contains(&addr);
        if hung {
            std::future::pending::<()>().await;
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(count) = self.calls.lock().unwrap().get_mut(&addr) {
            *count -= 1;
        }
    }

    async fn switch(&self, addr: IpAddr, on: bool) -> Result<()> {
        let now = self.switching.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_switching.fetch_max(now, Ordering::SeqCst);
        self.answer(addr).await;
        self.switching.fetch_sub(1, Ordering::SeqCst);
        if self.stuck_relays.lock().unwrap().contains(&addr) {
            return Err(Error::Other(String::from("relay stuck")));
        }
        self.states.lock().unwrap().insert(addr, on);
        Ok(())
    }
}

#[async_trait]
impl DeviceClient for FakeClient {
    async fn discover(&self, _options: &DiscoveryOptions) -> Result<Vec<DeviceRecord>> {
        if *self.discovery_broken.lock().unwrap() {
            return Err(Error::Other(String::from("network is unreachable")));
        }
        let network = self.network.lock().unwrap().clone();
        Ok(network.into_iter().map(|addr| self.record(addr)).collect())
    }

    async fn discover_single(&self, addr: IpAddr, _options: &DiscoveryOptions) -> Result<DeviceRecord> {
        self.answer(addr).await;
        Ok(self.record(addr))
    }

    async fn update(&self, device: &DeviceRecord) -> Result<DeviceRecord> {
        self.answer(device.addr).await;
        Ok(self.record(device.addr))
    }

    async fn turn_on(&self, device: &DeviceRecord) -> Result<()> {
        self.switch(device.addr, true).await
    }

    async fn turn_off(&self, device: &DeviceRecord) -> Result<()> {
        self.switch(device.addr, false).await
    }
}

fn settings() -> Settings {
    Settings {
        discovery_timeout: Duration::from_millis(100),
        timeout: Duration::from_millis(200),
        update_timeout: Duration::from_millis(200),
        batch_timeout: Duration::from_millis(200),
        batch_settle: Duration::from_millis(10),
        toggle_settle: Duration::from_millis(10),
        ..Settings::default()
    }
}

fn controller(fake: &Arc<FakeClient>) -> (Controller, mpsc::Receiver<Update>) {
    let (tx, rx) = mpsc::channel(UPDATE_CAPACITY);
    let client: Arc<dyn DeviceClient> = fake.clone();
    (Controller::new(client, settings(), Credentials::default(), tx), rx)
}

/// Apply everything queued so far, the way the UI thread does. Returns the status lines.
fn drain(rx: &mut mpsc::Receiver<Update>, store: &mut DeviceStore) -> Vec<String> {
    let mut statuses = Vec::new();
    while let Ok(update) = rx.try_recv() {
        match &update {
            Update::Status(status) => statuses.push(status.clone()),
            Update::Alert { title, .. } => statuses.push(format!("alert: {}", title)),
            _ => {}
        }
        store.apply(&update);
    }
    statuses
}

fn names(store: &DeviceStore) -> Vec<String> {
    store.iter().map(DeviceRecord::name).collect()
}

#[tokio::test]
async fn discover_fills_the_store() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true), ("10.0.0.2", "Fan", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    let found = controller.discover().await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert_eq!(2, found.len());
    assert_eq!(vec!["Lamp", "Fan"], names(&store));
    assert_eq!(
        vec!["Discovering devices...", "Found 2 working device(s)"],
        statuses
    );
}

#[tokio::test]
async fn discover_skips_devices_that_do_not_answer() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true), ("10.0.0.2", "Fan", false)]);
    fake.hang("10.0.0.2");
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    assert_eq!(vec!["Lamp"], names(&store));
}

#[tokio::test]
async fn discovery_failure_raises_an_alert() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true)]);
    *fake.discovery_broken.lock().unwrap() = true;
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    assert!(controller.discover().await.is_err());
    let statuses = drain(&mut rx, &mut store);

    assert_eq!(
        vec![
            "Discovering devices...",
            "Discovery failed: network is unreachable",
            "alert: Discovery Error",
        ],
        statuses
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn rediscovery_replaces_the_store() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true), ("10.0.0.2", "Fan", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    fake.unplug_all();
    fake.plug_in(ip("10.0.0.3"), "Heater", false);
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    assert_eq!(vec!["Heater"], names(&store));
}

#[tokio::test]
async fn all_off_with_one_device_timing_out() {
    let fake = FakeClient::with_devices(&[
        ("10.0.0.1", "Lamp", true),
        ("10.0.0.2", "Fan", true),
        ("10.0.0.3", "Heater", true),
    ]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    fake.hang("10.0.0.3");
    let report = controller.set_all(store.records(), false).await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert_eq!(2, report.succeeded());
    assert_eq!(1, report.failed());
    let (failed, error) = report.failures().next().unwrap();
    assert_eq!(ip("10.0.0.3"), failed);
    assert!(matches!(error, Error::Timeout(_)));
    assert_eq!(Some("2 devices turned off, 1 failed"), statuses.last().map(String::as_str));

    for addr in ["10.0.0.1", "10.0.0.2"] {
        assert_eq!(Some(false), store.get(&ip(addr)).unwrap().is_on());
    }
    let heater = store.get(&ip("10.0.0.3")).unwrap();
    assert_eq!(Some(true), heater.is_on());
    assert_eq!(Some(false), heater.available);
    assert_eq!(3, store.len());
}

#[tokio::test]
async fn all_on_reports_every_device() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false), ("10.0.0.2", "Fan", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    let report = controller.set_all(store.records(), true).await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert_eq!("All 2 devices turned on", report.status_message());
    assert_eq!(Some("All 2 devices turned on"), statuses.last().map(String::as_str));
    assert!(store.iter().all(|device| device.is_on() == Some(true)));
}

#[tokio::test]
async fn refresh_marks_silent_devices_unreachable() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true), ("10.0.0.2", "Fan", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    fake.hang("10.0.0.1");
    let report = controller.refresh(store.records()).await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert_eq!(
        vec!["Refreshing device status...", "Status refreshed for 1 devices, 1 failed"],
        statuses
    );
    assert_eq!(1, report.failed());
    assert_eq!(Some(false), store.get(&ip("10.0.0.1")).unwrap().available);
    assert_eq!(Some(true), store.get(&ip("10.0.0.2")).unwrap().available);
}

#[tokio::test]
async fn toggles_on_different_devices_run_together() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true), ("10.0.0.2", "Fan", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);
    fake.set_delay(Duration::from_millis(20));

    let lamp = store.get(&ip("10.0.0.1")).unwrap().clone();
    let fan = store.get(&ip("10.0.0.2")).unwrap().clone();
    let (lamp_on, fan_on) = tokio::join!(controller.toggle(lamp), controller.toggle(fan));
    drain(&mut rx, &mut store);

    assert!(!lamp_on.unwrap());
    assert!(fan_on.unwrap());
    assert_eq!(2, fake.peak_switching.load(Ordering::SeqCst));
    assert_eq!(Some(false), store.get(&ip("10.0.0.1")).unwrap().is_on());
    assert_eq!(Some(true), store.get(&ip("10.0.0.2")).unwrap().is_on());
}

#[tokio::test]
async fn second_toggle_on_the_same_device_is_rejected() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);
    fake.set_delay(Duration::from_millis(20));

    let lamp = store.get(&ip("10.0.0.1")).unwrap().clone();
    let (first, second) = tokio::join!(controller.toggle(lamp.clone()), controller.toggle(lamp));
    let statuses = drain(&mut rx, &mut store);

    assert!(first.unwrap());
    assert!(matches!(second, Err(Error::Busy(addr)) if addr == ip("10.0.0.1")));
    assert!(statuses.contains(&String::from("Device Lamp is busy")));
    // flipped exactly once
    assert_eq!(Some(true), store.get(&ip("10.0.0.1")).unwrap().is_on());
}

#[tokio::test]
async fn discovery_and_add_do_not_overlap_a_toggle() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);
    fake.set_delay(Duration::from_millis(20));

    let lamp = store.get(&ip("10.0.0.1")).unwrap().clone();
    let (toggled, discovered, added) = tokio::join!(
        controller.toggle(lamp),
        controller.discover(),
        controller.add_device(ip("10.0.0.1"))
    );
    drain(&mut rx, &mut store);

    assert!(toggled.unwrap());
    // the busy device keeps its broadcast reply instead of vanishing
    assert_eq!(1, discovered.unwrap().len());
    assert!(matches!(added, Err(Error::Busy(addr)) if addr == ip("10.0.0.1")));
    assert_eq!(1, fake.peak_calls_per_device.load(Ordering::SeqCst));
    assert_eq!(vec!["Lamp"], names(&store));
    assert_eq!(Some(true), store.get(&ip("10.0.0.1")).unwrap().is_on());
}

#[tokio::test]
async fn toggle_of_a_silent_device_marks_it_unreachable() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    fake.hang("10.0.0.1");
    let lamp = store.get(&ip("10.0.0.1")).unwrap().clone();
    let result = controller.toggle(lamp).await;
    let statuses = drain(&mut rx, &mut store);

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(
        Some("Device 10.0.0.1 communication error: Timeout"),
        statuses.last().map(String::as_str)
    );
    let lamp = store.get(&ip("10.0.0.1")).unwrap();
    assert_eq!(Some(false), lamp.available);
    assert_eq!(Some(true), lamp.is_on());
}

#[tokio::test]
async fn failed_switch_keeps_the_device_as_it_was() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    fake.jam_relay("10.0.0.1");
    let lamp = store.get(&ip("10.0.0.1")).unwrap().clone();
    let result = controller.toggle(lamp).await;
    let statuses = drain(&mut rx, &mut store);

    assert!(matches!(result, Err(Error::Other(_))));
    assert_eq!(
        Some("Failed to toggle device: Error"),
        statuses.last().map(String::as_str)
    );
    let lamp = store.get(&ip("10.0.0.1")).unwrap();
    assert_eq!(Some(false), lamp.is_on());
    assert_eq!(Some(true), lamp.available);
}

#[tokio::test]
async fn empty_network_clears_the_store() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);
    assert_eq!(1, store.len());

    fake.unplug_all();
    let found = controller.discover().await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert!(found.is_empty());
    assert!(store.is_empty());
    assert_eq!(
        vec![
            "Discovering devices...",
            "No working devices found. Check network connection or try setting credentials.",
        ],
        statuses
    );
}

#[tokio::test]
async fn all_devices_silent_counts_as_none_working() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true), ("10.0.0.2", "Fan", false)]);
    fake.hang("10.0.0.1");
    fake.hang("10.0.0.2");
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    assert!(controller.discover().await.unwrap().is_empty());
    let statuses = drain(&mut rx, &mut store);

    assert!(store.is_empty());
    assert_eq!(
        Some("No working devices found. Check network connection or try setting credentials."),
        statuses.last().map(String::as_str)
    );
}

#[tokio::test]
async fn added_device_is_appended() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);

    // answers directly but not to broadcasts
    fake.plug_in(ip("10.0.0.9"), "Kettle", false);
    let added = controller.add_device(ip("10.0.0.9")).await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert_eq!("Kettle", added.name());
    assert_eq!(
        vec![
            "Connecting to device at 10.0.0.9...",
            "Successfully added device: Kettle",
        ],
        statuses
    );
    assert_eq!(vec!["Lamp", "Kettle"], names(&store));
}

#[tokio::test]
async fn connect_leaves_the_store_alone() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", true)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    let lamp = controller.connect(ip("10.0.0.1")).await.unwrap();
    let statuses = drain(&mut rx, &mut store);

    assert_eq!("Lamp", lamp.name());
    assert_eq!(vec!["Connecting to device at 10.0.0.1..."], statuses);
    assert!(store.is_empty());
}

#[tokio::test]
async fn overlapping_batches_are_rejected() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false), ("10.0.0.2", "Fan", false)]);
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();
    controller.discover().await.unwrap();
    drain(&mut rx, &mut store);
    fake.set_delay(Duration::from_millis(20));

    let (refreshed, switched) = tokio::join!(
        controller.refresh(store.records()),
        controller.set_all(store.records(), true)
    );

    assert_eq!(0, refreshed.unwrap().failed());
    assert!(matches!(switched, Err(Error::BatchInProgress)));
    assert!(fake.states.lock().unwrap().values().all(|on| !on));
}

#[tokio::test]
async fn adding_a_silent_device_times_out() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false)]);
    fake.hang("10.0.0.1");
    let (controller, mut rx) = controller(&fake);
    let mut store = DeviceStore::new();

    let result = controller.add_device(ip("10.0.0.1")).await;
    let statuses = drain(&mut rx, &mut store);

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(Some("alert: Add Device Error"), statuses.last().map(String::as_str));
    assert!(store.is_empty());
}

#[test]
fn operations_run_on_the_bridge_worker() {
    let fake = FakeClient::with_devices(&[("10.0.0.1", "Lamp", false), ("10.0.0.2", "Fan", true)]);
    let (controller, mut rx) = controller(&fake);
    let bridge = Bridge::start().unwrap();
    let mut store = DeviceStore::new();

    let worker = controller.clone();
    let found = bridge.run(async move { worker.discover().await }).unwrap().unwrap();
    assert_eq!(2, found.len());

    let worker = controller.clone();
    let lamp = found[0].clone();
    let handle = bridge.submit(async move { worker.toggle(lamp).await });
    let on = bridge.run(handle).unwrap().unwrap().unwrap();
    assert!(on);

    bridge.shutdown(Duration::from_secs(1));
    drain(&mut rx, &mut store);

    assert_eq!(Some(true), store.get(&ip("10.0.0.1")).unwrap().is_on());
    assert_eq!(Some(true), store.get(&ip("10.0.0.2")).unwrap().is_on());
}
