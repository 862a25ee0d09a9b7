//! What the device list shows, derived from records without touching them.
use std::net::IpAddr;

use crate::device::{DeviceKind, DeviceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerLabel {
    On,
    Off,
    Unknown,
}

impl PowerLabel {
    pub fn of(device: &DeviceRecord) -> PowerLabel {
        match device.is_on() {
            Some(true) => PowerLabel::On,
            Some(false) => PowerLabel::Off,
            None => PowerLabel::Unknown,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            PowerLabel::On => "🟢 ON",
            PowerLabel::Off => "⚫ OFF",
            PowerLabel::Unknown => "⚪ Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    pub addr: IpAddr,
    pub icon: &'static str,
    pub name: String,
    pub power: PowerLabel,
    pub kind: DeviceKind,
    pub available: Option<bool>,
}

impl DeviceRow {
    pub fn new(device: &DeviceRecord) -> DeviceRow {
        DeviceRow {
            addr: device.addr,
            icon: device.kind.icon(),
            name: device.name(),
            power: PowerLabel::of(device),
            kind: device.kind,
            available: device.available,
        }
    }

    /// Displayed columns: device, address, status, type.
    pub fn cells(&self) -> [String; 4] {
        [
            format!("{} {}", self.icon, self.name),
            self.addr.to_string(),
            self.power.text().to_string(),
            self.kind.to_string(),
        ]
    }

    /// Case-insensitive substring match over the displayed columns.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        self.cells()
            .join(" ")
            .to_lowercase()
            .contains(&query.to_lowercase())
    }
}

pub fn rows<'a, I>(devices: I) -> Vec<DeviceRow>
where
    I: IntoIterator<Item = &'a DeviceRecord>,
{
    devices.into_iter().map(DeviceRow::new).collect()
}

/// Rows passing the search filter, in insertion order.
pub fn visible<'a>(rows: &'a [DeviceRow], query: &str) -> Vec<&'a DeviceRow> {
    rows.iter().filter(|row| row.matches(query)).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub active: usize,
    /// Some devices gave no reachability signal and were counted as online.
    pub assumed: bool,
}

pub fn counters<'a, I>(devices: I) -> Counters
where
    I: IntoIterator<Item = &'a DeviceRecord>,
{
    let mut counters = Counters::default();
    for device in devices {
        counters.total += 1;
        match device.available {
            Some(true) => counters.online += 1,
            Some(false) => counters.offline += 1,
            None => {
                counters.online += 1;
                counters.assumed = true;
            }
        }
        if device.is_on() == Some(true) {
            counters.active += 1;
        }
    }
    counters
}
