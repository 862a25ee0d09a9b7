use std::{fmt, net::IpAddr};

use serde::Serialize;

use crate::datatypes::SysInfo;

/// Coarse device category, used to pick the on/off command and the list icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Plug,
    Bulb,
    LightStrip,
    WallSwitch,
    Dimmer,
    Strip,
    Unknown,
}

impl DeviceKind {
    pub fn classify(sysinfo: &SysInfo) -> DeviceKind {
        let hw_type = sysinfo.hw_type.to_lowercase();
        if hw_type.contains("smartbulb") {
            if sysinfo.length.is_some() {
                DeviceKind::LightStrip
            } else {
                DeviceKind::Bulb
            }
        } else if hw_type.contains("smartplug") {
            if !sysinfo.children.is_empty() {
                DeviceKind::Strip
            } else if sysinfo.brightness.is_some() {
                DeviceKind::Dimmer
            } else if sysinfo.dev_name.to_lowercase().contains("light") {
                DeviceKind::WallSwitch
            } else {
                DeviceKind::Plug
            }
        } else {
            DeviceKind::Unknown
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            DeviceKind::Plug => "🔌",
            DeviceKind::Bulb | DeviceKind::LightStrip => "💡",
            DeviceKind::WallSwitch => "⚡",
            DeviceKind::Strip => "🔗",
            DeviceKind::Dimmer | DeviceKind::Unknown => "📱",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Plug => "plug",
            DeviceKind::Bulb => "bulb",
            DeviceKind::LightStrip => "light strip",
            DeviceKind::WallSwitch => "switch",
            DeviceKind::Dimmer => "dimmer",
            DeviceKind::Strip => "power strip",
            DeviceKind::Unknown => "unknown",
        })
    }
}

/// Immutable snapshot of a device as last seen on the network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub addr: IpAddr,
    pub kind: DeviceKind,
    /// `None` until something has actually heard from the device.
    pub available: Option<bool>,
    pub sysinfo: SysInfo,
}

impl DeviceRecord {
    pub fn new(addr: IpAddr, sysinfo: SysInfo) -> DeviceRecord {
        DeviceRecord {
            addr,
            kind: DeviceKind::classify(&sysinfo),
            available: None,
            sysinfo,
        }
    }

    /// A record for a device that just answered a query.
    pub fn reachable(addr: IpAddr, sysinfo: SysInfo) -> DeviceRecord {
        DeviceRecord {
            available: Some(true),
            ..DeviceRecord::new(addr, sysinfo)
        }
    }

    pub fn name(&self) -> String {
        if self.sysinfo.alias.is_empty() {
            format!("Device at {}", self.addr)
        } else {
            self.sysinfo.alias.clone()
        }
    }

    /// Power state, or `None` when the device did not report one.
    pub fn is_on(&self) -> Option<bool> {
        match self.kind {
            DeviceKind::Bulb | DeviceKind::LightStrip => {
                self.sysinfo.light_state.as_ref().map(|light| light.on_off > 0)
            }
            DeviceKind::Strip => Some(self.sysinfo.children.iter().any(|child| child.state > 0)),
            _ => self.sysinfo.relay_state.map(|state| state > 0),
        }
    }

    pub fn unreachable(&self) -> DeviceRecord {
        DeviceRecord {
            available: Some(false),
            ..self.clone()
        }
    }
}
