use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result, SectionError};

type ErrCode = i16;

pub const LIGHT_SERVICE: &str = "smartlife.iot.smartbulb.lightingservice";
pub const LIGHT_STRIP_SERVICE: &str = "smartlife.iot.lightStrip";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceData {
    pub system: System,
}

impl DeviceData {
    pub fn sysinfo(self) -> SysInfo {
        self.system.sysinfo
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct System {
    #[serde(rename = "get_sysinfo")]
    pub sysinfo: SysInfo,
}

/// The `get_sysinfo` payload. Fields vary by model so almost everything is optional.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SysInfo {
    pub sw_ver: String,
    pub hw_ver: String,
    #[serde(alias = "type")]
    #[serde(alias = "mic_type")]
    pub hw_type: String,
    pub model: String,
    #[serde(alias = "mic_mac")]
    pub mac: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub alias: String,
    #[serde(alias = "description")]
    pub dev_name: String,
    pub err_code: ErrCode,
    pub rssi: Option<i32>,

    // plugs, switches, strips
    pub relay_state: Option<u8>,
    pub on_time: Option<i64>,
    pub brightness: Option<u8>,
    pub children: Vec<ChildInfo>,

    // bulbs, light strips
    pub light_state: Option<LightState>,
    pub length: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ChildInfo {
    pub id: String,
    pub alias: String,
    pub state: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LightState {
    pub on_off: u8,
    pub brightness: Option<u8>,
}

/// Check a command response for a device-reported error.
///
/// Responses nest as `{module: {method: {"err_code": .., ..}}}`; a module the
/// device does not support reports its error one level up.
pub fn check_response(resp: &str, module: &str, method: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(resp)?;
    let section = value
        .get(module)
        .ok_or_else(|| Error::Other(format!("response is missing module {}", module)))?;

    if let Some(err) = section_error(section) {
        return Err(err.into());
    }

    let result = section.get(method).cloned().unwrap_or(Value::Null);
    if let Some(err) = section_error(&result) {
        return Err(err.into());
    }

    Ok(result)
}

fn section_error(value: &Value) -> Option<SectionError> {
    match value.get("err_code").and_then(Value::as_i64) {
        Some(0) | None => None,
        Some(_) => serde_json::from_value(value.clone()).ok(),
    }
}
