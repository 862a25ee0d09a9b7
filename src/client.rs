use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{
    config::Settings,
    credentials::Credentials,
    datatypes::{check_response, SysInfo, LIGHT_SERVICE, LIGHT_STRIP_SERVICE},
    device::{DeviceKind, DeviceRecord},
    discovery,
    error::{Error, Result},
    protocol::{DefaultProtocol, Protocol},
};

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub credentials: Option<Credentials>,
    /// Per-connection timeout.
    pub timeout: Duration,
    /// How long to wait for broadcast replies overall.
    pub discovery_timeout: Duration,
    pub broadcast: Ipv4Addr,
}

impl DiscoveryOptions {
    pub fn new(settings: &Settings, credentials: &Credentials) -> DiscoveryOptions {
        DiscoveryOptions {
            credentials: Some(credentials.clone()).filter(Credentials::is_complete),
            timeout: settings.timeout,
            discovery_timeout: settings.discovery_timeout,
            broadcast: settings.broadcast,
        }
    }
}

/// Everything the front-ends need from a device backend.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn discover(&self, options: &DiscoveryOptions) -> Result<Vec<DeviceRecord>>;

    async fn discover_single(&self, addr: IpAddr, options: &DiscoveryOptions) -> Result<DeviceRecord>;

    /// Re-read a device's state, returning a fresh snapshot.
    async fn update(&self, device: &DeviceRecord) -> Result<DeviceRecord>;

    async fn turn_on(&self, device: &DeviceRecord) -> Result<()>;

    async fn turn_off(&self, device: &DeviceRecord) -> Result<()>;
}

/// Client for the legacy local protocol spoken on port 9999.
pub struct KasaClient<P = DefaultProtocol> {
    protocol: P,
    port: u16,
}

impl KasaClient {
    pub fn new(settings: &Settings) -> KasaClient {
        KasaClient::with_protocol(DefaultProtocol::new(settings.timeout), settings.port)
    }
}

impl<P: Protocol> KasaClient<P> {
    pub fn with_protocol(protocol: P, port: u16) -> KasaClient<P> {
        KasaClient { protocol, port }
    }

    fn socket(&self, addr: IpAddr) -> SocketAddr {
        SocketAddr::new(addr, self.port)
    }

    async fn sysinfo(&self, addr: IpAddr) -> Result<SysInfo> {
        let resp = self.protocol.send(self.socket(addr), discovery::QUERY).await?;
        let sysinfo = check_response(&resp, "system", "get_sysinfo")?;
        Ok(serde_json::from_value(sysinfo)?)
    }

    async fn set_power(&self, device: &DeviceRecord, on: bool) -> Result<()> {
        let state = u8::from(on);
        let (module, method, command) = match device.kind {
            DeviceKind::Bulb => (
                LIGHT_SERVICE,
                "transition_light_state",
                json!({ LIGHT_SERVICE: {"transition_light_state": {"on_off": state}} }),
            ),
            DeviceKind::LightStrip => (
                LIGHT_STRIP_SERVICE,
                "set_light_state",
                json!({ LIGHT_STRIP_SERVICE: {"set_light_state": {"on_off": state}} }),
            ),
            _ => (
                "system",
                "set_relay_state",
                json!({"system": {"set_relay_state": {"state": state}}}),
            ),
        };

        let resp = self
            .protocol
            .send(self.socket(device.addr), &command.to_string())
            .await?;
        check_response(&resp, module, method)?;
        Ok(())
    }
}

#[async_trait]
impl<P: Protocol> DeviceClient for KasaClient<P> {
    async fn discover(&self, options: &DiscoveryOptions) -> Result<Vec<DeviceRecord>> {
        if options.credentials.is_some() {
            debug!("credentials supplied; the local protocol does not need them");
        }
        let target = SocketAddr::new(IpAddr::V4(options.broadcast), self.port);
        let found = discovery::with_timeout(target, options.discovery_timeout).await?;

        Ok(found
            .into_iter()
            .map(|(addr, sysinfo)| DeviceRecord::reachable(addr.ip(), sysinfo))
            .collect())
    }

    async fn discover_single(&self, addr: IpAddr, options: &DiscoveryOptions) -> Result<DeviceRecord> {
        let sysinfo = tokio::time::timeout(options.timeout, self.sysinfo(addr))
            .await
            .map_err(|_| Error::Timeout(options.timeout))??;
        Ok(DeviceRecord::reachable(addr, sysinfo))
    }

    async fn update(&self, device: &DeviceRecord) -> Result<DeviceRecord> {
        Ok(DeviceRecord::reachable(device.addr, self.sysinfo(device.addr).await?))
    }

    async fn turn_on(&self, device: &DeviceRecord) -> Result<()> {
        self.set_power(device, true).await
    }

    async fn turn_off(&self, device: &DeviceRecord) -> Result<()> {
        self.set_power(device, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::tests::{HS100_JSON, LB110_JSON_OFF},
        protocol::ProtocolMock,
    };

    fn client() -> KasaClient<ProtocolMock> {
        KasaClient::with_protocol(ProtocolMock::new(), 9999)
    }

    fn addr() -> IpAddr {
        "10.0.0.5".parse().unwrap()
    }

    #[tokio::test]
    async fn update_parses_sysinfo() {
        let client = client();
        client.protocol.push_response(Ok(String::from(HS100_JSON)));
        let stale = DeviceRecord::new(addr(), SysInfo::default());

        let device = client.update(&stale).await.unwrap();

        assert_eq!("Switch Two", device.name());
        assert_eq!(DeviceKind::Plug, device.kind);
        assert_eq!(Some(true), device.available);
        let requests = client.protocol.requests();
        assert_eq!("10.0.0.5:9999", requests[0].0.to_string());
        assert_eq!(discovery::QUERY, requests[0].1);
    }

    #[tokio::test]
    async fn update_rejects_invalid_response() {
        let client = client();
        client.protocol.push_response(Ok(String::from("invalid")));
        let stale = DeviceRecord::new(addr(), SysInfo::default());

        assert!(client.update(&stale).await.is_err());
    }

    #[tokio::test]
    async fn plug_uses_relay_state() {
        let client = client();
        client
            .protocol
            .push_response(Ok(String::from(r#"{"system":{"set_relay_state":{"err_code":0}}}"#)));
        let plug = DeviceRecord::new(addr(), serde_json::from_str::<crate::datatypes::DeviceData>(HS100_JSON).unwrap().sysinfo());

        client.turn_off(&plug).await.unwrap();

        let sent: serde_json::Value = serde_json::from_str(&client.protocol.requests()[0].1).unwrap();
        assert_eq!(json!({"system": {"set_relay_state": {"state": 0}}}), sent);
    }

    #[tokio::test]
    async fn bulb_uses_lighting_service() {
        let client = client();
        client.protocol.push_response(Ok(String::from(
            r#"{"smartlife.iot.smartbulb.lightingservice":{"transition_light_state":{"on_off":1,"err_code":0}}}"#,
        )));
        let bulb = DeviceRecord::new(addr(), serde_json::from_str::<crate::datatypes::DeviceData>(LB110_JSON_OFF).unwrap().sysinfo());

        client.turn_on(&bulb).await.unwrap();

        let sent: serde_json::Value = serde_json::from_str(&client.protocol.requests()[0].1).unwrap();
        assert_eq!(
            json!({"smartlife.iot.smartbulb.lightingservice": {"transition_light_state": {"on_off": 1}}}),
            sent
        );
    }

    #[tokio::test]
    async fn light_strip_uses_set_light_state() {
        let client = client();
        client.protocol.push_response(Ok(String::from(
            r#"{"smartlife.iot.lightStrip":{"set_light_state":{"on_off":0,"err_code":0}}}"#,
        )));
        let strip = DeviceRecord::new(
            addr(),
            SysInfo {
                hw_type: String::from("IOT.SMARTBULB"),
                model: String::from("KL430(US)"),
                length: Some(16),
                ..Default::default()
            },
        );
        assert_eq!(DeviceKind::LightStrip, strip.kind);

        client.turn_off(&strip).await.unwrap();

        let sent: serde_json::Value = serde_json::from_str(&client.protocol.requests()[0].1).unwrap();
        assert_eq!(
            json!({"smartlife.iot.lightStrip": {"set_light_state": {"on_off": 0}}}),
            sent
        );
    }

    #[tokio::test]
    async fn device_error_is_typed() {
        let client = client();
        client.protocol.push_response(Ok(String::from(
            r#"{"system":{"set_relay_state":{"err_code":-3,"err_msg":"invalid argument"}}}"#,
        )));
        let plug = DeviceRecord::new(addr(), SysInfo::default());

        let err = client.turn_on(&plug).await.unwrap_err();

        assert!(matches!(err, Error::Device(ref section) if section.err_code == -3));
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let client = client();
        client.protocol.push_response(Err(Error::Timeout(Duration::from_secs(1))));
        let plug = DeviceRecord::new(addr(), SysInfo::default());

        assert!(matches!(client.turn_on(&plug).await, Err(Error::Timeout(_))));
    }
}
