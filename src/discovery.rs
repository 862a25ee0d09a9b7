//! Discover devices on the local network by UDP broadcast
//!
use std::{net::SocketAddr, time::Duration};

use indexmap::IndexMap;
use tokio::{
    net::UdpSocket,
    time::{timeout_at, Instant},
};
use tracing::debug;

use crate::{
    datatypes::{DeviceData, SysInfo},
    error::Result,
    protocol,
};

pub const QUERY: &str = r#"{"system":{"get_sysinfo":null}}"#;

const SENDS: u8 = 3;
const MAX_DATAGRAM: usize = 16 * 1024;

/// Broadcast a sysinfo query to `target` and collect replies until `timeout` elapses.
///
/// Devices answering more than once are reported once; replies that do not
/// parse as sysinfo are skipped.
pub async fn with_timeout(target: SocketAddr, timeout: Duration) -> Result<Vec<(SocketAddr, SysInfo)>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let req = protocol::encrypt_datagram(QUERY);
    for _ in 0..SENDS {
        socket.send_to(&req, target).await?;
    }

    let deadline = Instant::now() + timeout;
    let mut buf = vec![0_u8; MAX_DATAGRAM];
    let mut devices = IndexMap::new();

    while let Ok(Ok((size, addr))) = timeout_at(deadline, socket.recv_from(&mut buf)).await {
        let data = protocol::decrypt(&mut buf[0..size]);
        match serde_json::from_str::<DeviceData>(&data) {
            Ok(device_data) => {
                devices.insert(addr, device_data.sysinfo());
            }
            Err(e) => debug!(%addr, error = %e, "ignoring unparseable discovery reply"),
        }
    }

    Ok(devices.into_iter().collect())
}
