pub mod bridge;
pub mod client;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod datatypes;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod store;
pub mod tui;
pub mod view;

pub use client::{DeviceClient, KasaClient};
pub use config::Settings;
pub use controller::{Controller, Update};
pub use device::DeviceRecord;
