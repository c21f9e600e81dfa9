#![cfg(test)]
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod dialers;
pub mod tunnel_proxy;

pub use dialers::{RefusingDialer, StalledProxyDialer};
pub use tunnel_proxy::{ProxyOptions, RecordedRequest, TestTunnelProxy};
