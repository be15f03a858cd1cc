//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the crate.

pub mod retry;

use std::net::{IpAddr, UdpSocket};

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("10.255.255.255:1")?;
    Ok(socket.local_addr()?.ip())
}

/// Split `group/service` into its parts; `None` when there is no `/`
pub fn split_location(location: &str) -> Option<(&str, &str)> {
    location
        .split_once('/')
        .filter(|(group, name)| !group.is_empty() && !name.is_empty())
}
