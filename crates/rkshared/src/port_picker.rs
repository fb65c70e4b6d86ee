//
// port_picker.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Asks the OS for `count` distinct free TCP ports on the given IPv4 address.
///
/// All listeners are held open until every port has been picked, so the OS
/// cannot hand out the same port twice. They are released on return; another
/// process may still claim a port before the kernel binds it.
pub fn pick_unused_tcp_ports(ip: Ipv4Addr, count: usize) -> Option<Vec<u16>> {
    let mut listeners = Vec::with_capacity(count);
    for _ in 0..count {
        let listener = TcpListener::bind(SocketAddrV4::new(ip, 0)).ok()?;
        listeners.push(listener);
    }
    listeners
        .iter()
        .map(|listener| listener.local_addr().ok().map(|addr| addr.port()))
        .collect()
}
