use std::net::UdpSocket;

/// Discovers the local source address the OS would use to reach `target`.
///
/// Connecting a UDP socket performs route selection without sending any
/// packet; the socket's local address is the outbound interface address.
pub fn local_ip(target: &str) -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip().to_string())
}
