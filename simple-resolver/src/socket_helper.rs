use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket},
    time::Duration,
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Shortest wait handed to the socket layer, a zero timeout is rejected by std sockets
pub const MIN_WAIT: Duration = Duration::from_millis(1);

/// Creates a UDP socket on an ephemeral port connected to `server`, so only its datagrams are
/// received
pub fn query_socket(server: SocketAddr) -> io::Result<UdpSocket> {
    let socket = create_socket(Domain::for_address(server), Type::DGRAM, Protocol::UDP)?;
    socket.bind(&SockAddr::from(unspecified(&server)))?;
    socket.connect(&SockAddr::from(server))?;

    Ok(socket.into())
}

/// Opens a TCP connection to `server`, giving up after `timeout`
pub fn query_stream(server: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = create_socket(Domain::for_address(server), Type::STREAM, Protocol::TCP)?;
    socket.connect_timeout(&SockAddr::from(server), timeout.max(MIN_WAIT))?;

    let stream: TcpStream = socket.into();
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Binds a UDP socket for the nameserver side
pub fn listener_socket(address: SocketAddr) -> io::Result<UdpSocket> {
    let socket = create_socket(Domain::for_address(address), Type::DGRAM, Protocol::UDP)?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    socket.bind(&SockAddr::from(address))?;

    Ok(socket.into())
}

fn create_socket(domain: Domain, ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(domain, ty, Some(protocol))?;
    if domain == Domain::IPV6 {
        socket.set_only_v6(true)?;
    }

    Ok(socket)
}

fn unspecified(server: &SocketAddr) -> SocketAddr {
    match server {
        SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_socket_is_connected() {
        let listener = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let server = listener.local_addr().unwrap();

        let socket = query_socket(server).unwrap();
        assert_eq!(server, socket.peer_addr().unwrap());

        socket.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (count, from) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(b"ping", &buf[..count]);
        assert_eq!(socket.local_addr().unwrap(), from);
    }
}
