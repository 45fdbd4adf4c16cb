use std::{
    error::Error,
    fmt::Display,
    io::{self, Read, Write},
    net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use simple_dns::{
    rdata::{RData, A, AAAA, CNAME},
    Name, Packet, PacketFlag, Question, ResourceRecord, SimpleDnsError, CLASS, RCODE,
};

use crate::{
    socket_helper::listener_socket,
    zone::{Lookup, Zone},
};

const FIVE_MINUTES: u32 = 60 * 5;
const ACCEPT_INTERVAL: Duration = Duration::from_millis(50);

/// Error types for the nameserver
#[derive(Debug)]
pub enum NameserverError {
    /// Udp or Tcp socket related error
    SocketError(io::Error),
    /// Simple-dns error related, usually an invalid name
    DnsParsing(SimpleDnsError),
}

impl Error for NameserverError {}

impl Display for NameserverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameserverError::SocketError(err) => {
                write!(f, "There was an error related to the nameserver sockets: {}", err)
            }
            NameserverError::DnsParsing(err) => {
                write!(f, "Failed to build resource record: {}", err)
            }
        }
    }
}

impl From<io::Error> for NameserverError {
    fn from(err: io::Error) -> Self {
        Self::SocketError(err)
    }
}

impl From<SimpleDnsError> for NameserverError {
    fn from(v: SimpleDnsError) -> Self {
        Self::DnsParsing(v)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Behaviour {
    response_code: Option<RCODE>,
    truncate_udp: bool,
    silent: bool,
}

#[derive(Debug)]
struct NameserverState {
    zone: RwLock<Zone>,
    behaviour: RwLock<Behaviour>,
    queries: AtomicUsize,
    running: AtomicBool,
}

/// A small authoritative nameserver answering from an in memory [`Zone`].
///
/// Listens on UDP and TCP on the same address, in background threads, until dropped.
/// Meant to stand in for a real nameserver in tests and demos.
///
/// ```
///     use simple_resolver::{resolve_via_servers, SimpleNameserver};
///     use std::net::Ipv4Addr;
///
///     let mut nameserver = SimpleNameserver::start("127.0.0.1:0".parse().unwrap())
///         .expect("Failed to start nameserver");
///     nameserver
///         .add_address("azk.dev.azk.io", Ipv4Addr::new(10, 0, 0, 1).into())
///         .expect("Invalid name");
///
///     let host = resolve_via_servers("azk.dev.azk.io", &nameserver.local_addr().to_string())
///         .expect("Failed to resolve");
///     assert_eq!(1, host.addresses().len());
/// ```
pub struct SimpleNameserver {
    local_addr: SocketAddr,
    state: Arc<NameserverState>,
    rr_ttl: u32,
    workers: Vec<JoinHandle<()>>,
}

impl SimpleNameserver {
    /// Binds UDP and TCP on `address` and starts answering queries, port 0 picks a free port
    pub fn start(address: SocketAddr) -> Result<Self, NameserverError> {
        let udp_socket = listener_socket(address)?;
        let local_addr = udp_socket.local_addr()?;
        let tcp_listener = TcpListener::bind(local_addr)?;
        tcp_listener.set_nonblocking(true)?;

        let state = Arc::new(NameserverState {
            zone: RwLock::new(Zone::new()),
            behaviour: RwLock::new(Behaviour::default()),
            queries: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        });

        let udp_state = state.clone();
        let tcp_state = state.clone();
        let workers = vec![
            thread::spawn(move || udp_loop(udp_socket, &udp_state)),
            thread::spawn(move || {
                if let Err(err) = tcp_loop(tcp_listener, &tcp_state) {
                    log::error!("Nameserver tcp loop failed: {}", err);
                }
            }),
        ];

        log::debug!("nameserver listening on {}", local_addr);
        Ok(Self {
            local_addr,
            state,
            rr_ttl: FIVE_MINUTES,
            workers,
        })
    }

    /// Address the nameserver is listening on, for UDP and TCP
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a Resource Record
    pub fn add_record(&mut self, record: ResourceRecord<'static>) {
        self.state
            .zone
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_record(record);
    }

    /// Register an A or AAAA record for `name`
    pub fn add_address(&mut self, name: &str, address: IpAddr) -> Result<(), NameserverError> {
        let rdata = match address {
            IpAddr::V4(ip) => RData::A(A { address: ip.into() }),
            IpAddr::V6(ip) => RData::AAAA(AAAA { address: ip.into() }),
        };

        let name = Name::new(name)?.into_owned();
        self.add_record(ResourceRecord::new(name, CLASS::IN, self.rr_ttl, rdata));
        Ok(())
    }

    /// Register a CNAME record making `name` an alias of `target`
    pub fn add_alias(&mut self, name: &str, target: &str) -> Result<(), NameserverError> {
        let name = Name::new(name)?.into_owned();
        let target = Name::new(target)?.into_owned();
        self.add_record(ResourceRecord::new(
            name,
            CLASS::IN,
            self.rr_ttl,
            RData::CNAME(CNAME(target)),
        ));
        Ok(())
    }

    /// Remove every record owned by `name`
    pub fn remove_records(&mut self, name: &str) -> Result<(), NameserverError> {
        let name = Name::new(name)?;
        self.state
            .zone
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_records(&name);
        Ok(())
    }

    /// Remove all resource records
    pub fn clear(&mut self) {
        self.state
            .zone
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Answer every query with `response_code` and no records, `None` restores normal answers
    pub fn set_response_code(&mut self, response_code: Option<RCODE>) {
        self.update_behaviour(|behaviour| behaviour.response_code = response_code);
    }

    /// Answer UDP queries with an empty truncated response, forcing clients to TCP
    pub fn set_truncate_udp(&mut self, truncate_udp: bool) {
        self.update_behaviour(|behaviour| behaviour.truncate_udp = truncate_udp);
    }

    /// Receive queries without ever answering them
    pub fn set_silent(&mut self, silent: bool) {
        self.update_behaviour(|behaviour| behaviour.silent = silent);
    }

    /// Set the ttl in seconds of records added through [`add_address`](Self::add_address) and
    /// [`add_alias`](Self::add_alias) (defaults to 300).
    pub fn set_rr_ttl(&mut self, rr_ttl: u32) {
        self.rr_ttl = rr_ttl;
    }

    /// Number of queries received so far, over UDP and TCP
    pub fn queries_received(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    fn update_behaviour<F: FnOnce(&mut Behaviour)>(&mut self, update: F) {
        let mut behaviour = self
            .state
            .behaviour
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut behaviour);
    }
}

impl Drop for SimpleNameserver {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Nameserver worker panicked");
            }
        }
    }
}

fn udp_loop(socket: UdpSocket, state: &NameserverState) {
    let mut recv_buffer = [0u8; 9000];

    while state.running.load(Ordering::SeqCst) {
        let (count, addr) = match socket.recv_from(&mut recv_buffer) {
            Ok(received) => received,
            Err(err) if is_timeout(&err) => continue,
            Err(err) => {
                log::debug!("udp receive failed: {}", err);
                continue;
            }
        };

        if let Some(reply) = handle_query(&recv_buffer[..count], state, true) {
            if let Err(err) = socket.send_to(&reply, addr) {
                log::debug!("udp reply to {} failed: {}", addr, err);
            }
        }
    }
}

fn tcp_loop(listener: TcpListener, state: &NameserverState) -> io::Result<()> {
    while state.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(err) = serve_connection(stream, state) {
                    log::debug!("tcp connection from {} closed: {}", addr, err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_INTERVAL)
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

fn serve_connection(mut stream: TcpStream, state: &NameserverState) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    loop {
        let mut len = [0u8; 2];
        match stream.read_exact(&mut len) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }

        let mut query = vec![0u8; u16::from_be_bytes(len) as usize];
        stream.read_exact(&mut query)?;

        if let Some(reply) = handle_query(&query, state, false) {
            let reply_len = u16::try_from(reply.len())
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
            let mut message = Vec::with_capacity(reply.len() + 2);
            message.extend_from_slice(&reply_len.to_be_bytes());
            message.extend_from_slice(&reply);
            stream.write_all(&message)?;
        }
    }
}

fn handle_query(data: &[u8], state: &NameserverState, over_udp: bool) -> Option<Vec<u8>> {
    let query = match Packet::parse(data) {
        Ok(query) => query,
        Err(err) => {
            log::error!("Received Invalid packet {err}");
            return None;
        }
    };

    if query.has_flags(PacketFlag::RESPONSE) {
        return None;
    }

    state.queries.fetch_add(1, Ordering::SeqCst);
    let behaviour = *state
        .behaviour
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    if behaviour.silent {
        log::trace!("dropping query {}", query.id());
        return None;
    }

    let zone = state.zone.read().unwrap_or_else(PoisonError::into_inner);
    let reply = build_reply(&query, &zone, behaviour, over_udp);
    match reply.build_bytes_vec_compressed() {
        Ok(reply) => Some(reply),
        Err(err) => {
            log::error!("Failed to build reply {err}");
            None
        }
    }
}

fn build_reply<'a>(
    query: &Packet<'a>,
    zone: &Zone,
    behaviour: Behaviour,
    over_udp: bool,
) -> Packet<'a> {
    let mut reply = Packet::new_reply(query.id());
    reply.set_flags(PacketFlag::AUTHORITATIVE_ANSWER);
    if query.has_flags(PacketFlag::RECURSION_DESIRED) {
        reply.set_flags(PacketFlag::RECURSION_DESIRED);
    }

    for question in query.questions.iter() {
        reply.questions.push(Question::new(
            question.qname.clone(),
            question.qtype,
            question.qclass,
            false,
        ));
    }

    if let Some(response_code) = behaviour.response_code {
        *reply.rcode_mut() = response_code;
        return reply;
    }

    if over_udp && behaviour.truncate_udp {
        reply.set_flags(PacketFlag::TRUNCATION);
        return reply;
    }

    for question in query.questions.iter() {
        match zone.lookup(&question.qname, question.qtype, question.qclass) {
            Lookup::Answers(records) => {
                for record in records {
                    reply.answers.push(record.clone());
                }
            }
            Lookup::NoData => {}
            Lookup::NotFound => *reply.rcode_mut() = RCODE::NameError,
        }
    }

    reply
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
