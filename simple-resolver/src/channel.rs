//! Call scoped query engine.
//!
//! A [`Channel`] owns the nameserver list, the retry policy and at most one pending query.
//! The caller drives it: [`Channel::readiness`] tells which transport to wait on and for how
//! long, [`Channel::process`] reads whatever arrived and fires retries. The query callback is
//! invoked from inside `process` exactly once.

use std::{
    cell::Cell,
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, UdpSocket},
    time::{Duration, Instant},
};

use simple_dns::{Name, Packet, PacketFlag, Question, CLASS, QCLASS, QTYPE, TYPE};

use crate::{
    socket_helper::{query_socket, query_stream, MIN_WAIT},
    QueryStatus, ResolverOptions, ServerSpec,
};

const UDP_BUFFER_SIZE: usize = 4096;
/// Longest single attempt, whatever the configured timeout
const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

type QueryCallback = Box<dyn FnOnce(Result<&Packet<'_>, QueryStatus>)>;

pub(crate) struct Channel {
    servers: Vec<SocketAddr>,
    options: ResolverOptions,
    pending: Option<PendingQuery>,
}

struct PendingQuery {
    id: u16,
    name: String,
    request: Vec<u8>,
    attempt: usize,
    deadline: Instant,
    transport: Option<Transport>,
    last_status: Option<QueryStatus>,
    callback: QueryCallback,
}

/// Socket a pending query is waiting on
pub(crate) struct Transport {
    connection: Connection,
    /// Socket error picked up while waiting, reported by the next read
    failure: Cell<Option<io::ErrorKind>>,
}

enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// What the driving loop should wait for next
pub(crate) struct Readiness<'a> {
    pub transport: &'a Transport,
    pub timeout: Duration,
}

impl Channel {
    pub fn new(servers: &ServerSpec, options: ResolverOptions) -> Self {
        Self {
            servers: servers.servers().to_vec(),
            options,
            pending: None,
        }
    }

    /// Submits an A query for `name`, `callback` receives the answer or the failure status
    pub fn query_a<F>(&mut self, name: &str, callback: F)
    where
        F: FnOnce(Result<&Packet<'_>, QueryStatus>) + 'static,
    {
        if self.pending.is_some() {
            callback(Err(QueryStatus::Busy));
            return;
        }

        let id = rand::random();
        let request = match build_query(id, name, self.options.recursion_desired) {
            Ok(request) => request,
            Err(status) => {
                callback(Err(status));
                return;
            }
        };

        log::debug!(
            "querying {} (id {}) on {} server(s)",
            name,
            id,
            self.servers.len()
        );

        self.pending = Some(PendingQuery {
            id,
            name: name.to_string(),
            request,
            attempt: 0,
            deadline: Instant::now(),
            transport: None,
            last_status: None,
            callback: Box::new(callback),
        });

        self.start_attempt();
    }

    /// Returns the transport to wait on and the time left until the current attempt expires,
    /// `None` when nothing is pending
    pub fn readiness(&self) -> Option<Readiness<'_>> {
        let pending = self.pending.as_ref()?;
        let transport = pending.transport.as_ref()?;

        Some(Readiness {
            transport,
            timeout: pending.deadline.saturating_duration_since(Instant::now()),
        })
    }

    /// Reads the pending response if `readable` and moves to the next attempt once the current
    /// one has expired
    pub fn process(&mut self, readable: bool) {
        if readable {
            self.read_response();
        }

        let expired = self
            .pending
            .as_ref()
            .map_or(false, |pending| Instant::now() >= pending.deadline);

        if expired {
            self.fail_attempt(QueryStatus::Timeout);
        }
    }

    fn total_attempts(&self) -> usize {
        self.servers.len().saturating_mul(self.options.tries.max(1))
    }

    /// Sends the request for the current attempt, skipping over servers that can't be reached
    fn start_attempt(&mut self) {
        let total_attempts = self.total_attempts();

        loop {
            let Some(pending) = self.pending.as_mut() else {
                return;
            };

            if pending.attempt >= total_attempts {
                let status = pending.last_status.take().unwrap_or(QueryStatus::Timeout);
                log::debug!("{} exhausted {} attempt(s)", pending.name, total_attempts);
                self.complete(Err(status));
                return;
            }

            let server = self.servers[pending.attempt % self.servers.len()];
            let timeout = attempt_timeout(&self.options, self.servers.len(), pending.attempt);
            pending.deadline = deadline_after(timeout);

            log::trace!(
                "attempt {} for {} to {} ({:?})",
                pending.attempt + 1,
                pending.name,
                server,
                timeout
            );

            match Transport::open(server, self.options.use_tcp, timeout, &pending.request) {
                Ok(transport) => {
                    pending.transport = Some(transport);
                    return;
                }
                Err(err) => {
                    log::debug!("failed to send query to {}: {}", server, err);
                    pending.last_status = Some(err.into());
                    pending.attempt += 1;
                }
            }
        }
    }

    fn fail_attempt(&mut self, status: QueryStatus) {
        if let Some(pending) = self.pending.as_mut() {
            log::debug!(
                "attempt {} for {} failed: {}",
                pending.attempt + 1,
                pending.name,
                status
            );
            pending.transport = None;
            pending.last_status = Some(status);
            pending.attempt += 1;
        }

        self.start_attempt();
    }

    fn read_response(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let Some(transport) = pending.transport.as_mut() else {
            return;
        };

        let remaining = pending.deadline.saturating_duration_since(Instant::now());
        let data = match transport.receive(remaining) {
            Ok(data) => data,
            Err(err) if transport.is_udp() && is_would_block(&err) => return,
            Err(err) => {
                self.fail_attempt(err.into());
                return;
            }
        };

        if data.len() < 2 || u16::from_be_bytes([data[0], data[1]]) != pending.id {
            log::trace!("ignoring response with unexpected id");
            return;
        }

        let response = match Packet::parse(&data) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("Received invalid packet: {}", err);
                self.fail_attempt(QueryStatus::BadResponse);
                return;
            }
        };

        if !response.has_flags(PacketFlag::RESPONSE) || !answers_question(&response, &pending.name)
        {
            log::trace!("ignoring response for another question");
            return;
        }

        if response.has_flags(PacketFlag::TRUNCATION) && transport.is_udp() {
            self.retry_over_tcp();
            return;
        }

        match QueryStatus::from_rcode(response.rcode()) {
            None => self.complete(Ok(&response)),
            Some(QueryStatus::NotFound) => self.complete(Err(QueryStatus::NotFound)),
            Some(status) => self.fail_attempt(status),
        }
    }

    /// Sends the same request to the same server over TCP, without consuming an attempt
    fn retry_over_tcp(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        let server = self.servers[pending.attempt % self.servers.len()];
        let timeout = attempt_timeout(&self.options, self.servers.len(), pending.attempt);
        log::debug!("response for {} truncated, retrying over tcp", pending.name);

        pending.transport = None;
        pending.deadline = deadline_after(timeout);
        match Transport::open(server, true, timeout, &pending.request) {
            Ok(transport) => pending.transport = Some(transport),
            Err(err) => self.fail_attempt(err.into()),
        }
    }

    /// Releases the transport, then hands the result to the callback
    fn complete(&mut self, result: Result<&Packet<'_>, QueryStatus>) {
        if let Some(pending) = self.pending.take() {
            let PendingQuery {
                transport,
                callback,
                ..
            } = pending;
            drop(transport);
            callback(result);
        }
    }
}

impl Transport {
    fn open(
        server: SocketAddr,
        use_tcp: bool,
        timeout: Duration,
        request: &[u8],
    ) -> io::Result<Self> {
        let connection = if use_tcp {
            Connection::Tcp(query_stream(server, timeout)?)
        } else {
            Connection::Udp(query_socket(server)?)
        };

        let mut transport = Self {
            connection,
            failure: Cell::new(None),
        };
        transport.send(request)?;
        Ok(transport)
    }

    fn is_udp(&self) -> bool {
        matches!(self.connection, Connection::Udp(..))
    }

    /// Blocks until there is something to read or `timeout` elapses.
    ///
    /// Socket errors count as readable, the following read reports them.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let timeout = Some(timeout.max(MIN_WAIT));
        let mut probe = [0u8; 1];
        let result = match &self.connection {
            Connection::Udp(socket) => socket
                .set_read_timeout(timeout)
                .and_then(|_| socket.peek(&mut probe)),
            Connection::Tcp(stream) => stream
                .set_read_timeout(timeout)
                .and_then(|_| stream.peek(&mut probe)),
        };

        match result {
            Ok(_) => true,
            Err(err) if is_would_block(&err) => false,
            Err(err) => {
                // the kernel hands a pending socket error out once, peek included
                self.failure.set(Some(err.kind()));
                true
            }
        }
    }

    fn send(&mut self, request: &[u8]) -> io::Result<()> {
        match &mut self.connection {
            Connection::Udp(socket) => socket.send(request).map(|_| ()),
            Connection::Tcp(stream) => {
                let len = u16::try_from(request.len())
                    .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
                let mut message = Vec::with_capacity(request.len() + 2);
                message.extend_from_slice(&len.to_be_bytes());
                message.extend_from_slice(request);
                stream.write_all(&message)
            }
        }
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        if let Some(kind) = self.failure.take() {
            return Err(kind.into());
        }

        let timeout = Some(timeout.max(MIN_WAIT));
        match &mut self.connection {
            Connection::Udp(socket) => {
                socket.set_read_timeout(timeout)?;
                let mut buf = [0u8; UDP_BUFFER_SIZE];
                let count = socket.recv(&mut buf)?;
                Ok(buf[..count].to_vec())
            }
            Connection::Tcp(stream) => {
                stream.set_read_timeout(timeout)?;
                let mut len = [0u8; 2];
                stream.read_exact(&mut len)?;
                let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
                stream.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

/// Timeout of the given attempt, doubled after every full round over the servers
fn attempt_timeout(options: &ResolverOptions, servers: usize, attempt: usize) -> Duration {
    let round = (attempt / servers.max(1)).min(16) as u32;
    options
        .query_timeout
        .saturating_mul(1 << round)
        .min(MAX_ATTEMPT_TIMEOUT)
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + MAX_ATTEMPT_TIMEOUT)
}

fn build_query(id: u16, name: &str, recursion_desired: bool) -> Result<Vec<u8>, QueryStatus> {
    let qname = Name::new(name).map_err(|_| QueryStatus::BadName)?;

    let mut packet = Packet::new_query(id);
    if recursion_desired {
        packet.set_flags(PacketFlag::RECURSION_DESIRED);
    }
    packet.questions.push(Question::new(
        qname,
        TYPE::A.into(),
        CLASS::IN.into(),
        false,
    ));

    packet.build_bytes_vec().map_err(|_| QueryStatus::BadName)
}

/// Some servers omit the question on errors, those responses are accepted
fn answers_question(response: &Packet, name: &str) -> bool {
    response.questions.is_empty()
        || response.questions.iter().any(|question| {
            question.qtype == QTYPE::TYPE(TYPE::A)
                && question.qclass == QCLASS::CLASS(CLASS::IN)
                && question
                    .qname
                    .to_string()
                    .eq_ignore_ascii_case(name.trim_end_matches('.'))
        })
}

fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::socket_helper::listener_socket;

    fn options(query_timeout: Duration, tries: usize) -> ResolverOptions {
        ResolverOptions::default()
            .with_query_timeout(query_timeout)
            .with_tries(tries)
    }

    #[test]
    fn attempt_timeout_backs_off_per_round() {
        let options = options(Duration::from_millis(100), 3);

        assert_eq!(Duration::from_millis(100), attempt_timeout(&options, 2, 0));
        assert_eq!(Duration::from_millis(100), attempt_timeout(&options, 2, 1));
        assert_eq!(Duration::from_millis(200), attempt_timeout(&options, 2, 2));
        assert_eq!(Duration::from_millis(400), attempt_timeout(&options, 2, 5));
    }

    #[test]
    fn query_has_single_a_question() {
        let request = build_query(7, "azk.dev.azk.io", true).unwrap();
        let packet = Packet::parse(&request).unwrap();

        assert_eq!(7, packet.id());
        assert!(!packet.has_flags(PacketFlag::RESPONSE));
        assert!(packet.has_flags(PacketFlag::RECURSION_DESIRED));
        assert_eq!(1, packet.questions.len());
        assert_eq!("azk.dev.azk.io", packet.questions[0].qname.to_string());
        assert_eq!(QTYPE::TYPE(TYPE::A), packet.questions[0].qtype);
    }

    #[test]
    fn silent_server_exhausts_every_attempt() {
        let silent = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let servers = ServerSpec::new([silent.local_addr().unwrap()]).unwrap();
        let mut channel = Channel::new(&servers, options(Duration::from_millis(20), 2));

        let outcome = Rc::new(RefCell::new(None));
        let slot = outcome.clone();
        channel.query_a("silent.test", move |result| {
            *slot.borrow_mut() = Some(result.map(|_| ()));
        });

        let mut rounds = 0;
        while let Some(readiness) = channel.readiness() {
            let readable = readiness.transport.wait_readable(readiness.timeout);
            channel.process(readable);
            rounds += 1;
        }

        assert!(rounds >= 2);
        assert_eq!(Some(Err(QueryStatus::Timeout)), outcome.borrow_mut().take());

        let mut buf = [0u8; 512];
        let mut received = 0;
        while silent.recv_from(&mut buf).is_ok() {
            received += 1;
        }
        assert_eq!(2, received);
    }

    #[test]
    fn second_query_is_rejected_while_pending() {
        let silent = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let servers = ServerSpec::new([silent.local_addr().unwrap()]).unwrap();
        let mut channel = Channel::new(&servers, options(Duration::from_millis(20), 1));

        channel.query_a("first.test", |_| {});

        let outcome = Rc::new(RefCell::new(None));
        let slot = outcome.clone();
        channel.query_a("second.test", move |result| {
            *slot.borrow_mut() = Some(result.map(|_| ()));
        });

        assert_eq!(Some(Err(QueryStatus::Busy)), outcome.borrow_mut().take());
        assert!(channel.readiness().is_some());
    }

    #[test]
    fn dropping_the_channel_skips_the_callback() {
        let silent = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let servers = ServerSpec::new([silent.local_addr().unwrap()]).unwrap();
        let mut channel = Channel::new(&servers, options(Duration::from_secs(5), 1));

        let called = Rc::new(RefCell::new(false));
        let flag = called.clone();
        channel.query_a("dropped.test", move |_| *flag.borrow_mut() = true);
        drop(channel);

        assert!(!*called.borrow());
    }

    #[test]
    fn oversized_retry_settings_are_clamped() {
        let options = options(Duration::MAX, usize::MAX);
        assert_eq!(MAX_ATTEMPT_TIMEOUT, attempt_timeout(&options, 2, 0));
        assert_eq!(MAX_ATTEMPT_TIMEOUT, attempt_timeout(&options, 2, usize::MAX));

        let silent = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let other = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let servers =
            ServerSpec::new([silent.local_addr().unwrap(), other.local_addr().unwrap()]).unwrap();
        let mut channel = Channel::new(&servers, options);
        assert_eq!(usize::MAX, channel.total_attempts());

        channel.query_a("patient.test", |_| {});
        let readiness = channel.readiness().unwrap();
        assert!(readiness.timeout <= MAX_ATTEMPT_TIMEOUT);
        assert!(readiness.timeout > Duration::from_secs(60 * 60));
    }

    #[test]
    fn refused_port_fails_the_attempt() {
        let closed = listener_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let address = closed.local_addr().unwrap();
        drop(closed);

        let servers = ServerSpec::new([address]).unwrap();
        let mut channel = Channel::new(&servers, options(Duration::from_secs(2), 1));

        let outcome = Rc::new(RefCell::new(None));
        let slot = outcome.clone();
        channel.query_a("closed.test", move |result| {
            *slot.borrow_mut() = Some(result.map(|_| ()));
        });

        while let Some(readiness) = channel.readiness() {
            let readable = readiness.transport.wait_readable(readiness.timeout);
            channel.process(readable);
        }

        assert_eq!(
            Some(Err(QueryStatus::ConnectionRefused)),
            outcome.borrow_mut().take()
        );
    }
}
