use crate::config::{PeerDiscovery, TransportConfig};
use crate::connection::{ConnectionTracker, TickAction};
use crate::fragmentation::{fragment, parts_total};
use crate::message::{Message, MessageFamily, DEFAULT_MESSAGE_TYPE};
use crate::observer::{MessageObserver, ObserverId, ObserverRegistry};
use crate::packet_header::{decode_fragment, encode_fragment, PacketHeader};
use crate::reassembly::ReassemblyTable;
use crate::rendezvous::{self, ControlMessage};
use crate::send_pipeline::{run_send_loop, OutboundDatagram};
use anyhow::Context;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Snapshot of the transport's traffic counters.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct TrafficStats {
    /// completed inbound messages / their payload bytes
    pub messages_in: u64,
    pub bytes_in: u64,
    /// messages that reached the wire / their payload bytes (pre-header)
    pub messages_out: u64,
    pub bytes_out: u64,
}

#[derive(Default)]
struct TrafficCounters {
    messages_in: AtomicU64,
    bytes_in: AtomicU64,
    messages_out: AtomicU64,
    bytes_out: AtomicU64,
}

impl TrafficCounters {
    fn snapshot(&self) -> TrafficStats {
        TrafficStats {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// A peer-to-peer UDP transport endpoint.
///
/// Owns the socket and the two I/O tasks. The caller-facing methods
///  (`tick`, `send`, `receive`, ...) are synchronous and non-blocking, so a
///  per-frame host loop can drive them directly; all socket I/O happens on
///  the spawned tasks.
pub struct PeerEndpoint {
    shared: Arc<EndpointShared>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

struct EndpointShared {
    config: TransportConfig,
    /// resolved once at startup; `None` with a static peer
    server_addr: Option<SocketAddr>,
    local_addr: SocketAddr,
    local_ip: String,
    tracker: Mutex<ConnectionTracker>,
    reassembly: Mutex<ReassemblyTable>,
    inbound: Mutex<VecDeque<Message>>,
    inbound_observers: ObserverRegistry,
    outbound_observers: ObserverRegistry,
    outbound: mpsc::UnboundedSender<OutboundDatagram>,
    send_sequence: AtomicU32,
    counters: TrafficCounters,
    closed: AtomicBool,
}

impl PeerEndpoint {
    /// Validates the configuration, binds the socket and spawns the receive
    ///  and send tasks. The rendezvous server (or static peer) host name is
    ///  resolved here, once.
    pub async fn start(config: TransportConfig) -> anyhow::Result<PeerEndpoint> {
        config.validate()?;

        let (bind_port, server_addr, static_remote) = match &config.discovery {
            PeerDiscovery::Rendezvous { server_host, server_port } => {
                let addr = lookup_host((server_host.as_str(), *server_port))
                    .await?
                    .next()
                    .with_context(|| format!("rendezvous server {} did not resolve", server_host))?;
                (0, Some(addr), None)
            }
            PeerDiscovery::Static { remote_host, remote_port, listen_port } => {
                let addr = lookup_host((remote_host.as_str(), *remote_port))
                    .await?
                    .next()
                    .with_context(|| format!("static peer {} did not resolve", remote_host))?;
                (*listen_port, None, Some(addr))
            }
        };

        let socket = Arc::new(bind_socket(bind_port, config.socket_buffer_size)?);
        let local_addr = socket.local_addr()?;
        debug!("listening on {}", local_addr);

        let tracker = ConnectionTracker::new(
            server_addr.is_some(),
            static_remote,
            config.register_interval,
            config.heartbeat_interval,
            config.connection_timeout,
        );

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(EndpointShared {
            reassembly: Mutex::new(ReassemblyTable::new(
                config.max_pending_reassemblies,
                config.max_message_parts,
            )),
            config,
            server_addr,
            local_addr,
            local_ip: rendezvous::discover_local_ip(),
            tracker: Mutex::new(tracker),
            inbound: Mutex::new(VecDeque::new()),
            inbound_observers: ObserverRegistry::new(),
            outbound_observers: ObserverRegistry::new(),
            outbound: outbound_tx,
            send_sequence: AtomicU32::new(0),
            counters: TrafficCounters::default(),
            closed: AtomicBool::new(false),
        });

        let send_task = tokio::spawn(run_send_loop(outbound_rx, socket.clone()));
        let recv_task = tokio::spawn(run_recv_loop(shared.clone(), socket));

        Ok(PeerEndpoint { shared, recv_task, send_task })
    }

    /// Advances the liveness state machine. `now` is elapsed time from any
    ///  fixed origin the host chooses (typically its scene clock); the
    ///  transport never reads a wall clock for liveness decisions.
    pub fn tick(&self, now: Duration) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }

        let (action, remote) = {
            let mut tracker = self.shared.tracker.lock().expect("connection tracker lock poisoned");
            (tracker.on_tick(now), tracker.remote())
        };

        match action {
            Some(TickAction::SendRegister) => self.shared.send_register(),
            Some(TickAction::SendPunch) => {
                if let Some(remote) = remote {
                    self.shared.enqueue_control(remote, &ControlMessage::Punch);
                }
            }
            None => {}
        }
    }

    /// Hands a whole message to the transport. Outbound observers are
    ///  always notified, exactly once per call - they are a local tap, not
    ///  a delivery guarantee. The message only reaches the wire while
    ///  connected; otherwise it is dropped without buffering. An empty
    ///  payload is never transmitted: it exists for the local notification
    ///  alone.
    pub fn send(&self, payload: &[u8], family: u8, message_type: u8) {
        let message = Message::new(family, message_type, payload.to_vec());
        self.shared.outbound_observers.notify(&message);

        if payload.is_empty() {
            return;
        }
        let remote = {
            let tracker = self.shared.tracker.lock().expect("connection tracker lock poisoned");
            if !tracker.is_connected() {
                return;
            }
            tracker.remote()
        };
        let Some(remote) = remote else {
            return;
        };

        let max_chunk = self.shared.config.max_fragment_payload();
        let parts = parts_total(payload.len(), max_chunk);
        if parts as usize > self.shared.config.max_message_parts {
            warn!(
                "dropping oversized message: {} bytes would need {} fragments (limit {})",
                payload.len(),
                parts,
                self.shared.config.max_message_parts
            );
            return;
        }

        let sequence_id = self.shared.send_sequence.fetch_add(1, Ordering::AcqRel).wrapping_add(1);

        for (index, chunk) in fragment(payload, max_chunk).enumerate() {
            let header = PacketHeader {
                family,
                message_type,
                sequence_id,
                parts_total: parts,
                part_index: index as u32,
                timestamp_millis: message.timestamp_millis,
            };
            let datagram = OutboundDatagram { dest: remote, data: encode_fragment(&header, chunk) };
            if self.shared.outbound.send(datagram).is_err() {
                return; // shutting down
            }
        }

        self.shared.counters.messages_out.fetch_add(1, Ordering::Relaxed);
        self.shared.counters.bytes_out.fetch_add(payload.len() as u64, Ordering::Relaxed);
    }

    /// `send` with the default data family and type.
    pub fn send_default(&self, payload: &[u8]) {
        self.send(payload, MessageFamily::Data.into(), DEFAULT_MESSAGE_TYPE);
    }

    /// Non-blocking poll of the inbound queue. Every completed message is
    ///  delivered both here and to the inbound observers.
    pub fn receive(&self) -> Option<Message> {
        self.shared.inbound.lock().expect("inbound queue lock poisoned").pop_front()
    }

    pub fn subscribe_inbound(&self, observer: Arc<dyn MessageObserver>) -> ObserverId {
        self.shared.inbound_observers.subscribe(observer)
    }

    pub fn unsubscribe_inbound(&self, id: ObserverId) -> bool {
        self.shared.inbound_observers.unsubscribe(id)
    }

    pub fn subscribe_outbound(&self, observer: Arc<dyn MessageObserver>) -> ObserverId {
        self.shared.outbound_observers.subscribe(observer)
    }

    pub fn unsubscribe_outbound(&self, id: ObserverId) -> bool {
        self.shared.outbound_observers.unsubscribe(id)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.tracker.lock().expect("connection tracker lock poisoned").is_connected()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn stats(&self) -> TrafficStats {
        self.shared.counters.snapshot()
    }

    /// Stops both I/O tasks and releases the socket. In-flight sends may or
    ///  may not make it out; callers must not rely on either.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing transport on {}", self.shared.local_addr);
        self.recv_task.abort();
        self.send_task.abort();
    }
}

impl Drop for PeerEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl EndpointShared {
    fn send_register(&self) {
        let Some(server_addr) = self.server_addr else {
            return;
        };
        debug!("registering with matchmaking server at {}", server_addr);
        self.enqueue_control(
            server_addr,
            &ControlMessage::Register {
                socket_id: self.config.socket_id.clone(),
                is_sender: self.config.is_sender,
                local_ip: self.local_ip.clone(),
                uid: self.config.device_uid.clone(),
            },
        );
    }

    fn enqueue_control(&self, dest: SocketAddr, message: &ControlMessage) {
        // the queue only closes on shutdown
        let _ = self.outbound.send(OutboundDatagram { dest, data: rendezvous::encode_control(message) });
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        match rendezvous::try_decode_control(datagram) {
            Some(Ok(message)) => self.handle_control(message, from),
            Some(Err(e)) => warn!("dropping control datagram with malformed JSON from {:?}: {}", from, e),
            None => self.handle_data(datagram, from),
        }
    }

    fn handle_control(&self, message: ControlMessage, from: SocketAddr) {
        match message {
            ControlMessage::Answer { address, port } => {
                let ip: IpAddr = match address.parse() {
                    Ok(ip) => ip,
                    Err(_) => {
                        warn!("matchmaking answer carries unparsable address {:?}", address);
                        return;
                    }
                };
                let remote = SocketAddr::new(ip, port);
                debug!("matchmaking answer: peer is at {}", remote);
                self.tracker.lock().expect("connection tracker lock poisoned").on_answer(remote);

                // twice: the first punch may be lost while the peer's own
                // hole is still closed
                self.enqueue_control(remote, &ControlMessage::Punch);
                self.enqueue_control(remote, &ControlMessage::Punch);
            }
            ControlMessage::Punch => {
                self.tracker.lock().expect("connection tracker lock poisoned").on_liveness();
            }
            ControlMessage::Register { .. } => {
                // server-bound; a client receiving one is misconfiguration
                warn!("ignoring register message from {:?}", from);
            }
        }
    }

    fn handle_data(&self, datagram: &[u8], from: SocketAddr) {
        let (header, payload) = match decode_fragment(datagram) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("dropping malformed datagram from {:?}: {}", from, e);
                return;
            }
        };

        self.tracker.lock().expect("connection tracker lock poisoned").on_liveness();

        let completed = self
            .reassembly
            .lock()
            .expect("reassembly table lock poisoned")
            .accept(&header, payload);

        if let Some(message) = completed {
            self.counters.messages_in.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes_in.fetch_add(message.payload.len() as u64, Ordering::Relaxed);

            self.inbound_observers.notify(&message);
            self.inbound.lock().expect("inbound queue lock poisoned").push_back(message);
        }
    }
}

async fn run_recv_loop(shared: Arc<EndpointShared>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; 65_536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => shared.handle_datagram(&buf[..len], from),
            Err(e) => {
                if shared.closed.load(Ordering::Acquire) {
                    debug!("receive loop stopped");
                    return;
                }
                // one bad datagram must not take the receive loop down
                error!("socket error while receiving: {}", e);
            }
        }
    }
}

fn bind_socket(port: u16, buffer_size: usize) -> anyhow::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
        warn!("could not widen the socket receive buffer: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(buffer_size) {
        warn!("could not widen the socket send buffer: {}", e);
    }
    socket.bind(&SocketAddr::from(([0, 0, 0, 0], port)).into())?;
    socket.set_nonblocking(true)?;

    Ok(UdpSocket::from_std(socket.into())?)
}
