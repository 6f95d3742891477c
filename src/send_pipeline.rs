use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Abstraction for writing one datagram to a UDP socket, introduced to
///  facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_packet(&self, to: SocketAddr, datagram: &[u8]);

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_packet(&self, to: SocketAddr, datagram: &[u8]) {
        trace!("sending {} bytes to {:?}", datagram.len(), to);

        // a transient send failure must not take the pipeline down
        if let Err(e) = self.send_to(datagram, to).await {
            error!("error sending UDP datagram to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref()
            .local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// One queued outbound datagram: an already-encoded fragment or control
///  message plus where to send it.
#[derive(Debug)]
pub struct OutboundDatagram {
    pub dest: SocketAddr,
    pub data: Vec<u8>,
}

/// The send half of the I/O pipeline: parks on the queue while it is empty
///  (the channel is queue and wake signal in one - a receiver waking to
///  drain never misses entries enqueued meanwhile, and enqueues during a
///  drain don't stack up spurious wakeups), writes datagrams in FIFO order,
///  and exits when every sender handle is gone.
pub async fn run_send_loop<S: SendSocket>(mut queue: mpsc::UnboundedReceiver<OutboundDatagram>, socket: S) {
    while let Some(datagram) = queue.recv().await {
        socket.send_packet(datagram.dest, &datagram.data).await;
    }
    debug!("send loop stopped");
}
