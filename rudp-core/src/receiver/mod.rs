//! The receiver FSM: single-task event loop, demux by peer key, in-order
//! acceptance gated by CRC, cumulative acknowledgement, idle reaping.

pub mod session;

use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;

use crate::config::{ReceiverConfig, REAP_SWEEP_INTERVAL_MS};
use crate::error::ReceiverError;
use crate::proto::{crc32, HandshakeMetadata, Packet};
use crate::socket::{RecvOutcome, RudpSocket};

use session::{OutputSink, Session, SessionTable};

/// Opens the per-session output sink for a given target path. File
/// creation itself is left to the binary (file I/O is an external
/// collaborator); this trait is the seam.
#[async_trait::async_trait]
pub trait OutputOpener: Send + Sync {
    async fn open(&self, path: &str) -> std::io::Result<Box<dyn OutputSink>>;
}

fn peer_key(addr: SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Derives the on-disk path for a newly-accepted session:
/// `<outdir>/<filename>_<session_id>_<peer_key>`. Constructed so that
/// concurrent or repeat transfers from the same peer never collide.
fn target_path(outdir: &str, filename: &str, session_id: u64, key: &str) -> String {
    format!("{outdir}/{filename}_{session_id}_{key}")
}

/// Runs the receiver event loop until `shutdown` is notified. On
/// shutdown, every open session sink is flushed and closed before
/// returning.
pub async fn run<O>(
    socket: &RudpSocket,
    config: &ReceiverConfig,
    opener: &O,
    shutdown: &Notify,
) -> Result<(), ReceiverError>
where
    O: OutputOpener,
{
    let mut table = SessionTable::new();
    let mut buf = vec![0u8; 65_536];
    let mut reap_interval =
        tokio::time::interval(Duration::from_millis(REAP_SWEEP_INTERVAL_MS));
    reap_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("shutdown requested, flushing open sessions");
                table.teardown().await;
                return Ok(());
            }
            _ = reap_interval.tick() => {
                table.reap_idle(Instant::now()).await;
            }
            outcome = socket.recv_packet(&mut buf) => {
                match outcome? {
                    RecvOutcome::Empty => {}
                    RecvOutcome::Garbage(addr) => {
                        tracing::debug!(%addr, "dropped undecodable datagram");
                    }
                    RecvOutcome::Packet(packet, addr) => {
                        dispatch(packet, addr, &mut table, config, opener, socket).await;
                    }
                }
            }
        }
    }
}

async fn dispatch<O>(
    packet: Packet,
    addr: SocketAddr,
    table: &mut SessionTable,
    config: &ReceiverConfig,
    opener: &O,
    socket: &RudpSocket,
) where
    O: OutputOpener,
{
    use crate::proto::PacketType::*;

    let key = peer_key(addr);

    match packet.ptype {
        Handshake => handle_handshake(packet, addr, &key, table, config, opener, socket).await,
        Data => handle_data(packet, addr, &key, table, socket).await,
        Fin => handle_fin(addr, &key, table, socket).await,
        HandshakeAck | Ack | FinAck | Error => {
            tracing::debug!(ptype = ?packet.ptype, %addr, "ignoring packet type not accepted by the receiver");
        }
    }
}

async fn handle_handshake<O>(
    packet: Packet,
    addr: SocketAddr,
    key: &str,
    table: &mut SessionTable,
    config: &ReceiverConfig,
    opener: &O,
    socket: &RudpSocket,
) where
    O: OutputOpener,
{
    let meta = match HandshakeMetadata::parse(&packet.payload) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::debug!(%addr, %err, "malformed handshake payload");
            let _ = socket
                .send_packet(&Packet::error("bad handshake"), addr)
                .await;
            return;
        }
    };

    // A repeat handshake from the same peer evicts the old session; its
    // output file is left on disk.
    if table.lookup_mut(key).is_some() {
        tracing::info!(%key, "evicting existing session for new handshake");
        table.evict(key).await;
    }

    if table.len() >= crate::config::SESSION_TABLE_CAPACITY {
        tracing::warn!(%key, "session table full, dropping handshake");
        return;
    }

    let session_id = now_millis();
    let path = target_path(&config.outdir, &meta.filename, session_id, key);

    let sink = match opener.open(&path).await {
        Ok(sink) => sink,
        Err(err) => {
            tracing::error!(%path, %err, "failed to open output sink");
            return;
        }
    };

    let session = Session {
        key: key.to_string(),
        sink,
        filename: meta.filename.clone(),
        total: meta.total_packets,
        expected: 0,
        received: 0,
        session_id,
        last_activity: Instant::now(),
        target_path: path.clone(),
    };

    tracing::info!(%key, filename = %meta.filename, total = meta.total_packets, %path, "accepted new session");
    table.insert(session);

    let reply = Packet::handshake_ack(meta.total_packets, config.window);
    let _ = socket.send_packet(&reply, addr).await;
}

async fn handle_data(packet: Packet, addr: SocketAddr, key: &str, table: &mut SessionTable, socket: &RudpSocket) {
    let Some(session) = table.lookup_mut(key) else {
        tracing::debug!(%addr, "DATA for unknown session");
        let _ = socket.send_packet(&Packet::error("no session"), addr).await;
        return;
    };

    session.touch(Instant::now());

    let valid_crc = crc32(&packet.payload) == packet.checksum;
    if !valid_crc {
        tracing::debug!(%key, seq = packet.seq, "CRC mismatch, dropping payload");
    } else if packet.seq == session.expected {
        if let Err(err) = session.sink.append(&packet.payload).await {
            tracing::error!(%key, %err, "failed to write to output sink");
        } else {
            session.expected += 1;
            session.received += 1;
        }
    } else {
        tracing::debug!(%key, seq = packet.seq, expected = session.expected, "out-of-order DATA discarded");
    }

    // total/window carry no meaning on an ACK, so they're left zeroed;
    // only `seq` is consumed by the sender.
    let ack = Packet::ack(session.ack_seq(), 0, 0);
    let _ = socket.send_packet(&ack, addr).await;
}

async fn handle_fin(addr: SocketAddr, key: &str, table: &mut SessionTable, socket: &RudpSocket) {
    if let Some(session) = table.evict(key).await {
        tracing::info!(
            %key,
            filename = %session.filename,
            received = session.received,
            total = session.total,
            "session complete"
        );
    } else {
        tracing::debug!(%key, "FIN for unknown or already-closed session");
    }

    let _ = socket.send_packet(&Packet::fin_ack(), addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct VecSink(Vec<u8>);

    #[async_trait::async_trait]
    impl OutputSink for VecSink {
        async fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }
        async fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session(key: &str) -> Session {
        Session {
            key: key.to_string(),
            sink: Box::new(VecSink(Vec::new())),
            filename: "f.bin".to_string(),
            total: 3,
            expected: 0,
            received: 0,
            session_id: 1,
            last_activity: Instant::now(),
            target_path: "/tmp/f.bin".to_string(),
        }
    }

    async fn socket_pair() -> (RudpSocket, RudpSocket) {
        let a = RudpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = RudpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn in_order_data_advances_expected_and_acks_it() {
        let (server, client) = socket_pair().await;
        let client_addr = client.local_addr().unwrap();
        let mut table = SessionTable::new();
        table.insert(session("peer"));

        let packet = Packet::data(0, 3, 4, b"abc".to_vec());
        handle_data(packet, client_addr, "peer", &mut table, &server).await;

        let session = table.lookup_mut("peer").unwrap();
        assert_eq!(session.expected, 1);
        assert_eq!(session.received, 1);

        let mut buf = vec![0u8; 128];
        let ack = match client.recv_packet(&mut buf).await.unwrap() {
            RecvOutcome::Packet(p, _) => p,
            other => panic!("expected a packet, got {other:?}"),
        };
        assert_eq!(ack.ptype, crate::proto::PacketType::Ack);
        assert_eq!(ack.seq, 0);
    }

    #[tokio::test]
    async fn out_of_order_data_is_discarded_and_acks_current_expected() {
        let (server, client) = socket_pair().await;
        let client_addr = client.local_addr().unwrap();
        let mut table = SessionTable::new();
        table.insert(session("peer"));

        // Sequence 1 arrives before sequence 0: expected is still 0, so
        // this is out of order and must not advance or get appended.
        let packet = Packet::data(1, 3, 4, b"xyz".to_vec());
        handle_data(packet, client_addr, "peer", &mut table, &server).await;

        let session = table.lookup_mut("peer").unwrap();
        assert_eq!(session.expected, 0);
        assert_eq!(session.received, 0);

        let mut buf = vec![0u8; 128];
        let ack = match client.recv_packet(&mut buf).await.unwrap() {
            RecvOutcome::Packet(p, _) => p,
            other => panic!("expected a packet, got {other:?}"),
        };
        assert_eq!(ack.seq, 0);
    }

    #[tokio::test]
    async fn crc_mismatch_is_discarded_without_advancing() {
        let (server, client) = socket_pair().await;
        let client_addr = client.local_addr().unwrap();
        let mut table = SessionTable::new();
        table.insert(session("peer"));

        let mut packet = Packet::data(0, 3, 4, b"abc".to_vec());
        packet.checksum ^= 0xFFFF_FFFF;
        handle_data(packet, client_addr, "peer", &mut table, &server).await;

        let session = table.lookup_mut("peer").unwrap();
        assert_eq!(session.expected, 0);
        assert_eq!(session.received, 0);

        let mut buf = vec![0u8; 128];
        client.recv_packet(&mut buf).await.unwrap();
    }

    #[tokio::test]
    async fn data_for_unknown_session_gets_an_error_reply() {
        let (server, client) = socket_pair().await;
        let client_addr = client.local_addr().unwrap();
        let mut table = SessionTable::new();

        let packet = Packet::data(0, 3, 4, b"abc".to_vec());
        handle_data(packet, client_addr, "ghost", &mut table, &server).await;

        let mut buf = vec![0u8; 128];
        let reply = match client.recv_packet(&mut buf).await.unwrap() {
            RecvOutcome::Packet(p, _) => p,
            other => panic!("expected a packet, got {other:?}"),
        };
        assert_eq!(reply.ptype, crate::proto::PacketType::Error);
    }

    #[tokio::test]
    async fn fin_evicts_session_and_acks() {
        let (server, client) = socket_pair().await;
        let client_addr = client.local_addr().unwrap();
        let mut table = SessionTable::new();
        table.insert(session("peer"));

        handle_fin(client_addr, "peer", &mut table, &server).await;

        assert_eq!(table.len(), 0);
        let mut buf = vec![0u8; 128];
        let reply = match client.recv_packet(&mut buf).await.unwrap() {
            RecvOutcome::Packet(p, _) => p,
            other => panic!("expected a packet, got {other:?}"),
        };
        assert_eq!(reply.ptype, crate::proto::PacketType::FinAck);
    }
}
