//! The sender FSM: handshake, windowed Go-Back-N data transmission, FIN
//! teardown. A single retransmission timer covers the whole outstanding
//! window, reset precisely whenever `base` advances without emptying it.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::{SenderConfig, POLL_SLEEP_MS};
use crate::error::SenderError;
use crate::proto::{HandshakeMetadata, Packet, PacketType};
use crate::socket::{RecvOutcome, RudpSocket};

const RECV_BUF_LEN: usize = 65_536;

/// Splits `data` into fixed-size chunks (the final chunk may be shorter);
/// the chunk count is `ceil(file_size / chunk_size)`.
pub fn chunk(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Runs the full sender FSM against an already-open socket, transferring
/// `data` (already read into memory as an opaque byte source) under the
/// name `filename` to `peer`.
pub async fn run(
    socket: &RudpSocket,
    peer: SocketAddr,
    filename: &str,
    data: &[u8],
    config: &SenderConfig,
) -> Result<(), SenderError> {
    let chunks = chunk(data, config.chunk_size);
    let total = chunks.len() as u32;

    tracing::info!(
        %peer, filename, file_size = data.len(), total, "starting transfer"
    );

    handshake(socket, peer, filename, data.len() as u64, total, config).await?;
    tracing::info!("handshake acknowledged");

    send_data(socket, peer, &chunks, total, config).await?;
    tracing::info!("data phase complete, base == total");

    teardown(socket, peer, config).await?;
    tracing::info!("FIN acknowledged, transfer complete");

    Ok(())
}

/// Waits up to `config.timeout_ms` for a reply of `expect`, polling
/// non-blockingly and sleeping ~5ms between attempts, bounded by
/// wall-clock time from entry.
async fn wait_for(
    socket: &RudpSocket,
    expect: PacketType,
    timeout_ms: u64,
) -> std::io::Result<bool> {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    while Instant::now() < deadline {
        match socket.try_recv_packet(&mut buf)? {
            RecvOutcome::Packet(p, _addr) if p.ptype == expect => return Ok(true),
            RecvOutcome::Packet(_, _) | RecvOutcome::Garbage(_) => {
                // Unrelated or undecodable datagram; keep waiting out the
                // same bound rather than resetting it.
            }
            RecvOutcome::Empty => {
                tokio::time::sleep(Duration::from_millis(POLL_SLEEP_MS)).await;
            }
        }
    }

    Ok(false)
}

async fn handshake(
    socket: &RudpSocket,
    peer: SocketAddr,
    filename: &str,
    file_size: u64,
    total: u32,
    config: &SenderConfig,
) -> Result<(), SenderError> {
    let meta = HandshakeMetadata::new(filename, file_size, total, config.chunk_size as u32, config.window);
    let packet = Packet::handshake(meta.encode(), config.window);

    for attempt in 1..=config.max_retries {
        socket.send_packet(&packet, peer).await?;
        if wait_for(socket, PacketType::HandshakeAck, config.timeout_ms).await? {
            return Ok(());
        }
        tracing::warn!(attempt, max = config.max_retries, "handshake not acked, retrying");
    }

    Err(SenderError::HandshakeFailed)
}

async fn send_data(
    socket: &RudpSocket,
    peer: SocketAddr,
    chunks: &[Vec<u8>],
    total: u32,
    config: &SenderConfig,
) -> Result<(), SenderError> {
    let window = config.window as u32;
    let mut base: u32 = 0;
    let mut nextseq: u32 = 0;
    let mut retries: u32 = 0;
    let mut timer_running = false;
    let mut timer_t0 = Instant::now();
    let mut buf = vec![0u8; RECV_BUF_LEN];

    while base < total {
        // Send up to the window.
        while nextseq < total && nextseq < base + window {
            let packet = Packet::data(nextseq, total, config.window, chunks[nextseq as usize].clone());
            socket.send_packet(&packet, peer).await?;

            if base == nextseq && !timer_running {
                timer_running = true;
                timer_t0 = Instant::now();
            }
            nextseq += 1;
        }

        // Drain one ACK, non-blocking.
        if let RecvOutcome::Packet(p, _addr) = socket.try_recv_packet(&mut buf)? {
            if p.ptype == PacketType::Ack && p.seq >= base {
                base = p.seq + 1;
                if base == nextseq {
                    timer_running = false;
                } else {
                    timer_running = true;
                    timer_t0 = Instant::now();
                }
            }
            // seq < base: duplicate ACK, ignored.
        }

        // Check the single retransmission timer.
        if timer_running && timer_t0.elapsed().as_millis() as u64 > config.timeout_ms {
            timer_running = false;
            retries += 1;
            if retries > config.max_retries {
                return Err(SenderError::MaxRetriesExceeded);
            }

            tracing::warn!(retries, base, nextseq, "retransmission timeout, resending window");
            for seq in base..nextseq {
                let packet = Packet::data(seq, total, config.window, chunks[seq as usize].clone());
                socket.send_packet(&packet, peer).await?;
            }
            timer_running = true;
            timer_t0 = Instant::now();
        }

        // Yield to the runtime between iterations instead of busy-spinning
        // a whole OS thread; this does not introduce a sleep into the
        // timing-sensitive retransmission check above.
        tokio::task::yield_now().await;
    }

    Ok(())
}

async fn teardown(socket: &RudpSocket, peer: SocketAddr, config: &SenderConfig) -> Result<(), SenderError> {
    let fin = Packet::fin(0);

    for attempt in 1..=config.max_retries {
        socket.send_packet(&fin, peer).await?;
        if wait_for(socket, PacketType::FinAck, config.timeout_ms).await? {
            return Ok(());
        }
        tracing::warn!(attempt, max = config.max_retries, "FIN not acked, retrying");
    }

    Err(SenderError::FinNotAcked)
}
