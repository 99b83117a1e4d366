//! Post-handshake mux loop: one reader task demultiplexes frames into
//! per-connection queues, one writer task serializes all frames onto the
//! ciphered pipe, and one relay task per logical connection owns the
//! outbound TCP socket.
//!
//! Teardown contract: the relay task is the sole emitter of
//! `PACKET_CLOSE_CONN` for its conn_id, exactly once on every exit path; it
//! always removes its table entry and drops the remote socket.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use burrow_metrics::{
    record_bytes_downstream, record_bytes_upstream, record_tunnel_conn_closed,
    record_tunnel_conn_opened,
};
use burrow_proto::{
    parse_packet, FrameHeader, HostRef, Packet, FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD,
    MAX_PROXY_CHUNK,
};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::pipe::{SecureReader, SecureStream};
use crate::session::Session;
use crate::state::ServerState;

/// Per-connection inbound queue depth; a full queue blocks the reader task,
/// propagating backpressure across the tunnel.
const CONN_QUEUE: usize = 32;
/// Writer channel depth; a full channel blocks remote reads.
const WRITER_QUEUE: usize = 1024;

type ConnTable = Arc<RwLock<HashMap<u32, mpsc::Sender<Vec<u8>>>>>;

/// Remote endpoint named by a `PACKET_NEW_CONN`.
enum Target {
    Ip(IpAddr),
    Domain(String),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Ip(ip) => ip.fmt(f),
            Target::Domain(name) => name.fmt(f),
        }
    }
}

/// Run the mux loop for an authenticated tunnel until the pipe fails.
pub async fn run_tunnel<S>(
    state: Arc<ServerState>,
    session: Arc<Session>,
    pipe: SecureStream<S>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    info!(
        user = %session.username,
        session = %hex::encode(session.id),
        "tunnel started"
    );

    let (mut reader, mut writer) = pipe.into_split();
    let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(WRITER_QUEUE);

    // Single writer task: all frames funnel through one channel because the
    // pipe's encrypt transform is position-stateful.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = write_rx.recv().await {
            if let Err(err) = writer.write_all(&frame).await {
                debug!(error = %err, "client write failed");
                break;
            }
        }
    });

    let conns: ConnTable = Arc::new(RwLock::new(HashMap::new()));
    let result = read_loop(&state, &mut reader, &conns, &write_tx).await;

    // Dropping every queue sender drains the relay tasks; dropping our
    // writer sender lets the writer task finish once they have.
    conns.write().clear();
    drop(write_tx);
    let _ = writer_task.await;

    info!(
        user = %session.username,
        session = %hex::encode(session.id),
        "tunnel closed"
    );
    result
}

async fn read_loop<S>(
    state: &Arc<ServerState>,
    reader: &mut SecureReader<S>,
    conns: &ConnTable,
    write_tx: &mpsc::Sender<Vec<u8>>,
) -> Result<(), ServerError>
where
    S: AsyncRead,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut payload = vec![0u8; MAX_FRAME_PAYLOAD];
    loop {
        reader.read_exact(&mut header).await?;
        let frame = FrameHeader::parse(header)?;
        let body = &mut payload[..frame.payload_len];
        reader.read_exact(body).await?;

        match parse_packet(frame.kind, body)? {
            Packet::Proxy { conn_id, data } => {
                let sender = conns.read().get(&conn_id).cloned();
                match sender {
                    Some(tx) => {
                        record_bytes_upstream(data.len() as u64);
                        // Blocks when the queue is full: backpressure onto
                        // the whole tunnel.
                        if tx.send(data.to_vec()).await.is_err() {
                            debug!(conn_id, "conn queue closed, dropping data");
                        }
                    }
                    None => debug!(conn_id, "no such conn"),
                }
            }
            Packet::NewConn {
                conn_id,
                host,
                port,
            } => {
                let target = match host {
                    HostRef::Ip(ip) => Target::Ip(ip),
                    HostRef::Domain(name) => {
                        Target::Domain(String::from_utf8_lossy(name).into_owned())
                    }
                };
                let (tx, rx) = mpsc::channel(CONN_QUEUE);
                {
                    let mut table = conns.write();
                    if table.contains_key(&conn_id) {
                        warn!(conn_id, "duplicate conn id, dropping new-conn");
                        continue;
                    }
                    table.insert(conn_id, tx);
                }
                let state = state.clone();
                let conns = conns.clone();
                let write_tx = write_tx.clone();
                tokio::spawn(async move {
                    relay_conn(state, conn_id, target, port, rx, write_tx, conns).await;
                });
            }
            Packet::CloseConn { conn_id } => {
                // Dropping the sender closes the inbound queue, which
                // drains the relay task deterministically.
                conns.write().remove(&conn_id);
            }
            Packet::Unknown { kind } => {
                debug!(kind, "unknown packet kind ignored");
            }
        }
    }
}

/// Own one outbound TCP connection: forward queued client bytes to the
/// remote and remote bytes back as proxy frames.
async fn relay_conn(
    state: Arc<ServerState>,
    conn_id: u32,
    target: Target,
    port: u16,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    write_tx: mpsc::Sender<Vec<u8>>,
    conns: ConnTable,
) {
    record_tunnel_conn_opened();

    let remote = match dial(&state, &target, port).await {
        Ok(remote) => remote,
        Err(err) => {
            debug!(conn_id, target = %target, port, error = %err, "dial failed");
            teardown(conn_id, &conns, &write_tx).await;
            return;
        }
    };
    debug!(conn_id, target = %target, port, "remote connected");

    let (mut remote_r, mut remote_w) = remote.into_split();
    let mut buf = vec![0u8; MAX_PROXY_CHUNK];
    loop {
        tokio::select! {
            msg = inbound.recv() => match msg {
                Some(data) => {
                    if remote_w.write_all(&data).await.is_err() {
                        break;
                    }
                }
                // Queue closed: client sent CLOSE_CONN or the tunnel died.
                None => break,
            },
            read = remote_r.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    record_bytes_downstream(n as u64);
                    let frame = burrow_proto::write_proxy_frame(conn_id, &buf[..n]);
                    if write_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            },
        }
    }

    teardown(conn_id, &conns, &write_tx).await;
    // Remote halves drop here, closing the socket.
}

/// Single teardown path: remove the table entry and emit exactly one close
/// frame. The send fails harmlessly when the writer is already gone.
async fn teardown(conn_id: u32, conns: &ConnTable, write_tx: &mpsc::Sender<Vec<u8>>) {
    conns.write().remove(&conn_id);
    let _ = write_tx
        .send(burrow_proto::write_close_frame(conn_id).to_vec())
        .await;
    record_tunnel_conn_closed();
    debug!(conn_id, "conn closed");
}

async fn dial(state: &ServerState, target: &Target, port: u16) -> std::io::Result<TcpStream> {
    let connect = async {
        match target {
            Target::Ip(ip) => TcpStream::connect((*ip, port)).await,
            Target::Domain(name) => TcpStream::connect((name.as_str(), port)).await,
        }
    };
    match tokio::time::timeout(state.dial_timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "dial timed out",
        )),
    }
}
