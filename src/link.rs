//! Radio link over TCP, for running the flight software against a ground
//! station on the same network.
//!
//! Frames are JSON lines. The async side runs on its own thread with a
//! current-thread tokio runtime; the scheduler thread talks to it over
//! channels and never blocks except inside `send_with_ack`.

use crate::radio::{Packet, RadioDriver, RadioError, MAX_PACKET_LEN};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkFrame {
    Data {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
        want_ack: bool,
    },
    Ack,
}

impl LinkFrame {
    /// One JSON line, newline included.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

/// Flight-side radio that listens for one ground station at a time.
pub struct TcpRadio {
    inbound: Receiver<Vec<u8>>,
    acks: Receiver<()>,
    outbound: UnboundedSender<LinkFrame>,
    pending: Option<Vec<u8>>,
}

impl TcpRadio {
    pub fn listen(addr: &str) -> Result<Self, RadioError> {
        let (inbound_tx, inbound) = mpsc::channel();
        let (ack_tx, acks) = mpsc::channel();
        let (outbound, outbound_rx) = unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::channel::<std::io::Result<()>>();
        let addr = addr.to_string();

        std::thread::Builder::new()
            .name("radio-link".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                runtime.block_on(serve(addr, inbound_tx, ack_tx, outbound_rx, ready_tx));
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                inbound,
                acks,
                outbound,
                pending: None,
            }),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(RadioError::Link("link thread exited during startup".into())),
        }
    }

    fn queue(&self, frame: LinkFrame) -> Result<(), RadioError> {
        self.outbound
            .send(frame)
            .map_err(|_| RadioError::Link("link thread gone".into()))
    }
}

async fn serve(
    addr: String,
    inbound: mpsc::Sender<Vec<u8>>,
    acks: mpsc::Sender<()>,
    mut outbound: UnboundedReceiver<LinkFrame>,
    ready: mpsc::Sender<std::io::Result<()>>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => {
            let _ = ready.send(Ok(()));
            listener
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    info!("radio link listening on {}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!("accept failed: {}", err);
                continue;
            }
        };
        info!("ground station connected from {}", peer);
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match LinkFrame::decode(&line) {
                        Ok(LinkFrame::Data { payload, .. }) => {
                            if inbound.send(payload).is_err() {
                                return;
                            }
                        }
                        Ok(LinkFrame::Ack) => {
                            let _ = acks.send(());
                        }
                        Err(err) => warn!("bad frame from ground: {}", err),
                    },
                    Ok(None) => break,
                    Err(err) => {
                        warn!("read from ground failed: {}", err);
                        break;
                    }
                },
                frame = outbound.recv() => {
                    let Some(frame) = frame else { return };
                    let line = match frame.encode() {
                        Ok(line) => line,
                        Err(err) => {
                            warn!("cannot encode frame: {}", err);
                            continue;
                        }
                    };
                    // a lost frame is never acked, so the sender retries it
                    if let Err(err) = writer.write_all(line.as_bytes()).await {
                        warn!("write to ground failed: {}", err);
                        break;
                    }
                }
            }
        }
        info!("ground station {} disconnected", peer);
    }
}

impl RadioDriver for TcpRadio {
    fn send(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        self.queue(LinkFrame::Data {
            payload: packet.to_vec(),
            want_ack: false,
        })
    }

    fn send_with_ack(&mut self, packet: &[u8], timeout_ms: u64) -> Result<bool, RadioError> {
        // acks that arrived after an earlier timeout belong to nobody
        while self.acks.try_recv().is_ok() {}
        self.queue(LinkFrame::Data {
            payload: packet.to_vec(),
            want_ack: true,
        })?;
        match self.acks.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(RadioError::Link("link thread gone".into())),
        }
    }

    fn rx_waiting(&mut self) -> bool {
        if self.pending.is_none() {
            match self.inbound.try_recv() {
                Ok(bytes) => self.pending = Some(bytes),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }
        }
        self.pending.is_some()
    }

    fn try_receive(&mut self) -> Result<Option<Packet>, RadioError> {
        let bytes = match self.pending.take() {
            Some(bytes) => bytes,
            None => match self.inbound.try_recv() {
                Ok(bytes) => bytes,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(RadioError::Link("link thread gone".into()))
                }
            },
        };
        Packet::from_slice(&bytes).map(Some).map_err(|()| RadioError::MessageTooLarge {
            len: bytes.len(),
            capacity: MAX_PACKET_LEN,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lines_decode_back() {
        let frame = LinkFrame::Data {
            payload: vec![0x07, 0x70, 0xba],
            want_ack: true,
        };
        let line = frame.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(LinkFrame::decode(&line).unwrap(), frame);
        assert_eq!(LinkFrame::decode(r#"{"type":"ack"}"#).unwrap(), LinkFrame::Ack);
    }
}
