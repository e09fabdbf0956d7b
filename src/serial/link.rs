use std::{
    io,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    sync::watch,
};
use tracing::{debug, info, warn};

use super::SerialInputDecoder;
use crate::city::CityState;

pub type SharedCity = Arc<Mutex<CityState>>;

const READ_CHUNK_BYTES: usize = 256;

/// Where device bytes come from: a tty/FIFO path or a `tcp://host:port` serial bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialSource {
    Tcp(String),
    Device(PathBuf),
}

impl FromStr for SerialSource {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Ok(match value.strip_prefix("tcp://") {
            Some(addr) => SerialSource::Tcp(addr.to_string()),
            None => SerialSource::Device(PathBuf::from(value)),
        })
    }
}

impl SerialSource {
    async fn open(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self {
            SerialSource::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr).await?)),
            SerialSource::Device(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

pub struct SerialLink {
    source: SerialSource,
    decoder: SerialInputDecoder,
    city: SharedCity,
    status: watch::Sender<ConnectionStatus>,
    reconnect_delay: Duration,
}

impl SerialLink {
    pub fn new(
        source: SerialSource,
        decoder: SerialInputDecoder,
        city: SharedCity,
        status: watch::Sender<ConnectionStatus>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            source,
            decoder,
            city,
            status,
            reconnect_delay,
        }
    }

    /// Reads from the source until the task is dropped, reconnecting after each failure.
    pub async fn run(mut self) {
        loop {
            self.set_status(ConnectionStatus::Connecting);
            match self.source.open().await {
                Ok(reader) => {
                    info!(source = ?self.source, "serial device connected");
                    self.set_status(ConnectionStatus::Connected);
                    match self.pump(reader).await {
                        Ok(()) => self.set_status(ConnectionStatus::Disconnected),
                        Err(err) => self.set_status(ConnectionStatus::Failed(err.to_string())),
                    }
                }
                Err(err) => {
                    self.set_status(ConnectionStatus::Failed(err.to_string()));
                }
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Feeds one connection's bytes through a freshly opened decoder until EOF or error.
    pub async fn pump<R>(&mut self, mut reader: R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.decoder.open();
        let mut buf = [0_u8; READ_CHUNK_BYTES];
        let result = loop {
            let read = match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(read) => read,
                Err(err) => break Err(err),
            };
            // The protocol is ASCII; anything else becomes a malformed record.
            let chunk = String::from_utf8_lossy(&buf[..read]).into_owned();
            if !self.feed(&chunk) {
                break Err(io::Error::other("city state lock poisoned"));
            }
        };
        self.decoder.close();
        result
    }

    fn feed(&mut self, chunk: &str) -> bool {
        let Ok(mut city) = self.city.lock() else {
            return false;
        };
        if city.metrics().game_over {
            debug!(bytes = chunk.len(), "game over, ignoring serial input");
            return true;
        }
        self.decoder.feed(chunk, &mut city);
        true
    }

    fn set_status(&self, status: ConnectionStatus) {
        match &status {
            ConnectionStatus::Failed(reason) => warn!(%reason, "serial link failed"),
            other => info!(status = ?other, "serial link status"),
        }
        self.status.send_replace(status);
    }
}
