use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::types::LinkProtocol;
use crate::{Error, Result};

pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Byte stream to a console.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Opens a fresh stream to the console each time it is called.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>>;

    /// Human readable link, used in error messages.
    fn describe(&self) -> String;
}

/// A station link in `tcp:<host>:<port>` or `serial:<port>:<baud>:8N1` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Tcp { host: String, port: u16 },
    Serial { path: String, baud: u32 },
}

impl Link {
    /// Link for a configured protocol and address, as entered by the user.
    pub fn from_protocol(protocol: LinkProtocol, link: &str) -> Result<Self> {
        match protocol {
            LinkProtocol::Network => format!("tcp:{link}").parse(),
            LinkProtocol::Serial => format!("serial:{link}:{DEFAULT_BAUD_RATE}:8N1").parse(),
        }
    }
}

impl FromStr for Link {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidLink(s.to_string());
        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        match scheme {
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                let port = port.parse().map_err(|_| invalid())?;
                if host.is_empty() {
                    return Err(invalid());
                }
                Ok(Link::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "serial" => {
                let mut parts = rest.rsplitn(3, ':');
                let framing = parts.next().ok_or_else(invalid)?;
                let baud = parts.next().ok_or_else(invalid)?;
                let path = parts.next().ok_or_else(invalid)?;
                if framing != "8N1" || path.is_empty() {
                    return Err(invalid());
                }
                Ok(Link::Serial {
                    path: path.to_string(),
                    baud: baud.parse().map_err(|_| invalid())?,
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Link::Serial { path, baud } => write!(f, "serial:{path}:{baud}:8N1"),
        }
    }
}

/// Opens TCP or serial links.
#[derive(Debug, Clone)]
pub struct LinkConnector {
    link: Link,
    timeout: Duration,
}

impl LinkConnector {
    pub fn new(link: Link, timeout: Duration) -> Self {
        Self { link, timeout }
    }
}

#[async_trait]
impl Connector for LinkConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        debug!(link = %self.link, "opening link");
        match &self.link {
            Link::Tcp { host, port } => {
                let stream = tokio::time::timeout(
                    self.timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| Error::Timeout)??;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            Link::Serial { path, baud } => {
                let port = tokio_serial::new(path, *baud)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .stop_bits(tokio_serial::StopBits::One)
                    .parity(tokio_serial::Parity::None)
                    .timeout(self.timeout)
                    .open_native_async()?;
                Ok(Box::new(port))
            }
        }
    }

    fn describe(&self) -> String {
        self.link.to_string()
    }
}
