use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Io(std::io::Error),
    Serial(tokio_serial::Error),
    NotConnected,
    Timeout,
    WakeUp,
    Nak(String),
    Crc(&'static str),
    Parse(String),
    Protocol(String),
    InvalidLink(String),
    InvalidArchivePeriod(u16),
    InvalidRainCollector(String),
    InvalidArgument(String),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Serial(e) => write!(f, "serial error: {e}"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Timeout => write!(f, "timed out waiting for the console"),
            Error::WakeUp => write!(f, "console did not wake up"),
            Error::Nak(cmd) => write!(f, "console rejected {cmd}"),
            Error::Crc(what) => write!(f, "CRC mismatch in {what}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::InvalidLink(link) => write!(f, "invalid link: {link}"),
            Error::InvalidArchivePeriod(p) => write!(f, "invalid archive period: {p}"),
            Error::InvalidRainCollector(rc) => write!(f, "invalid rain collector: {rc}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Serial(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio_serial::Error> for Error {
    fn from(e: tokio_serial::Error) -> Self {
        Error::Serial(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
