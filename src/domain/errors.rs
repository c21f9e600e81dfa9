use hyper::StatusCode;
use std::fmt;
use std::io;

#[derive(Debug, Clone)]
pub enum TunnelError {
    Resolution(String),
    InvalidAddress(String),
    ProxyDial(String),
    RequestConstruction(String),
    RequestWrite(String),
    ResponseRead(String),
    ProxyStatus(StatusCode),
    Closed,
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::Resolution(msg) => write!(f, "Unable to resolve destination: {}", msg),
            TunnelError::InvalidAddress(msg) => write!(f, "Invalid destination address: {}", msg),
            TunnelError::ProxyDial(msg) => write!(f, "Unable to dial proxy: {}", msg),
            TunnelError::RequestConstruction(msg) => {
                write!(f, "Unable to construct request to proxy: {}", msg)
            }
            TunnelError::RequestWrite(msg) => write!(f, "Error sending request to proxy: {}", msg),
            TunnelError::ResponseRead(msg) => {
                write!(f, "Error reading response from proxy: {}", msg)
            }
            TunnelError::ProxyStatus(status) => write!(f, "Bad response status from proxy: {}", status),
            TunnelError::Closed => write!(f, "Tunnel connection is closed"),
        }
    }
}

impl std::error::Error for TunnelError {}

impl TunnelError {
    /// Whether the physical proxy connection can no longer be trusted after this error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TunnelError::ProxyDial(_) | TunnelError::RequestWrite(_) | TunnelError::ResponseRead(_)
        )
    }
}

impl From<TunnelError> for io::Error {
    fn from(err: TunnelError) -> Self {
        let kind = match &err {
            TunnelError::Resolution(_) | TunnelError::InvalidAddress(_) => io::ErrorKind::InvalidInput,
            TunnelError::ProxyDial(_) => io::ErrorKind::ConnectionRefused,
            TunnelError::RequestConstruction(_) => io::ErrorKind::InvalidData,
            TunnelError::RequestWrite(_) | TunnelError::ResponseRead(_) => io::ErrorKind::BrokenPipe,
            TunnelError::ProxyStatus(_) => io::ErrorKind::Other,
            TunnelError::Closed => io::ErrorKind::NotConnected,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
