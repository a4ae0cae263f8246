use crate::config::ConfigError;
use crate::link::LinkError;
use std::error::Error;
use std::fmt;
use std::io;

/// Everything that can go wrong before the receive loop starts.
#[derive(Debug)]
pub enum SetupError {
    Config(ConfigError),
    Logger(String),
    Link(LinkError),
    Socket { iface: String, err: io::Error },
    SignalHandler(String),
    Worker(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Config(err) => write!(f, "invalid configuration: {}", err),
            SetupError::Logger(msg) => write!(f, "could not install logger: {}", msg),
            SetupError::Link(err) => write!(f, "link setup failed: {}", err),
            SetupError::Socket { iface, err } => {
                write!(f, "could not open raw socket on {}: {}", iface, err)
            }
            SetupError::SignalHandler(msg) => {
                write!(f, "could not install signal handler: {}", msg)
            }
            SetupError::Worker(err) => write!(f, "could not start receive thread: {}", err),
        }
    }
}

impl Error for SetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SetupError::Config(err) => Some(err),
            SetupError::Link(err) => Some(err),
            SetupError::Socket { err, .. } => Some(err),
            SetupError::Worker(err) => Some(err),
            SetupError::Logger(_) | SetupError::SignalHandler(_) => None,
        }
    }
}

impl From<ConfigError> for SetupError {
    fn from(err: ConfigError) -> Self {
        SetupError::Config(err)
    }
}

impl From<LinkError> for SetupError {
    fn from(err: LinkError) -> Self {
        SetupError::Link(err)
    }
}
