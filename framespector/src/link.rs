use cidr::Ipv4Inet;
use std::error::Error;
use std::fmt;
use std::io;
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug)]
pub enum LinkError {
    /// The command ran and exited non-zero; `msg` is its stderr.
    CommandFailed { cmd: String, msg: String },
    /// The command could not be started at all.
    Spawn { cmd: String, err: io::Error },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::CommandFailed { cmd, msg } if msg.is_empty() => {
                write!(f, "command '{}' failed", cmd)
            }
            LinkError::CommandFailed { cmd, msg } => {
                write!(f, "command '{}' failed: {}", cmd, msg.trim_end())
            }
            LinkError::Spawn { cmd, err } => write!(f, "could not run '{}': {}", cmd, err),
        }
    }
}

impl Error for LinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LinkError::CommandFailed { .. } => None,
            LinkError::Spawn { err, .. } => Some(err),
        }
    }
}

/// Runs one `ip` invocation.
pub trait IpCommand {
    fn ip(&mut self, args: &[&str]) -> Result<(), LinkError>;
}

/// Runs `ip` from `PATH`.
#[derive(Debug, Default)]
pub struct SystemIp;

impl IpCommand for SystemIp {
    fn ip(&mut self, args: &[&str]) -> Result<(), LinkError> {
        let cmd = format!("ip {}", args.join(" "));
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|err| LinkError::Spawn {
                cmd: cmd.clone(),
                err,
            })?;

        if !output.status.success() {
            return Err(LinkError::CommandFailed {
                cmd,
                msg: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// A veth pair `<name>` / `<name>-peer`. The host end carries the host address, frames are
/// inspected on the peer end.
#[derive(Debug)]
pub struct VethPair<C: IpCommand = SystemIp> {
    host: String,
    peer: String,
    ip: C,
}

impl VethPair<SystemIp> {
    pub fn create(name: &str, peer: &str, host_addr: &Ipv4Inet) -> Result<Self, LinkError> {
        VethPair::create_with(SystemIp, name, peer, host_addr)
    }
}

impl<C: IpCommand> VethPair<C> {
    /// Creates the pair, brings both ends up and assigns `host_addr` to the host end. If any
    /// step after creation fails the pair is deleted again before the error is returned.
    pub fn create_with(
        ip: C,
        name: &str,
        peer: &str,
        host_addr: &Ipv4Inet,
    ) -> Result<Self, LinkError> {
        let mut pair = VethPair {
            host: name.to_string(),
            peer: peer.to_string(),
            ip,
        };

        // man 4 veth
        pair.ip
            .ip(&["link", "add", name, "type", "veth", "peer", "name", peer])?;

        if let Err(err) = pair.configure(host_addr) {
            pair.destroy();
            return Err(err);
        }

        info!(host = name, peer, addr = %host_addr, "veth pair up");
        Ok(pair)
    }

    fn configure(&mut self, host_addr: &Ipv4Inet) -> Result<(), LinkError> {
        let addr = host_addr.to_string();
        self.ip.ip(&["link", "set", &self.host, "up"])?;
        self.ip.ip(&["link", "set", &self.peer, "up"])?;
        self.ip.ip(&["addr", "add", &addr, "dev", &self.host])
    }

    pub fn host_name(&self) -> &str {
        &self.host
    }

    pub fn peer_name(&self) -> &str {
        &self.peer
    }

    /// Brings the host end down and deletes it, which removes the peer too. Failures are only
    /// logged: a pair that is already gone is not an error at shutdown.
    pub fn destroy(mut self) {
        if let Err(err) = self.ip.ip(&["link", "set", &self.host, "down"]) {
            warn!(%err, "could not set link down");
        }
        if let Err(err) = self.ip.ip(&["link", "del", &self.host]) {
            warn!(%err, "could not delete link");
            return;
        }
        info!(host = %self.host, "veth pair removed");
    }
}
