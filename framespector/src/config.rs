use cidr::{Inet, Ipv4Inet};
use clap::{App, Arg, ArgMatches};
use framespector_packets::MacAddr;
use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::Level;

/// Linux limits interface names to IFNAMSIZ - 1 bytes.
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

const PEER_SUFFIX: &str = "-peer";

const DEFAULT_VETH: &str = "veth0";
const DEFAULT_HOST: &str = "192.168.35.1/24";
const DEFAULT_PEER: &str = "192.168.35.2/24";
const DEFAULT_POLL_TIMEOUT_MS: &str = "100";

#[derive(Debug)]
pub enum ConfigError {
    /// Bad command line, or `--help`/`--version` was requested.
    Usage(clap::Error),
    InvalidAddress { flag: &'static str, value: String, msg: String },
    InterfaceName { name: String },
    PollTimeout { value: String },
    SameAddress(Ipv4Addr),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Usage(err) => write!(f, "{}", err),
            ConfigError::InvalidAddress { flag, value, msg } => {
                write!(f, "--{}: {:?} is not an IPv4 address with prefix: {}", flag, value, msg)
            }
            ConfigError::InterfaceName { name } => write!(
                f,
                "interface name {:?} too long, {} with the {:?} suffix must fit in {} bytes",
                name, name, PEER_SUFFIX, MAX_INTERFACE_NAME_LEN
            ),
            ConfigError::PollTimeout { value } => {
                write!(f, "--poll-timeout: {:?} is not a positive number of milliseconds", value)
            }
            ConfigError::SameAddress(addr) => {
                write!(f, "host and peer both use {}, they must differ", addr)
            }
        }
    }
}

impl Error for ConfigError {}

/// Startup settings, read once from the command line.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base name of the veth pair; the host end carries this name.
    pub veth: String,
    pub host: Ipv4Inet,
    pub peer: Ipv4Inet,
    pub poll_timeout: Duration,
    pub verbosity: u64,
}

/// The addresses the dispatcher answers with and for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Addressing {
    pub hardware_addr: MacAddr,
    pub protocol_addr: Ipv4Addr,
    pub remote_protocol_addr: Ipv4Addr,
}

fn app() -> App<'static, 'static> {
    App::new("framespector")
        .version("0.1")
        .author("Framespector Contributors")
        .about("Inspect raw Ethernet frames on a veth pair and answer ARP and ICMP echo")
        .arg(
            Arg::with_name("veth")
                .long("veth")
                .value_name("NAME")
                .help("Base name of the veth pair, the peer end is <NAME>-peer")
                .takes_value(true)
                .default_value(DEFAULT_VETH),
        )
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("IP/PREFIX")
                .help("Address assigned to the host end")
                .takes_value(true)
                .default_value(DEFAULT_HOST),
        )
        .arg(
            Arg::with_name("peer")
                .long("peer")
                .value_name("IP/PREFIX")
                .help("Address answered for on the peer end")
                .takes_value(true)
                .default_value(DEFAULT_PEER),
        )
        .arg(
            Arg::with_name("poll-timeout")
                .long("poll-timeout")
                .value_name("MS")
                .help("Readiness wait per loop iteration, bounds shutdown latency")
                .takes_value(true)
                .default_value(DEFAULT_POLL_TIMEOUT_MS),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Log more, -vv logs every frame"),
        )
}

impl Config {
    /// Parses `args`, program name first.
    pub fn from_args<I, T>(args: I) -> Result<Config, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = app().get_matches_from_safe(args).map_err(ConfigError::Usage)?;
        Config::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Config, ConfigError> {
        let veth = matches.value_of("veth").unwrap_or(DEFAULT_VETH).to_string();
        if veth.is_empty() || veth.len() + PEER_SUFFIX.len() > MAX_INTERFACE_NAME_LEN {
            return Err(ConfigError::InterfaceName { name: veth });
        }

        let host = parse_inet(matches, "host", DEFAULT_HOST)?;
        let peer = parse_inet(matches, "peer", DEFAULT_PEER)?;
        if host.address() == peer.address() {
            return Err(ConfigError::SameAddress(host.address()));
        }

        let raw_timeout = matches
            .value_of("poll-timeout")
            .unwrap_or(DEFAULT_POLL_TIMEOUT_MS);
        let poll_timeout = match raw_timeout.parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                return Err(ConfigError::PollTimeout {
                    value: raw_timeout.to_string(),
                })
            }
        };

        Ok(Config {
            veth,
            host,
            peer,
            poll_timeout,
            verbosity: matches.occurrences_of("verbose"),
        })
    }

    /// Name of the end the raw socket listens on.
    pub fn peer_interface(&self) -> String {
        format!("{}{}", self.veth, PEER_SUFFIX)
    }

    pub fn max_level(&self) -> Level {
        match self.verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Combines the configured addresses with the hardware address of the bound interface.
    pub fn addressing(&self, hardware_addr: MacAddr) -> Addressing {
        Addressing {
            hardware_addr,
            protocol_addr: self.peer.address(),
            remote_protocol_addr: self.host.address(),
        }
    }
}

fn parse_inet(
    matches: &ArgMatches,
    flag: &'static str,
    default: &str,
) -> Result<Ipv4Inet, ConfigError> {
    let value = matches.value_of(flag).unwrap_or(default);
    value
        .parse::<Ipv4Inet>()
        .map_err(|err| ConfigError::InvalidAddress {
            flag,
            value: value.to_string(),
            msg: err.to_string(),
        })
}
