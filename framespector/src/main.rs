use framespector::config::{Config, ConfigError};
use framespector::error::SetupError;
use framespector::link::VethPair;
use framespector::logging::StderrSubscriber;
use framespector::receiver::{self, LoopExit, ReceiveLoop};
use framespector::Dispatcher;
use framespector_packets::MacAddr;
use std::ffi::CString;
use std::io;
use std::process;
use std::thread;
use tracing::{error, info, span, Level};

fn main() {
    let config = match Config::from_args(std::env::args_os()) {
        Ok(config) => config,
        // prints usage, help or version and exits with the matching status
        Err(ConfigError::Usage(err)) => err.exit(),
        Err(err) => {
            eprintln!("framespector: {}", SetupError::from(err));
            process::exit(1);
        }
    };

    if let Err(err) = StderrSubscriber::install(config.max_level()) {
        eprintln!("framespector: {}", SetupError::Logger(err.to_string()));
        process::exit(1);
    }

    match run(&config) {
        Ok(LoopExit::Cancelled) => info!("The frames have been inspected"),
        Ok(LoopExit::SocketClosed(_)) => process::exit(1),
        Err(err) => {
            error!(%err, "startup failed");
            process::exit(1);
        }
    }
}

/// Creates the link, serves it until cancelled, then removes it again.
fn run(config: &Config) -> Result<LoopExit, SetupError> {
    let link = VethPair::create(&config.veth, &config.peer_interface(), &config.host)?;
    let result = serve(config, link.peer_name());
    link.destroy();
    result
}

fn open_socket(iface: &str) -> Result<afpacket::BoundSocket, SetupError> {
    let socket_error = |err: io::Error| SetupError::Socket {
        iface: iface.to_string(),
        err,
    };
    let name = CString::new(iface)
        .map_err(|err| socket_error(io::Error::new(io::ErrorKind::InvalidInput, err)))?;
    afpacket::Socket::new()
        .and_then(|socket| socket.bind(&name))
        .map_err(socket_error)
}

fn serve(config: &Config, iface: &str) -> Result<LoopExit, SetupError> {
    let socket = open_socket(iface)?;
    let hardware_addr = MacAddr::new(socket.hardware_addr());
    let addressing = config.addressing(hardware_addr);
    info!(
        iface,
        ifindex = socket.ifindex(),
        mac = %hardware_addr,
        addr = %addressing.protocol_addr,
        remote = %addressing.remote_protocol_addr,
        "listening"
    );

    let (canceller, mut token) = receiver::cancellation();
    ctrlc::set_handler(move || canceller.cancel())
        .map_err(|err| SetupError::SignalHandler(err.to_string()))?;

    let poll_timeout = config.poll_timeout;
    let span_iface = iface.to_string();
    let worker = thread::Builder::new()
        .name("receive".to_string())
        .spawn(move || {
            // The worker owns the socket and hands it back so it is closed only after the loop
            // has stopped.
            let mut socket = socket;
            let dispatcher = Dispatcher::new(&addressing);
            let span = span!(Level::INFO, "receive_loop", iface = %span_iface);
            let _enter = span.enter();

            let mut receive_loop = ReceiveLoop::new(&dispatcher, poll_timeout);
            let exit = receive_loop.run(&mut socket, &mut token);
            (socket, exit, receive_loop.stats())
        })
        .map_err(SetupError::Worker)?;

    let exit = match worker.join() {
        Ok((socket, exit, stats)) => {
            drop(socket);
            info!(
                received = stats.received,
                replied = stats.replied,
                ignored = stats.ignored,
                malformed = stats.malformed,
                send_errors = stats.send_errors,
                "receive loop stopped"
            );
            exit
        }
        Err(_) => {
            error!("receive thread panicked");
            LoopExit::SocketClosed(io::Error::new(
                io::ErrorKind::Other,
                "receive thread panicked",
            ))
        }
    };
    Ok(exit)
}
