use crate::dispatch::{Action, Dispatcher};
use crossbeam::crossbeam_channel::{self, Receiver, Sender, TryRecvError};
use std::io;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Largest frame read from the socket; longer frames are truncated by the kernel.
pub const MAX_FRAME_LEN: usize = 4096;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// What the receive loop needs from a link-layer socket.
pub trait FrameIo {
    /// Waits up to `timeout` for a frame. `Ok(false)` means the timeout expired.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Reads one frame into `buf`. `Ok(None)` is a frame that must be ignored, such as our own
    /// transmissions looped back by the kernel.
    fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize>;
}

impl FrameIo for afpacket::BoundSocket {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        self.poll_readable(timeout)
    }

    fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let (len, addr) = self.recv(buf)?;
        if addr.is_outgoing() {
            return Ok(None);
        }
        Ok(Some(len))
    }

    fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.send(frame)
    }
}

/// An error meaning the descriptor itself is gone, as opposed to one failed call.
pub fn is_socket_closed(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => code == libc::EBADF || code == libc::EINVAL,
        None => false,
    }
}

/// Requests shutdown of the receive loop. Can be cloned and moved to any thread.
#[derive(Clone, Debug)]
pub struct Canceller {
    tx: Sender<()>,
}

impl Canceller {
    pub fn cancel(&self) {
        // Full: a cancellation is already pending. Disconnected: the loop is gone.
        let _ = self.tx.try_send(());
    }
}

/// Checked by the receive loop between iterations. Once cancelled it stays cancelled.
///
/// Dropping every `Canceller` also cancels.
#[derive(Debug)]
pub struct CancellationToken {
    rx: Receiver<()>,
    cancelled: bool,
}

impl CancellationToken {
    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancelled {
            match self.rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.cancelled = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.cancelled
    }
}

pub fn cancellation() -> (Canceller, CancellationToken) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        Canceller { tx },
        CancellationToken {
            rx,
            cancelled: false,
        },
    )
}

/// Why the receive loop returned.
#[derive(Debug)]
pub enum LoopExit {
    Cancelled,
    SocketClosed(io::Error),
}

/// Frame counters kept by the receive loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub received: u64,
    pub replied: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub send_errors: u64,
}

pub struct ReceiveLoop<'d> {
    dispatcher: &'d Dispatcher,
    poll_timeout: Duration,
    stats: LoopStats,
}

impl<'d> ReceiveLoop<'d> {
    pub fn new(dispatcher: &'d Dispatcher, poll_timeout: Duration) -> Self {
        ReceiveLoop {
            dispatcher,
            poll_timeout,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Receives, inspects and answers frames until `token` is cancelled or the socket is
    /// closed. Cancellation is checked once per iteration, so it takes effect within one poll
    /// timeout.
    pub fn run<F: FrameIo>(&mut self, io: &mut F, token: &mut CancellationToken) -> LoopExit {
        let mut buf = vec![0; MAX_FRAME_LEN];
        loop {
            if token.is_cancelled() {
                info!(
                    received = self.stats.received,
                    replied = self.stats.replied,
                    "receive loop cancelled"
                );
                return LoopExit::Cancelled;
            }

            match io.wait_readable(self.poll_timeout) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) if is_socket_closed(&err) => {
                    error!(%err, "socket closed while waiting for frames");
                    return LoopExit::SocketClosed(err);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "waiting for frames failed");
                    continue;
                }
            }

            let len = match io.recv_frame(&mut buf) {
                Ok(Some(len)) => len,
                Ok(None) => continue,
                Err(err) if is_socket_closed(&err) => {
                    error!(%err, "socket closed while receiving");
                    return LoopExit::SocketClosed(err);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    warn!(%err, "receive failed");
                    continue;
                }
            };

            self.handle_frame(io, &buf[..len]);
        }
    }

    fn handle_frame<F: FrameIo>(&mut self, io: &mut F, frame: &[u8]) {
        self.stats.received += 1;
        trace!(len = frame.len(), "frame received");

        match self.dispatcher.process(frame) {
            Err(err) => {
                self.stats.malformed += 1;
                warn!(%err, "dropping frame");
            }
            Ok(Action::NoAction(reason)) if reason.is_malformed() => {
                self.stats.malformed += 1;
                warn!(%reason, "dropping frame");
            }
            Ok(Action::NoAction(reason)) => {
                self.stats.ignored += 1;
                debug!(%reason, "no action");
            }
            Ok(Action::Transmit(reply)) => match io.send_frame(&reply) {
                Ok(sent) => {
                    self.stats.replied += 1;
                    info!(len = sent, "reply sent");
                }
                Err(err) => {
                    self.stats.send_errors += 1;
                    warn!(%err, "sending reply failed");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Addressing;
    use framespector_packets::MacAddr;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::thread;

    enum Step {
        Idle,
        Frame(Vec<u8>),
        Looped,
        WaitError(io::Error),
        RecvError(io::Error),
    }

    /// Plays back `steps`, then cancels the loop.
    struct ScriptedIo {
        steps: VecDeque<Step>,
        sent: Vec<Vec<u8>>,
        fail_sends: bool,
        canceller: Canceller,
        waits: usize,
    }

    impl ScriptedIo {
        fn new(steps: Vec<Step>, canceller: Canceller) -> Self {
            ScriptedIo {
                steps: steps.into(),
                sent: Vec::new(),
                fail_sends: false,
                canceller,
                waits: 0,
            }
        }
    }

    impl FrameIo for ScriptedIo {
        fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
            self.waits += 1;
            match self.steps.front() {
                None => {
                    self.canceller.cancel();
                    Ok(false)
                }
                Some(Step::Idle) => {
                    self.steps.pop_front();
                    Ok(false)
                }
                Some(Step::WaitError(_)) => match self.steps.pop_front() {
                    Some(Step::WaitError(err)) => Err(err),
                    _ => unreachable!(),
                },
                Some(_) => Ok(true),
            }
        }

        fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => {
                    let len = frame.len().min(buf.len());
                    buf[..len].copy_from_slice(&frame[..len]);
                    Ok(Some(len))
                }
                Some(Step::Looped) => Ok(None),
                Some(Step::RecvError(err)) => Err(err),
                _ => panic!("recv without a readable frame"),
            }
        }

        fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
            if self.fail_sends {
                return Err(io::Error::from_raw_os_error(libc::ENOBUFS));
            }
            self.sent.push(frame.to_vec());
            Ok(frame.len())
        }
    }

    const THEIR_MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&Addressing {
            hardware_addr: MacAddr::new([0x02, 0, 0, 0, 0, 1]),
            protocol_addr: Ipv4Addr::new(10, 0, 0, 1),
            remote_protocol_addr: Ipv4Addr::new(10, 0, 0, 5),
        })
    }

    fn arp_request() -> Vec<u8> {
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&THEIR_MAC);
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
        frame.extend_from_slice(&THEIR_MAC);
        frame.extend_from_slice(&[10, 0, 0, 5]);
        frame.extend_from_slice(&[0; 6]);
        frame.extend_from_slice(&[10, 0, 0, 1]);
        frame
    }

    fn run(io: &mut ScriptedIo, token: &mut CancellationToken) -> (LoopExit, LoopStats) {
        let dispatcher = dispatcher();
        let mut receive_loop = ReceiveLoop::new(&dispatcher, Duration::from_millis(1));
        let exit = receive_loop.run(io, token);
        (exit, receive_loop.stats())
    }

    #[test]
    fn answers_then_stops_on_cancel() {
        let (canceller, mut token) = cancellation();
        let mut io = ScriptedIo::new(
            vec![Step::Idle, Step::Frame(arp_request()), Step::Idle],
            canceller,
        );

        let (exit, stats) = run(&mut io, &mut token);
        assert!(matches!(exit, LoopExit::Cancelled));
        assert_eq!(io.sent.len(), 1);
        assert_eq!(&io.sent[0][..6], &THEIR_MAC);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.replied, 1);
    }

    #[test]
    fn cancelled_before_start() {
        let (canceller, mut token) = cancellation();
        canceller.cancel();
        let mut io = ScriptedIo::new(vec![Step::Frame(arp_request())], canceller);

        let (exit, _) = run(&mut io, &mut token);
        assert!(matches!(exit, LoopExit::Cancelled));
        assert_eq!(io.waits, 0);
        assert!(io.sent.is_empty());
    }

    #[test]
    fn bad_frames_do_not_stop_the_loop() {
        let (canceller, mut token) = cancellation();
        let mut truncated_arp = arp_request();
        truncated_arp.truncate(34);
        let mut io = ScriptedIo::new(
            vec![
                Step::Frame(vec![0; 13]),
                Step::Frame(truncated_arp),
                Step::RecvError(io::Error::from_raw_os_error(libc::ENETDOWN)),
                Step::WaitError(io::Error::from_raw_os_error(libc::EINTR)),
                Step::Looped,
                Step::Frame(arp_request()),
            ],
            canceller,
        );

        let (exit, stats) = run(&mut io, &mut token);
        assert!(matches!(exit, LoopExit::Cancelled));
        assert_eq!(io.sent.len(), 1);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.replied, 1);
    }

    #[test]
    fn ignored_frames_are_counted() {
        let (canceller, mut token) = cancellation();
        let mut other_target = arp_request();
        let len = other_target.len();
        other_target[len - 1] = 9;
        let mut io = ScriptedIo::new(vec![Step::Frame(other_target)], canceller);

        let (_, stats) = run(&mut io, &mut token);
        assert!(io.sent.is_empty());
        assert_eq!(stats.ignored, 1);
    }

    #[test]
    fn send_failure_is_not_fatal() {
        let (canceller, mut token) = cancellation();
        let mut io = ScriptedIo::new(
            vec![Step::Frame(arp_request()), Step::Frame(arp_request())],
            canceller,
        );
        io.fail_sends = true;

        let (exit, stats) = run(&mut io, &mut token);
        assert!(matches!(exit, LoopExit::Cancelled));
        assert_eq!(stats.send_errors, 2);
        assert_eq!(stats.replied, 0);
    }

    #[test]
    fn closed_socket_ends_the_loop() {
        let (canceller, mut token) = cancellation();
        let mut io = ScriptedIo::new(
            vec![
                Step::WaitError(io::Error::from_raw_os_error(libc::EBADF)),
                Step::Frame(arp_request()),
            ],
            canceller,
        );
        match run(&mut io, &mut token).0 {
            LoopExit::SocketClosed(err) => assert_eq!(err.raw_os_error(), Some(libc::EBADF)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(io.sent.is_empty());

        let (canceller, mut token) = cancellation();
        let mut io = ScriptedIo::new(
            vec![Step::RecvError(io::Error::from_raw_os_error(libc::EINVAL))],
            canceller,
        );
        assert!(matches!(
            run(&mut io, &mut token).0,
            LoopExit::SocketClosed(_)
        ));
    }

    #[test]
    fn closed_socket_errors() {
        assert!(is_socket_closed(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(is_socket_closed(&io::Error::from_raw_os_error(libc::EINVAL)));
        assert!(!is_socket_closed(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_socket_closed(&io::Error::new(io::ErrorKind::Other, "boom")));
    }

    #[test]
    fn token_is_sticky() {
        let (canceller, mut token) = cancellation();
        assert!(!token.is_cancelled());
        canceller.cancel();
        canceller.cancel();
        assert!(token.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn dropping_canceller_cancels() {
        let (canceller, mut token) = cancellation();
        let clone = canceller.clone();
        drop(canceller);
        assert!(!token.is_cancelled());
        drop(clone);
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_from_another_thread() {
        let (canceller, mut token) = cancellation();
        thread::spawn(move || canceller.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
