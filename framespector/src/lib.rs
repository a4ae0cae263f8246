//! Inspects raw Ethernet frames on one end of a veth pair and answers the ones a real host
//! would: ARP requests for our address and ICMP echo requests.
//!
//! [`Dispatcher`](dispatch::Dispatcher) turns one frame into an [`Action`](dispatch::Action);
//! [`ReceiveLoop`](receiver::ReceiveLoop) drives it over any [`FrameIo`](receiver::FrameIo).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod logging;
pub mod receiver;
pub mod responder;

pub use config::{Addressing, Config};
pub use dispatch::{Action, Dispatcher, Reason};
pub use receiver::{cancellation, FrameIo, LoopExit, ReceiveLoop};
