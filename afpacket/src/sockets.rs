#![deny(missing_docs)]

use crate::linux;
use libc;
use std::{
    ffi::CStr,
    io,
    mem::{self, MaybeUninit},
    ptr,
    time::Duration,
};

/// Represents the link-level address a frame was received from.
pub struct Addr {
    inner: libc::sockaddr_storage,
    _len: libc::socklen_t,
}

impl Addr {
    fn sockaddr_ll(&self) -> libc::sockaddr_ll {
        // sockaddr_storage is large enough and suitably aligned for every address family, and
        // AF_PACKET sockets always report a sockaddr_ll.
        unsafe { ptr::read(&self.inner as *const _ as *const libc::sockaddr_ll) }
    }

    /// Returns true if the frame was transmitted by this host rather than received.
    pub fn is_outgoing(&self) -> bool {
        self.sockaddr_ll().sll_pkttype == linux::PACKET_OUTGOING
    }
}

/// Represents an unbound `AF_PACKET` socket.  At this phase of a socket's lifecycle, it can be
/// configured.
pub struct Socket {
    fd: libc::c_int,
}

/// Represents a bound `AF_PACKET` socket. At this phase of a socket's lifecycle, it can be read
/// to/written from.
pub struct BoundSocket {
    fd: libc::c_int,
    send_addr: libc::sockaddr_ll,
    hardware_addr: [u8; 6],
}

impl Socket {
    /// Creates a new unbound socket receiving every EtherType.
    pub fn new() -> io::Result<Self> {
        // This block must be marked as unsafe because it uses FFI with C code. We believe the code
        // in this block to be safe because it does not interact with any memory owned by Rust
        // code, nor does it violate the invariant of the Socket type -- namely, that it return an
        // Err if it fails to initialize.
        let fd = unsafe {
            // man 7 packet
            let fd = libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_ALL as u16).to_be() as libc::c_int,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            fd
        };
        Ok(Self { fd })
    }

    /// Binds the socket to a network interface. This function consumes the `Socket` instance, as
    /// no more configuration options may be safely changed.
    pub fn bind(self, iface: impl AsRef<CStr>) -> io::Result<BoundSocket> {
        let name = iface.as_ref().to_bytes_with_nul();
        if name.len() > libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name longer than IFNAMSIZ",
            ));
        }

        // This block is marked as unsafe because it uses FFI, however, we believe it to be safe
        // because 1) it handles FFI failures in accordance with the bound API's conventions, and
        // 2) it copies no more than the nul terminated name out of the &CStr passed in.
        let (send_addr, hardware_addr) = unsafe {
            let mut ifr: linux::ifreq = MaybeUninit::zeroed().assume_init();
            ptr::copy_nonoverlapping(
                name.as_ptr() as *const libc::c_char,
                ifr.ifr_ifrn.ifrn_name.as_mut_ptr(),
                name.len(),
            );

            // ioctl(SIOCGIFHWADDR) fills in the hardware address of the interface
            // man 7 netdevice
            let err = libc::ioctl(self.fd, linux::SIOCGIFHWADDR as _, &mut ifr);
            if err < 0 {
                return Err(io::Error::last_os_error());
            }
            let mut hardware_addr = [0u8; 6];
            for (dst, src) in hardware_addr
                .iter_mut()
                .zip(ifr.ifr_ifru.ifru_hwaddr.sa_data.iter())
            {
                *dst = *src as u8;
            }

            // ioctl(SIOCGIFINDEX) fills in the index field of the ifreq object, overwriting the
            // hardware address in the union
            let err = libc::ioctl(self.fd, linux::SIOCGIFINDEX as _, &mut ifr);
            if err < 0 {
                return Err(io::Error::last_os_error());
            }

            // bind the socket
            // man 7 packet regarding sockaddr_ll
            let mut ll: libc::sockaddr_ll = MaybeUninit::zeroed().assume_init();
            ll.sll_family = libc::AF_PACKET as libc::c_ushort;
            ll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
            ll.sll_ifindex = ifr.ifr_ifru.ifru_ivalue; // expanded from `ifr_ifindex` in kernel headers
            let err = libc::bind(
                self.fd,
                &mut ll as *mut _ as *mut libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if err < 0 {
                return Err(io::Error::last_os_error());
            }
            (ll, hardware_addr)
        };
        let fd = self.fd;
        // This ensures that `self` does not attempt to close the file descriptor, as the file
        // descriptor is transferred to the BoundSocket we're returning.
        mem::forget(self);
        Ok(BoundSocket {
            fd,
            send_addr,
            hardware_addr,
        })
    }
}

impl BoundSocket {
    /// Hardware address of the interface the socket is bound to.
    pub fn hardware_addr(&self) -> [u8; 6] {
        self.hardware_addr
    }

    /// Index of the interface the socket is bound to.
    pub fn ifindex(&self) -> i32 {
        self.send_addr.sll_ifindex
    }

    /// Waits until a frame can be read or `timeout` expires. Returns `Ok(false)` on timeout.
    ///
    /// A descriptor the kernel reports as invalid is returned as an `EBADF` error.
    pub fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::max_value() as u128) as libc::c_int;

        // Safe because `pfd` outlives the call and exactly one entry is passed.
        // man 2 poll
        let ready = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        // POLLERR and POLLHUP are surfaced by the following recv.
        Ok(true)
    }

    /// Sends a frame to the NIC.
    pub fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        // This block is marked as unsafe because it uses FFI. We believe this code to be safe,
        // because it safely borrows the Rust-owned frame and passes the length of the frame to the
        // libc function, so it should not exhibit any C-side undefined behaviour.
        unsafe {
            let bytes = libc::sendto(
                self.fd,
                frame.as_ptr() as *const _,
                frame.len(),
                0,
                &self.send_addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if bytes < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(bytes as usize)
            }
        }
    }

    /// Receives a frame from the NIC. Frames longer than `frame` are truncated.
    pub fn recv(&mut self, frame: &mut [u8]) -> io::Result<(usize, Addr)> {
        // Note comment in `send` call.
        unsafe {
            let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
            let mut addrlen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

            let bytes = libc::recvfrom(
                self.fd,
                frame.as_mut_ptr() as *mut _,
                frame.len(),
                0,
                storage.as_mut_ptr() as *mut _,
                &mut addrlen,
            );
            if bytes < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok((
                    bytes as usize,
                    Addr {
                        inner: storage.assume_init(),
                        _len: addrlen,
                    },
                ))
            }
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
