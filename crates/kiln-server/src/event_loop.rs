//! The poll loop.
//!
//! One thread, one `mio::Poll`, no async runtime: readiness on the UDP
//! socket and the host console pipe, with the timer queue's nearest
//! deadline as the poll timeout. This follows the project's design of
//! explicit control flow - every piece of shared state is owned here and
//! touched only between poll calls.

use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use kiln_session::SessionManager;
use kiln_session::commands::NoPeers;
use kiln_session::user::MemoryUserStore;
use kiln_sol::SolManager;
use kiln_types::{ChannelInstance, Privilege};

use crate::command_table::{CommandDispatcher, CommandTable, NullDispatcher, ReplyQueue};
use crate::config::DaemonConfig;
use crate::console::ConsolePipe;
use crate::dispatch::{self, ServerEffects, Services};
use crate::timers::{TimerKey, TimerQueue};
use crate::{ServerError, ServerResult};

const UDP_TOKEN: Token = Token(0);
const CONSOLE_TOKEN: Token = Token(1);

/// How often the session reaper sweeps independent of traffic.
const REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Datagrams cannot exceed this (UDP payload ceiling).
const MAX_DATAGRAM: usize = 65_536;

/// The daemon: sockets, timers, and the services aggregate.
pub struct Server {
    poll: Poll,
    socket: mio::net::UdpSocket,
    console: ConsolePipe,
    timers: TimerQueue,
    services: Services,
    table: CommandTable,
    dispatcher: Box<dyn CommandDispatcher>,
    replies: ReplyQueue,
}

/// Split-borrowed I/O view handed to the dispatch layer.
struct IoEffects<'a> {
    socket: &'a mio::net::UdpSocket,
    console: &'a mut ConsolePipe,
    timers: &'a mut TimerQueue,
}

impl ServerEffects for IoEffects<'_> {
    fn send_packet(&mut self, addr: SocketAddr, packet: &[u8]) {
        if let Err(err) = self.socket.send_to(packet, addr) {
            tracing::warn!(%addr, error = %err, "sending packet failed");
        }
    }

    fn write_console(&mut self, data: &[u8]) -> io::Result<()> {
        self.console.write(data)
    }

    fn arm_timer(&mut self, key: TimerKey, after: Duration) {
        self.timers.arm(key, after);
    }

    fn cancel_timer(&mut self, key: TimerKey) {
        self.timers.cancel(&key);
    }
}

impl Server {
    /// Brings the daemon up from configuration: binds (or inherits) the
    /// UDP socket, connects the console pipe, and builds the services.
    pub fn new(config: &DaemonConfig) -> ServerResult<Self> {
        let mut users = MemoryUserStore::new();
        for user in &config.users {
            let privilege =
                Privilege::from_nibble(user.privilege).unwrap_or(Privilege::Admin);
            users.add_user(user.name.as_bytes(), user.password.as_bytes(), privilege);
        }

        let services = Services {
            sessions: SessionManager::new(ChannelInstance::new(config.network.instance))
                .with_max_sessions(config.network.max_sessions),
            sol: SolManager::new(config.sol.to_params(config.network.channel)),
            users: Box::new(users),
            peers: Box::new(NoPeers),
            guid: config.guid_bytes()?,
            channel: config.network.channel,
        };

        Self::with_services(config, services, Box::new(NullDispatcher))
    }

    /// Brings the daemon up with caller-provided services and dispatcher
    /// (real user database, peer daemons, outer IPMI pipeline).
    pub fn with_services(
        config: &DaemonConfig,
        services: Services,
        dispatcher: Box<dyn CommandDispatcher>,
    ) -> ServerResult<Self> {
        let std_socket = match inherited_socket() {
            Some(socket) => {
                tracing::info!("using inherited socket");
                socket
            }
            None => std::net::UdpSocket::bind(&config.network.bind_address).map_err(|source| {
                ServerError::BindFailed {
                    addr: config.network.bind_address.clone(),
                    source,
                }
            })?,
        };
        std_socket.set_nonblocking(true)?;
        let mut socket = mio::net::UdpSocket::from_std(std_socket);

        let console = ConsolePipe::connect(&config.console.endpoint);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, UDP_TOKEN, Interest::READABLE)?;
        if let Some(stream) = console.stream() {
            poll.registry().register(
                &mut SourceFd(&stream.as_raw_fd()),
                CONSOLE_TOKEN,
                Interest::READABLE,
            )?;
        }

        let mut timers = TimerQueue::new();
        timers.arm(TimerKey::SessionReaper, REAPER_INTERVAL);

        tracing::info!(addr = %socket.local_addr()?, "kilnd listening");

        Ok(Self {
            poll,
            socket,
            console,
            timers,
            services,
            table: CommandTable::with_builtin_commands(),
            dispatcher,
            replies: ReplyQueue::default(),
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs the loop until the process is terminated.
    pub fn run(&mut self) -> ServerResult<()> {
        loop {
            self.tick()?;
        }
    }

    /// One poll iteration: wait for readiness or the nearest deadline,
    /// then drain I/O, fire timers, and flush deferred replies.
    pub fn tick(&mut self) -> ServerResult<()> {
        let timeout = self.timers.next_timeout(Instant::now());
        let mut events = Events::with_capacity(64);
        match self.poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        for event in events.iter() {
            match event.token() {
                UDP_TOKEN => self.drain_socket(),
                CONSOLE_TOKEN => self.drain_console(),
                _ => {}
            }
        }

        self.fire_timers();
        self.flush_replies();
        Ok(())
    }

    fn drain_socket(&mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "socket receive failed");
                    break;
                }
            };

            let Self {
                socket,
                console,
                timers,
                services,
                table,
                dispatcher,
                replies,
                ..
            } = self;
            let mut effects = IoEffects {
                socket,
                console,
                timers,
            };
            dispatch::handle_datagram(
                services,
                table,
                dispatcher.as_mut(),
                replies,
                &mut effects,
                &buf[..len],
                peer,
            );
        }
    }

    fn drain_console(&mut self) {
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match self.console.try_read(&mut chunk) {
                Ok(Some(0)) => break,
                Ok(Some(n)) => data.extend_from_slice(&chunk[..n]),
                Ok(None) | Err(_) => break,
            }
        }
        if data.is_empty() {
            return;
        }

        let Self {
            socket,
            console,
            timers,
            services,
            ..
        } = self;
        let mut effects = IoEffects {
            socket,
            console,
            timers,
        };
        dispatch::console_input(services, &mut effects, &data);
    }

    fn fire_timers(&mut self) {
        let expired = self.timers.pop_expired(Instant::now());
        for key in expired {
            if key == TimerKey::SessionReaper {
                self.timers.arm(TimerKey::SessionReaper, REAPER_INTERVAL);
            }
            let Self {
                socket,
                console,
                timers,
                services,
                ..
            } = self;
            let mut effects = IoEffects {
                socket,
                console,
                timers,
            };
            dispatch::handle_timer(services, &mut effects, key);
        }
    }

    fn flush_replies(&mut self) {
        let Self {
            socket,
            console,
            timers,
            services,
            replies,
            ..
        } = self;
        let mut effects = IoEffects {
            socket,
            console,
            timers,
        };
        dispatch::flush_replies(services, &mut effects, replies);
    }
}

/// Picks up the socket a service manager may have passed down
/// (`LISTEN_FDS` convention: the first passed descriptor is fd 3).
#[allow(unsafe_code)]
fn inherited_socket() -> Option<std::net::UdpSocket> {
    use std::os::fd::FromRawFd;

    let listen_pid: u32 = std::env::var("LISTEN_PID").ok()?.parse().ok()?;
    let listen_fds: i32 = std::env::var("LISTEN_FDS").ok()?.parse().ok()?;
    if listen_pid != std::process::id() || listen_fds < 1 {
        return None;
    }
    // SAFETY: the service manager hands us ownership of fd 3 and nothing
    // else in this process uses it.
    Some(unsafe { std::net::UdpSocket::from_raw_fd(3) })
}
