//! Communication channels for ptymux
//!
//! One `Channel` trait with terminal, process, socket and serial
//! implementations, plus the tmux-backed multiplexer manager.

pub mod ansi;
pub mod channel;
pub mod error;
pub mod process;
pub mod pump;
mod signal;
pub mod serial;
pub mod socket;
pub mod telnet;
pub mod terminal;
pub mod tmux;

pub use channel::{decode_bytes, ensure_line_terminated, Channel, EnvOverlay};
pub use error::{ChannelError, ChannelResult};
pub use process::{ProcessChannel, ProcessSpawn};
pub use pump::OutputPump;
pub use serial::{SerialChannel, SerialSettings};
pub use socket::SocketChannel;
pub use terminal::{TerminalChannel, TerminalSpawn};
pub use tmux::{AttachInfo, MultiplexedSession, MultiplexerManager, TrackedSession};
