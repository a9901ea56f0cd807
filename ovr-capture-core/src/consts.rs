//! Protocol constants shared by the capture target and the remote tool.

include!(concat!(env!("OUT_DIR"), "/consts.rs"));

/// Sanity/version marker at the start of every zero-config broadcast.
pub const ZERO_CONFIG_MAGIC: u64 = 0x4F56_5243_4150_0001;

/// Well-known UDP port the zero-config host broadcasts on.
pub const ZERO_CONFIG_PORT: u16 = 3029;

/// First TCP port probed by the capture server.
pub const SOCKET_PORT_BEGIN: u16 = 3030;
/// One past the last TCP port probed by the capture server.
pub const SOCKET_PORT_END: u16 = 3040;

/// Fixed size of the package name buffer in `ZeroConfigPacket`, including the NUL terminator.
pub const PACKAGE_NAME_LEN: usize = 64;

/// Per-thread stream buffer size. Must exceed the largest single packet
/// (a low-res framebuffer capture is ~32 KiB) with room for bursts between flushes.
pub const STREAM_BUFFER_SIZE: usize = 1024 * 1024;
