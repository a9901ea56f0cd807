#![no_std]
extern crate alloc;

pub mod timestamp;
pub use timestamp::{Timestamp, TimestampProvider};

pub mod hash;
pub use hash::string_hash32;

pub mod flags;
pub use flags::CaptureFlags;

pub mod packets;
pub mod headers;
pub mod descriptors;
pub mod config;
pub mod consts;
