//! Fixed-layout encode/decode for the timing beacon sent from leader to
//! followers.
//!
//! The six fields are written/read individually in declaration order as
//! native-endian, unpadded bytes rather than transmuting a `#[repr(C)]`
//! struct: that would be vulnerable to padding after the trailing `u32`
//! field and to accidental reordering if the struct gains a derive or a
//! field later. Total wire size is fixed at [`Beacon::WIRE_SIZE`] bytes.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::SyncError;

/// A single timing beacon, sent unreliably over multicast once every sync
/// period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    /// Leader's modelled wall clock for `sequence`, microseconds since epoch.
    pub wall_clock_us: i64,
    /// Leader capture sequence number.
    pub sequence: u64,
    /// Leader sensor/kernel timestamp, nanoseconds.
    pub sensor_timestamp_ns: u64,
    /// Predicted wall clock one sync period ahead.
    pub next_wall_clock_us: i64,
    /// Predicted sequence one sync period ahead.
    pub next_sequence: u64,
    /// Frames remaining until the coordinated "go" moment; saturates at
    /// zero.
    pub ready_frame: u32,
}

impl Beacon {
    /// Five 8-byte fields plus one 4-byte field.
    pub const WIRE_SIZE: usize = 5 * 8 + 4;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_i64::<NativeEndian>(self.wall_clock_us).unwrap();
            cursor.write_u64::<NativeEndian>(self.sequence).unwrap();
            cursor
                .write_u64::<NativeEndian>(self.sensor_timestamp_ns)
                .unwrap();
            cursor
                .write_i64::<NativeEndian>(self.next_wall_clock_us)
                .unwrap();
            cursor.write_u64::<NativeEndian>(self.next_sequence).unwrap();
            cursor.write_u32::<NativeEndian>(self.ready_frame).unwrap();
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SyncError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(SyncError::BeaconDecode(format!(
                "short beacon datagram: got {} bytes, need {}",
                buf.len(),
                Self::WIRE_SIZE
            )));
        }
        let mut cursor = Cursor::new(buf);
        let wall_clock_us = cursor.read_i64::<NativeEndian>().unwrap();
        let sequence = cursor.read_u64::<NativeEndian>().unwrap();
        let sensor_timestamp_ns = cursor.read_u64::<NativeEndian>().unwrap();
        let next_wall_clock_us = cursor.read_i64::<NativeEndian>().unwrap();
        let next_sequence = cursor.read_u64::<NativeEndian>().unwrap();
        let ready_frame = cursor.read_u32::<NativeEndian>().unwrap();
        Ok(Self {
            wall_clock_us,
            sequence,
            sensor_timestamp_ns,
            next_wall_clock_us,
            next_sequence,
            ready_frame,
        })
    }
}
