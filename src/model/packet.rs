use anyhow::{bail, Result};

use crate::model::table::{Metric, RouterId};

pub const COMMAND_RESPONSE: u8 = 2;
pub const RIP_VERSION: u8 = 2;

pub const HEADER_SIZE: usize = 4;
pub const ENTRY_SIZE: usize = 8;
pub const MAX_PACKET_SIZE: usize = 512;
pub const MAX_ENTRIES: usize = (MAX_PACKET_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// One advertised route, carrying the raw wire values. Range validation of
/// destination and metric is the receiver's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest_id: u32,
    pub metric: u32,
}

/// A RIP response message: fixed four-byte header followed by eight-byte
/// route entries, all in network byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub sender_id: RouterId,
    pub entries: Vec<RouteEntry>,
}

impl ResponsePacket {
    pub fn new(sender_id: RouterId) -> Self {
        Self {
            sender_id,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, dest_id: RouterId, metric: Metric) {
        self.entries.push(RouteEntry {
            dest_id: u32::from(dest_id),
            metric,
        });
    }

    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.entries.len() * ENTRY_SIZE
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = self.wire_size();
        if size > MAX_PACKET_SIZE {
            bail!(
                "response with {} entries is {size} bytes, over the {MAX_PACKET_SIZE}-byte limit",
                self.entries.len()
            );
        }
        let mut buf = Vec::with_capacity(size);
        buf.push(COMMAND_RESPONSE);
        buf.push(RIP_VERSION);
        buf.extend_from_slice(&self.sender_id.to_be_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.dest_id.to_be_bytes());
            buf.extend_from_slice(&entry.metric.to_be_bytes());
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            bail!(
                "packet of {} bytes is shorter than the {HEADER_SIZE}-byte header",
                data.len()
            );
        }
        if data[0] != COMMAND_RESPONSE {
            bail!("unsupported command {}", data[0]);
        }
        if data[1] != RIP_VERSION {
            bail!("unsupported version {}", data[1]);
        }
        let body = &data[HEADER_SIZE..];
        if body.len() % ENTRY_SIZE != 0 {
            bail!(
                "entry region of {} bytes is not a multiple of {ENTRY_SIZE}",
                body.len()
            );
        }
        let sender_id = u16::from_be_bytes([data[2], data[3]]);
        let entries = body
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| RouteEntry {
                dest_id: u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                metric: u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            })
            .collect();
        Ok(Self { sender_id, entries })
    }
}
