//! Per-node data acquisition.
//!
//! Each x-node is fetched with a directed request
//! `{UNIVERSAL_CMD, opcode, 0xFF, node}`, a wait on the ready line, a read
//! of the reply size and a combined write/read of the reply itself. Replies
//! are little-endian signed 16-bit samples.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::bus::{wait_ready, ReadyLine, ReadyPolicy, RegisterBus};
use crate::error::{DeviceError, DeviceResult};
use crate::geometry::DeviceGeometry;
use crate::regs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFamily {
    CmDelta,
    CmAbs,
    Intensity,
}

impl DataFamily {
    /// Opcode that arms the measurement before nodes are walked. Raw
    /// intensity is sampled continuously and needs no arming.
    pub fn prepare_opcode(self) -> Option<u8> {
        match self {
            DataFamily::CmDelta => Some(regs::UNIV_CM_DELTA),
            DataFamily::CmAbs => Some(regs::UNIV_CM_ABS),
            DataFamily::Intensity => None,
        }
    }

    pub fn node_opcode(self) -> u8 {
        match self {
            DataFamily::CmDelta => regs::UNIV_CM_DELTA + 1,
            DataFamily::CmAbs => regs::UNIV_CM_ABS + 1,
            DataFamily::Intensity => regs::UNIV_INTENSITY,
        }
    }

    pub fn key_opcode(self) -> u8 {
        match self {
            DataFamily::CmDelta => regs::UNIV_GET_DELTA_KEY,
            DataFamily::CmAbs => regs::UNIV_GET_ABS_KEY,
            DataFamily::Intensity => regs::UNIV_INTENSITY + 1,
        }
    }

    /// Largest reply the controller may declare for one node of this family.
    pub fn reply_ceiling(self) -> usize {
        match self {
            DataFamily::CmDelta | DataFamily::CmAbs => regs::CM_REPLY_MAX,
            DataFamily::Intensity => regs::INTENSITY_REPLY_MAX,
        }
    }

    /// Number of samples a node reply of `size` bytes yields. Capacitance
    /// rows always carry one sample per y-node; intensity rows carry
    /// whatever the controller sent.
    fn row_samples(self, size: usize, y_nodes: u8) -> DeviceResult<usize> {
        match self {
            DataFamily::CmDelta | DataFamily::CmAbs => {
                let needed = usize::from(y_nodes) * 2;
                if size < needed {
                    return Err(DeviceError::ShortReply { size, needed });
                }
                Ok(usize::from(y_nodes))
            }
            DataFamily::Intensity => Ok(size / 2),
        }
    }
}

impl core::fmt::Display for DataFamily {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DataFamily::CmDelta => write!(f, "cm_delta"),
            DataFamily::CmAbs => write!(f, "cm_abs"),
            DataFamily::Intensity => write!(f, "intensity"),
        }
    }
}

/// Decoded samples of one acquisition, in the order they were read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMatrix {
    pub family: DataFamily,
    pub rows: Vec<Vec<i16>>,
    pub keys: Vec<i16>,
}

impl NodeMatrix {
    pub fn new(family: DataFamily) -> Self {
        Self {
            family,
            rows: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<i16> {
        self.rows.get(x).and_then(|row| row.get(y)).copied()
    }

    /// Grid samples in row-major order, keys excluded.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.rows.iter().flat_map(|row| row.iter().copied())
    }

    pub fn sample_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn min_max(&self) -> Option<(i16, i16)> {
        self.samples().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Signed 16-bit sample from its little-endian byte pair.
pub fn decode_sample(lo: u8, hi: u8) -> i16 {
    i16::from_le_bytes([lo, hi])
}

fn decode_into(out: &mut Vec<i16>, reply: &[u8], count: usize) {
    out.extend(
        reply
            .chunks_exact(2)
            .take(count)
            .map(|pair| decode_sample(pair[0], pair[1])),
    );
}

struct NodeWalker<'a, B: ?Sized, R: ?Sized> {
    bus: &'a mut B,
    ready: &'a mut R,
    policy: ReadyPolicy,
    family: DataFamily,
    buf: [u8; regs::CM_REPLY_MAX],
}

impl<'a, B, R> NodeWalker<'a, B, R>
where
    B: RegisterBus + ?Sized,
    R: ReadyLine + ?Sized,
{
    fn prepare(&mut self, opcode: u8) -> DeviceResult<()> {
        self.bus.write_reg(regs::UNIVERSAL_CMD, opcode).map_err(|e| {
            error!("Failed to send 0x{:02X} cmd ({})", opcode, e);
            DeviceError::from(e)
        })?;

        wait_ready(&mut *self.ready, self.policy)?;

        let result = self.bus.read_reg(regs::UNIVERSAL_RESULT).map_err(|e| {
            error!("Failed 0x{:02X} test ({})", opcode, e);
            DeviceError::from(e)
        })?;
        debug!("{} armed, result 0x{:02X}", self.family, result);
        Ok(())
    }

    /// One request/poll/read cycle. Returns the raw reply.
    fn request(&mut self, opcode: u8, node: u8) -> DeviceResult<&[u8]> {
        let request = [regs::UNIVERSAL_CMD, opcode, regs::NODE_WILDCARD, node];
        self.bus.write_block(&request).map_err(|e| {
            error!("Failed to send cmd for node {} ({})", node, e);
            DeviceError::from(e)
        })?;

        wait_ready(&mut *self.ready, self.policy)?;

        let size = usize::from(self.bus.read_reg(regs::UNIVERSAL_RESULT_SZ).map_err(|e| {
            error!("Failed to read node {} result size ({})", node, e);
            DeviceError::from(e)
        })?);

        let limit = self.family.reply_ceiling();
        if size > limit {
            error!("node {} declared {} bytes, ceiling is {}", node, size, limit);
            return Err(DeviceError::ReplyTooLarge { size, limit });
        }

        if size > 0 {
            self.bus
                .write_read(regs::UNIVERSAL_RESULT, &mut self.buf[..size])
                .map_err(|e| {
                    error!("Failed to read node {} value ({})", node, e);
                    DeviceError::from(e)
                })?;
        }

        Ok(&self.buf[..size])
    }
}

/// Walk every x-node (and the key vector when `key_nodes > 0`) with the
/// opcodes of `family`. Any failure aborts the walk; rows already logged
/// stay logged.
pub fn read_all<B, R>(
    bus: &mut B,
    ready: &mut R,
    policy: ReadyPolicy,
    geometry: DeviceGeometry,
    key_nodes: u8,
    family: DataFamily,
) -> DeviceResult<NodeMatrix>
where
    B: RegisterBus + ?Sized,
    R: ReadyLine + ?Sized,
{
    let mut walker = NodeWalker {
        bus,
        ready,
        policy,
        family,
        buf: [0u8; regs::CM_REPLY_MAX],
    };
    let mut matrix = NodeMatrix::new(family);

    if let Some(opcode) = family.prepare_opcode() {
        walker.prepare(opcode)?;
    }

    info!("{} data", family);
    for node in 0..geometry.x_nodes {
        let reply = walker.request(family.node_opcode(), node)?;
        let count = family.row_samples(reply.len(), geometry.y_nodes)?;

        let mut row = Vec::with_capacity(count);
        decode_into(&mut row, reply, count);
        info!("{} x{:02}: {:?}", family, node, row);
        matrix.rows.push(row);
    }

    if key_nodes > 0 {
        let reply = walker.request(family.key_opcode(), 0)?;
        let needed = usize::from(key_nodes) * 2;
        if reply.len() < needed {
            return Err(DeviceError::ShortReply {
                size: reply.len(),
                needed,
            });
        }

        decode_into(&mut matrix.keys, reply, usize::from(key_nodes));
        info!("{} key: {:?}", family, matrix.keys);
    }

    Ok(matrix)
}
