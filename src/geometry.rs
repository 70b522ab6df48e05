use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::bus::{BusError, RegisterBus};
use crate::regs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAxis {
    X,
    Y,
    Key,
}

impl core::fmt::Display for NodeAxis {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NodeAxis::X => write!(f, "xnode"),
            NodeAxis::Y => write!(f, "ynode"),
            NodeAxis::Key => write!(f, "keynode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("{0} count must be positive")]
    NonPositive(NodeAxis),
    #[error("failed to read {axis} count: {source}")]
    Read { axis: NodeAxis, source: BusError },
}

/// Sensing grid dimensions reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    pub x_nodes: u8,
    pub y_nodes: u8,
    pub key_nodes: u8,
}

impl DeviceGeometry {
    /// Build a geometry without touching the device. A zero key count
    /// means the panel has no dedicated key sensors.
    pub fn new(x_nodes: u8, y_nodes: u8, key_nodes: u8) -> Result<Self, GeometryError> {
        if x_nodes == 0 {
            return Err(GeometryError::NonPositive(NodeAxis::X));
        }
        if y_nodes == 0 {
            return Err(GeometryError::NonPositive(NodeAxis::Y));
        }
        Ok(Self { x_nodes, y_nodes, key_nodes })
    }

    /// Read the node counts once at bring-up. Every count has to be
    /// positive; anything else means the controller is not answering sanely.
    pub fn probe<B: RegisterBus + ?Sized>(bus: &mut B) -> Result<Self, GeometryError> {
        let x_nodes = read_count(bus, regs::TX_NUM, NodeAxis::X)?;
        let y_nodes = read_count(bus, regs::RX_NUM, NodeAxis::Y)?;
        let key_nodes = read_count(bus, regs::KEY_NUM, NodeAxis::Key)?;

        info!("node geometry x={} y={} key={}", x_nodes, y_nodes, key_nodes);
        Ok(Self { x_nodes, y_nodes, key_nodes })
    }
}

fn read_count<B: RegisterBus + ?Sized>(
    bus: &mut B,
    reg: u8,
    axis: NodeAxis,
) -> Result<u8, GeometryError> {
    let count = bus.read_reg(reg).map_err(|source| {
        error!("Failed to read {} num ({})", axis, source);
        GeometryError::Read { axis, source }
    })?;
    if count == 0 {
        error!("Failed to read {} num (0)", axis);
        return Err(GeometryError::NonPositive(axis));
    }
    Ok(count)
}
