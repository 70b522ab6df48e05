//! Explicit device context handed to every factory operation.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::acquire::{self, DataFamily, NodeMatrix};
use crate::bus::{IrqControl, ReadyLine, ReadyPolicy, RegisterBus};
use crate::config::FactoryConfig;
use crate::error::DeviceResult;
use crate::geometry::{DeviceGeometry, GeometryError};

/// Lock shared with the normal input-reporting path. Holding it keeps
/// touch events from being processed while the firmware is replaced.
pub type InputLock = Arc<Mutex<()>>;

#[derive(Debug)]
pub struct FactoryDevice<B, R, Q> {
    bus: B,
    ready: R,
    irq: Q,
    geometry: DeviceGeometry,
    policy: ReadyPolicy,
    key_nodes_enabled: bool,
    enabled: bool,
    irq_depth: u32,
    input_lock: InputLock,
}

impl<B, R, Q> FactoryDevice<B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    pub fn new(bus: B, ready: R, irq: Q, geometry: DeviceGeometry) -> Self {
        Self {
            bus,
            ready,
            irq,
            geometry,
            policy: ReadyPolicy::default(),
            key_nodes_enabled: true,
            enabled: true,
            irq_depth: 0,
            input_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read the node geometry from the controller and build the context.
    pub fn probe(mut bus: B, ready: R, irq: Q, config: &FactoryConfig) -> Result<Self, GeometryError> {
        let geometry = DeviceGeometry::probe(&mut bus)?;
        Ok(Self::new(bus, ready, irq, geometry).with_config(config))
    }

    /// Apply the ready policy and touch-key setting from `config`.
    pub fn with_config(self, config: &FactoryConfig) -> Self {
        self.with_policy(config.ready_policy)
            .with_touch_keys(config.touch_keys)
    }

    pub fn with_policy(mut self, policy: ReadyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_touch_keys(mut self, enabled: bool) -> Self {
        self.key_nodes_enabled = enabled;
        self
    }

    pub fn with_input_lock(mut self, lock: InputLock) -> Self {
        self.input_lock = lock;
        self
    }

    pub fn geometry(&self) -> DeviceGeometry {
        self.geometry
    }

    pub fn policy(&self) -> ReadyPolicy {
        self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            info!("device {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    pub fn input_lock(&self) -> InputLock {
        Arc::clone(&self.input_lock)
    }

    /// True while no test-mode session or raw read holds interrupts off.
    pub fn interrupts_enabled(&self) -> bool {
        self.irq_depth == 0
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub(crate) fn ready_mut(&mut self) -> &mut R {
        &mut self.ready
    }

    pub(crate) fn suspend_irq(&mut self) {
        self.irq.disable_irq();
        self.irq_depth += 1;
    }

    pub(crate) fn resume_irq(&mut self) {
        if self.irq_depth == 0 {
            warn!("unbalanced irq enable ignored");
            return;
        }
        self.irq_depth -= 1;
        self.irq.enable_irq();
    }

    /// Walk every node with the given opcode family. The caller is
    /// responsible for having suspended normal operation first.
    pub(crate) fn acquire_nodes(&mut self, family: DataFamily) -> DeviceResult<NodeMatrix> {
        let key_nodes = if self.key_nodes_enabled { self.geometry.key_nodes } else { 0 };
        acquire::read_all(
            &mut self.bus,
            &mut self.ready,
            self.policy,
            self.geometry,
            key_nodes,
            family,
        )
    }
}
