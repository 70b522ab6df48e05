//! Register-level model of an MMS134S-class panel.
//!
//! [`SimPanel`] hands out a bus, a ready line and an interrupt controller
//! that all act on one shared [`PanelModel`], so tests and the simulator
//! can drive the engine and inspect the device side at the same time.
//! Faults are injected through [`SimFaults`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::acquire::DataFamily;
use crate::bus::{BusError, IrqControl, ReadyLine, RegisterBus};
use crate::config::FactoryConfig;
use crate::device::FactoryDevice;
use crate::firmware::{FirmwareError, FirmwareFlasher, FirmwareProvider, FirmwareSource};
use crate::geometry::{DeviceGeometry, GeometryError};
use crate::regs;

const DEFAULT_THRESHOLD: u8 = 30;
const PREPARE_RESULT: u8 = 0x01;

/// Transactions kept for inspection; older entries are overwritten.
pub const TRANSACTION_LOG_LEN: usize = 1024;

/// Faults the model can be told to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFaults {
    /// Ready line never asserts.
    pub never_ready: bool,
    /// Event code reported instead of the test-mode acknowledgement.
    pub wrong_ack: Option<u8>,
    /// Register whose reads fail.
    pub fail_read: Option<u8>,
    /// Universal opcode whose command write fails.
    pub fail_opcode: Option<u8>,
    /// Result size reported for every node reply, whatever was generated.
    pub reply_size: Option<u8>,
    /// Flashing is refused.
    pub flash_fail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimTransaction {
    Read(u8),
    Write(u8, u8),
    Block(Vec<u8>),
    WriteRead(u8, usize),
}

#[derive(Debug)]
pub struct PanelModel {
    geometry: DeviceGeometry,
    threshold: u8,
    test_mode: bool,
    irq_enabled: bool,
    ready: bool,
    event: u8,
    result: Vec<u8>,
    overrides: HashMap<u8, Vec<i16>>,
    faults: SimFaults,
    log: HistoryBuffer<SimTransaction, TRANSACTION_LOG_LEN>,
    flashed: Vec<usize>,
}

impl PanelModel {
    fn new(geometry: DeviceGeometry) -> Self {
        Self {
            geometry,
            threshold: DEFAULT_THRESHOLD,
            test_mode: false,
            irq_enabled: true,
            ready: false,
            event: 0,
            result: Vec::new(),
            overrides: HashMap::new(),
            faults: SimFaults::default(),
            log: HistoryBuffer::new(),
            flashed: Vec::new(),
        }
    }

    fn command(&mut self, opcode: u8, node: u8) -> Result<(), BusError> {
        if self.faults.fail_opcode == Some(opcode) {
            debug!("sim: rejecting opcode 0x{:02X}", opcode);
            return Err(BusError::Write { reg: regs::UNIVERSAL_CMD });
        }

        self.result.clear();
        match opcode {
            regs::UNIV_ENTER_TEST => {
                self.test_mode = true;
                self.event = self.faults.wrong_ack.unwrap_or(regs::TEST_MODE_ACK);
            }
            regs::UNIV_EXIT_TEST => {
                self.test_mode = false;
                self.ready = false;
                return Ok(());
            }
            regs::UNIV_CM_DELTA | regs::UNIV_CM_ABS => {
                if self.test_mode {
                    self.result.push(PREPARE_RESULT);
                }
            }
            regs::UNIV_GET_DELTA => self.node_reply(DataFamily::CmDelta, node),
            regs::UNIV_GET_ABS => self.node_reply(DataFamily::CmAbs, node),
            regs::UNIV_INTENSITY => self.node_reply(DataFamily::Intensity, node),
            regs::UNIV_GET_DELTA_KEY => self.key_reply(DataFamily::CmDelta),
            regs::UNIV_GET_ABS_KEY => self.key_reply(DataFamily::CmAbs),
            regs::UNIV_INTENSITY_KEY => self.key_reply(DataFamily::Intensity),
            other => warn!("sim: unknown opcode 0x{:02X}", other),
        }
        self.ready = true;
        Ok(())
    }

    fn node_reply(&mut self, family: DataFamily, node: u8) {
        // Capacitance data is only produced in test mode.
        if family != DataFamily::Intensity && !self.test_mode {
            return;
        }
        let samples: Vec<i16> = match self.overrides.get(&node) {
            Some(samples) => samples.clone(),
            None => (0..self.geometry.y_nodes)
                .map(|ch| synthetic_sample(family, node, ch))
                .collect(),
        };
        self.push_samples(&samples);
    }

    fn key_reply(&mut self, family: DataFamily) {
        if family != DataFamily::Intensity && !self.test_mode {
            return;
        }
        let samples: Vec<i16> = (0..self.geometry.key_nodes)
            .map(|key| synthetic_key(family, key))
            .collect();
        self.push_samples(&samples);
    }

    fn push_samples(&mut self, samples: &[i16]) {
        for sample in samples {
            self.result.extend_from_slice(&sample.to_le_bytes());
        }
        if let Some(size) = self.faults.reply_size {
            self.result.resize(usize::from(size), 0);
        }
    }

    fn record(&mut self, transaction: SimTransaction) {
        self.log.write(transaction);
    }

    fn result_size(&self) -> u8 {
        u8::try_from(self.result.len()).unwrap_or(u8::MAX)
    }
}

/// Capacitance value the model reports for grid node `(node, channel)`.
pub fn synthetic_sample(family: DataFamily, node: u8, channel: u8) -> i16 {
    let (x, y) = (i16::from(node), i16::from(channel));
    match family {
        DataFamily::CmDelta => (x * 7 + y * 3) % 11 - 5,
        DataFamily::CmAbs => 1000 + x * 10 + y,
        DataFamily::Intensity => x + y - 3,
    }
}

pub fn synthetic_key(family: DataFamily, key: u8) -> i16 {
    let k = i16::from(key);
    match family {
        DataFamily::CmDelta => k - 1,
        DataFamily::CmAbs => 900 + k,
        DataFamily::Intensity => k,
    }
}

/// Shared handle to one simulated panel.
#[derive(Debug, Clone)]
pub struct SimPanel {
    model: Arc<Mutex<PanelModel>>,
}

impl SimPanel {
    pub fn new(geometry: DeviceGeometry) -> Self {
        Self {
            model: Arc::new(Mutex::new(PanelModel::new(geometry))),
        }
    }

    /// Panel with `x` by `y` nodes and `key` touch keys.
    pub fn with_nodes(x: u8, y: u8, key: u8) -> Result<Self, GeometryError> {
        Ok(Self::new(DeviceGeometry::new(x, y, key)?))
    }

    fn lock(&self) -> MutexGuard<'_, PanelModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> SimBus {
        SimBus { panel: self.clone() }
    }

    pub fn ready_line(&self) -> SimReadyLine {
        SimReadyLine { panel: self.clone() }
    }

    pub fn irq(&self) -> SimIrq {
        SimIrq { panel: self.clone() }
    }

    /// Device context built from the panel's known geometry, without
    /// touching the bus.
    pub fn device(&self, config: &FactoryConfig) -> FactoryDevice<SimBus, SimReadyLine, SimIrq> {
        let geometry = self.lock().geometry;
        FactoryDevice::new(self.bus(), self.ready_line(), self.irq(), geometry).with_config(config)
    }

    /// Device context whose geometry is read from the count registers.
    pub fn bring_up(
        &self,
        config: &FactoryConfig,
    ) -> Result<FactoryDevice<SimBus, SimReadyLine, SimIrq>, GeometryError> {
        FactoryDevice::probe(self.bus(), self.ready_line(), self.irq(), config)
    }

    pub fn set_threshold(&self, threshold: u8) {
        self.lock().threshold = threshold;
    }

    /// Report `samples` for grid node `node` instead of synthetic values.
    pub fn set_node_samples(&self, node: u8, samples: Vec<i16>) {
        self.lock().overrides.insert(node, samples);
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.lock().faults = faults;
    }

    pub fn faults(&self) -> SimFaults {
        self.lock().faults.clone()
    }

    pub fn clear_faults(&self) {
        self.lock().faults = SimFaults::default();
    }

    pub fn irq_enabled(&self) -> bool {
        self.lock().irq_enabled
    }

    pub fn in_test_mode(&self) -> bool {
        self.lock().test_mode
    }

    /// Logged transactions, oldest first.
    pub fn transactions(&self) -> Vec<SimTransaction> {
        self.lock().log.oldest_ordered().cloned().collect()
    }

    pub fn clear_transactions(&self) {
        self.lock().log.clear();
    }

    /// Number of universal commands issued with `opcode`.
    pub fn opcode_count(&self, opcode: u8) -> usize {
        self.lock()
            .log
            .oldest_ordered()
            .filter(|t| match t {
                SimTransaction::Write(reg, value) => *reg == regs::UNIVERSAL_CMD && *value == opcode,
                SimTransaction::Block(bytes) => {
                    bytes.first() == Some(&regs::UNIVERSAL_CMD) && bytes.get(1) == Some(&opcode)
                }
                _ => false,
            })
            .count()
    }

    /// Sizes of the images flashed so far.
    pub fn flashed(&self) -> Vec<usize> {
        self.lock().flashed.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SimBus {
    panel: SimPanel,
}

impl RegisterBus for SimBus {
    fn read_reg(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut model = self.panel.lock();
        model.record(SimTransaction::Read(reg));
        if model.faults.fail_read == Some(reg) {
            return Err(BusError::Read { reg });
        }

        let value = match reg {
            regs::THRESHOLD => model.threshold,
            regs::TX_NUM => model.geometry.x_nodes,
            regs::RX_NUM => model.geometry.y_nodes,
            regs::KEY_NUM => model.geometry.key_nodes,
            regs::EVENT_PKT => {
                model.ready = false;
                model.event
            }
            regs::UNIVERSAL_RESULT_SZ => model.result_size(),
            regs::UNIVERSAL_RESULT => {
                model.ready = false;
                model.result.first().copied().unwrap_or_default()
            }
            _ => 0,
        };
        Ok(value)
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        let mut model = self.panel.lock();
        model.record(SimTransaction::Write(reg, value));
        if reg == regs::UNIVERSAL_CMD {
            model.command(value, 0)?;
        }
        Ok(())
    }

    fn write_block(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let mut model = self.panel.lock();
        model.record(SimTransaction::Block(bytes.to_vec()));
        match bytes {
            [regs::UNIVERSAL_CMD, opcode, _, node, ..] => model.command(*opcode, *node),
            [regs::UNIVERSAL_CMD, opcode] => model.command(*opcode, 0),
            _ => Ok(()),
        }
    }

    fn write_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let mut model = self.panel.lock();
        model.record(SimTransaction::WriteRead(reg, buf.len()));
        if model.faults.fail_read == Some(reg) {
            return Err(BusError::Read { reg });
        }

        buf.fill(0);
        if reg == regs::UNIVERSAL_RESULT {
            let n = buf.len().min(model.result.len());
            buf[..n].copy_from_slice(&model.result[..n]);
            model.ready = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimReadyLine {
    panel: SimPanel,
}

impl ReadyLine for SimReadyLine {
    fn poll_ready(&mut self) -> nb::Result<(), BusError> {
        let model = self.panel.lock();
        if model.ready && !model.faults.never_ready {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimIrq {
    panel: SimPanel,
}

impl IrqControl for SimIrq {
    fn disable_irq(&mut self) {
        self.panel.lock().irq_enabled = false;
    }

    fn enable_irq(&mut self) {
        self.panel.lock().irq_enabled = true;
    }
}

/// Flasher that accepts any non-empty image and records its size.
#[derive(Debug, Clone)]
pub struct SimFlasher {
    panel: SimPanel,
}

impl SimFlasher {
    pub fn new(panel: &SimPanel) -> Self {
        Self { panel: panel.clone() }
    }
}

impl FirmwareFlasher for SimFlasher {
    fn flash(&mut self, _bus: &mut dyn RegisterBus, image: &[u8]) -> Result<(), FirmwareError> {
        let mut model = self.panel.lock();
        if model.faults.flash_fail {
            return Err(FirmwareError::Flash("simulated flash failure".to_string()));
        }
        if model.irq_enabled {
            return Err(FirmwareError::Flash("interrupts still enabled".to_string()));
        }
        model.flashed.push(image.len());
        Ok(())
    }
}

/// Firmware images held in memory, for hosts without a firmware tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryFirmware {
    pub builtin: Option<Vec<u8>>,
    pub ums: Option<Vec<u8>>,
}

impl FirmwareProvider for MemoryFirmware {
    fn load(&mut self, source: FirmwareSource) -> Result<Vec<u8>, FirmwareError> {
        let (image, name) = match source {
            FirmwareSource::BuiltIn => (&self.builtin, "builtin"),
            FirmwareSource::Ums => (&self.ums, "ums"),
        };
        match image {
            Some(image) if !image.is_empty() => Ok(image.clone()),
            _ => Err(FirmwareError::Empty(PathBuf::from(name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{wait_ready, ReadyPolicy};
    use crate::geometry::NodeAxis;

    #[test]
    fn test_bring_up_reads_geometry() {
        let panel = SimPanel::with_nodes(3, 4, 2).unwrap();
        let device = panel.bring_up(&FactoryConfig::default()).unwrap();
        assert_eq!(device.geometry(), DeviceGeometry::new(3, 4, 2).unwrap());
        assert_eq!(
            panel.transactions(),
            vec![
                SimTransaction::Read(regs::TX_NUM),
                SimTransaction::Read(regs::RX_NUM),
                SimTransaction::Read(regs::KEY_NUM),
            ]
        );
    }

    #[test]
    fn test_bring_up_rejects_keyless_panel() {
        let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
        assert_eq!(
            panel.bring_up(&FactoryConfig::default()).unwrap_err(),
            GeometryError::NonPositive(NodeAxis::Key)
        );
    }

    #[test]
    fn test_device_uses_known_geometry() {
        let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
        let config = FactoryConfig {
            ready_policy: ReadyPolicy::MaxPolls(7),
            touch_keys: false,
            ..FactoryConfig::default()
        };
        let device = panel.device(&config);
        assert_eq!(device.geometry(), DeviceGeometry::new(2, 2, 0).unwrap());
        assert_eq!(device.policy(), ReadyPolicy::MaxPolls(7));
        assert!(panel.transactions().is_empty());
    }

    #[test]
    fn test_transaction_log_is_bounded() {
        let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
        let mut bus = panel.bus();
        for _ in 0..TRANSACTION_LOG_LEN {
            bus.read_reg(regs::THRESHOLD).unwrap();
        }
        bus.read_reg(regs::EVENT_PKT).unwrap();

        let log = panel.transactions();
        assert_eq!(log.len(), TRANSACTION_LOG_LEN);
        assert_eq!(log.last(), Some(&SimTransaction::Read(regs::EVENT_PKT)));

        panel.clear_transactions();
        assert!(panel.transactions().is_empty());
    }

    #[test]
    fn test_enter_sets_ready_and_ack() {
        let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
        let mut bus = panel.bus();
        let mut ready = panel.ready_line();

        assert!(ready.poll_ready().is_err());
        bus.write_reg(regs::UNIVERSAL_CMD, regs::UNIV_ENTER_TEST).unwrap();
        wait_ready(&mut ready, ReadyPolicy::MaxPolls(1)).unwrap();
        assert_eq!(bus.read_reg(regs::EVENT_PKT).unwrap(), regs::TEST_MODE_ACK);
        assert!(panel.in_test_mode());
        assert!(ready.poll_ready().is_err());
    }

    #[test]
    fn test_node_reply_layout() {
        let panel = SimPanel::with_nodes(2, 3, 0).unwrap();
        let mut bus = panel.bus();
        bus.write_reg(regs::UNIVERSAL_CMD, regs::UNIV_ENTER_TEST).unwrap();
        bus.write_block(&[regs::UNIVERSAL_CMD, regs::UNIV_GET_ABS, regs::NODE_WILDCARD, 1])
            .unwrap();

        assert_eq!(bus.read_reg(regs::UNIVERSAL_RESULT_SZ).unwrap(), 6);
        let mut reply = [0u8; 6];
        bus.write_read(regs::UNIVERSAL_RESULT, &mut reply).unwrap();
        assert_eq!(
            i16::from_le_bytes([reply[4], reply[5]]),
            synthetic_sample(DataFamily::CmAbs, 1, 2)
        );
    }

    #[test]
    fn test_cm_data_needs_test_mode() {
        let panel = SimPanel::with_nodes(2, 3, 0).unwrap();
        let mut bus = panel.bus();
        bus.write_block(&[regs::UNIVERSAL_CMD, regs::UNIV_GET_DELTA, regs::NODE_WILDCARD, 0])
            .unwrap();
        assert_eq!(bus.read_reg(regs::UNIVERSAL_RESULT_SZ).unwrap(), 0);
    }

    #[test]
    fn test_opcode_fault() {
        let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
        panel.set_faults(SimFaults {
            fail_opcode: Some(regs::UNIV_EXIT_TEST),
            ..SimFaults::default()
        });
        let mut bus = panel.bus();
        assert!(bus.write_reg(regs::UNIVERSAL_CMD, regs::UNIV_ENTER_TEST).is_ok());
        assert_eq!(
            bus.write_reg(regs::UNIVERSAL_CMD, regs::UNIV_EXIT_TEST),
            Err(BusError::Write { reg: regs::UNIVERSAL_CMD })
        );
        assert_eq!(panel.opcode_count(regs::UNIV_EXIT_TEST), 1);
    }
}
