//! Factory command executor.
//!
//! [`FactoryEngine`] owns the device context, the firmware seams and the
//! shared [`RunState`]. Each handler turns its outcome into exactly one
//! `finish` call: a payload with `OK`, `NG` with `FAIL`, or `NA` with
//! `NOT_APPLICABLE`.

use core::fmt::Write;
use std::sync::{Arc, PoisonError};

use arrayvec::ArrayString;
use tracing::{error, info};

use crate::acquire::{DataFamily, NodeMatrix};
use crate::bus::{IrqControl, ReadyLine, RegisterBus};
use crate::device::FactoryDevice;
use crate::error::{DeviceError, DeviceResult};
use crate::firmware::{FirmwareFlasher, FirmwareProvider, FirmwareSource};
use crate::registry::{Operation, PendingInvocation};
use crate::regs;
use crate::run_state::{CmdStatus, RunState};

pub const PAYLOAD_OK: &str = "OK";
pub const PAYLOAD_NG: &str = "NG";
pub const PAYLOAD_NA: &str = "NA";

const MAX_PAYLOAD_LEN: usize = 32;

pub type Payload = ArrayString<MAX_PAYLOAD_LEN>;

/// What a handler produced before it is written to the run state.
#[derive(Debug)]
enum Outcome {
    Done(Payload),
    NotApplicable,
}

pub struct FactoryEngine<B, R, Q> {
    pub(crate) device: FactoryDevice<B, R, Q>,
    firmware: Box<dyn FirmwareProvider + Send>,
    flasher: Box<dyn FirmwareFlasher + Send>,
    pub(crate) state: Arc<RunState>,
}

impl<B, R, Q> FactoryEngine<B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    pub fn new(
        device: FactoryDevice<B, R, Q>,
        firmware: Box<dyn FirmwareProvider + Send>,
        flasher: Box<dyn FirmwareFlasher + Send>,
    ) -> Self {
        Self {
            device,
            firmware,
            flasher,
            state: Arc::new(RunState::new()),
        }
    }

    /// Share an existing run state, e.g. with a reader on another thread.
    pub fn with_run_state(mut self, state: Arc<RunState>) -> Self {
        self.state = state;
        self
    }

    pub fn run_state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    pub fn device(&self) -> &FactoryDevice<B, R, Q> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut FactoryDevice<B, R, Q> {
        &mut self.device
    }

    /// Run the handler for `invocation` and record its outcome. The caller
    /// must already have claimed the run state with `try_begin`.
    pub fn execute(&mut self, invocation: &PendingInvocation) -> CmdStatus {
        let name = invocation.name();
        let outcome = match invocation.descriptor.op {
            Operation::FwUpdate => self.fw_update(invocation),
            Operation::GetThreshold => self.get_threshold(),
            Operation::GetXNum => Ok(number(self.device.geometry().x_nodes)),
            Operation::GetYNum => Ok(number(self.device.geometry().y_nodes)),
            Operation::RunCmDeltaRead => self.run_cm_read(DataFamily::CmDelta),
            Operation::RunCmAbsRead => self.run_cm_read(DataFamily::CmAbs),
            Operation::RunIntensityRead => self.run_intensity_read(),
            Operation::NotSupported => Ok(Outcome::NotApplicable),
        };

        let (status, payload) = match &outcome {
            Ok(Outcome::Done(payload)) => (CmdStatus::Ok, payload.as_str()),
            Ok(Outcome::NotApplicable) => (CmdStatus::NotApplicable, PAYLOAD_NA),
            Err(e) => {
                error!("{} failed: {}", name, e);
                (CmdStatus::Fail, PAYLOAD_NG)
            }
        };

        info!("{}: {}({})", name, payload, status);
        self.state.finish(status, payload);
        status
    }

    fn fw_update(&mut self, invocation: &PendingInvocation) -> DeviceResult<Outcome> {
        if !self.device.is_enabled() {
            error!("fw_update rejected, device is disabled");
            return Err(DeviceError::Disabled);
        }

        let lock = self.device.input_lock();
        let _input = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut suspended = self.device.suspend_interrupts();

        let source = FirmwareSource::from_param(invocation.param(0))?;
        info!("fw_update from {:?}", source);

        let image = self.firmware.load(source)?;
        self.flasher.flash(suspended.bus_mut(), &image)?;

        info!("fw_update done, {} bytes", image.len());
        Ok(Outcome::Done(text(PAYLOAD_OK)))
    }

    fn get_threshold(&mut self) -> DeviceResult<Outcome> {
        let threshold = self.device.bus_mut().read_reg(regs::THRESHOLD)?;
        Ok(number(threshold))
    }

    fn run_cm_read(&mut self, family: DataFamily) -> DeviceResult<Outcome> {
        let mut session = self.device.enter_test_mode()?;
        let matrix = session.acquire(family)?;
        session.exit()?;

        Ok(self.record_matrix(matrix))
    }

    fn run_intensity_read(&mut self) -> DeviceResult<Outcome> {
        let matrix = {
            let mut suspended = self.device.suspend_interrupts();
            suspended.acquire(DataFamily::Intensity)?
        };

        Ok(self.record_matrix(matrix))
    }

    fn record_matrix(&self, matrix: NodeMatrix) -> Outcome {
        let mut payload = Payload::new();
        if let Some((min, max)) = matrix.min_max() {
            let _ = write!(payload, "{},{}", min, max);
        }
        self.state.store_matrix(matrix);
        Outcome::Done(payload)
    }
}

fn number(value: u8) -> Outcome {
    let mut payload = Payload::new();
    let _ = write!(payload, "{}", value);
    Outcome::Done(payload)
}

fn text(s: &str) -> Payload {
    let mut payload = Payload::new();
    let _ = payload.try_push_str(s);
    payload
}
