//! Test-mode handshake and interrupt suspension.
//!
//! Interrupts are disabled exactly while a [`TestSession`] or an
//! [`IrqSuspend`] is alive. The two are independent ways of pausing
//! normal reporting and both borrow the device mutably, so they can never
//! overlap.

use tracing::{error, info, warn};

use crate::acquire::{DataFamily, NodeMatrix};
use crate::bus::{wait_ready, IrqControl, ReadyLine, RegisterBus};
use crate::device::FactoryDevice;
use crate::error::{DeviceError, DeviceResult};
use crate::regs;

impl<B, R, Q> FactoryDevice<B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    /// Disable interrupts and switch the controller into test mode.
    ///
    /// On any failure interrupts are re-enabled before the error is
    /// returned, so a later call starts from a clean state.
    pub fn enter_test_mode(&mut self) -> DeviceResult<TestSession<'_, B, R, Q>> {
        self.suspend_irq();

        match self.enter_handshake() {
            Ok(()) => Ok(TestSession { device: self, open: true }),
            Err(e) => {
                error!("Failed to enter test mode ({})", e);
                self.resume_irq();
                Err(e)
            }
        }
    }

    fn enter_handshake(&mut self) -> DeviceResult<()> {
        self.bus_mut().write_reg(regs::UNIVERSAL_CMD, regs::UNIV_ENTER_TEST)?;

        let policy = self.policy();
        wait_ready(self.ready_mut(), policy)?;

        let event = self.bus_mut().read_reg(regs::EVENT_PKT)?;
        info!("event(0x{:02X})", event);

        if event != regs::TEST_MODE_ACK {
            return Err(DeviceError::UnexpectedAck {
                expected: regs::TEST_MODE_ACK,
                got: event,
            });
        }
        Ok(())
    }

    /// Leave test mode. Interrupts come back on whether or not the
    /// controller accepted the command.
    fn exit_handshake(&mut self) -> DeviceResult<()> {
        let result = self
            .bus_mut()
            .write_reg(regs::UNIVERSAL_CMD, regs::UNIV_EXIT_TEST)
            .map_err(DeviceError::from);

        if let Err(e) = &result {
            error!("Failed to exit test mode ({})", e);
        }

        self.resume_irq();
        result
    }

    /// Disable interrupts without the test-mode handshake.
    pub fn suspend_interrupts(&mut self) -> IrqSuspend<'_, B, R, Q> {
        self.suspend_irq();
        IrqSuspend { device: self }
    }
}

/// Active test-mode session. Call [`TestSession::exit`] to leave test mode
/// and learn whether the controller accepted it; dropping the session
/// without doing so still runs the exit handshake.
///
/// The session does not hand the device back out, so no second session or
/// interrupt suspension can start inside it:
///
/// ```compile_fail
/// use tspfac::config::FactoryConfig;
/// use tspfac::sim::SimPanel;
///
/// let panel = SimPanel::with_nodes(2, 2, 1).unwrap();
/// let mut device = panel.device(&FactoryConfig::default());
/// let mut session = device.enter_test_mode().unwrap();
/// let _nested = session.device().enter_test_mode();
/// ```
#[derive(Debug)]
pub struct TestSession<'a, B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    device: &'a mut FactoryDevice<B, R, Q>,
    open: bool,
}

impl<'a, B, R, Q> TestSession<'a, B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    pub fn acquire(&mut self, family: DataFamily) -> DeviceResult<NodeMatrix> {
        self.device.acquire_nodes(family)
    }

    pub fn exit(mut self) -> DeviceResult<()> {
        self.open = false;
        self.device.exit_handshake()
    }
}

impl<'a, B, R, Q> Drop for TestSession<'a, B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    fn drop(&mut self) {
        if self.open {
            warn!("test mode session abandoned, forcing exit");
            let _ = self.device.exit_handshake();
        }
    }
}

/// Interrupts held off for a raw read or a firmware update.
///
/// ```compile_fail
/// use tspfac::config::FactoryConfig;
/// use tspfac::sim::SimPanel;
///
/// let panel = SimPanel::with_nodes(2, 2, 1).unwrap();
/// let mut device = panel.device(&FactoryConfig::default());
/// let mut suspended = device.suspend_interrupts();
/// let _nested = suspended.device().enter_test_mode();
/// ```
#[derive(Debug)]
pub struct IrqSuspend<'a, B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    device: &'a mut FactoryDevice<B, R, Q>,
}

impl<'a, B, R, Q> IrqSuspend<'a, B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    pub fn acquire(&mut self, family: DataFamily) -> DeviceResult<NodeMatrix> {
        self.device.acquire_nodes(family)
    }

    /// Raw bus access while interrupts are held off, for the flasher.
    pub fn bus_mut(&mut self) -> &mut B {
        self.device.bus_mut()
    }
}

impl<'a, B, R, Q> Drop for IrqSuspend<'a, B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    fn drop(&mut self) {
        self.device.resume_irq();
    }
}
