//! Text attribute surface: `cmd` (write), `cmd_status` and `cmd_result`
//! (read).

use thiserror::Error;
use tracing::{error, info};

use crate::bus::{IrqControl, ReadyLine, RegisterBus};
use crate::executor::FactoryEngine;
use crate::registry::{InvocationError, PendingInvocation};
use crate::run_state::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttrError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

impl<B, R, Q> FactoryEngine<B, R, Q>
where
    B: RegisterBus,
    R: ReadyLine,
    Q: IrqControl,
{
    /// Handle a write to `cmd`. The command runs to completion before this
    /// returns. A disabled device or an uncollected previous result is
    /// logged and the write is swallowed; only an over-long line is an
    /// error.
    pub fn store_cmd(&mut self, input: &str) -> Result<usize, AttrError> {
        let len = input.len();

        if !self.device.is_enabled() {
            error!("cmd ignored, device is disabled");
            return Ok(len);
        }

        let invocation = PendingInvocation::parse(input).map_err(|e| {
            error!("{}", e);
            AttrError::from(e)
        })?;

        if !self.state.try_begin(&invocation.line) {
            error!("other cmd is running");
            return Ok(len);
        }

        info!("cmd = {}", invocation.name());
        for (i, param) in invocation.params.iter().enumerate() {
            info!("cmd param {} = {}", i, param);
        }

        self.execute(&invocation);
        Ok(len)
    }

    pub fn show_status(&self) -> String {
        show_status(&self.state)
    }

    pub fn show_result(&self) -> String {
        show_result(&self.state)
    }
}

/// `cmd_status` contents: the status token and a newline.
pub fn show_status(state: &RunState) -> String {
    let status = state.status();
    info!("cmd status: {}", status);
    format!("{}\n", status.token())
}

/// `cmd_result` contents. Reading releases the engine for the next
/// command.
pub fn show_result(state: &RunState) -> String {
    let result = state.consume_result();
    info!("cmd result: {}", result);
    result
}
