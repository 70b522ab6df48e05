//! Factory command table and command-line parsing.

use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted command line, terminator included.
pub const MAX_CMD_LEN: usize = 32;
/// Most integer parameters a command line may carry.
pub const MAX_PARAMS: usize = 8;

pub const NOT_SUPPORT_CMD: &str = "not_support_cmd";

const CMD_DELIM: char = ',';

pub type CmdLine = ArrayString<MAX_CMD_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    FwUpdate,
    GetThreshold,
    GetXNum,
    GetYNum,
    RunCmDeltaRead,
    RunCmAbsRead,
    RunIntensityRead,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub op: Operation,
}

const fn cmd(name: &'static str, op: Operation) -> CommandDescriptor {
    CommandDescriptor { name, op }
}

pub static COMMANDS: &[CommandDescriptor] = &[
    cmd("fw_update", Operation::FwUpdate),
    cmd("get_threshold", Operation::GetThreshold),
    cmd("module_off_master", Operation::NotSupported),
    cmd("module_on_master", Operation::NotSupported),
    cmd("module_off_slave", Operation::NotSupported),
    cmd("module_on_slave", Operation::NotSupported),
    cmd("get_x_num", Operation::GetXNum),
    cmd("get_y_num", Operation::GetYNum),
    cmd("run_cm_delta_read", Operation::RunCmDeltaRead),
    cmd("run_cm_abs_read", Operation::RunCmAbsRead),
    cmd("run_intensity_read", Operation::RunIntensityRead),
    cmd(NOT_SUPPORT_CMD, Operation::NotSupported),
];

/// Exact-match lookup, first entry wins.
pub fn find(name: &str) -> Option<&'static CommandDescriptor> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// Like [`find`], falling back to `not_support_cmd`.
pub fn lookup(name: &str) -> &'static CommandDescriptor {
    find(name).unwrap_or(&NOT_SUPPORTED)
}

static NOT_SUPPORTED: CommandDescriptor = cmd(NOT_SUPPORT_CMD, Operation::NotSupported);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("cmd length is over ({len} >= {max})")]
    TooLong { len: usize, max: usize },
}

/// One parsed request, alive only while its operation runs.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    pub line: CmdLine,
    pub params: Vec<i32, MAX_PARAMS>,
    pub descriptor: &'static CommandDescriptor,
}

impl PendingInvocation {
    /// Parse `<name>[,<int>]*`. One trailing newline is dropped. Parameters
    /// are only read for registered commands; a field that is not a base-10
    /// integer counts as 0.
    pub fn parse(input: &str) -> Result<Self, InvocationError> {
        if input.len() >= MAX_CMD_LEN {
            return Err(InvocationError::TooLong {
                len: input.len(),
                max: MAX_CMD_LEN,
            });
        }

        let text = input.strip_suffix('\n').unwrap_or(input);
        let mut line = CmdLine::new();
        line.push_str(text);

        let (name, rest) = match text.split_once(CMD_DELIM) {
            Some((name, rest)) => (name, Some(rest)),
            None => (text, None),
        };

        let mut params = Vec::new();
        let descriptor = match find(name) {
            Some(descriptor) => {
                if let Some(rest) = rest {
                    for field in rest.split(CMD_DELIM).take(MAX_PARAMS) {
                        let _ = params.push(field.parse::<i32>().unwrap_or(0));
                    }
                }
                descriptor
            }
            None => &NOT_SUPPORTED,
        };

        Ok(Self { line, params, descriptor })
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Parameter `index`, 0 when it was not given.
    pub fn param(&self, index: usize) -> i32 {
        self.params.get(index).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_name_resolves_to_itself() {
        for descriptor in COMMANDS {
            let found = lookup(descriptor.name);
            assert_eq!(found.name, descriptor.name);
            assert_eq!(COMMANDS.iter().filter(|c| c.name == descriptor.name).count(), 1);
        }
    }

    #[test]
    fn test_unknown_name_falls_back() {
        assert_eq!(lookup("get_chip_vendor").op, Operation::NotSupported);
        assert_eq!(lookup("get_chip_vendor").name, NOT_SUPPORT_CMD);
        assert_eq!(lookup("").name, NOT_SUPPORT_CMD);
        assert_eq!(lookup("FW_UPDATE").name, NOT_SUPPORT_CMD);
    }

    #[test]
    fn test_parse_params() {
        let inv = PendingInvocation::parse("fw_update,1\n").unwrap();
        assert_eq!(inv.name(), "fw_update");
        assert_eq!(inv.line.as_str(), "fw_update,1");
        assert_eq!(inv.params.as_slice(), &[1]);
        assert_eq!(inv.param(0), 1);
        assert_eq!(inv.param(5), 0);

        let inv = PendingInvocation::parse("get_threshold,7,-3,x,").unwrap();
        assert_eq!(inv.params.as_slice(), &[7, -3, 0, 0]);
    }

    #[test]
    fn test_parse_caps_param_count() {
        let inv = PendingInvocation::parse("fw_update,1,2,3,4,5,6,7,8,9").unwrap();
        assert_eq!(inv.params.len(), MAX_PARAMS);
        assert_eq!(inv.param(7), 8);
    }

    #[test]
    fn test_parse_unknown_skips_params() {
        let inv = PendingInvocation::parse("get_reference,3").unwrap();
        assert_eq!(inv.name(), NOT_SUPPORT_CMD);
        assert!(inv.params.is_empty());
        assert_eq!(inv.line.as_str(), "get_reference,3");
    }

    #[test]
    fn test_parse_rejects_long_line() {
        let long = "x".repeat(MAX_CMD_LEN);
        assert_eq!(
            PendingInvocation::parse(&long).unwrap_err(),
            InvocationError::TooLong { len: MAX_CMD_LEN, max: MAX_CMD_LEN }
        );
        assert!(PendingInvocation::parse(&long[1..]).is_ok());
    }
}
