//! MMS134S-class register map and universal-command opcodes.
//!
//! The controller multiplexes every diagnostic request through one
//! command register and reads the reply back through a size/result
//! register pair. Opcodes come in families: a "test" opcode that arms the
//! measurement, a node read opcode and a key read opcode.

/// 7-bit bus address of the controller.
pub const I2C_ADDR: u8 = 0x48;

// Configuration / status registers
pub const THRESHOLD: u8 = 0x05;
pub const TX_NUM: u8 = 0x0B;
pub const RX_NUM: u8 = 0x0C;
pub const KEY_NUM: u8 = 0x0D;
pub const EVENT_PKT: u8 = 0x10;

// Universal command / result registers
pub const UNIVERSAL_CMD: u8 = 0xA0;
pub const UNIVERSAL_RESULT_SZ: u8 = 0xAE;
pub const UNIVERSAL_RESULT: u8 = 0xAF;

// Universal opcodes
pub const UNIV_ENTER_TEST: u8 = 0x40;
pub const UNIV_CM_DELTA: u8 = 0x41;
pub const UNIV_GET_DELTA: u8 = 0x42;
pub const UNIV_GET_DELTA_KEY: u8 = 0x43;
pub const UNIV_CM_ABS: u8 = 0x44;
pub const UNIV_GET_ABS: u8 = 0x45;
pub const UNIV_GET_ABS_KEY: u8 = 0x46;
pub const UNIV_EXIT_TEST: u8 = 0x4F;
pub const UNIV_INTENSITY: u8 = 0x70;
pub const UNIV_INTENSITY_KEY: u8 = 0x71;

/// Event code reported in `EVENT_PKT` once the IC has entered test mode.
pub const TEST_MODE_ACK: u8 = 0x0C;

/// Channel byte of a directed node request meaning "all channels of this node".
pub const NODE_WILDCARD: u8 = 0xFF;

/// Reply ceiling for capacitance (CM delta / CM abs) node reads.
pub const CM_REPLY_MAX: usize = 256;
/// Reply ceiling for raw intensity node reads.
pub const INTENSITY_REPLY_MAX: usize = 42;

static_assertions::const_assert!(CM_REPLY_MAX <= u8::MAX as usize + 1);
static_assertions::const_assert!(INTENSITY_REPLY_MAX % 2 == 0);
static_assertions::const_assert!(INTENSITY_REPLY_MAX < CM_REPLY_MAX);
