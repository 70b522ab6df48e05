use tspfac::bus::{ReadyPolicy, RegisterBus};
use tspfac::config::FactoryConfig;
use tspfac::device::InputLock;
use tspfac::firmware::{FirmwareError, FirmwareFlasher};
use tspfac::registry::PendingInvocation;
use tspfac::regs;
use tspfac::sim::*;
use tspfac::*;

const BUILTIN_SIZE: usize = 1000;
const UMS_SIZE: usize = 640;

fn engine_with(panel: &SimPanel, firmware: MemoryFirmware) -> FactoryEngine<SimBus, SimReadyLine, SimIrq> {
    let config = FactoryConfig {
        ready_policy: ReadyPolicy::MaxPolls(100),
        ..FactoryConfig::default()
    };
    let device = panel.device(&config);
    FactoryEngine::new(device, Box::new(firmware), Box::new(SimFlasher::new(panel)))
}

fn engine(panel: &SimPanel) -> FactoryEngine<SimBus, SimReadyLine, SimIrq> {
    engine_with(
        panel,
        MemoryFirmware {
            builtin: Some(vec![0xA5; BUILTIN_SIZE]),
            ums: Some(vec![0x5A; UMS_SIZE]),
        },
    )
}

fn run(engine: &mut FactoryEngine<SimBus, SimReadyLine, SimIrq>, line: &str) -> (CmdStatus, String) {
    assert_eq!(engine.store_cmd(line).unwrap(), line.len());
    let status = engine.run_state().status();
    (status, engine.show_result())
}

#[test]
fn test_threshold_read() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    panel.set_threshold(42);
    let mut engine = engine(&panel);

    assert_eq!(run(&mut engine, "get_threshold"), (CmdStatus::Ok, "get_threshold:42".to_string()));
}

#[test]
fn test_threshold_read_failure() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);
    panel.set_faults(SimFaults {
        fail_read: Some(regs::THRESHOLD),
        ..SimFaults::default()
    });

    assert_eq!(run(&mut engine, "get_threshold"), (CmdStatus::Fail, "get_threshold:NG".to_string()));
}

#[test]
fn test_node_counts_use_cached_geometry() {
    let panel = SimPanel::with_nodes(20, 12, 2).unwrap();
    let mut engine = engine(&panel);
    panel.clear_transactions();

    assert_eq!(run(&mut engine, "get_x_num"), (CmdStatus::Ok, "get_x_num:20".to_string()));
    assert_eq!(run(&mut engine, "get_y_num"), (CmdStatus::Ok, "get_y_num:12".to_string()));
    assert!(panel.transactions().is_empty());
}

#[test]
fn test_unsupported_commands() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);
    panel.clear_transactions();

    for line in ["module_off_master", "module_on_slave", "get_chip_vendor", "not_support_cmd"] {
        let (status, result) = run(&mut engine, line);
        assert_eq!(status, CmdStatus::NotApplicable);
        assert_eq!(result, format!("{}:NA", line));
    }
    assert!(panel.transactions().is_empty());
}

#[test]
fn test_unknown_command_result_keeps_params() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);

    assert_eq!(
        run(&mut engine, "get_reference,3,4\n"),
        (CmdStatus::NotApplicable, "get_reference,3,4:NA".to_string())
    );
}

#[test]
fn test_fw_update_builtin_and_ums() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);

    assert_eq!(run(&mut engine, "fw_update"), (CmdStatus::Ok, "fw_update:OK".to_string()));
    assert_eq!(run(&mut engine, "fw_update,1"), (CmdStatus::Ok, "fw_update,1:OK".to_string()));
    assert_eq!(panel.flashed(), vec![BUILTIN_SIZE, UMS_SIZE]);
    assert!(panel.irq_enabled());
    assert!(engine.device().interrupts_enabled());
}

#[test]
fn test_fw_update_invalid_source() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);

    assert_eq!(run(&mut engine, "fw_update,2"), (CmdStatus::Fail, "fw_update,2:NG".to_string()));
    assert_eq!(run(&mut engine, "fw_update,-1"), (CmdStatus::Fail, "fw_update,-1:NG".to_string()));
    assert!(panel.flashed().is_empty());
    assert!(panel.irq_enabled());
}

#[test]
fn test_fw_update_missing_image() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine_with(&panel, MemoryFirmware::default());

    assert_eq!(run(&mut engine, "fw_update,1"), (CmdStatus::Fail, "fw_update,1:NG".to_string()));
    assert!(panel.irq_enabled());
}

#[test]
fn test_fw_update_flash_failure() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);
    panel.set_faults(SimFaults {
        flash_fail: true,
        ..SimFaults::default()
    });

    assert_eq!(run(&mut engine, "fw_update,0"), (CmdStatus::Fail, "fw_update,0:NG".to_string()));
    assert!(panel.irq_enabled());
}

#[test]
fn test_fw_update_requires_enabled_device() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let mut engine = engine(&panel);
    engine.device_mut().set_enabled(false);

    let invocation = PendingInvocation::parse("fw_update,0").unwrap();
    let state = engine.run_state();
    assert!(state.try_begin(&invocation.line));
    assert_eq!(engine.execute(&invocation), CmdStatus::Fail);
    assert_eq!(state.consume_result(), "fw_update,0:NG");
    assert!(panel.flashed().is_empty());
}

struct LockCheckingFlasher {
    lock: InputLock,
}

impl FirmwareFlasher for LockCheckingFlasher {
    fn flash(&mut self, _bus: &mut dyn RegisterBus, _image: &[u8]) -> Result<(), FirmwareError> {
        if self.lock.try_lock().is_ok() {
            return Err(FirmwareError::Flash("input lock not held".to_string()));
        }
        Ok(())
    }
}

#[test]
fn test_fw_update_holds_input_lock() {
    let panel = SimPanel::with_nodes(4, 3, 0).unwrap();
    let device = panel.device(&FactoryConfig::default());
    let lock = device.input_lock();
    let mut engine = FactoryEngine::new(
        device,
        Box::new(MemoryFirmware {
            builtin: Some(vec![1, 2, 3]),
            ums: None,
        }),
        Box::new(LockCheckingFlasher { lock: lock.clone() }),
    );

    assert_eq!(run(&mut engine, "fw_update"), (CmdStatus::Ok, "fw_update:OK".to_string()));
    assert!(lock.try_lock().is_ok());
}
