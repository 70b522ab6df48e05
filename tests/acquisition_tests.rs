use tspfac::bus::ReadyPolicy;
use tspfac::config::FactoryConfig;
use tspfac::regs;
use tspfac::sim::*;
use tspfac::*;

fn config() -> FactoryConfig {
    FactoryConfig {
        ready_policy: ReadyPolicy::MaxPolls(100),
        ..FactoryConfig::default()
    }
}

fn engine(panel: &SimPanel) -> FactoryEngine<SimBus, SimReadyLine, SimIrq> {
    let device = panel.device(&config());
    FactoryEngine::new(
        device,
        Box::new(MemoryFirmware::default()),
        Box::new(SimFlasher::new(panel)),
    )
}

#[test]
fn test_cm_delta_two_by_two_without_keys() {
    let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
    let mut engine = engine(&panel);
    panel.clear_transactions();

    engine.store_cmd("run_cm_delta_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Ok);

    assert_eq!(panel.opcode_count(regs::UNIV_GET_DELTA), 2);
    assert_eq!(panel.opcode_count(regs::UNIV_GET_DELTA_KEY), 0);

    let matrix = engine.run_state().last_matrix().unwrap();
    assert_eq!(matrix.family, DataFamily::CmDelta);
    assert_eq!(matrix.sample_count(), 4);
    assert!(matrix.keys.is_empty());
    for x in 0..2u8 {
        for y in 0..2u8 {
            assert_eq!(
                matrix.get(usize::from(x), usize::from(y)),
                Some(synthetic_sample(DataFamily::CmDelta, x, y))
            );
        }
    }

    assert_eq!(engine.show_result(), "run_cm_delta_read:-5,5");
}

#[test]
fn test_cm_transaction_sequence() {
    let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
    let mut engine = engine(&panel);
    panel.clear_transactions();

    engine.store_cmd("run_cm_abs_read").unwrap();

    use SimTransaction::*;
    assert_eq!(
        panel.transactions(),
        vec![
            Write(regs::UNIVERSAL_CMD, regs::UNIV_ENTER_TEST),
            Read(regs::EVENT_PKT),
            Write(regs::UNIVERSAL_CMD, regs::UNIV_CM_ABS),
            Read(regs::UNIVERSAL_RESULT),
            Block(vec![regs::UNIVERSAL_CMD, regs::UNIV_GET_ABS, regs::NODE_WILDCARD, 0]),
            Read(regs::UNIVERSAL_RESULT_SZ),
            WriteRead(regs::UNIVERSAL_RESULT, 4),
            Block(vec![regs::UNIVERSAL_CMD, regs::UNIV_GET_ABS, regs::NODE_WILDCARD, 1]),
            Read(regs::UNIVERSAL_RESULT_SZ),
            WriteRead(regs::UNIVERSAL_RESULT, 4),
            Write(regs::UNIVERSAL_CMD, regs::UNIV_EXIT_TEST),
        ]
    );
}

#[test]
fn test_key_cycle_after_rows() {
    let panel = SimPanel::with_nodes(2, 3, 2).unwrap();
    let mut engine = engine(&panel);

    engine.store_cmd("run_cm_abs_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Ok);
    assert_eq!(panel.opcode_count(regs::UNIV_GET_ABS), 2);
    assert_eq!(panel.opcode_count(regs::UNIV_GET_ABS_KEY), 1);

    let matrix = engine.run_state().last_matrix().unwrap();
    assert_eq!(matrix.rows.len(), 2);
    assert_eq!(matrix.keys, vec![900, 901]);

    let last_block = panel
        .transactions()
        .into_iter()
        .filter_map(|t| match t {
            SimTransaction::Block(bytes) => Some(bytes),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(
        last_block,
        vec![regs::UNIVERSAL_CMD, regs::UNIV_GET_ABS_KEY, regs::NODE_WILDCARD, 0]
    );
}

#[test]
fn test_touch_keys_disabled_skips_key_cycle() {
    let panel = SimPanel::with_nodes(2, 3, 2).unwrap();
    let config = FactoryConfig {
        touch_keys: false,
        ..config()
    };
    let device = panel.device(&config);
    let mut engine = FactoryEngine::new(
        device,
        Box::new(MemoryFirmware::default()),
        Box::new(SimFlasher::new(&panel)),
    );

    engine.store_cmd("run_cm_delta_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Ok);
    assert_eq!(panel.opcode_count(regs::UNIV_GET_DELTA_KEY), 0);
    assert!(engine.run_state().last_matrix().unwrap().keys.is_empty());
}

#[test]
fn test_decode_boundaries_end_to_end() {
    let panel = SimPanel::with_nodes(1, 3, 0).unwrap();
    panel.set_node_samples(0, vec![i16::MAX, i16::MIN, -1]);
    let mut engine = engine(&panel);

    engine.store_cmd("run_cm_abs_read").unwrap();
    let matrix = engine.run_state().last_matrix().unwrap();
    assert_eq!(matrix.rows, vec![vec![32767, -32768, -1]]);
    assert_eq!(engine.show_result(), "run_cm_abs_read:-32768,32767");
}

#[test]
fn test_short_cm_reply_fails_and_exits() {
    let panel = SimPanel::with_nodes(3, 2, 0).unwrap();
    panel.set_node_samples(1, vec![7]);
    let mut engine = engine(&panel);

    engine.store_cmd("run_cm_delta_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Fail);
    assert_eq!(engine.show_result(), "run_cm_delta_read:NG");

    // Walk stopped at the short node.
    assert_eq!(panel.opcode_count(regs::UNIV_GET_DELTA), 2);
    assert_eq!(panel.opcode_count(regs::UNIV_EXIT_TEST), 1);
    assert!(!panel.in_test_mode());
    assert!(panel.irq_enabled());
    assert!(engine.run_state().last_matrix().is_none());
}

#[test]
fn test_result_size_read_failure_forces_exit() {
    let panel = SimPanel::with_nodes(2, 2, 0).unwrap();
    let mut engine = engine(&panel);
    panel.set_faults(SimFaults {
        fail_read: Some(regs::UNIVERSAL_RESULT_SZ),
        ..SimFaults::default()
    });

    engine.store_cmd("run_cm_abs_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Fail);
    assert_eq!(panel.opcode_count(regs::UNIV_EXIT_TEST), 1);
    assert!(!panel.in_test_mode());
    assert!(panel.irq_enabled());
    assert!(engine.device().interrupts_enabled());
}

#[test]
fn test_intensity_read_skips_test_mode() {
    let panel = SimPanel::with_nodes(2, 3, 2).unwrap();
    let mut engine = engine(&panel);

    engine.store_cmd("run_intensity_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Ok);

    assert_eq!(panel.opcode_count(regs::UNIV_ENTER_TEST), 0);
    assert_eq!(panel.opcode_count(regs::UNIV_EXIT_TEST), 0);
    assert_eq!(panel.opcode_count(regs::UNIV_INTENSITY), 2);
    assert_eq!(panel.opcode_count(regs::UNIV_INTENSITY_KEY), 1);
    assert!(panel.irq_enabled());

    let matrix = engine.run_state().last_matrix().unwrap();
    assert_eq!(matrix.rows, vec![vec![-3, -2, -1], vec![-2, -1, 0]]);
    assert_eq!(matrix.keys, vec![0, 1]);
    assert_eq!(engine.show_result(), "run_intensity_read:-3,0");
}

#[test]
fn test_oversize_intensity_reply_rejected() {
    let panel = SimPanel::with_nodes(2, 3, 0).unwrap();
    panel.set_faults(SimFaults {
        reply_size: Some(44),
        ..SimFaults::default()
    });
    let mut device = panel.device(&config());

    let err = {
        let mut suspended = device.suspend_interrupts();
        assert!(!panel.irq_enabled());
        suspended.acquire(DataFamily::Intensity).unwrap_err()
    };
    assert!(matches!(
        err,
        DeviceError::ReplyTooLarge { size: 44, limit: 42 }
    ));
    assert!(panel.irq_enabled());
    assert!(device.interrupts_enabled());
}

#[test]
fn test_zero_size_intensity_reply_yields_empty_row() {
    let panel = SimPanel::with_nodes(2, 3, 0).unwrap();
    panel.set_faults(SimFaults {
        reply_size: Some(0),
        ..SimFaults::default()
    });
    let mut engine = engine(&panel);

    engine.store_cmd("run_intensity_read").unwrap();
    assert_eq!(engine.run_state().status(), CmdStatus::Ok);
    let matrix = engine.run_state().last_matrix().unwrap();
    assert_eq!(matrix.rows, vec![Vec::<i16>::new(), Vec::new()]);
    assert!(panel
        .transactions()
        .iter()
        .all(|t| !matches!(t, SimTransaction::WriteRead(..))));
    assert_eq!(engine.show_result(), "run_intensity_read:");
}
