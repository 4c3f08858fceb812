//! Persistence through NVS records and the boot-time restore phase.

use embedded_hal::digital::PinState;
use periph_bridge::adapters::nvs::PROFILE_NAMESPACE;
use periph_bridge::app::ports::StoragePort;
use periph_bridge::config::ControllerConfig;
use periph_bridge::registry::ProfileId;
use periph_bridge::rpc::messages::{
    ActionParams, DigitalAction, Level, PinMode, Registration, ResponseCode,
};

use crate::controller_tests::{act, digital, register, text};
use crate::mock_hw::{MockStore, controller, controller_with, exchange, flash, run_until_idle};

#[test]
fn registrations_survive_reboot_silently() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(4, digital(13, PinMode::Output)));
    exchange(&mut ctrl, &register(1, digital(14, PinMode::Input)));

    let mut rebooted = controller_with(ControllerConfig::default(), flash(&ctrl));
    assert_eq!(rebooted.start(), 2);

    let boot = run_until_idle(&mut rebooted);
    assert_eq!(boot.len(), 1, "restore must not emit per-profile responses");
    assert_eq!((boot[0].code, boot[0].profile_id), (ResponseCode::Debug, None));
    assert_eq!(text(&boot[0]), "controller v1.0 ready, 2 profiles restored");

    let r = exchange(
        &mut rebooted,
        &act(4, ActionParams::DigitalGeneric(DigitalAction::Write(Level::High))),
    );
    assert_eq!(r[0].code, ResponseCode::Done);
    assert_eq!(rebooted.hal().level(13), Some(PinState::High));
}

#[test]
fn latest_registration_wins_after_reboot() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(1, digital(13, PinMode::Output)));
    exchange(&mut ctrl, &register(1, digital(7, PinMode::Output)));

    let mut rebooted = controller_with(ControllerConfig::default(), flash(&ctrl));
    rebooted.start();
    let restored = rebooted.registry().lookup(ProfileId::new(1)).cloned();
    assert_eq!(
        restored,
        Some(Registration {
            profile_id: 1,
            config: digital(7, PinMode::Output),
        })
    );
}

#[test]
fn failed_registration_erases_stale_record() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(2, digital(13, PinMode::Output)));
    let r = exchange(&mut ctrl, &register(2, digital(99, PinMode::Output)));
    assert_eq!(r[0].code, ResponseCode::Error);

    assert!(!flash(&ctrl).exists(PROFILE_NAMESPACE, "p2"));
}

#[test]
fn unrestorable_record_is_dropped() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(1, digital(13, PinMode::Output)));
    exchange(&mut ctrl, &register(2, digital(14, PinMode::Output)));

    // Profile 3 claims a pin already held by profile 1.
    let mut store = flash(&ctrl);
    let mut buf = [0u8; 64];
    let record = Registration {
        profile_id: 3,
        config: digital(13, PinMode::Input),
    };
    let bytes = postcard::to_slice(&record, &mut buf).unwrap();
    store.write(PROFILE_NAMESPACE, "p3", bytes).unwrap();

    let mut rebooted = controller_with(ControllerConfig::default(), store);
    assert_eq!(rebooted.start(), 2);
    assert!(rebooted.registry().lookup(ProfileId::new(3)).is_none());
    assert!(!flash(&rebooted).exists(PROFILE_NAMESPACE, "p3"));

    let boot = run_until_idle(&mut rebooted);
    assert_eq!(boot.len(), 1);
    assert_eq!(boot[0].code, ResponseCode::Debug);
}

#[test]
fn restore_can_be_disabled() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(1, digital(13, PinMode::Output)));

    let config = ControllerConfig {
        restore_on_boot: false,
        ..Default::default()
    };
    let mut rebooted = controller_with(config, flash(&ctrl));
    assert_eq!(rebooted.start(), 0);
    assert!(rebooted.registry().is_empty());
    // Records stay on flash for a later boot.
    assert!(flash(&rebooted).exists(PROFILE_NAMESPACE, "p1"));
}

#[test]
fn storage_failure_does_not_fail_registration() {
    let store = MockStore {
        fail_writes: true,
        ..Default::default()
    };
    let mut ctrl = controller_with(ControllerConfig::default(), store);
    let r = exchange(&mut ctrl, &register(5, digital(13, PinMode::Output)));
    assert_eq!(r.len(), 1);
    assert_eq!(r[0].code, ResponseCode::Done);
    assert_eq!(ctrl.registry().len(), 1);
}
