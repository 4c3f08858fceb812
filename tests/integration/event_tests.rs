//! Event arming, polling order and the blocking/evented UART paths.

use embedded_hal::digital::PinState;
use periph_bridge::config::ControllerConfig;
use periph_bridge::registry::ProfileId;
use periph_bridge::rpc::messages::{
    ActionParams, DigitalAction, DriverConfig, Level, Microstep, PinMode, ResponseCode, StepAction,
    StepMotorConfig, UartAction, UartConfig, UartPort, UartReply,
};
use periph_bridge::scheduler::TickOutcome;

use crate::controller_tests::{act, digital, register, text};
use crate::mock_hw::{MockStore, TestController, controller, controller_with, exchange, run_until_idle};

fn wait_for(level: Level) -> ActionParams {
    ActionParams::DigitalGeneric(DigitalAction::ReadOnLevel(level))
}

fn uart(command: &str, reply: UartReply) -> ActionParams {
    ActionParams::UartTtlGeneric(UartAction {
        command: command.try_into().unwrap(),
        reply,
    })
}

fn with_uart(ctrl: &mut TestController, id: u32) {
    let r = exchange(
        ctrl,
        &register(
            id,
            Some(DriverConfig::UartTtlGeneric(UartConfig {
                port: UartPort::Uart2,
                baudrate: 9600,
            })),
        ),
    );
    assert_eq!(r[0].code, ResponseCode::Done);
}

#[test]
fn armed_events_fire_before_queued_requests_in_id_order() {
    let mut ctrl = controller();
    for (id, pin) in [(5, 18), (3, 19)] {
        exchange(&mut ctrl, &register(id, digital(pin, PinMode::Input)));
        let r = exchange(&mut ctrl, &act(id, wait_for(Level::High)));
        assert_eq!(r[0].code, ResponseCode::Ack);
    }
    assert!(ctrl.registry().is_armed(ProfileId::new(3)));
    assert!(ctrl.registry().is_armed(ProfileId::new(5)));

    ctrl.hal_mut().set_level(18, PinState::High);
    ctrl.hal_mut().set_level(19, PinState::High);
    ctrl.transport_mut()
        .push_request(&act(5, ActionParams::DigitalGeneric(DigitalAction::Read)));

    assert_eq!(ctrl.tick(), TickOutcome::Event(ProfileId::new(3)));
    assert_eq!(ctrl.tick(), TickOutcome::Event(ProfileId::new(5)));
    assert_eq!(ctrl.tick(), TickOutcome::Request);

    let responses = ctrl.transport_mut().take_responses();
    let order: Vec<_> = responses.iter().map(|r| (r.code, r.profile_id)).collect();
    assert_eq!(
        order,
        vec![
            (ResponseCode::Data, Some(3)),
            (ResponseCode::Data, Some(5)),
            (ResponseCode::Data, Some(5)),
        ]
    );
    assert!(!ctrl.registry().has_armed());
}

#[test]
fn event_fires_exactly_once() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(1, digital(21, PinMode::InputPullup)));
    ctrl.hal_mut().set_level(21, PinState::High);
    let r = exchange(&mut ctrl, &act(1, wait_for(Level::Low)));
    assert_eq!(r.len(), 1, "nothing fires while the pin idles high");

    ctrl.hal_mut().set_level(21, PinState::Low);
    let r = run_until_idle(&mut ctrl);
    assert_eq!(r.len(), 1);
    assert_eq!(r[0].payload_bytes(), &[1]);

    assert_eq!(ctrl.tick(), TickOutcome::Idle);
}

#[test]
fn re_registration_drops_pending_event() {
    let mut ctrl = controller();
    exchange(&mut ctrl, &register(2, digital(22, PinMode::Input)));
    exchange(&mut ctrl, &act(2, wait_for(Level::High)));
    assert!(ctrl.registry().has_armed());

    exchange(&mut ctrl, &register(2, digital(23, PinMode::Input)));
    assert!(!ctrl.registry().has_armed());

    ctrl.hal_mut().set_level(22, PinState::High);
    ctrl.hal_mut().set_level(23, PinState::High);
    assert!(run_until_idle(&mut ctrl).is_empty());
}

#[test]
fn blocking_uart_read_returns_line() {
    let mut ctrl = controller();
    with_uart(&mut ctrl, 10);
    ctrl.hal_mut()
        .uart_reply
        .insert(UartPort::Uart2, b"OK 42\r\n".to_vec());

    let r = exchange(&mut ctrl, &act(10, uart("READ?", UartReply::Blocking)));
    assert_eq!(r.len(), 1);
    assert_eq!((r[0].code, r[0].profile_id), (ResponseCode::Data, Some(10)));
    assert_eq!(r[0].payload_bytes(), b"OK 42");
    assert_eq!(ctrl.hal().sent(UartPort::Uart2), b"READ?\n");
}

#[test]
fn blocking_uart_read_times_out() {
    let config = ControllerConfig {
        uart_read_timeout_ms: 50,
        ..Default::default()
    };
    let mut ctrl = controller_with(config, MockStore::default());
    with_uart(&mut ctrl, 11);

    let before = ctrl.hal().now_us;
    let r = exchange(&mut ctrl, &act(11, uart("PING", UartReply::Blocking)));
    assert_eq!((r[0].code, r[0].profile_id), (ResponseCode::Error, Some(11)));
    assert!(text(&r[0]).contains("timed out"), "{}", text(&r[0]));
    assert!(ctrl.hal().now_us - before >= 50_000);
}

#[test]
fn overlong_uart_reply_overflows() {
    let mut ctrl = controller();
    with_uart(&mut ctrl, 12);
    ctrl.hal_mut()
        .uart_reply
        .insert(UartPort::Uart2, vec![b'x'; 100]);

    let r = exchange(&mut ctrl, &act(12, uart("DUMP", UartReply::Blocking)));
    assert_eq!(r[0].code, ResponseCode::Error);
    assert!(text(&r[0]).contains("overflow"), "{}", text(&r[0]));
}

#[test]
fn evented_uart_reply_arrives_later() {
    let mut ctrl = controller();
    with_uart(&mut ctrl, 13);

    let r = exchange(&mut ctrl, &act(13, uart("MEASURE", UartReply::Event)));
    assert_eq!(r[0].code, ResponseCode::Ack);
    assert!(run_until_idle(&mut ctrl).is_empty());

    ctrl.hal_mut()
        .uart_rx
        .entry(UartPort::Uart2)
        .or_default()
        .extend(b"21.5\n");
    let r = run_until_idle(&mut ctrl);
    assert_eq!(r.len(), 1);
    assert_eq!((r[0].code, r[0].profile_id), (ResponseCode::Data, Some(13)));
    assert_eq!(r[0].payload_bytes(), b"21.5");
}

#[test]
fn fire_and_forget_uart_is_done() {
    let mut ctrl = controller();
    with_uart(&mut ctrl, 14);
    let r = exchange(&mut ctrl, &act(14, uart("LED ON", UartReply::Ignore)));
    assert_eq!(r[0].code, ResponseCode::Done);
    assert!(!ctrl.registry().has_armed());
}

#[test]
fn paced_steps_complete_through_events() {
    let mut ctrl = controller();
    let config = StepMotorConfig {
        step_pin: 26,
        dir_pin: 27,
        ms_pins: [32, 33, 25],
        microstep: Microstep::Half,
    };
    let r = exchange(&mut ctrl, &register(30, Some(DriverConfig::StepMotor(config))));
    assert_eq!(r[0].code, ResponseCode::Done);

    let r = exchange(
        &mut ctrl,
        &act(
            30,
            ActionParams::StepMotor(StepAction::Steps {
                steps: 3,
                min_interval_ms: 10,
                wait: false,
            }),
        ),
    );
    assert_eq!(r[0].code, ResponseCode::Ack);

    let mut events = Vec::new();
    for _ in 0..10 {
        ctrl.hal_mut().now_us += 10_000;
        events.extend(run_until_idle(&mut ctrl));
    }
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].code, events[0].profile_id), (ResponseCode::Data, Some(30)));
    assert!(events[0].payload_bytes().is_empty());
    assert!(!ctrl.registry().has_armed());
}
