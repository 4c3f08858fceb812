//! End-to-end request handling: frames in, driver calls, frames out.

use embedded_hal::digital::PinState;
use periph_bridge::rpc::messages::{
    Action, ActionParams, DigitalAction, DigitalConfig, DriverConfig, Level, McuAction, PinMode,
    Registration, Request, RequestPayload, Response, ResponseCode, UartAction, UartConfig,
    UartPort, UartReply, UltrasonicConfig,
};
use periph_bridge::registry::ProfileId;
use periph_bridge::scheduler::TickOutcome;

use crate::mock_hw::{TestController, controller, exchange};

pub fn register(id: u32, config: Option<DriverConfig>) -> Request {
    Request {
        id: 100 + id,
        payload: Some(RequestPayload::Registration(Registration {
            profile_id: id,
            config,
        })),
    }
}

pub fn act(id: u32, params: ActionParams) -> Request {
    Request {
        id: 200 + id,
        payload: Some(RequestPayload::Action(Action {
            profile_id: id,
            params,
        })),
    }
}

pub fn digital(pin: u8, mode: PinMode) -> Option<DriverConfig> {
    Some(DriverConfig::DigitalGeneric(DigitalConfig { pin, mode }))
}

pub fn text(resp: &Response) -> String {
    String::from_utf8_lossy(resp.payload_bytes()).into_owned()
}

fn single(ctrl: &mut TestController, request: &Request) -> Response {
    let mut responses = exchange(ctrl, request);
    assert_eq!(responses.len(), 1, "expected exactly one response: {responses:?}");
    responses.remove(0)
}

#[test]
fn re_registration_moves_profile_to_new_pin() {
    let mut ctrl = controller();

    let r = single(&mut ctrl, &register(1, digital(13, PinMode::Output)));
    assert_eq!((r.code, r.profile_id), (ResponseCode::Done, Some(1)));

    let r = single(
        &mut ctrl,
        &act(1, ActionParams::DigitalGeneric(DigitalAction::Write(Level::High))),
    );
    assert_eq!(r.code, ResponseCode::Done);
    assert_eq!(ctrl.hal().level(13), Some(PinState::High));

    let r = single(&mut ctrl, &register(1, digital(7, PinMode::Output)));
    assert_eq!(r.code, ResponseCode::Done);
    // Old pin released.
    assert_eq!(ctrl.hal().modes.get(&13), Some(&PinMode::Input));

    let r = single(
        &mut ctrl,
        &act(1, ActionParams::DigitalGeneric(DigitalAction::Write(Level::High))),
    );
    assert_eq!(r.code, ResponseCode::Done);
    assert_eq!(ctrl.hal().level(7), Some(PinState::High));
    assert_eq!(ctrl.registry().len(), 1);

    // Pin 13 is free again for another profile.
    let r = single(&mut ctrl, &register(2, digital(13, PinMode::Input)));
    assert_eq!(r.code, ResponseCode::Done);
}

#[test]
fn second_profile_on_same_pin_is_refused() {
    let mut ctrl = controller();
    single(&mut ctrl, &register(1, digital(4, PinMode::Output)));

    let r = single(&mut ctrl, &register(2, digital(4, PinMode::Input)));
    assert_eq!((r.code, r.profile_id), (ResponseCode::Error, Some(2)));
    assert!(text(&r).contains("held by profile 1"), "{}", text(&r));
    assert!(ctrl.registry().lookup(ProfileId::new(2)).is_none());
}

#[test]
fn failed_re_registration_leaves_slot_empty() {
    let mut ctrl = controller();
    single(&mut ctrl, &register(3, digital(5, PinMode::Output)));

    let r = single(&mut ctrl, &register(3, digital(60, PinMode::Output)));
    assert_eq!(r.code, ResponseCode::Error);
    assert!(ctrl.registry().is_empty());

    // Deleting an already-empty slot is harmless.
    let r = single(&mut ctrl, &register(3, digital(61, PinMode::Output)));
    assert_eq!(r.code, ResponseCode::Error);
    assert!(ctrl.registry().is_empty());
}

#[test]
fn action_for_other_driver_kind_is_a_mismatch() {
    let mut ctrl = controller();
    single(&mut ctrl, &register(9, digital(12, PinMode::Output)));

    let r = single(
        &mut ctrl,
        &act(
            9,
            ActionParams::UartTtlGeneric(UartAction {
                command: "AT".try_into().unwrap(),
                reply: UartReply::Ignore,
            }),
        ),
    );
    assert_eq!((r.code, r.profile_id), (ResponseCode::Error, Some(9)));
    assert!(text(&r).contains("no matching registration"), "{}", text(&r));
    assert!(ctrl.hal().sent(UartPort::Uart2).is_empty());
}

#[test]
fn unknown_driver_kind_is_reported() {
    let mut ctrl = controller();
    let r = single(&mut ctrl, &register(4, None));
    assert_eq!((r.code, r.profile_id), (ResponseCode::Error, Some(4)));
    assert_eq!(text(&r), "unknown driver kind");
}

#[test]
fn out_of_range_profile_gets_no_profile_marker() {
    let mut ctrl = controller();
    let r = single(&mut ctrl, &register(256, digital(2, PinMode::Output)));
    assert_eq!((r.code, r.profile_id), (ResponseCode::Error, None));
}

#[test]
fn garbage_frame_gets_error_and_stream_recovers() {
    let mut ctrl = controller();
    // Valid header, payload that is not a request.
    ctrl.transport_mut().push_raw(&[2, 0, 0, 0, 0xFF, 0xFF]);
    ctrl.transport_mut()
        .push_request(&register(1, digital(2, PinMode::Output)));

    let responses = crate::mock_hw::run_until_idle(&mut ctrl);
    assert_eq!(responses.len(), 2);
    assert_eq!((responses[0].code, responses[0].profile_id), (ResponseCode::Error, None));
    assert_eq!(responses[1].code, ResponseCode::Done);
}

#[test]
fn one_frame_is_served_per_tick() {
    let mut ctrl = controller();
    ctrl.transport_mut()
        .push_request(&register(1, digital(2, PinMode::Output)));
    ctrl.transport_mut()
        .push_request(&register(2, digital(4, PinMode::Output)));

    assert_eq!(ctrl.tick(), TickOutcome::Request);
    assert_eq!(ctrl.registry().len(), 1);
    assert_eq!(ctrl.tick(), TickOutcome::Request);
    assert_eq!(ctrl.registry().len(), 2);
    assert_eq!(ctrl.tick(), TickOutcome::Idle);
}

#[test]
fn digital_read_reports_offset_level() {
    let mut ctrl = controller();
    single(&mut ctrl, &register(6, digital(15, PinMode::Input)));
    ctrl.hal_mut().set_level(15, PinState::High);

    let r = single(&mut ctrl, &act(6, ActionParams::DigitalGeneric(DigitalAction::Read)));
    assert_eq!(r.code, ResponseCode::Data);
    assert_eq!(r.payload_bytes(), &[2]);
}

#[test]
fn ranger_reports_distance_in_cm() {
    let mut ctrl = controller();
    single(
        &mut ctrl,
        &register(
            8,
            Some(DriverConfig::UltrasonicSensor(UltrasonicConfig { pin: 25 })),
        ),
    );
    ctrl.hal_mut().echo_us = Some(5800);

    let r = single(&mut ctrl, &act(8, ActionParams::UltrasonicSensor));
    assert_eq!(r.code, ResponseCode::Data);
    assert_eq!(r.payload_bytes(), &100u16.to_be_bytes());

    ctrl.hal_mut().echo_us = None;
    let r = single(&mut ctrl, &act(8, ActionParams::UltrasonicSensor));
    assert_eq!(r.code, ResponseCode::Error);
}

#[test]
fn mcu_reports_version_and_memory() {
    let mut ctrl = controller();
    single(&mut ctrl, &register(0, Some(DriverConfig::McuDriver)));
    ctrl.hal_mut().free = 300;

    let r = single(&mut ctrl, &act(0, ActionParams::McuDriver(McuAction::Version)));
    assert_eq!(text(&r), "v1.0");

    let r = single(&mut ctrl, &act(0, ActionParams::McuDriver(McuAction::FreeMemory)));
    assert_eq!(r.payload_bytes(), &[0x80 | 44, 0x80 | 2, 0x80]);
}

#[test]
fn uart_registration_opens_port() {
    let mut ctrl = controller();
    let r = single(
        &mut ctrl,
        &register(
            20,
            Some(DriverConfig::UartTtlGeneric(UartConfig {
                port: UartPort::Uart3,
                baudrate: 57_600,
            })),
        ),
    );
    assert_eq!(r.code, ResponseCode::Done);
    assert_eq!(ctrl.hal().open_ports.get(&UartPort::Uart3), Some(&57_600));
}
