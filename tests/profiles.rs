//! Standalone GATT profiles: instance bookkeeping and request routing.

mod common;

use blepass::ble::stack::{GattEvent, ServiceId, StackId, TransactionId};
use blepass::gatt::cts::{CtsConfig, CtsEvent, CurrentTime, CurrentTimeProfile};
use blepass::gatt::gls::{
    GlsEvent, GlucoseCharacteristic, GlucoseFeature, GlucoseProfile, RacpOpcode, RacpResponse, RacpResponseCode,
};
use blepass::gatt::instance::{InstanceId, Lookup};
use blepass::gatt::rtus::{CurrentState, ReferenceTimeUpdateProfile, RtusEvent, TimeUpdateCommand, TimeUpdateState, UpdateResult};
use blepass::gatt::scps::{ScanIntervalWindow, ScanParametersProfile, ScpsEvent};
use blepass::gatt::{uuid, ClientConfig, Dispatch};
use blepass::{AttError, ProfileError};

use common::*;

const RACP_SUCCESS: RacpResponse = RacpResponse::ResponseCode {
    request: RacpOpcode::ReportStoredRecords,
    code: RacpResponseCode::Success,
};

struct Glucose {
    stack: MockStack,
    gls: GlucoseProfile,
    id: InstanceId,
    service: ServiceId,
    racp: u16,
    racp_cccd: u16,
}

fn glucose() -> Glucose {
    let mut stack = MockStack::new();
    let mut gls = GlucoseProfile::new();
    let id = gls
        .initialize_service(&mut stack, Lookup::FirstFree, GlucoseFeature::LOW_BATTERY_DETECTION)
        .unwrap();
    let (service, table) = *stack.services.last().unwrap();
    Glucose {
        racp: value(table, uuid::RECORD_ACCESS_CONTROL_POINT, 0),
        racp_cccd: cccd(table, uuid::RECORD_ACCESS_CONTROL_POINT, 0),
        stack,
        gls,
        id,
        service,
    }
}

impl Glucose {
    fn event(&mut self, event: &GattEvent<'_>) -> Option<GlsEvent> {
        match self.gls.handle_gatt_event(&mut self.stack, event).unwrap() {
            Dispatch::Event((id, event)) => {
                assert_eq!(id, self.id);
                Some(event)
            }
            _ => None,
        }
    }

    fn subscribe_racp(&mut self) {
        let event = write(self.service, self.racp_cccd, &[0x02, 0x00], 1);
        assert_eq!(
            self.event(&event),
            Some(GlsEvent::ClientConfigurationChanged {
                conn: CONN,
                characteristic: GlucoseCharacteristic::RecordAccessControlPoint,
                config: ClientConfig::INDICATE,
            })
        );
    }

    fn confirm(&mut self, txn: TransactionId) -> Option<GlsEvent> {
        let event = GattEvent::Confirmation {
            service: self.service,
            conn: CONN,
            txn,
            status: 0,
        };
        self.event(&event)
    }
}

#[test]
fn racp_request_is_acknowledged_and_forwarded() {
    let mut g = glucose();
    g.subscribe_racp();
    let racp = g.racp;
    let event = g.event(&write(g.service, racp, &[0x01, 0x01], 2));
    let Some(GlsEvent::RacpRequest { command, .. }) = event else {
        panic!("expected a RACP request, got {event:?}");
    };
    assert_eq!(command.opcode, RacpOpcode::ReportStoredRecords);
    assert!(g.stack.write_responses.contains(&TransactionId(2)));
}

#[test]
fn racp_needs_indications_enabled() {
    let mut g = glucose();
    let racp = g.racp;
    assert_eq!(g.event(&write(g.service, racp, &[0x01, 0x01], 2)), None);
    assert_eq!(
        g.stack.error_responses,
        [(TransactionId(2), racp, AttError::CccdImproperlyConfigured)]
    );
}

#[test]
fn racp_rejects_a_second_procedure_but_not_abort() {
    let mut g = glucose();
    g.subscribe_racp();
    let racp = g.racp;
    g.event(&write(g.service, racp, &[0x01, 0x01], 2)).unwrap();

    assert_eq!(g.event(&write(g.service, racp, &[0x04, 0x01], 3)), None);
    assert_eq!(
        g.stack.error_responses.last(),
        Some(&(TransactionId(3), racp, AttError::ProcedureAlreadyInProgress))
    );

    let abort = g.event(&write(g.service, racp, &[0x03, 0x00], 4));
    assert!(matches!(abort, Some(GlsEvent::RacpRequest { command, .. }) if command.opcode == RacpOpcode::AbortOperation));
}

#[test]
fn undecodable_racp_is_acknowledged_and_reported() {
    let mut g = glucose();
    g.subscribe_racp();
    let racp = g.racp;
    let event = g.event(&write(g.service, racp, &[0x01, 0x09], 2));
    assert_eq!(
        event,
        Some(GlsEvent::RacpInvalid {
            conn: CONN,
            opcode: 0x01,
            code: RacpResponseCode::OperatorNotSupported,
        })
    );
    assert!(g.stack.write_responses.contains(&TransactionId(2)));
    assert!(g.stack.error_responses.is_empty());
}

#[test]
fn one_racp_indication_at_a_time() {
    let mut g = glucose();
    g.subscribe_racp();
    g.gls.send_racp_response(&mut g.stack, g.id, CONN, &RACP_SUCCESS).unwrap();
    let (sent, txn) = g.stack.indications[0].clone();
    assert_eq!(sent.value, RACP_SUCCESS.encode());

    assert_eq!(
        g.gls.send_racp_response(&mut g.stack, g.id, CONN, &RACP_SUCCESS),
        Err(ProfileError::IndicationOutstanding)
    );
    assert_eq!(g.stack.indications.len(), 1);

    // a confirmation for some other transaction does not release it
    assert_eq!(g.confirm(TransactionId(txn.0 + 100)), None);
    assert_eq!(
        g.gls.send_racp_response(&mut g.stack, g.id, CONN, &RACP_SUCCESS),
        Err(ProfileError::IndicationOutstanding)
    );

    assert_eq!(g.confirm(txn), Some(GlsEvent::RacpResponseConfirmed { conn: CONN }));
    g.gls
        .send_racp_response(&mut g.stack, g.id, CONN, &RacpResponse::NumberOfRecords(3))
        .unwrap();
    assert_eq!(g.stack.indications.len(), 2);
}

#[test]
fn feature_is_served_from_the_instance() {
    let mut g = glucose();
    let (_, table) = *g.stack.services.last().unwrap();
    let feature = value(table, uuid::GLUCOSE_FEATURE, 0);
    g.event(&read(g.service, feature, 0, 5));
    assert_eq!(g.stack.read_responses, [(TransactionId(5), vec![0x01u8, 0x00])]);

    let stack = MockStack::new();
    g.gls.set_feature(&stack, g.id, GlucoseFeature::MULTIPLE_BOND).unwrap();
    g.event(&read(g.service, feature, 0, 6));
    assert_eq!(g.stack.read_responses[1].1, GlucoseFeature::MULTIPLE_BOND.bits().to_le_bytes());
}

#[test]
fn instance_slots_are_validated() {
    let mut stack = MockStack::new();
    let mut gls = GlucoseProfile::new();
    let feature = GlucoseFeature::empty();

    assert_eq!(
        gls.initialize_service(&mut stack, Lookup::ByIndex(InstanceId(0)), feature),
        Err(ProfileError::InvalidInstance)
    );
    assert_eq!(
        gls.initialize_service(&mut stack, Lookup::ByIndex(InstanceId(3)), feature),
        Err(ProfileError::InvalidInstance)
    );

    let second = gls
        .initialize_service(&mut stack, Lookup::ByIndex(InstanceId(2)), feature)
        .unwrap();
    assert_eq!(second, InstanceId(2));
    assert_eq!(
        gls.initialize_service(&mut stack, Lookup::ByIndex(InstanceId(2)), feature),
        Err(ProfileError::InsufficientResources)
    );
    let first = gls.initialize_service(&mut stack, Lookup::FirstFree, feature).unwrap();
    assert_eq!(first, InstanceId(1));
    assert_eq!(
        gls.initialize_service(&mut stack, Lookup::FirstFree, feature),
        Err(ProfileError::InsufficientResources)
    );

    gls.cleanup_service(&mut stack, first).unwrap();
    assert_eq!(stack.services.len(), 1);
    assert_eq!(gls.initialize_service(&mut stack, Lookup::FirstFree, feature), Ok(first));
}

#[test]
fn stack_id_is_checked() {
    let mut stack = MockStack::new();
    let mut gls = GlucoseProfile::new();
    let id = gls
        .initialize_service(&mut stack, Lookup::FirstFree, GlucoseFeature::empty())
        .unwrap();

    let mut closed = MockStack::new();
    closed.id = StackId(0);
    assert_eq!(
        gls.initialize_service(&mut closed, Lookup::FirstFree, GlucoseFeature::empty()),
        Err(ProfileError::InvalidStackId)
    );
    assert_eq!(
        gls.send_racp_response(&mut closed, id, CONN, &RACP_SUCCESS),
        Err(ProfileError::InvalidStackId)
    );

    let mut other = MockStack::new();
    other.id = StackId(2);
    assert_eq!(
        gls.send_racp_response(&mut other, id, CONN, &RACP_SUCCESS),
        Err(ProfileError::InvalidInstance)
    );
    assert!(other.indications.is_empty());
}

#[test]
fn refused_registration_leaves_the_slot_free() {
    let mut stack = MockStack::new();
    stack.refuse_registration = true;
    let mut gls = GlucoseProfile::new();
    assert_eq!(
        gls.initialize_service(&mut stack, Lookup::FirstFree, GlucoseFeature::empty()),
        Err(ProfileError::InsufficientResources)
    );
    stack.refuse_registration = false;
    assert_eq!(
        gls.initialize_service(&mut stack, Lookup::FirstFree, GlucoseFeature::empty()),
        Ok(InstanceId(1))
    );
}

#[test]
fn events_for_other_services_are_ignored() {
    let mut stack = MockStack::new();
    let mut gls = GlucoseProfile::new();
    gls.initialize_service(&mut stack, Lookup::FirstFree, GlucoseFeature::empty())
        .unwrap();
    let stranger = read(ServiceId(0xFFFF), 1, 0, 1);
    assert_eq!(gls.handle_gatt_event(&mut stack, &stranger).unwrap(), Dispatch::Ignored);
    assert!(stack.error_responses.is_empty());
}

#[test]
fn current_time_reads_go_to_the_application() {
    let mut stack = MockStack::new();
    let mut cts = CurrentTimeProfile::new();
    let id = cts
        .initialize_service(&mut stack, Lookup::FirstFree, &CtsConfig::default())
        .unwrap();
    let (service, table) = *stack.services.last().unwrap();
    let current = value(table, uuid::CURRENT_TIME, 0);

    let dispatched = cts.handle_gatt_event(&mut stack, &read(service, current, 0, 9)).unwrap();
    assert_eq!(
        dispatched,
        Dispatch::Event((
            id,
            CtsEvent::ReadCurrentTime {
                conn: CONN,
                txn: TransactionId(9),
            }
        ))
    );
    let time = CurrentTime::default();
    cts.respond_current_time(&mut stack, id, TransactionId(9), &time).unwrap();
    assert_eq!(stack.read_responses, [(TransactionId(9), time.encode().to_vec())]);

    // a blob read of the application-owned value is refused in place
    cts.handle_gatt_event(&mut stack, &read(service, current, 4, 10)).unwrap();
    assert_eq!(
        stack.error_responses,
        [(TransactionId(10), current, AttError::AttributeNotLong)]
    );
}

#[test]
fn local_time_needs_the_optional_characteristic() {
    let mut stack = MockStack::new();
    let mut cts = CurrentTimeProfile::new();
    let id = cts
        .initialize_service(&mut stack, Lookup::FirstFree, &CtsConfig::default())
        .unwrap();
    assert_eq!(
        cts.set_local_time(&stack, id, Default::default()),
        Err(ProfileError::InvalidParameter)
    );
}

#[test]
fn time_update_commands_are_forwarded() {
    let mut stack = MockStack::new();
    let mut rtus = ReferenceTimeUpdateProfile::new();
    let id = rtus.initialize_service(&mut stack, Lookup::FirstFree).unwrap();
    let (service, table) = *stack.services.last().unwrap();
    let control = value(table, uuid::TIME_UPDATE_CONTROL_POINT, 0);

    let dispatched = rtus.handle_gatt_event(&mut stack, &write_command(service, control, &[0x01])).unwrap();
    assert_eq!(
        dispatched,
        Dispatch::Event((
            id,
            RtusEvent::Command {
                conn: CONN,
                command: TimeUpdateCommand::GetReferenceUpdate,
            }
        ))
    );

    // unknown commands are dropped silently: write without response
    let dispatched = rtus.handle_gatt_event(&mut stack, &write_command(service, control, &[0x07])).unwrap();
    assert_eq!(dispatched, Dispatch::Handled);
    assert!(stack.error_responses.is_empty());

    let pending = TimeUpdateState {
        current_state: CurrentState::UpdatePending,
        result: UpdateResult::Successful,
    };
    rtus.set_state(&stack, id, pending).unwrap();
    assert_eq!(rtus.state(&stack, id), Ok(pending));
    let state = value(table, uuid::TIME_UPDATE_STATE, 0);
    rtus.handle_gatt_event(&mut stack, &read(service, state, 0, 3)).unwrap();
    assert_eq!(stack.read_responses, [(TransactionId(3), vec![0x01u8, 0x00])]);
}

#[test]
fn scan_parameters_are_range_checked() {
    let mut stack = MockStack::new();
    let mut scps = ScanParametersProfile::new();
    let id = scps.initialize_service(&mut stack, Lookup::FirstFree).unwrap();
    let (service, table) = *stack.services.last().unwrap();
    let siw = value(table, uuid::SCAN_INTERVAL_WINDOW, 0);

    let dispatched = scps
        .handle_gatt_event(&mut stack, &write_command(service, siw, &[0x10, 0x00, 0x08, 0x00]))
        .unwrap();
    assert_eq!(
        dispatched,
        Dispatch::Event((
            id,
            ScpsEvent::ScanIntervalWindowChanged {
                conn: CONN,
                value: ScanIntervalWindow {
                    interval: 0x10,
                    window: 0x08,
                },
            }
        ))
    );

    // window wider than the interval
    let dispatched = scps
        .handle_gatt_event(&mut stack, &write_command(service, siw, &[0x08, 0x00, 0x10, 0x00]))
        .unwrap();
    assert_eq!(dispatched, Dispatch::Handled);

    scps.notify_scan_refresh(&mut stack, id, CONN).unwrap();
    assert_eq!(stack.notifications[0].value, [0x00]);
}
