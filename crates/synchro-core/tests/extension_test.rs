//! Dispatcher tests
//!
//! Drive `SyncExtension::dispatch` with raw request bodies and check the
//! decoded responses, including concurrent awaits woken by other clients.

use std::{sync::Arc, time::Duration};

use synchro_core::{
    ClientState, Environment, ExtensionConfig, RequestContext, SyncExtension, SyncResponse,
};
use synchro_proto::{
    CounterNotify, ErrorCode, ErrorReport, Event, Opcode, Reply, SERVERTIME_ID, TestType,
    ValueType, WaitCondition, encode_wait_condition,
};
use tokio::task::JoinHandle;

// Clock backed by tokio's (pausable) time source.
#[derive(Clone)]
struct TestEnv {
    epoch: std::time::Instant,
}

impl TestEnv {
    fn new() -> Self {
        Self { epoch: tokio::time::Instant::now().into_std() }
    }
}

impl Environment for TestEnv {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn reset_epoch(&self) -> std::time::Instant {
        self.epoch
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

type Extension = Arc<SyncExtension<TestEnv>>;

fn extension() -> Extension {
    Arc::new(SyncExtension::initialize(TestEnv::new(), ExtensionConfig::default()))
}

fn ctx(opcode: Opcode) -> RequestContext {
    RequestContext { major_opcode: 130, minor_opcode: opcode.to_u8(), sequence: 1 }
}

async fn send(ext: &Extension, opcode: Opcode, body: &[u8]) -> Option<SyncResponse> {
    let mut client = ClientState::new();
    ext.dispatch(&mut client, ctx(opcode), body).await
}

fn spawn_request(ext: &Extension, opcode: Opcode, body: Vec<u8>) -> JoinHandle<Option<SyncResponse>> {
    let ext = Arc::clone(ext);
    tokio::spawn(async move {
        let mut client = ClientState::new();
        ext.dispatch(&mut client, ctx(opcode), &body).await
    })
}

async fn wait_for_counter_waiters(ext: &Extension, count: usize) {
    while ext.counters().waiter_count() < count {
        tokio::task::yield_now().await;
    }
}

async fn wait_for_fence_waiters(ext: &Extension, count: usize) {
    while ext.fences().waiter_count() < count {
        tokio::task::yield_now().await;
    }
}

fn id_body(id: u32) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn counter_body(id: u32, value: i64) -> Vec<u8> {
    let mut body = id.to_be_bytes().to_vec();
    body.extend_from_slice(&value.to_be_bytes());
    body
}

fn fence_body(drawable: u32, id: u32, triggered: bool) -> Vec<u8> {
    let mut body = drawable.to_be_bytes().to_vec();
    body.extend_from_slice(&id.to_be_bytes());
    body.extend_from_slice(&[u8::from(triggered), 0, 0, 0]);
    body
}

fn await_body(conditions: &[WaitCondition]) -> Vec<u8> {
    conditions.iter().flat_map(encode_wait_condition).collect()
}

fn condition(counter: u32, test_type: TestType, wait_value: i64) -> WaitCondition {
    WaitCondition {
        counter,
        value_type: ValueType::Absolute,
        wait_value,
        test_type,
        event_threshold: 0,
    }
}

async fn create_counter(ext: &Extension, id: u32, value: i64) {
    assert_eq!(send(ext, Opcode::CreateCounter, &counter_body(id, value)).await, None);
}

async fn query_counter(ext: &Extension, id: u32) -> i64 {
    match send(ext, Opcode::QueryCounter, &id_body(id)).await {
        Some(SyncResponse::Reply(Reply::QueryCounter { value })) => value,
        other => panic!("expected QueryCounter reply, got {other:?}"),
    }
}

fn error(response: Option<SyncResponse>) -> ErrorReport {
    match response {
        Some(SyncResponse::Error(report)) => report,
        other => panic!("expected error, got {other:?}"),
    }
}

fn counter_notify(response: Option<SyncResponse>) -> CounterNotify {
    match response {
        Some(SyncResponse::Event(Event::CounterNotify(notify))) => notify,
        other => panic!("expected CounterNotify, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_echoes_version() {
    let ext = extension();
    let mut client = ClientState::new();

    let response = ext.dispatch(&mut client, ctx(Opcode::Initialize), &[3, 1, 0, 0]).await;

    assert_eq!(response, Some(SyncResponse::Reply(Reply::Initialize { major: 3, minor: 1 })));
    assert_eq!(client.negotiated_version(), Some((3, 1)));
}

#[tokio::test]
async fn list_system_counters_reports_servertime() {
    let ext = extension();

    let Some(SyncResponse::Reply(Reply::ListSystemCounters(counters))) =
        send(&ext, Opcode::ListSystemCounters, &[]).await
    else {
        panic!("expected ListSystemCounters reply");
    };

    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].id, SERVERTIME_ID);
    assert_eq!(counters[0].name.as_ref(), b"SERVERTIME");
}

#[tokio::test]
async fn create_query_destroy_counter() {
    let ext = extension();
    create_counter(&ext, 0x100, 42).await;

    assert_eq!(query_counter(&ext, 0x100).await, 42);
    assert_eq!(
        send(&ext, Opcode::DestroyCounter, &id_body(0x100)).await,
        Some(SyncResponse::Reply(Reply::DestroyCounter { value: 42 }))
    );

    let report = error(send(&ext, Opcode::QueryCounter, &id_body(0x100)).await);
    assert_eq!(report.code, ErrorCode::Counter);
    assert_eq!(report.bad_value, 0x100);
    assert_eq!(report.minor_opcode, u16::from(Opcode::QueryCounter.to_u8()));
}

#[tokio::test]
async fn duplicate_counter_is_id_choice() {
    let ext = extension();
    create_counter(&ext, 7, 1).await;

    let report = error(send(&ext, Opcode::CreateCounter, &counter_body(7, 2)).await);
    assert_eq!(report.code, ErrorCode::IdChoice);
    assert_eq!(report.bad_value, 7);
    assert_eq!(query_counter(&ext, 7).await, 1);
}

#[tokio::test]
async fn set_and_change_counter() {
    let ext = extension();
    create_counter(&ext, 5, i64::MAX).await;

    assert_eq!(send(&ext, Opcode::ChangeCounter, &counter_body(5, 1)).await, None);
    assert_eq!(query_counter(&ext, 5).await, i64::MIN);

    assert_eq!(send(&ext, Opcode::SetCounter, &counter_body(5, -3)).await, None);
    assert_eq!(query_counter(&ext, 5).await, -3);
}

#[tokio::test]
async fn unknown_counter_updates_fail() {
    let ext = extension();

    for opcode in [Opcode::SetCounter, Opcode::ChangeCounter] {
        let report = error(send(&ext, opcode, &counter_body(0x55, 1)).await);
        assert_eq!(report.code, ErrorCode::Counter);
        assert_eq!(report.bad_value, 0x55);
    }
    let report = error(send(&ext, Opcode::DestroyCounter, &id_body(0x55)).await);
    assert_eq!(report.code, ErrorCode::Counter);
}

#[tokio::test]
async fn servertime_is_read_only() {
    let ext = extension();

    for opcode in [Opcode::SetCounter, Opcode::ChangeCounter] {
        let report = error(send(&ext, opcode, &counter_body(SERVERTIME_ID, 0)).await);
        assert_eq!(report.code, ErrorCode::Access);
        assert_eq!(report.bad_value, SERVERTIME_ID);
    }

    let report = error(send(&ext, Opcode::DestroyCounter, &id_body(SERVERTIME_ID)).await);
    assert_eq!(report.code, ErrorCode::Access);
    assert!(ext.counters().contains(&SERVERTIME_ID));

    let report = error(send(&ext, Opcode::CreateCounter, &counter_body(SERVERTIME_ID, 0)).await);
    assert_eq!(report.code, ErrorCode::IdChoice);
}

#[tokio::test(start_paused = true)]
async fn servertime_tracks_clock() {
    let ext = extension();

    let before = query_counter(&ext, SERVERTIME_ID).await;
    tokio::time::advance(Duration::from_millis(250)).await;
    let after = query_counter(&ext, SERVERTIME_ID).await;

    assert_eq!(after - before, 250);
}

#[tokio::test]
async fn short_bodies_are_length_errors() {
    let ext = extension();

    let cases: [(Opcode, Vec<u8>); 6] = [
        (Opcode::Initialize, vec![3]),
        (Opcode::CreateCounter, vec![0; 8]),
        (Opcode::QueryCounter, vec![0; 3]),
        (Opcode::Await, vec![0; 27]),
        (Opcode::CreateFence, vec![0; 8]),
        (Opcode::AwaitFence, vec![]),
    ];

    for (opcode, body) in cases {
        let report = error(send(&ext, opcode, &body).await);
        assert_eq!(report.code, ErrorCode::Length, "{opcode:?}");
        assert_eq!(report.bad_value, 0);
        assert_eq!(report.minor_opcode, u16::from(opcode.to_u8()));
    }
}

#[tokio::test]
async fn length_error_leaves_state_untouched() {
    let ext = extension();
    create_counter(&ext, 1000, 9).await;

    let mut body = counter_body(1000, 50);
    body.push(0);
    let report = error(send(&ext, Opcode::SetCounter, &body).await);

    assert_eq!(report.code, ErrorCode::Length);
    assert_eq!(query_counter(&ext, 1000).await, 9);
}

#[tokio::test]
async fn alarm_and_priority_requests_are_unimplemented() {
    let ext = extension();

    for minor in 8..=13 {
        let mut client = ClientState::new();
        let request = RequestContext { major_opcode: 130, minor_opcode: minor, sequence: 4 };
        let report = error(ext.dispatch(&mut client, request, &[0; 8]).await);
        assert_eq!(report.code, ErrorCode::Implementation);
        assert_eq!(report.minor_opcode, u16::from(minor));
    }

    let mut client = ClientState::new();
    let request = RequestContext { major_opcode: 130, minor_opcode: 42, sequence: 4 };
    let report = error(ext.dispatch(&mut client, request, &[]).await);
    assert_eq!(report.code, ErrorCode::Implementation);
}

#[tokio::test]
async fn invalid_test_type_is_value_error() {
    let ext = extension();
    create_counter(&ext, 3, 0).await;

    let mut body = await_body(&[condition(3, TestType::PositiveComparison, 0)]);
    // test-type field sits after counter, value-type and wait value.
    body[16..20].copy_from_slice(&7u32.to_be_bytes());

    let report = error(send(&ext, Opcode::Await, &body).await);
    assert_eq!(report.code, ErrorCode::Value);
    assert_eq!(report.bad_value, 7);
}

#[tokio::test]
async fn fence_lifecycle() {
    let ext = extension();
    let query = |ext: Extension| async move {
        match send(&ext, Opcode::QueryFence, &id_body(0x20)).await {
            Some(SyncResponse::Reply(Reply::QueryFence { triggered })) => triggered,
            other => panic!("expected QueryFence reply, got {other:?}"),
        }
    };

    assert_eq!(send(&ext, Opcode::CreateFence, &fence_body(1, 0x20, false)).await, None);
    assert!(!query(Arc::clone(&ext)).await);

    assert_eq!(send(&ext, Opcode::TriggerFence, &id_body(0x20)).await, None);
    assert!(query(Arc::clone(&ext)).await);

    assert_eq!(send(&ext, Opcode::ResetFence, &id_body(0x20)).await, None);
    assert!(!query(Arc::clone(&ext)).await);

    assert_eq!(send(&ext, Opcode::DestroyFence, &id_body(0x20)).await, None);
    let report = error(send(&ext, Opcode::QueryFence, &id_body(0x20)).await);
    assert_eq!(report.code, ErrorCode::Counter);
    assert_eq!(report.bad_value, 0x20);
}

#[tokio::test]
async fn fence_created_triggered() {
    let ext = extension();
    send(&ext, Opcode::CreateFence, &fence_body(1, 8, true)).await;

    assert_eq!(
        send(&ext, Opcode::QueryFence, &id_body(8)).await,
        Some(SyncResponse::Reply(Reply::QueryFence { triggered: true }))
    );
    let report = error(send(&ext, Opcode::CreateFence, &fence_body(1, 8, false)).await);
    assert_eq!(report.code, ErrorCode::IdChoice);
}

#[tokio::test]
async fn counters_and_fences_have_separate_ids() {
    let ext = extension();
    create_counter(&ext, 9, 0).await;

    assert_eq!(send(&ext, Opcode::CreateFence, &fence_body(0, 9, false)).await, None);
    assert_eq!(query_counter(&ext, 9).await, 0);
}

#[tokio::test]
async fn await_without_conditions_returns_nothing() {
    let ext = extension();
    assert_eq!(send(&ext, Opcode::Await, &[]).await, None);
}

#[tokio::test]
async fn await_satisfied_immediately() {
    let ext = extension();
    create_counter(&ext, 10, 10).await;

    let body = await_body(&[condition(10, TestType::PositiveComparison, 10)]);
    let notify = counter_notify(send(&ext, Opcode::Await, &body).await);

    assert_eq!(notify.counter, 10);
    assert_eq!(notify.wait_value, 10);
    assert_eq!(notify.counter_value, 10);
    assert_eq!(notify.count, 0);
    assert!(!notify.destroyed);
}

#[tokio::test]
async fn await_unknown_counter_is_error() {
    let ext = extension();
    let body = await_body(&[condition(0x99, TestType::PositiveComparison, 1)]);

    let report = error(send(&ext, Opcode::Await, &body).await);
    assert_eq!(report.code, ErrorCode::Counter);
    assert_eq!(report.bad_value, 0x99);
    assert_eq!(ext.counters().waiter_count(), 0);
}

#[tokio::test]
async fn await_unblocks_when_counter_reaches_target() {
    let ext = extension();
    create_counter(&ext, 10, 0).await;

    let mut handle = spawn_request(
        &ext,
        Opcode::Await,
        await_body(&[condition(10, TestType::PositiveComparison, 10)]),
    );
    wait_for_counter_waiters(&ext, 1).await;

    send(&ext, Opcode::SetCounter, &counter_body(10, 5)).await;
    let still_waiting = tokio::time::timeout(Duration::from_millis(20), &mut handle).await;
    assert!(still_waiting.is_err(), "await must not resolve below the target");

    send(&ext, Opcode::ChangeCounter, &counter_body(10, 5)).await;
    let notify = counter_notify(handle.await.unwrap());

    assert_eq!(notify.counter_value, 10);
    assert!(!notify.destroyed);
    assert_eq!(ext.counters().waiter_count(), 0);
}

#[tokio::test]
async fn await_relative_uses_first_observed_value() {
    let ext = extension();
    create_counter(&ext, 4, 100).await;

    let relative = WaitCondition {
        value_type: ValueType::Relative,
        wait_value: 5,
        ..condition(4, TestType::PositiveComparison, 0)
    };
    let handle = spawn_request(&ext, Opcode::Await, await_body(&[relative]));
    wait_for_counter_waiters(&ext, 1).await;

    send(&ext, Opcode::ChangeCounter, &counter_body(4, 5)).await;
    let notify = counter_notify(handle.await.unwrap());

    assert_eq!(notify.wait_value, 105);
    assert_eq!(notify.counter_value, 105);
}

#[tokio::test]
async fn await_negative_comparison() {
    let ext = extension();
    create_counter(&ext, 6, 10).await;

    let handle = spawn_request(
        &ext,
        Opcode::Await,
        await_body(&[condition(6, TestType::NegativeComparison, 5)]),
    );
    wait_for_counter_waiters(&ext, 1).await;

    send(&ext, Opcode::SetCounter, &counter_body(6, 5)).await;
    let notify = counter_notify(handle.await.unwrap());
    assert_eq!(notify.counter_value, 5);
}

#[tokio::test]
async fn await_first_satisfied_condition_wins() {
    let ext = extension();
    create_counter(&ext, 1000, 50).await;
    create_counter(&ext, 2000, 50).await;

    let body = await_body(&[
        condition(2000, TestType::PositiveComparison, 0),
        condition(1000, TestType::PositiveComparison, 0),
    ]);
    let notify = counter_notify(send(&ext, Opcode::Await, &body).await);
    assert_eq!(notify.counter, 2000);
}

#[tokio::test]
async fn await_reports_destroyed_counter() {
    let ext = extension();
    create_counter(&ext, 12, 3).await;

    let handle = spawn_request(
        &ext,
        Opcode::Await,
        await_body(&[condition(12, TestType::PositiveComparison, 100)]),
    );
    wait_for_counter_waiters(&ext, 1).await;

    send(&ext, Opcode::DestroyCounter, &id_body(12)).await;
    let notify = counter_notify(handle.await.unwrap());

    assert!(notify.destroyed);
    assert_eq!(notify.counter, 12);
    assert_eq!(notify.counter_value, 3);
    assert_eq!(notify.wait_value, 100);
}

#[tokio::test]
async fn await_recreated_counter_reads_as_destroyed() {
    let ext = extension();
    create_counter(&ext, 12, 0).await;

    let handle = spawn_request(
        &ext,
        Opcode::Await,
        await_body(&[condition(12, TestType::PositiveComparison, 100)]),
    );
    wait_for_counter_waiters(&ext, 1).await;

    send(&ext, Opcode::DestroyCounter, &id_body(12)).await;
    create_counter(&ext, 12, 500).await;
    let notify = counter_notify(handle.await.unwrap());

    assert!(notify.destroyed);
    assert_eq!(notify.counter_value, 0);
}

#[tokio::test]
async fn aborted_await_deregisters() {
    let ext = extension();
    create_counter(&ext, 1, 0).await;
    create_counter(&ext, 2, 0).await;

    let handle = spawn_request(
        &ext,
        Opcode::Await,
        await_body(&[
            condition(1, TestType::PositiveComparison, 10),
            condition(2, TestType::PositiveComparison, 10),
        ]),
    );
    wait_for_counter_waiters(&ext, 2).await;

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(ext.counters().waiter_count(), 0);
}

#[tokio::test]
async fn await_ignores_unrelated_counters() {
    let ext = extension();
    create_counter(&ext, 1, 0).await;
    create_counter(&ext, 2, 0).await;

    let mut handle = spawn_request(
        &ext,
        Opcode::Await,
        await_body(&[condition(1, TestType::PositiveComparison, 10)]),
    );
    wait_for_counter_waiters(&ext, 1).await;

    send(&ext, Opcode::SetCounter, &counter_body(2, 50)).await;
    let still_waiting = tokio::time::timeout(Duration::from_millis(20), &mut handle).await;
    assert!(still_waiting.is_err());

    send(&ext, Opcode::SetCounter, &counter_body(1, 50)).await;
    assert_eq!(counter_notify(handle.await.unwrap()).counter, 1);
}

#[tokio::test(start_paused = true)]
async fn await_servertime_deadline() {
    let ext = extension();
    let start = tokio::time::Instant::now();

    let body = await_body(&[condition(SERVERTIME_ID, TestType::PositiveComparison, 1_000)]);
    let notify = counter_notify(send(&ext, Opcode::Await, &body).await);

    assert_eq!(notify.counter, SERVERTIME_ID);
    assert!(notify.counter_value >= 1_000);
    assert!(start.elapsed() >= Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn await_servertime_negative_hits_test_value() {
    let ext = extension();

    let body = await_body(&[condition(SERVERTIME_ID, TestType::NegativeComparison, 500)]);
    let response = tokio::time::timeout(Duration::from_secs(5), send(&ext, Opcode::Await, &body))
        .await
        .expect("negative servertime await should resolve");
    let notify = counter_notify(response);

    assert_eq!(notify.counter, SERVERTIME_ID);
    assert_eq!(notify.wait_value, 500);
    assert_eq!(notify.counter_value, 500);
    assert!(!notify.destroyed);
}

#[tokio::test(start_paused = true)]
async fn await_servertime_relative_positive() {
    let ext = extension();
    let start = tokio::time::Instant::now();

    let relative = WaitCondition {
        value_type: ValueType::Relative,
        wait_value: 300,
        ..condition(SERVERTIME_ID, TestType::PositiveComparison, 0)
    };
    let response =
        tokio::time::timeout(Duration::from_secs(5), send(&ext, Opcode::Await, &await_body(&[relative])))
            .await
            .expect("relative servertime await should resolve");
    let notify = counter_notify(response);

    assert_eq!(notify.wait_value, 300);
    assert!(notify.counter_value >= 300);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn await_servertime_relative_negative() {
    let ext = extension();

    let relative = WaitCondition {
        value_type: ValueType::Relative,
        wait_value: 200,
        ..condition(SERVERTIME_ID, TestType::NegativeTransition, 0)
    };
    let response =
        tokio::time::timeout(Duration::from_secs(5), send(&ext, Opcode::Await, &await_body(&[relative])))
            .await
            .expect("relative negative servertime await should resolve");
    let notify = counter_notify(response);

    assert_eq!(notify.wait_value, 200);
    assert_eq!(notify.counter_value, 200);
}

#[tokio::test]
async fn await_fence_already_triggered() {
    let ext = extension();
    send(&ext, Opcode::CreateFence, &fence_body(0, 3, true)).await;

    assert_eq!(send(&ext, Opcode::AwaitFence, &id_body(3)).await, None);
}

#[tokio::test]
async fn await_fence_unknown_is_error() {
    let ext = extension();
    send(&ext, Opcode::CreateFence, &fence_body(0, 3, false)).await;

    let mut body = id_body(3);
    body.extend_from_slice(&id_body(0x44));
    let report = error(send(&ext, Opcode::AwaitFence, &body).await);

    assert_eq!(report.code, ErrorCode::Counter);
    assert_eq!(report.bad_value, 0x44);
}

#[tokio::test]
async fn await_fence_resolves_on_trigger() {
    let ext = extension();
    send(&ext, Opcode::CreateFence, &fence_body(0, 3, false)).await;
    send(&ext, Opcode::CreateFence, &fence_body(0, 4, false)).await;

    let mut body = id_body(3);
    body.extend_from_slice(&id_body(4));
    let handle = spawn_request(&ext, Opcode::AwaitFence, body);
    wait_for_fence_waiters(&ext, 2).await;

    send(&ext, Opcode::TriggerFence, &id_body(4)).await;
    assert_eq!(handle.await.unwrap(), None);
    assert_eq!(ext.fences().waiter_count(), 0);
}

#[tokio::test]
async fn await_fence_resolves_on_destroy() {
    let ext = extension();
    send(&ext, Opcode::CreateFence, &fence_body(0, 3, false)).await;

    let handle = spawn_request(&ext, Opcode::AwaitFence, id_body(3));
    wait_for_fence_waiters(&ext, 1).await;

    send(&ext, Opcode::DestroyFence, &id_body(3)).await;
    assert_eq!(handle.await.unwrap(), None);
}

#[tokio::test]
async fn error_response_uses_error_base() {
    let ext = extension();
    let response = send(&ext, Opcode::QueryCounter, &id_body(0x77)).await.unwrap();

    let bytes = response.encode(ext.config(), 0x1234);
    assert_eq!(bytes.len(), 32);
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes[1], 154);
    assert_eq!(&bytes[2..4], &[0x12, 0x34]);
    assert_eq!(&bytes[4..8], &0x77u32.to_be_bytes());
    assert_eq!(bytes[10], 130);
}
