// Copyright 2025
// Licensed under the Elastic License v2.0

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use bytes::Bytes;
use cqlsink::core::{CodecError, CqlType};
use cqlsink::task::state::TaskState;
use cqlsink::{
    IgnoreErrors, InMemorySession, KeyspaceTable, OffsetMap, SinkConfig, SinkContext, SinkError,
    SinkRecord, SinkSettings, SinkTask, StandardCodec, TableConfig, TopicPartition, Value,
    ValueCodec,
};

#[derive(Default)]
struct RecordingContext {
    rewinds: Mutex<Vec<(TopicPartition, i64)>>,
}

impl SinkContext for RecordingContext {
    fn rewind(&self, partition: &TopicPartition, offset: i64) {
        self.rewinds.lock().push((partition.clone(), offset));
    }
}

impl RecordingContext {
    fn rewinds(&self) -> Vec<(TopicPartition, i64)> {
        self.rewinds.lock().clone()
    }
}

struct Fixture {
    task: SinkTask,
    session: Arc<InMemorySession>,
    context: Arc<RecordingContext>,
}

fn users() -> KeyspaceTable {
    KeyspaceTable::new("ks", "users")
}

fn audit() -> KeyspaceTable {
    KeyspaceTable::new("ks", "audit")
}

fn tp(partition: i32) -> TopicPartition {
    TopicPartition::new("users", partition)
}

fn new_session() -> InMemorySession {
    let columns = [("id", CqlType::Bigint), ("name", CqlType::Text)];
    InMemorySession::new()
        .with_table(users(), &columns, &["id"])
        .with_table(audit(), &columns, &["id"])
}

fn table(name: &str) -> TableConfig {
    TableConfig::new("ks", name)
        .with_column("id", "key")
        .with_column("name", "value.name")
}

fn settings(policy: IgnoreErrors) -> SinkSettings {
    SinkSettings {
        ignore_errors: policy,
        poll_interval_ms: 10,
        ..SinkSettings::default()
    }
}

/// Standard encodings, except that one poisoned value makes the codec panic
struct PanickingCodec {
    poisoned: Value,
    inner: StandardCodec,
}

impl ValueCodec for PanickingCodec {
    fn encode(&self, value: &Value, cql_type: &CqlType) -> Result<Option<Bytes>, CodecError> {
        if *value == self.poisoned {
            panic!("codec cannot encode {:?}", value);
        }
        self.inner.encode(value, cql_type)
    }
}

async fn fixture_with(
    session: InMemorySession,
    settings: SinkSettings,
    tables: &[&str],
) -> Fixture {
    fixture_with_codec(session, settings, tables, Arc::new(StandardCodec::new())).await
}

async fn fixture_with_codec(
    session: InMemorySession,
    settings: SinkSettings,
    tables: &[&str],
    codec: Arc<dyn ValueCodec>,
) -> Fixture {
    let session = Arc::new(session);
    let context = Arc::new(RecordingContext::default());
    let mut config = SinkConfig::new(settings);
    for name in tables {
        config = config.with_table("users", table(name));
    }

    let task = SinkTask::start(config, session.clone(), codec, context.clone())
    .await
    .unwrap();

    Fixture {
        task,
        session,
        context,
    }
}

async fn fixture(policy: IgnoreErrors) -> Fixture {
    fixture_with(new_session(), settings(policy), &["users"]).await
}

fn user(partition: i32, offset: i64, key: Value) -> SinkRecord {
    SinkRecord::new("users", partition, offset)
        .with_key(key)
        .with_value(Value::structure([("name", Value::from("ada"))]))
}

fn good(offset: i64) -> SinkRecord {
    user(0, offset, Value::Int64(offset))
}

fn unmappable(offset: i64) -> SinkRecord {
    user(0, offset, Value::from("not-a-number"))
}

fn committed(entries: &[(TopicPartition, i64)]) -> OffsetMap {
    entries.iter().cloned().collect()
}

#[tokio::test]
async fn test_all_records_succeed() {
    let f = fixture(IgnoreErrors::None).await;

    f.task.put(vec![good(0), good(1), good(2)]).await.unwrap();

    let offsets = committed(&[(tp(0), 3)]);
    assert_eq!(f.task.pre_commit(offsets.clone()), offsets);
    assert_eq!(f.session.rows(&users()).len(), 3);
    assert!(f.context.rewinds().is_empty());

    let metrics = f.task.metrics();
    assert_eq!(metrics.records_written, 3);
    assert_eq!(metrics.records_failed, 0);
    assert_eq!(metrics.tables["ks.users"].written, 3);
}

#[tokio::test]
async fn test_mapping_failure_rewinds_under_none() {
    let f = fixture(IgnoreErrors::None).await;

    f.task
        .put(vec![good(10), unmappable(11), good(12)])
        .await
        .unwrap();

    assert_eq!(
        f.task.pre_commit(committed(&[(tp(0), 13)])),
        committed(&[(tp(0), 11)])
    );
    assert_eq!(f.context.rewinds(), vec![(tp(0), 11)]);
    assert_eq!(f.session.rows(&users()).len(), 2);
    assert_eq!(f.task.metrics().tables["ks.users"].failed, 1);
}

#[tokio::test]
async fn test_mapping_failure_rewinds_under_driver() {
    let f = fixture(IgnoreErrors::Driver).await;

    f.task
        .put(vec![good(10), unmappable(11), good(12)])
        .await
        .unwrap();

    assert_eq!(
        f.task.pre_commit(committed(&[(tp(0), 13)])),
        committed(&[(tp(0), 11)])
    );
    assert_eq!(f.context.rewinds(), vec![(tp(0), 11)]);
}

#[tokio::test]
async fn test_mapping_failure_tolerated_under_all() {
    let f = fixture(IgnoreErrors::All).await;

    f.task
        .put(vec![good(10), unmappable(11), good(12)])
        .await
        .unwrap();

    let offsets = committed(&[(tp(0), 13)]);
    assert_eq!(f.task.pre_commit(offsets.clone()), offsets);
    assert!(f.context.rewinds().is_empty());
    assert_eq!(f.task.metrics().records_failed, 1);
}

#[tokio::test]
async fn test_write_failure_tolerated_under_driver() {
    let f = fixture(IgnoreErrors::Driver).await;
    f.session.fail_table(&users());

    f.task.put(vec![good(4)]).await.unwrap();

    assert!(f.task.failure_offsets().is_empty());
    assert!(f.context.rewinds().is_empty());
    assert_eq!(f.task.metrics().tables["ks.users"].failed, 1);
}

#[tokio::test]
async fn test_null_partition_key_withheld_under_all() {
    let f = fixture(IgnoreErrors::All).await;

    f.task
        .put(vec![good(20), user(0, 21, Value::Null)])
        .await
        .unwrap();

    assert_eq!(
        f.task.pre_commit(committed(&[(tp(0), 22)])),
        committed(&[(tp(0), 21)])
    );
    assert_eq!(f.context.rewinds(), vec![(tp(0), 21)]);
}

#[tokio::test]
async fn test_absent_partition_key_withheld_under_all() {
    let f = fixture(IgnoreErrors::All).await;
    let keyless = SinkRecord::new("users", 0, 21)
        .with_value(Value::structure([("name", Value::from("ada"))]));

    f.task.put(vec![good(20), keyless, good(22)]).await.unwrap();

    assert_eq!(f.task.failure_offsets(), committed(&[(tp(0), 21)]));
    assert_eq!(f.context.rewinds(), vec![(tp(0), 21)]);
    assert_eq!(f.session.rows(&users()).len(), 2);
}

#[tokio::test]
async fn test_codec_panic_is_tracked_as_failure() {
    let codec = PanickingCodec {
        poisoned: Value::Int64(11),
        inner: StandardCodec::new(),
    };
    let f = fixture_with_codec(
        new_session(),
        settings(IgnoreErrors::None),
        &["users"],
        Arc::new(codec),
    )
    .await;

    f.task
        .put(vec![good(10), good(11), good(12)])
        .await
        .unwrap();

    assert_eq!(f.task.failure_offsets(), committed(&[(tp(0), 11)]));
    assert_eq!(f.context.rewinds(), vec![(tp(0), 11)]);
    assert_eq!(f.session.rows(&users()).len(), 2);

    let metrics = f.task.metrics();
    assert_eq!(metrics.tables["ks.users"].failed, 1);
    assert_eq!(metrics.tables["ks.users"].written, 2);
}

#[tokio::test]
async fn test_one_record_two_tables_one_failing() {
    let f = fixture_with(
        new_session(),
        settings(IgnoreErrors::None),
        &["users", "audit"],
    )
    .await;
    f.session.fail_table(&audit());

    f.task.put(vec![good(5)]).await.unwrap();

    let metrics = f.task.metrics();
    assert_eq!(metrics.tables["ks.users"].written, 1);
    assert_eq!(metrics.tables["ks.users"].failed, 0);
    assert_eq!(metrics.tables["ks.audit"].failed, 1);
    assert_eq!(metrics.tables["ks.audit"].written, 0);

    assert_eq!(f.session.rows(&users()).len(), 1);
    assert!(f.session.rows(&audit()).is_empty());
    assert_eq!(f.context.rewinds(), vec![(tp(0), 5)]);
    assert_eq!(f.task.failure_offsets(), committed(&[(tp(0), 5)]));
}

#[tokio::test]
async fn test_interrupt_before_mapping_abandons_batch() {
    let f = fixture(IgnoreErrors::None).await;
    let interrupt = f.task.interrupt_handle();

    interrupt.interrupt();
    let err = f.task.put(vec![good(1), good(2)]).await.unwrap_err();

    assert!(matches!(err, SinkError::Interrupted));
    assert!(err.is_retriable());
    assert!(!interrupt.is_interrupted());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.session.row_count(), 0);
    assert_eq!(f.session.execution_count(), 0);
}

#[tokio::test]
async fn test_interrupt_cancels_in_flight_writes() {
    let session = new_session().with_latency(Duration::from_millis(300));
    let f = fixture_with(session, settings(IgnoreErrors::None), &["users"]).await;
    let task = Arc::new(f.task);
    let interrupt = task.interrupt_handle();

    let put = {
        let task = Arc::clone(&task);
        tokio::spawn(async move { task.put(vec![good(1), good(2), good(3)]).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    interrupt.interrupt();

    let result = put.await.unwrap();
    assert!(matches!(result, Err(SinkError::Interrupted)));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(f.session.row_count(), 0);
    assert_eq!(f.session.execution_count(), 0);

    task.put(vec![good(4)]).await.unwrap();
    assert_eq!(f.session.row_count(), 1);
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let f = fixture(IgnoreErrors::None).await;

    f.task.put(Vec::new()).await.unwrap();

    let offsets = committed(&[(tp(0), 9)]);
    assert_eq!(f.task.pre_commit(offsets.clone()), offsets);
    assert_eq!(f.session.execution_count(), 0);
    assert_eq!(f.task.state(), TaskState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_track_minimum() {
    let f = fixture_with(
        new_session(),
        SinkSettings {
            mapping_workers: 8,
            max_batch_records: 1,
            ..settings(IgnoreErrors::None)
        },
        &["users"],
    )
    .await;
    f.session.fail_table(&users());

    let records: Vec<SinkRecord> = (100..150).rev().map(good).collect();
    f.task.put(records).await.unwrap();

    assert_eq!(f.task.failure_offsets(), committed(&[(tp(0), 100)]));
    assert_eq!(f.task.metrics().tables["ks.users"].failed, 50);

    let rewinds = f.context.rewinds();
    assert_eq!(rewinds.last(), Some(&(tp(0), 100)));
    assert!(rewinds.windows(2).all(|w| w[1].1 < w[0].1));
}

#[tokio::test]
async fn test_partitions_tracked_independently() {
    let f = fixture(IgnoreErrors::None).await;

    f.task
        .put(vec![
            user(0, 7, Value::from("x")),
            user(1, 3, Value::Int64(3)),
            user(2, 9, Value::from("y")),
        ])
        .await
        .unwrap();

    let result = f
        .task
        .pre_commit(committed(&[(tp(0), 8), (tp(1), 4), (tp(2), 10)]));
    assert_eq!(result, committed(&[(tp(0), 7), (tp(1), 4), (tp(2), 9)]));
}

#[tokio::test]
async fn test_pre_commit_is_idempotent() {
    let f = fixture(IgnoreErrors::None).await;
    f.task.put(vec![unmappable(11), good(12)]).await.unwrap();

    let once = f.task.pre_commit(committed(&[(tp(0), 13)]));
    let twice = f.task.pre_commit(once.clone());
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_failures_reset_between_batches() {
    let f = fixture(IgnoreErrors::None).await;

    f.task.put(vec![unmappable(11)]).await.unwrap();
    assert_eq!(f.task.failure_offsets(), committed(&[(tp(0), 11)]));

    f.task.put(vec![good(11), good(12)]).await.unwrap();
    let offsets = committed(&[(tp(0), 13)]);
    assert_eq!(f.task.pre_commit(offsets.clone()), offsets);
}

#[tokio::test]
async fn test_unknown_topic_counts_as_failure() {
    let f = fixture(IgnoreErrors::None).await;

    f.task
        .put(vec![SinkRecord::new("payments", 0, 42).with_key(Value::Int64(1))])
        .await
        .unwrap();

    let metrics = f.task.metrics();
    assert_eq!(metrics.unknown_topic_failures, 1);
    assert_eq!(metrics.records_failed, 1);
    assert_eq!(
        f.context.rewinds(),
        vec![(TopicPartition::new("payments", 0), 42)]
    );
}

#[tokio::test]
async fn test_stop_then_put_is_rejected() {
    let f = fixture(IgnoreErrors::None).await;

    f.task.put(vec![good(1)]).await.unwrap();
    f.task.stop().await;

    assert_eq!(f.task.state(), TaskState::Stopped);
    assert!(f.session.is_closed());
    let err = f.task.put(vec![good(2)]).await.unwrap_err();
    assert!(matches!(err, SinkError::Stopped));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_stop_waits_for_running_batch() {
    let session = new_session().with_latency(Duration::from_millis(100));
    let f = fixture_with(session, settings(IgnoreErrors::None), &["users"]).await;
    let task = Arc::new(f.task);

    let put = {
        let task = Arc::clone(&task);
        tokio::spawn(async move { task.put(vec![good(1), good(2)]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    task.stop().await;

    assert_eq!(task.state(), TaskState::Stopped);
    put.await.unwrap().unwrap();
    assert_eq!(f.session.row_count(), 2);
}
