use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::timeout;

use pollstream::config::{StreamingDataType, Subscription};
use pollstream::frame::{FieldColumn, FieldType, Value};
use pollstream::query::{QueryExecutor, QueryRequest, QueryResult, ResultSet};
use pollstream::scheduler::StreamScheduler;
use pollstream::stream::{Emission, EmissionStatus};
use pollstream::template::TemplateVars;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Backend double that scripts one result set per tick.
///
/// Tick N answers with `temp` as a numeric string (exercising coercion) and,
/// from tick 2 on, a lazily-introduced `load` field (exercising schema
/// growth). Tick 1 fails (exercising per-tick error recovery).
struct ScriptedBackend {
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl ScriptedBackend {
    fn new(fail_on: Option<usize>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

impl QueryExecutor for ScriptedBackend {
    async fn execute(&self, request: &QueryRequest) -> Result<ResultSet> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_on == Some(call) {
            bail!("backend unreachable");
        }

        let mut results = ResultSet::new();
        for sub in &request.subscriptions {
            let mut fields = vec![
                // Upstream time column; the aggregator must drop it.
                FieldColumn::new("time", FieldType::Time, vec![Value::Time(1)]),
                // Numeric string; multiple values per tick, last one wins.
                FieldColumn::new(
                    "temp",
                    FieldType::Text,
                    vec![
                        Value::Text("0.0".to_string()),
                        Value::Text(format!("{}.5", call)),
                    ],
                ),
            ];

            if call >= 2 {
                fields.push(FieldColumn::new(
                    "load",
                    FieldType::Number,
                    vec![Value::Number(call as f64)],
                ));
            }

            results.insert(sub.id.clone(), QueryResult::new(fields));
        }

        Ok(results)
    }
}

fn fast_subscription(id: &str, capacity: usize) -> Subscription {
    let mut sub = Subscription::streaming(id, "TS.GET sensor:temp");
    sub.interval = Duration::from_millis(20);
    sub.capacity = capacity;
    sub
}

async fn next_emission(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Emission>) -> Emission {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("emission before timeout")
        .expect("channel open")
}

#[tokio::test]
async fn test_stream_pipeline_end_to_end() {
    let backend = Arc::new(ScriptedBackend::new(Some(1)));
    let (scheduler, mut rx) = StreamScheduler::new(backend);

    let handle = scheduler
        .start(QueryRequest::new(vec![fast_subscription("A", 3)]))
        .expect("valid request");

    // Tick 0: first frame, synthetic time + coerced temp.
    let emission = next_emission(&mut rx).await;
    assert_eq!(emission.subscription_id, "A");
    assert_eq!(emission.status, EmissionStatus::Streaming);

    let frame = emission.frame.expect("frame present");
    assert_eq!(frame.rows.len(), 1);

    let names: Vec<&str> = frame.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["time", "temp"]);

    let temp_col = frame
        .columns
        .iter()
        .find(|c| c.name == "temp")
        .expect("temp column");
    assert_eq!(temp_col.field_type, FieldType::Number);

    // Last value of the tick won, coerced to a number.
    assert_eq!(frame.rows[0].get("temp"), Some(&Value::Number(0.5)));
    // The upstream time value was dropped for the synthetic stamp.
    assert!(matches!(frame.rows[0].get("time"), Some(Value::Time(ms)) if *ms > 1));

    // Tick 1: scripted fetch failure surfaces as an error emission.
    let emission = next_emission(&mut rx).await;
    assert!(
        matches!(emission.status, EmissionStatus::Error { ref message } if message.contains("backend unreachable"))
    );
    assert!(emission.frame.is_none());

    // Tick 2: stream survived; schema grew by the new load field.
    let emission = next_emission(&mut rx).await;
    let frame = emission.frame.expect("frame present");
    assert_eq!(frame.rows.len(), 2);
    assert!(frame.columns.iter().any(|c| c.name == "load"));
    // The failed tick appended nothing, and history is not backfilled.
    assert_eq!(frame.rows[0].get("load"), None);
    assert_eq!(frame.rows[1].get("load"), Some(&Value::Number(2.0)));

    // Ticks 3..: capacity 3 caps the buffer while ticks keep appending.
    let mut last_frame = frame;
    for _ in 0..3 {
        last_frame = next_emission(&mut rx).await.frame.expect("frame present");
    }
    assert_eq!(last_frame.rows.len(), 3);

    handle.cancel();
    assert!(!handle.is_active());

    // Cancellation suppresses everything after the in-flight tick drains.
    while timeout(Duration::from_millis(100), rx.recv()).await.is_ok() {}
    let quiet = timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(quiet.is_err(), "no emissions after cancellation");
}

#[tokio::test]
async fn test_mixed_batch_uses_one_fetch_per_tick() {
    let backend = Arc::new(ScriptedBackend::new(None));
    let (scheduler, mut rx) = StreamScheduler::new(Arc::clone(&backend));

    let mut table_sub = fast_subscription("B", 10);
    table_sub.data_type = StreamingDataType::Table;

    let handle = scheduler
        .start(QueryRequest::new(vec![
            fast_subscription("A", 10),
            table_sub,
        ]))
        .expect("valid request");

    // Both subscriptions emit from the same tick's single fetch.
    let first = next_emission(&mut rx).await;
    let second = next_emission(&mut rx).await;
    handle.cancel();

    let mut ids = vec![first.subscription_id.clone(), second.subscription_id.clone()];
    ids.sort();
    assert_eq!(ids, vec!["A", "B"]);

    for emission in [first, second] {
        let frame = emission.frame.expect("frame present");
        match emission.subscription_id.as_str() {
            // Time-series: synthetic time column, one appended row.
            "A" => {
                assert!(frame.columns.iter().any(|c| c.name == "time"));
                assert_eq!(frame.rows.len(), 1);
            }
            // Table: verbatim pass-through of the tick's two temp values.
            "B" => {
                assert_eq!(frame.rows.len(), 2);
                assert_eq!(
                    frame.rows[1].get("temp"),
                    Some(&Value::Text("0.5".to_string()))
                );
            }
            other => panic!("unexpected subscription {other}"),
        }
    }
}

#[tokio::test]
async fn test_one_shot_batch_passes_through() {
    let backend = Arc::new(ScriptedBackend::new(None));
    let (scheduler, mut rx) = StreamScheduler::new(backend);

    scheduler
        .start(QueryRequest::new(vec![Subscription::one_shot(
            "A",
            "GET sensor:temp",
        )]))
        .expect("valid request");

    let emission = next_emission(&mut rx).await;
    assert_eq!(emission.status, EmissionStatus::Done);

    // Pass-through keeps the upstream time field; no synthetic stamp.
    let frame = emission.frame.expect("frame present");
    assert_eq!(frame.rows[0].get("time"), Some(&Value::Time(1)));

    let quiet = timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(quiet.is_err(), "one-shot emits exactly once");
}

#[tokio::test]
async fn test_template_vars_applied_before_start() {
    /// Captures the query payloads the scheduler hands to the backend.
    struct CapturingBackend {
        seen: parking_lot::Mutex<Vec<String>>,
    }

    impl QueryExecutor for CapturingBackend {
        async fn execute(&self, request: &QueryRequest) -> Result<ResultSet> {
            let mut seen = self.seen.lock();
            for sub in &request.subscriptions {
                seen.push(sub.query.clone());
            }
            Ok(ResultSet::new())
        }
    }

    let backend = Arc::new(CapturingBackend {
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let (scheduler, _rx) = StreamScheduler::new(Arc::clone(&backend));

    let vars = TemplateVars::new(
        [("key".to_string(), "sensor:temp".to_string())]
            .into_iter()
            .collect(),
    );
    let sub = vars.apply(&{
        let mut sub = fast_subscription("A", 10);
        sub.query = "TS.GET $key".to_string();
        sub
    });

    let handle = scheduler
        .start(QueryRequest::new(vec![sub]))
        .expect("valid request");

    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.cancel();

    let seen = backend.seen.lock();
    assert!(!seen.is_empty(), "backend should have been queried");
    assert!(seen.iter().all(|q| q == "TS.GET sensor:temp"));
}
