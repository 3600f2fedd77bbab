//! Tests for the batch insert pipeline, driven by an in-memory loader

use super::*;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Begin,
    Append(i64),
    Submit(usize),
    Abort,
    Close,
}

#[derive(Clone, Default)]
struct MockLoader {
    events: Arc<Mutex<Vec<Event>>>,
    pending: usize,
    fail_append_at: Option<i64>,
    fail_submit_at: Option<usize>,
    submits: usize,
}

impl MockLoader {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait::async_trait]
impl BulkLoader for MockLoader {
    async fn begin(&mut self) -> Result<()> {
        self.push(Event::Begin);
        Ok(())
    }

    async fn append(&mut self, record: Record) -> Result<()> {
        let id = record.first().and_then(Value::as_i64).unwrap_or(-1);
        if self.fail_append_at == Some(id) {
            return Err(PolysqlError::constraint_violation(
                format!("duplicate key {}", id),
                std::io::Error::other("unique"),
            ));
        }
        self.push(Event::Append(id));
        self.pending += 1;
        Ok(())
    }

    async fn submit(&mut self) -> Result<u64> {
        self.submits += 1;
        if self.fail_submit_at == Some(self.submits) {
            return Err(PolysqlError::generic("disk full"));
        }
        let rows = std::mem::take(&mut self.pending);
        self.push(Event::Submit(rows));
        Ok(rows as u64)
    }

    async fn abort(&mut self) -> Result<()> {
        self.pending = 0;
        self.push(Event::Abort);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.push(Event::Close);
        Ok(())
    }
}

fn meta() -> RecordMeta {
    RecordMeta::from_column_types(&[ColumnTypeData::new("id", "int")], |_| Kind::Int)
}

fn spawn_batch(loader: &MockLoader, batch_rows: usize, parent: &CancellationToken) -> BatchInsert {
    BatchInsert::spawn(
        "actor",
        Box::new(loader.clone()),
        meta(),
        munge_for_kinds(vec![Kind::Int], false),
        BatchOptions::new(batch_rows, batch_rows * 2),
        parent,
    )
}

fn submits(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Submit(n) => Some(*n),
            _ => None,
        })
        .collect()
}

async fn wait_for(loader: &MockLoader, done: impl Fn(&[Event]) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&loader.events()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("loader did not reach the expected state");
}

mod submit_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    #[case(10, 3)]
    #[case(9, 3)]
    #[case(1, 5)]
    #[case(7, 1)]
    #[case(0, 4)]
    #[tokio::test]
    async fn test_submit_count_is_ceiling(#[case] rows: i64, #[case] batch_rows: usize) {
        let loader = MockLoader::default();
        let mut batch = spawn_batch(&loader, batch_rows, &CancellationToken::new());

        for id in 0..rows {
            batch.send(vec![Value::Int64(id)]).await.unwrap();
        }
        let written = batch.finish().await.unwrap();

        let events = loader.events();
        let expected_batches = (rows as usize).div_ceil(batch_rows);
        assert_eq!(written, rows as u64);
        assert_eq!(submits(&events).len(), expected_batches);
        assert_eq!(submits(&events).iter().sum::<usize>(), rows as usize);
        assert_eq!(events.last(), Some(&Event::Close));
    }

    #[tokio::test]
    async fn test_rows_arrive_in_send_order() {
        let loader = MockLoader::default();
        let mut batch = spawn_batch(&loader, 4, &CancellationToken::new());

        for id in 0..10 {
            batch.send(vec![Value::from(id.to_string())]).await.unwrap();
        }
        batch.finish().await.unwrap();

        let appended: Vec<i64> = loader
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Append(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(appended, (0..10).collect::<Vec<_>>());
        assert_eq!(submits(&loader.events()), vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_batch() {
        let loader = MockLoader::default();
        let mut batch = spawn_batch(&loader, 5, &CancellationToken::new());

        for id in 0..10 {
            batch.send(vec![Value::Int64(id)]).await.unwrap();
        }
        assert_eq!(batch.finish().await.unwrap(), 10);

        let events = loader.events();
        assert_eq!(submits(&events), vec![5, 5]);
        let begins = events.iter().filter(|e| **e == Event::Begin).count();
        assert_eq!(begins, 2);
    }

    #[tokio::test]
    async fn test_progress_reported_per_batch() {
        let loader = MockLoader::default();
        let seen: Arc<Mutex<Vec<(String, u64, u64)>>> = Arc::default();
        let sink = seen.clone();
        let options = BatchOptions::new(3, 6).with_progress(Arc::new(move |p: BatchProgress<'_>| {
            sink.lock()
                .unwrap()
                .push((p.label.to_string(), p.batches, p.written));
        }));
        let mut batch = BatchInsert::spawn(
            "film",
            Box::new(loader.clone()),
            meta(),
            munge_for_kinds(vec![Kind::Int], false),
            options,
            &CancellationToken::new(),
        );

        for id in 0..7 {
            batch.send(vec![Value::Int64(id)]).await.unwrap();
        }
        batch.finish().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("film".to_string(), 1, 3),
                ("film".to_string(), 2, 6),
                ("film".to_string(), 3, 7),
            ]
        );
    }
}

mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cancel_reports_cancelled_and_keeps_submitted_count() {
        let loader = MockLoader::default();
        let parent = CancellationToken::new();
        let mut batch = spawn_batch(&loader, 3, &parent);

        for id in 0..7 {
            batch.send(vec![Value::Int64(id)]).await.unwrap();
        }
        wait_for(&loader, |events| {
            submits(events).len() == 2 && events.contains(&Event::Append(6))
        })
        .await;

        parent.cancel();
        let err = batch.finish().await.unwrap_err();

        assert!(err.is_cancelled(), "{}", err);
        let events = loader.events();
        assert_eq!(submits(&events), vec![3, 3]);
        assert_eq!(&events[events.len() - 2..], &[Event::Abort, Event::Close]);
    }

    #[tokio::test]
    async fn test_cancel_reports_written_rows_only_from_submitted_batches() {
        let loader = MockLoader::default();
        let parent = CancellationToken::new();
        let mut batch = spawn_batch(&loader, 4, &parent);

        for id in 0..6 {
            batch.send(vec![Value::Int64(id)]).await.unwrap();
        }
        wait_for(&loader, |events| events.contains(&Event::Append(5))).await;
        parent.cancel();

        wait_for(&loader, |events| events.contains(&Event::Close)).await;
        assert_eq!(batch.written(), 4);
        assert!(batch.finish().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_append_failure_aborts_batch() {
        let loader = MockLoader {
            fail_append_at: Some(4),
            ..Default::default()
        };
        let mut batch = spawn_batch(&loader, 3, &CancellationToken::new());

        let mut send_err = None;
        for id in 0..6 {
            if let Err(e) = batch.send(vec![Value::Int64(id)]).await {
                send_err = Some(e);
                break;
            }
        }

        let err = match send_err {
            Some(e) => e,
            None => batch.finish().await.unwrap_err(),
        };
        assert!(err.is_constraint_violation(), "{}", err);

        let events = loader.events();
        assert_eq!(submits(&events), vec![3]);
        assert_eq!(&events[events.len() - 2..], &[Event::Abort, Event::Close]);
        assert!(!events.contains(&Event::Append(5)));
    }

    #[tokio::test]
    async fn test_submit_failure_terminates_without_retry() {
        let loader = MockLoader {
            fail_submit_at: Some(2),
            ..Default::default()
        };
        let mut batch = spawn_batch(&loader, 2, &CancellationToken::new());

        let mut failed = false;
        for id in 0..4 {
            if batch.send(vec![Value::Int64(id)]).await.is_err() {
                failed = true;
                break;
            }
        }
        if !failed {
            let err = batch.finish().await.unwrap_err();
            assert_eq!(err.to_string(), "disk full");
        }

        let events = loader.events();
        assert_eq!(submits(&events), vec![2]);
        assert!(events.contains(&Event::Abort));
        assert_eq!(events.last(), Some(&Event::Close));
    }

    #[tokio::test]
    async fn test_munge_failure_is_reported_to_producer() {
        let loader = MockLoader::default();
        let mut batch = spawn_batch(&loader, 2, &CancellationToken::new());

        let err = batch.send(vec![Value::from("not a number")]).await.unwrap_err();
        assert!(err.to_string().contains("column 0"), "{}", err);
        assert_eq!(batch.finish().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropping_unfinished_handle_cancels() {
        let loader = MockLoader::default();
        let mut batch = spawn_batch(&loader, 10, &CancellationToken::new());
        batch.send(vec![Value::Int64(1)]).await.unwrap();
        wait_for(&loader, |events| events.contains(&Event::Append(1))).await;

        drop(batch);

        wait_for(&loader, |events| events.contains(&Event::Close)).await;
        let events = loader.events();
        assert!(submits(&events).is_empty());
        assert!(events.contains(&Event::Abort));
    }

    #[tokio::test]
    async fn test_into_parts_hands_over_termination() {
        let loader = MockLoader::default();
        let batch = spawn_batch(&loader, 2, &CancellationToken::new());
        let (tx, outcome) = batch.into_parts().unwrap();

        tx.send(vec![Value::Int64(1)]).await.unwrap();
        drop(tx);

        outcome.await.unwrap().unwrap();
        assert_eq!(submits(&loader.events()), vec![1]);
    }
}

#[test]
fn test_options_from_config() {
    let dialect = Dialect {
        driver_type: DriverType::new("testdb"),
        placeholders: placeholders_question,
        param: param_question,
        enquote: enquote_double,
        exec_mode_for: exec_mode_default,
        ops: default_ops(),
        joins: ALL_JOINS,
        max_batch_values: 999,
        catalog: false,
        int_bool: true,
    };
    let options = BatchOptions::for_columns(&DriverConfig::default(), &dialect, 4);
    assert_eq!(options.batch_rows, 249);
    assert_eq!(options.queue_capacity, 249 * 8);

    let config = DriverConfig {
        max_batch_values: Some(10),
        ..DriverConfig::default()
    };
    assert_eq!(BatchOptions::for_columns(&config, &dialect, 20).batch_rows, 1);
}
