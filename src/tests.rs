use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::infra::sqlite::queries::{insert_resources, NewResource};
use crate::infra::sqlite::schema::init_db;
use crate::*;

const WAIT: Duration = Duration::from_secs(10);

fn unique_test_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("records-pager-{prefix}-{nanos}"))
}

#[derive(Debug, Clone, PartialEq)]
enum SinkEvent {
    Reset,
    Batch(usize),
    Finished(usize),
    Error(String),
}

#[derive(Default)]
struct RecordingSink {
    events: Vec<SinkEvent>,
    rows: Vec<Row>,
}

impl RecordingSink {
    fn batch_sizes(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Batch(size) => Some(*size),
                _ => None,
            })
            .collect()
    }

    fn ids(&self) -> Vec<i64> {
        self.rows
            .iter()
            .filter_map(|row| match row.get(0) {
                Some(Value::Integer(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl ListSink for RecordingSink {
    fn on_reset(&mut self) {
        self.events.push(SinkEvent::Reset);
        self.rows.clear();
    }

    fn on_batch(&mut self, rows: Vec<Row>) {
        self.events.push(SinkEvent::Batch(rows.len()));
        self.rows.extend(rows);
    }

    fn on_finished(&mut self, total_for_page: usize) {
        self.events.push(SinkEvent::Finished(total_for_page));
    }

    fn on_error(&mut self, message: &str) {
        self.events.push(SinkEvent::Error(message.to_string()));
    }
}

fn resource(source: &str, description: &str, score: Option<f64>) -> NewResource {
    NewResource {
        source: source.to_string(),
        content_description: description.to_string(),
        additional_details: None,
        answer: None,
        score,
    }
}

fn seed(db_path: &Path, count: usize) -> Vec<i64> {
    let resources = (0..count)
        .map(|idx| {
            let score = (idx % 10 != 0).then(|| (idx % 7) as f64);
            resource(&format!("source-{idx}"), &format!("resource {idx}"), score)
        })
        .collect::<Vec<_>>();
    insert_resources(db_path, &resources).expect("seeding should succeed")
}

fn controller(db_path: &Path, page_size: i64, chunk_size: usize) -> PaginationController<RecordingSink> {
    let config = LoaderConfig {
        page_size,
        chunk_size,
        max_concurrent_workers: 2,
    };
    let pool = Arc::new(WorkerPool::new(2).expect("pool should start"));
    PaginationController::new(
        config,
        pool,
        Arc::new(SqliteRowSourceFactory::resources(db_path)),
        RecordingSink::default(),
    )
    .expect("controller should build")
}

fn load_all(ctl: &mut PaginationController<RecordingSink>) {
    loop {
        assert!(ctl.wait_idle(WAIT), "page should finish in time");
        if !ctl.load_next_page().expect("next page should dispatch") {
            break;
        }
    }
}

#[test]
fn init_db_creates_resource_table_and_indexes() {
    let temp_dir = unique_test_dir("init-db");
    let db_path = temp_dir.join("nested").join("records.sqlite");

    let result = init_db(&db_path);
    assert!(result.is_ok(), "init_db should succeed: {result:?}");
    init_db(&db_path).expect("init_db should be idempotent");

    let conn = Connection::open(&db_path).expect("should open sqlite db");
    let object_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE name IN ('educational_resources', 'idx_edu_score', 'idx_edu_source')",
            [],
            |row| row.get(0),
        )
        .expect("object count query should succeed");
    assert_eq!(object_count, 3, "table and indexes should exist");

    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}

#[test]
fn seventy_three_resources_load_in_two_pages() {
    let temp_dir = unique_test_dir("seventy-three");
    let db_path = temp_dir.join("records.sqlite");
    seed(&db_path, 73);
    let mut ctl = controller(&db_path, 50, 20);

    ctl.set_query(QuerySpec::default())
        .expect("query should start");
    assert!(ctl.wait_idle(WAIT), "first page should finish");

    assert_eq!(ctl.sink().batch_sizes(), vec![20, 20, 10]);
    assert_eq!(ctl.sink().events.last(), Some(&SinkEvent::Finished(50)));
    assert!(ctl.has_more());
    assert_eq!(ctl.phase(), LoadPhase::Idle);

    assert!(ctl.load_next_page().expect("second page should dispatch"));
    assert!(ctl.wait_idle(WAIT), "second page should finish");

    assert_eq!(ctl.sink().batch_sizes(), vec![20, 20, 10, 20, 3]);
    assert_eq!(ctl.sink().events.last(), Some(&SinkEvent::Finished(23)));
    assert!(!ctl.has_more());
    assert_eq!(ctl.phase(), LoadPhase::Exhausted);
    assert_eq!(ctl.rows_loaded(), 73);
    assert!(!ctl.load_next_page().expect("exhausted list should not dispatch"));

    drop(ctl);
    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}

#[test]
fn chunked_pages_match_a_single_ordered_query() {
    let temp_dir = unique_test_dir("chunked-order");
    let db_path = temp_dir.join("records.sqlite");
    seed(&db_path, 61);
    let mut ctl = controller(&db_path, 7, 3);

    ctl.set_query(QuerySpec::default())
        .expect("query should start");
    load_all(&mut ctl);

    let conn = Connection::open(&db_path).expect("should open sqlite db");
    let mut stmt = conn
        .prepare("SELECT id FROM educational_resources ORDER BY score_ DESC NULLS LAST, id DESC")
        .expect("should prepare reference query");
    let expected = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .expect("reference query should run")
        .collect::<rusqlite::Result<Vec<_>>>()
        .expect("reference rows should read");

    assert_eq!(ctl.sink().ids(), expected);
    assert_eq!(ctl.stats().pages_finished, 9);

    drop(stmt);
    drop(conn);
    drop(ctl);
    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}

#[test]
fn default_order_is_best_score_first_with_unscored_last() {
    let temp_dir = unique_test_dir("default-order");
    let db_path = temp_dir.join("records.sqlite");
    let ids = insert_resources(
        &db_path,
        &[
            resource("a", "unscored", None),
            resource("b", "low", Some(1.0)),
            resource("c", "high", Some(9.5)),
            resource("d", "low again", Some(1.0)),
        ],
    )
    .expect("insert should succeed");
    let mut ctl = controller(&db_path, 50, 20);

    ctl.set_query(QuerySpec::default())
        .expect("query should start");
    assert!(ctl.wait_idle(WAIT), "page should finish");

    assert_eq!(ctl.sink().ids(), vec![ids[2], ids[3], ids[1], ids[0]]);
    assert_eq!(
        ctl.sink().rows[0].get(1),
        Some(&Value::Text("high".to_string()))
    );
    assert_eq!(ctl.sink().rows[3].get(2), Some(&Value::Null));

    drop(ctl);
    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}

#[test]
fn filter_text_is_matched_literally_across_search_columns() {
    let temp_dir = unique_test_dir("literal-filter");
    let db_path = temp_dir.join("records.sqlite");
    let ids = insert_resources(
        &db_path,
        &[
            resource("O'Brien textbook", "chapter one", Some(3.0)),
            resource("press", "100% recycled", Some(2.0)),
            resource("press", "1000 pages", Some(1.0)),
            NewResource {
                additional_details: Some("see snake_case notes".to_string()),
                ..resource("notes", "misc", None)
            },
        ],
    )
    .expect("insert should succeed");
    let mut ctl = controller(&db_path, 50, 20);

    for (filter, expected) in [
        ("o'brien", vec![ids[0]]),
        ("100%", vec![ids[1]]),
        ("e_c", vec![ids[3]]),
        ("PRESS", vec![ids[1], ids[2]]),
        ("'; DROP TABLE educational_resources; --", vec![]),
    ] {
        ctl.set_query(QuerySpec::filter(filter))
            .expect("query should start");
        assert!(ctl.wait_idle(WAIT), "page should finish for {filter:?}");
        assert_eq!(ctl.sink().ids(), expected, "filter {filter:?}");
    }

    ctl.set_query(QuerySpec::filter(ids[2].to_string()))
        .expect("query should start");
    assert!(ctl.wait_idle(WAIT), "page should finish");
    assert!(ctl.sink().ids().contains(&ids[2]), "id text should match");

    drop(ctl);
    let conn = Connection::open(&db_path).expect("should open sqlite db");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM educational_resources", [], |row| {
            row.get(0)
        })
        .expect("table should survive");
    assert_eq!(count, 4);

    drop(conn);
    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}

#[test]
fn missing_database_reports_error_and_stays_retryable() {
    let temp_dir = unique_test_dir("missing-db");
    let db_path = temp_dir.join("absent.sqlite");
    let mut ctl = controller(&db_path, 50, 20);

    ctl.set_query(QuerySpec::default())
        .expect("query should start");
    assert!(ctl.wait_idle(WAIT), "failed page should settle");

    match ctl.sink().events.last() {
        Some(SinkEvent::Error(message)) => {
            assert!(message.contains("failed to open db"), "{message}")
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    assert!(ctl.has_more());
    assert_eq!(ctl.phase(), LoadPhase::Idle);
    assert_eq!(ctl.stats().page_errors, 1);

    seed(&db_path, 5);
    assert!(ctl.load_next_page().expect("retry should dispatch"));
    assert!(ctl.wait_idle(WAIT), "retried page should finish");
    assert_eq!(ctl.rows_loaded(), 5);
    assert!(!ctl.has_more());

    drop(ctl);
    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}

#[test]
fn sqlite_source_reads_chunks_inside_its_page_and_closes_once() {
    let temp_dir = unique_test_dir("source-close");
    let db_path = temp_dir.join("records.sqlite");
    seed(&db_path, 30);
    let factory = SqliteRowSourceFactory::resources(&db_path);
    let request = PageRequest::new(Arc::new(QuerySpec::default()), 1, 12, Epoch(1))
        .expect("request should build");

    let mut source = factory.open(&request).expect("source should open");
    let sizes = (0..4)
        .map(|_| source.fetch_many(5).expect("fetch should succeed").len())
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![5, 5, 2, 0]);

    source.close();
    source.close();
    assert!(source.fetch_many(5).is_err(), "closed source should refuse");

    drop(source);
    fs::remove_dir_all(&temp_dir).expect("should cleanup temp dir");
}
