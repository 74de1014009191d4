//! End-to-end tests for the import pipeline against the in-memory store
//!
//! These drive `ImportPipeline::run` the same way the upload endpoint and the
//! `import_csv` binary do, and check the row accounting of each job.

use async_trait::async_trait;
use bizreg_common::CompanyRecord;
use futures::stream::{BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bizreg_server::ingest::config::ColumnNames;
use bizreg_server::ingest::parser::RowParser;
use bizreg_server::ingest::types::{NormalizedRow, SourceFile};
use bizreg_server::ingest::{
    ImportEvent, ImportJob, ImportPipeline, ImportReport, ImportStage, NullSink, PipelineSettings,
    ProgressSink, RowErrorReason,
};
use bizreg_server::store::{CompanyStore, MemoryCompanyStore, RowOutcome, StoreError};

const FIXED_MILLIS: i64 = 1_767_225_600_123;

fn company(number: &str, name: &str) -> CompanyRecord {
    CompanyRecord {
        company_number: number.to_string(),
        name: name.to_string(),
        slug: format!("{}-seeded", number.to_ascii_lowercase()),
        metadata: BTreeMap::new(),
    }
}

fn pipeline(store: Arc<dyn CompanyStore>, batch_size: usize) -> ImportPipeline {
    ImportPipeline::new(
        store,
        PipelineSettings {
            batch_size,
            ..Default::default()
        },
    )
    .with_clock(|| FIXED_MILLIS)
}

fn job_for(csv: &str) -> ImportJob {
    ImportJob::new(SourceFile {
        name: "companies.csv".to_string(),
        size_bytes: csv.len() as u64,
    })
}

async fn import(
    store: Arc<dyn CompanyStore>,
    csv: &'static str,
    batch_size: usize,
    sink: &dyn ProgressSink,
) -> ImportReport {
    let parser = RowParser::open(csv.as_bytes(), &ColumnNames::default())
        .await
        .expect("header should resolve");
    let total_rows = csv.lines().count().saturating_sub(1) as u64;
    pipeline(store, batch_size)
        .run(job_for(csv), parser, Some(total_rows), sink)
        .await
}

fn assert_conserved(report: &ImportReport) {
    assert_eq!(
        report.processed,
        report.created + report.skipped_validation + report.skipped_duplicate + report.errored,
        "every row must land in exactly one bucket: {:?}",
        report
    );
}

/// Records every emitted event
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ImportEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<ImportEvent> {
        self.events.lock().unwrap().clone()
    }

    fn percentages(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ImportEvent::Progress(progress) => Some(progress.percentage),
                ImportEvent::Final(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&self, event: ImportEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Hides some stored keys from the preload, as if another job inserted them
/// after this one started
struct HiddenKeysStore {
    inner: MemoryCompanyStore,
    hidden: Vec<String>,
}

#[async_trait]
impl CompanyStore for HiddenKeysStore {
    fn backend(&self) -> &'static str {
        "hidden-keys"
    }

    fn existing_keys(&self) -> BoxStream<'_, Result<String, StoreError>> {
        self.inner
            .existing_keys()
            .filter(move |key| {
                let hide = matches!(key, Ok(k) if self.hidden.contains(k));
                async move { !hide }
            })
            .boxed()
    }

    async fn insert_batch(&self, rows: &[NormalizedRow]) -> Result<Vec<RowOutcome>, StoreError> {
        self.inner.insert_batch(rows).await
    }

    async fn save_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        self.inner.save_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<ImportJob>, StoreError> {
        self.inner.list_jobs(limit).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

/// Yields `data` and then fails like a dropped connection
struct BrokenReader {
    data: Option<&'static [u8]>,
}

impl AsyncRead for BrokenReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(data);
                Poll::Ready(Ok(()))
            },
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
        }
    }
}

#[tokio::test]
async fn test_mixed_file_classifies_each_row() {
    let store = Arc::new(MemoryCompanyStore::with_companies([company(
        "SC000001",
        "Existing Holdings Ltd",
    )]));
    let csv = "CompanyNumber,CompanyName,RegAddress.PostTown\n\
               SC000002,New Widgets Ltd,Glasgow\n\
               SC000001,Existing Holdings Ltd,Edinburgh\n\
               SC000003,,Dundee\n";

    let report = import(store.clone(), csv, 10, &NullSink).await;

    assert_eq!(report.stage, ImportStage::Completed);
    assert_eq!(report.processed, 3);
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(report.skipped_validation, 1);
    assert_eq!(report.errored, 0);
    assert_conserved(&report);

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].row, 3);
    assert_eq!(report.errors[0].reason, RowErrorReason::MissingRequiredField);

    let stored = store.companies();
    assert_eq!(stored.len(), 2);
    let created = &stored[1];
    assert_eq!(created.company_number, "SC000002");
    assert_eq!(created.field("reg_address_post_town"), Some("Glasgow"));
    assert!(created.slug.starts_with("new-widgets-ltd-"));
}

#[tokio::test]
async fn test_same_name_gets_distinct_slugs() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n\
               00000101,Acme Ltd\n\
               00000202,Acme Ltd\n";

    let report = import(store.clone(), csv, 10, &NullSink).await;

    assert_eq!(report.created, 2);
    assert_eq!(report.errored, 0);
    let stored = store.companies();
    assert_eq!(stored.len(), 2);
    assert_ne!(stored[0].slug, stored[1].slug);
    assert!(stored.iter().all(|c| c.slug.starts_with("acme-ltd-")));
}

#[tokio::test]
async fn test_keys_sharing_suffix_or_case_all_created() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n\
               AA12345678,Acme Ltd\n\
               BB12345678,Acme Ltd\n\
               ab000001,Beta Ltd\n\
               AB000001,Beta Ltd\n";

    let report = import(store.clone(), csv, 10, &NullSink).await;

    assert_eq!(report.created, 4, "errors: {:?}", report.errors);
    assert_eq!(report.errored, 0);
    let mut slugs: Vec<String> = store.companies().into_iter().map(|c| c.slug).collect();
    slugs.sort();
    slugs.dedup();
    assert_eq!(slugs.len(), 4);
}

#[tokio::test]
async fn test_unique_violation_errors_row_and_job_continues() {
    let inner = MemoryCompanyStore::with_companies([company("00000007", "Racing Ltd")]);
    let store = Arc::new(HiddenKeysStore {
        inner,
        hidden: vec!["00000007".to_string()],
    });
    let csv = "CompanyNumber,CompanyName\n\
               00000006,First Ltd\n\
               00000007,Racing Ltd\n\
               00000008,Last Ltd\n";

    let report = import(store.clone(), csv, 2, &NullSink).await;

    assert_eq!(report.stage, ImportStage::Completed);
    assert_eq!(report.created, 2);
    assert_eq!(report.errored, 1);
    assert_eq!(report.skipped_duplicate, 0);
    assert_conserved(&report);

    let failure = &report.errors[0];
    assert_eq!(failure.row, 2);
    assert_eq!(failure.reason, RowErrorReason::PersistenceFailed);
    assert_eq!(failure.business_key.as_deref(), Some("00000007"));
    assert_eq!(store.inner.company_count(), 3);
}

#[tokio::test]
async fn test_reimport_creates_nothing() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n\
               00000001,One Ltd\n\
               00000002,Two Ltd\n\
               00000003,Three Ltd\n";

    let first = import(store.clone(), csv, 2, &NullSink).await;
    assert_eq!(first.created, 3);

    let second = import(store.clone(), csv, 2, &NullSink).await;
    assert_eq!(second.stage, ImportStage::Completed);
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped_duplicate, 3);
    assert_eq!(second.errored, 0);
    assert_conserved(&second);
    assert_eq!(store.company_count(), 3);
}

#[tokio::test]
async fn test_repeated_key_within_file_is_duplicate() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n\
               00000001,One Ltd\n\
               00000001,One Limited\n";

    let report = import(store.clone(), csv, 10, &NullSink).await;

    assert_eq!(report.created, 1);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(store.companies()[0].name, "One Ltd");
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n\
               00000001,A Ltd\n00000002,B Ltd\n00000003,C Ltd\n00000004,D Ltd\n\
               00000005,E Ltd\n00000006,F Ltd\n00000007,G Ltd\n";
    let sink = RecordingSink::default();

    let report = import(store, csv, 2, &sink).await;
    assert!(report.success());

    let percentages = sink.percentages();
    assert!(percentages.len() >= 4, "expected several snapshots: {:?}", percentages);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{:?}", percentages);
    assert_eq!(percentages.last(), Some(&100));
    assert!(percentages[..percentages.len() - 1].iter().all(|p| *p < 100));

    let events = sink.events();
    assert!(events.last().is_some_and(ImportEvent::is_final));
    assert_eq!(events.iter().filter(|e| e.is_final()).count(), 1);
}

#[tokio::test]
async fn test_final_event_carries_stats() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n00000001,A Ltd\n,No Number Ltd\n";
    let sink = RecordingSink::default();

    import(store, csv, 10, &sink).await;

    let Some(ImportEvent::Final(event)) = sink.events().pop() else {
        panic!("last event should be final");
    };
    assert!(event.success);
    assert_eq!(event.final_stats.processed, 2);
    assert_eq!(event.final_stats.created, 1);
    assert_eq!(event.final_stats.skipped, 1);
    assert_eq!(event.final_stats.total_errors, 1);

    let json = serde_json::to_value(&*event).unwrap();
    assert_eq!(json["finalStats"]["totalErrors"], 1);
    assert_eq!(json["jobId"], event.job_id.to_string());
}

#[tokio::test]
async fn test_broken_stream_fails_job_with_partial_counts() {
    let store = Arc::new(MemoryCompanyStore::new());
    let reader = BrokenReader {
        data: Some(b"CompanyNumber,CompanyName\n00000001,One Ltd\n00000002,Tw"),
    };
    let parser = RowParser::open(reader, &ColumnNames::default()).await.unwrap();
    let sink = RecordingSink::default();
    let job = ImportJob::new(SourceFile {
        name: "broken.csv".to_string(),
        size_bytes: 1024,
    });
    let job_id = job.id;

    let report = pipeline(store.clone(), 10).run(job, parser, None, &sink).await;

    assert_eq!(report.stage, ImportStage::Failed);
    assert!(!report.success());
    assert!(report.failure.is_some());
    assert_eq!(report.processed, 1);
    assert_eq!(report.created, 1);
    assert_eq!(store.company_count(), 1);

    let percentages = sink.percentages();
    assert!(percentages.iter().all(|p| *p < 100), "{:?}", percentages);

    let stored = store.get_job(job_id).await.unwrap().expect("job recorded");
    assert_eq!(stored.stage, ImportStage::Failed);
    assert_eq!(stored.counters.created, 1);
}

#[tokio::test]
async fn test_cancelled_job_stops_and_records_failure() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n00000001,One Ltd\n00000002,Two Ltd\n";
    let parser = RowParser::open(csv.as_bytes(), &ColumnNames::default()).await.unwrap();
    let job = job_for(csv);
    let job_id = job.id;
    let token = CancellationToken::new();
    token.cancel();

    let report = pipeline(store.clone(), 10)
        .with_cancellation(token)
        .run(job, parser, Some(2), &NullSink)
        .await;

    assert_eq!(report.stage, ImportStage::Failed);
    assert!(report.failure.as_deref().unwrap().contains("interrupted"));
    assert_eq!(report.created, 0);
    assert_eq!(store.company_count(), 0);

    let stored = store.get_job(job_id).await.unwrap().expect("job recorded");
    assert_eq!(stored.stage, ImportStage::Failed);
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn test_job_record_reaches_completed() {
    let store = Arc::new(MemoryCompanyStore::new());
    let csv = "CompanyNumber,CompanyName\n00000001,One Ltd\n";

    let report = import(store.clone(), csv, 10, &NullSink).await;

    let stored = store.get_job(report.job_id).await.unwrap().expect("job recorded");
    assert_eq!(stored.stage, ImportStage::Completed);
    assert_eq!(stored.counters.rows_seen, 1);
    assert!(stored.finished_at.is_some());

    let listed = store.list_jobs(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, report.job_id);
}
