//! Integration tests for the crawl driver
//!
//! Most tests drive `CrawlDriver` with in-process stub sources so fetch
//! counts and failures are fully controlled. The last tests use wiremock to
//! run the configured HTML registry end-to-end.

use async_trait::async_trait;
use facility_harvester::config::parse_config;
use facility_harvester::crawler::{crawl, CrawlDriver, HaltHandle, RunSummary};
use facility_harvester::fetch::{Backoff, FetchClient, FetchError, RetryPolicy};
use facility_harvester::ledger::{FileLedger, LedgerEntry, LedgerError, ProgressLedger};
use facility_harvester::output::CsvSink;
use facility_harvester::source::{DetailFetcher, DetailPayload, Discovery, SourceError};
use facility_harvester::{HarvestError, ItemState, Record, WorkItem};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// How the stub answers a detail fetch for one id
#[derive(Clone)]
enum Behavior {
    Succeed,
    Fail(FetchError),
    Panic,
}

/// Discovery and detail fetch over a fixed list of ids
struct StubRegistry {
    ids: Vec<String>,
    behaviors: HashMap<String, Behavior>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubRegistry {
    fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            behaviors: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, id: &str, error: FetchError) -> Self {
        self.behaviors.insert(id.to_string(), Behavior::Fail(error));
        self
    }

    fn panicking(mut self, id: &str) -> Self {
        self.behaviors.insert(id.to_string(), Behavior::Panic);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn fetched_ids(&self) -> HashSet<String> {
        self.calls().into_iter().collect()
    }
}

#[async_trait]
impl Discovery for StubRegistry {
    async fn discover(&self) -> Result<Vec<WorkItem>, SourceError> {
        Ok(self
            .ids
            .iter()
            .map(|id| WorkItem::new(id.clone()).with_attribute("name", format!("Facility {}", id)))
            .collect())
    }
}

#[async_trait]
impl DetailFetcher for StubRegistry {
    async fn fetch_detail(&self, item: &WorkItem) -> Result<DetailPayload, FetchError> {
        self.calls.lock().unwrap().push(item.id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behaviors.get(&item.id).cloned().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed => {
                let mut detail = DetailPayload::new();
                detail.insert("status".to_string(), "licensed".to_string());
                Ok(detail)
            }
            Behavior::Fail(error) => Err(error),
            Behavior::Panic => panic!("detail parser crashed on {}", item.id),
        }
    }
}

/// Discovery that always fails
struct BrokenDiscovery;

#[async_trait]
impl Discovery for BrokenDiscovery {
    async fn discover(&self) -> Result<Vec<WorkItem>, SourceError> {
        Err(SourceError::Status {
            url: "https://registry.example.gov/list".to_string(),
            status: 500,
        })
    }
}

/// Ledger whose `finished` appends hit a read-only store
struct ReadOnlyLedger {
    inner: FileLedger,
}

#[async_trait]
impl ProgressLedger for ReadOnlyLedger {
    async fn init(&self) -> Result<(), LedgerError> {
        self.inner.init().await
    }

    async fn load_entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.load_entries().await
    }

    async fn mark_in_progress(&self, item: &WorkItem) -> Result<(), LedgerError> {
        self.inner.mark_in_progress(item).await
    }

    async fn mark_finished(&self, _item: &WorkItem) -> Result<(), LedgerError> {
        Err(LedgerError::Io {
            op: "append to",
            path: self.inner.path().to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        })
    }

    async fn mark_failed(&self, item: &WorkItem, cause: &str) -> Result<(), LedgerError> {
        self.inner.mark_failed(item, cause).await
    }
}

struct Paths {
    _dir: TempDir,
    ledger: PathBuf,
    output: PathBuf,
}

fn temp_paths() -> Paths {
    let dir = TempDir::new().unwrap();
    Paths {
        ledger: dir.path().join("progress.log"),
        output: dir.path().join("facilities.csv"),
        _dir: dir,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        attempt_timeout: Duration::from_secs(2),
        backoff: Backoff::Linear {
            step: Duration::from_millis(1),
            max: Duration::from_millis(5),
        },
        ..RetryPolicy::default()
    }
}

fn not_found() -> FetchError {
    FetchError::Status {
        code: 404,
        retry_after: None,
    }
}

async fn run_with_ledger(
    registry: &Arc<StubRegistry>,
    ledger: Arc<dyn ProgressLedger>,
    output: &Path,
    concurrency: usize,
) -> Result<RunSummary, HarvestError> {
    let sink = CsvSink::open(output, 1, 1).await?;
    let driver = CrawlDriver::new(
        registry.clone(),
        FetchClient::new(registry.clone(), fast_policy()),
        ledger,
        Arc::new(sink),
        concurrency,
    );
    driver.run().await
}

async fn run(
    registry: &Arc<StubRegistry>,
    paths: &Paths,
    concurrency: usize,
) -> Result<RunSummary, HarvestError> {
    let ledger = Arc::new(FileLedger::new(&paths.ledger));
    run_with_ledger(registry, ledger, &paths.output, concurrency).await
}

/// Data rows of the output file, header excluded
fn output_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

fn output_ids(path: &Path) -> Vec<String> {
    let mut ids: Vec<String> = output_rows(path)
        .iter()
        .map(|row| row.split(',').next().unwrap_or("").to_string())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_failed_item_recorded_others_written() {
    let paths = temp_paths();
    let registry = Arc::new(StubRegistry::new(&["A", "B", "C"]).failing("B", not_found()));

    let summary = run(&registry, &paths, 2).await.unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.interrupted);

    let ledger = FileLedger::new(&paths.ledger);
    let finished = ledger.load_finished_ids().await.unwrap();
    let expected: HashSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
    assert_eq!(finished, expected);

    assert_eq!(output_ids(&paths.output), vec!["A", "C"]);
    let header = std::fs::read_to_string(&paths.output).unwrap();
    assert!(header.starts_with("id,name,status\n"));

    let failures: Vec<_> = ledger
        .load_entries()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.state == ItemState::Failed)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "B");
    assert_eq!(failures[0].error_detail.as_deref(), Some("HTTP 404"));

    // Permanent failures are not retried
    assert_eq!(registry.calls().iter().filter(|id| *id == "B").count(), 1);
}

#[tokio::test]
async fn test_panicking_fetch_recorded_as_failed() {
    let paths = temp_paths();
    let registry = Arc::new(StubRegistry::new(&["A", "B", "C"]).panicking("B"));

    let summary = run(&registry, &paths, 2).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(output_ids(&paths.output), vec!["A", "C"]);

    let entries = FileLedger::new(&paths.ledger).load_entries().await.unwrap();
    let last_b = entries.iter().rev().find(|e| e.id == "B").unwrap();
    assert_eq!(last_b.state, ItemState::Failed);
    let cause = last_b.error_detail.as_deref().unwrap_or("");
    assert!(cause.starts_with("fetch task failed"), "cause was {:?}", cause);

    // The next run picks it up again
    let second = Arc::new(StubRegistry::new(&["A", "B", "C"]));
    let summary = run(&second, &paths, 2).await.unwrap();
    assert_eq!(second.calls(), vec!["B"]);
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_rerun_after_completion_fetches_nothing() {
    let paths = temp_paths();
    let registry = Arc::new(StubRegistry::new(&["A", "B", "C", "D"]));

    run(&registry, &paths, 2).await.unwrap();
    assert_eq!(registry.calls().len(), 4);
    let before = std::fs::read(&paths.output).unwrap();

    let summary = run(&registry, &paths, 2).await.unwrap();

    assert_eq!(registry.calls().len(), 4);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.already_finished, 4);
    assert_eq!(std::fs::read(&paths.output).unwrap(), before);
}

#[tokio::test]
async fn test_rerun_retries_only_failed_items() {
    let paths = temp_paths();
    let first = Arc::new(StubRegistry::new(&["A", "B", "C"]).failing("B", not_found()));
    run(&first, &paths, 1).await.unwrap();

    let second = Arc::new(StubRegistry::new(&["A", "B", "C"]));
    let summary = run(&second, &paths, 1).await.unwrap();

    assert_eq!(second.calls(), vec!["B"]);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(output_ids(&paths.output), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_resume_after_partial_run() {
    let paths = temp_paths();

    // An earlier run finished A and B before it was killed; C was in flight
    let ledger = FileLedger::new(&paths.ledger);
    ledger.init().await.unwrap();
    let sink = CsvSink::open(&paths.output, 1, 1).await.unwrap();
    for id in ["A", "B"] {
        let item = WorkItem::new(id).with_attribute("name", format!("Facility {}", id));
        let mut detail = DetailPayload::new();
        detail.insert("status".to_string(), "licensed".to_string());
        sink.append(Record::merge(&item, detail)).await;
        sink.flush().await.unwrap();
        ledger.mark_in_progress(&item).await.unwrap();
        ledger.mark_finished(&item).await.unwrap();
    }
    ledger.mark_in_progress(&WorkItem::new("C")).await.unwrap();
    drop(sink);

    let registry = Arc::new(StubRegistry::new(&["A", "B", "C", "D", "E"]));
    let summary = run(&registry, &paths, 3).await.unwrap();

    let expected: HashSet<String> = ["C", "D", "E"].iter().map(|s| s.to_string()).collect();
    assert_eq!(registry.fetched_ids(), expected);
    assert_eq!(registry.calls().len(), 3);
    assert_eq!(summary.already_finished, 2);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(output_ids(&paths.output), vec!["A", "B", "C", "D", "E"]);
}

#[tokio::test]
async fn test_finished_item_missing_from_output_is_refetched() {
    let paths = temp_paths();

    let ledger = FileLedger::new(&paths.ledger);
    ledger.init().await.unwrap();
    ledger.mark_finished(&WorkItem::new("A")).await.unwrap();

    let registry = Arc::new(StubRegistry::new(&["A", "B"]));
    let summary = run(&registry, &paths, 2).await.unwrap();

    assert_eq!(registry.calls().len(), 2);
    assert_eq!(summary.already_finished, 0);
    assert_eq!(output_ids(&paths.output), vec!["A", "B"]);
}

#[tokio::test]
async fn test_always_failing_item_does_not_block_others() {
    let paths = temp_paths();
    let unavailable = FetchError::Status {
        code: 503,
        retry_after: None,
    };
    let ids: Vec<String> = (0..12).map(|i| format!("F-{:02}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let registry = Arc::new(StubRegistry::new(&id_refs).failing("F-03", unavailable));

    let summary = run(&registry, &paths, 4).await.unwrap();

    assert_eq!(summary.succeeded, 11);
    assert_eq!(summary.failed, 1);
    // One attempt plus two retries
    assert_eq!(registry.calls().iter().filter(|id| *id == "F-03").count(), 3);
    assert_eq!(output_rows(&paths.output).len(), 11);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let paths = temp_paths();
    let ids: Vec<String> = (0..20).map(|i| format!("F-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let registry = Arc::new(StubRegistry::new(&id_refs).with_delay(Duration::from_millis(10)));

    let summary = run(&registry, &paths, 3).await.unwrap();

    assert_eq!(summary.succeeded, 20);
    let peak = registry.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight fetches was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_discovery_failure_fails_run() {
    let paths = temp_paths();
    let fetcher = Arc::new(StubRegistry::new(&[]));
    let sink = CsvSink::open(&paths.output, 1, 1).await.unwrap();

    let driver = CrawlDriver::new(
        Arc::new(BrokenDiscovery),
        FetchClient::new(fetcher.clone(), fast_policy()),
        Arc::new(FileLedger::new(&paths.ledger)),
        Arc::new(sink),
        2,
    );

    let result = driver.run().await;
    assert!(matches!(result, Err(HarvestError::Discovery(_))));
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_unwritable_ledger_aborts_run() {
    let paths = temp_paths();
    let ids: Vec<String> = (0..10).map(|i| format!("F-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let registry = Arc::new(StubRegistry::new(&id_refs).with_delay(Duration::from_millis(5)));
    let ledger = Arc::new(ReadOnlyLedger {
        inner: FileLedger::new(&paths.ledger),
    });

    let result = run_with_ledger(&registry, ledger, &paths.output, 1).await;

    assert!(matches!(result, Err(HarvestError::StoreUnavailable(_))));
    // The run stops instead of fetching every remaining item
    assert!(registry.calls().len() < 10);
    assert!(FileLedger::new(&paths.ledger)
        .load_finished_ids()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_halted_run_starts_nothing() {
    let paths = temp_paths();
    let registry = Arc::new(StubRegistry::new(&["A", "B", "C"]));
    let sink = CsvSink::open(&paths.output, 1, 1).await.unwrap();
    let halt = HaltHandle::new();
    halt.halt();

    let driver = CrawlDriver::new(
        registry.clone(),
        FetchClient::new(registry.clone(), fast_policy()),
        Arc::new(FileLedger::new(&paths.ledger)),
        Arc::new(sink),
        2,
    )
    .with_halt_handle(halt);

    let summary = driver.run().await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.skipped, 3);
    assert!(registry.calls().is_empty());
}

fn registry_config(base_url: &str, paths: &Paths) -> String {
    format!(
        r##"
[crawler]
concurrency = 2
max-retries = 2
attempt-timeout-ms = 2000

[crawler.backoff]
strategy = "linear"
base-delay-ms = 10
max-delay-ms = 50

[user-agent]
crawler-name = "TestHarvester"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "test@example.com"

[output]
ledger-path = "{ledger}"
output-path = "{output}"

[source]
listing-urls = ["{base}/facilities"]
item-selector = "tr.facility"
link-selector = "a.profile"
id-selector = "td.license"
next-page-selector = "a.next"

[source.listing-fields]
name = "td.name"

[source.detail-fields]
address = ".address"
beds = "#beds"
"##,
        ledger = paths.ledger.display(),
        output = paths.output.display(),
        base = base_url
    )
}

fn detail_page(address: &str, beds: u32) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!(
            r#"<html><body><p class="address">{}</p><span id="beds">{}</span></body></html>"#,
            address, beds
        ))
        .insert_header("content-type", "text/html")
}

async fn mount_registry(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/facilities"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><table>
            <tr class="facility"><td class="name">Oak Care</td><td class="license">LIC-1</td>
                <td><a class="profile" href="/facility/1">view</a></td></tr>
            <tr class="facility"><td class="name">Pine House</td><td class="license">LIC-2</td>
                <td><a class="profile" href="/facility/2">view</a></td></tr>
            </table><a class="next" href="/facilities/page2">next</a></body></html>"#,
        ))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/facilities/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><table>
            <tr class="facility"><td class="name">Elm Lodge</td><td class="license">LIC-3</td>
                <td><a class="profile" href="/facility/3">view</a></td></tr>
            </table></body></html>"#,
        ))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/facility/1"))
        .respond_with(detail_page("1 Oak Rd", 40))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/facility/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(mock_server)
        .await;

    // Facility 3 is briefly unavailable before it answers
    Mock::given(method("GET"))
        .and(path("/facility/3"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/facility/3"))
        .respond_with(detail_page("3 Elm St, Unit 2", 12))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_html_registry_end_to_end() {
    let mock_server = MockServer::start().await;
    mount_registry(&mock_server).await;

    let paths = temp_paths();
    let config = parse_config(&registry_config(&mock_server.uri(), &paths)).unwrap();

    let summary = crawl(config, "testhash", HaltHandle::new()).await.unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let base = mock_server.uri();
    let text = std::fs::read_to_string(&paths.output).unwrap();
    assert_eq!(
        text,
        format!(
            "id,profile_url,name,address,beds\n\
             LIC-1,{base}/facility/1,Oak Care,1 Oak Rd,40\n\
             LIC-3,{base}/facility/3,Elm Lodge,\"3 Elm St, Unit 2\",12\n",
            base = base
        )
    );

    let ledger_text = std::fs::read_to_string(&paths.ledger).unwrap();
    assert!(ledger_text.starts_with("# facility-harvester progress ledger v1 config=testhash\n"));
    assert!(ledger_text.contains("\tfailed\tLIC-2\tHTTP 404\n"));
}

#[tokio::test]
async fn test_html_registry_resume_makes_no_detail_requests() {
    let mock_server = MockServer::start().await;
    mount_registry(&mock_server).await;

    let paths = temp_paths();
    let config_text = registry_config(&mock_server.uri(), &paths);

    crawl(parse_config(&config_text).unwrap(), "h", HaltHandle::new())
        .await
        .unwrap();
    let before = std::fs::read(&paths.output).unwrap();
    let requests_before = mock_server.received_requests().await.unwrap_or_default().len();

    let summary = crawl(parse_config(&config_text).unwrap(), "h", HaltHandle::new())
        .await
        .unwrap();

    // Only the failed facility and the two listing pages are requested again
    let requests_after = mock_server.received_requests().await.unwrap_or_default().len();
    assert_eq!(requests_after - requests_before, 3);
    assert_eq!(summary.already_finished, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(std::fs::read(&paths.output).unwrap(), before);
}
