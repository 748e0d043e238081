//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dsrsync::api::{
    CalendarZone, CsvFileSink, Error, ErrorKind, FileCheckpointStore, Normalizer, PageSource,
    Paginator, ResumeCursor, RetryPolicy, RunConfig, RunReport,
};
use serde_json::{Value, json};

/// Epoch-millisecond value shared by every synthetic row (2023-11-14 UTC).
pub const UPDATED_MS: i64 = 1_700_000_000_000;

/// A paged, delta-encoded data set served in memory. Page `k` holds rows
/// `k * page_size ..` and always advertises cursor `["p{k+1}"]`.
pub struct Dataset {
    pub total: usize,
    pub page_size: usize,
    pub fetches: Vec<Option<ResumeCursor>>,
    /// Page index whose body is replaced by a malformed page.
    pub broken_page: Option<usize>,
    /// Page index that fails with a transport error once.
    pub flaky_page: Option<usize>,
}

impl Dataset {
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size,
            fetches: Vec::new(),
            broken_page: None,
            flaky_page: None,
        }
    }
}

impl PageSource for Dataset {
    fn fetch(&mut self, cursor: Option<&ResumeCursor>) -> Result<String, Error> {
        self.fetches.push(cursor.cloned());
        let index = match cursor {
            None => 0,
            Some(cursor) => cursor.as_values()[0]
                .as_str()
                .and_then(|token| token.strip_prefix('p'))
                .and_then(|n| n.parse::<usize>().ok())
                .expect("cursor issued by this dataset"),
        };
        if self.flaky_page == Some(index) {
            self.flaky_page = None;
            return Err(Error::new(ErrorKind::Transport).with_status(503));
        }
        if self.broken_page == Some(index) {
            return Ok(broken_page_body());
        }
        let first = index * self.page_size;
        let last = (first + self.page_size).min(self.total);
        Ok(page_body(first, last.saturating_sub(first), &format!("p{}", index + 1)))
    }
}

/// Wraps a source and raises the stop flag once `cancel_on_fetch` fetches were made.
pub struct CancelAfter<S> {
    pub inner: S,
    pub stop: Arc<AtomicBool>,
    pub cancel_on_fetch: usize,
    fetches: usize,
}

impl<S> CancelAfter<S> {
    pub fn new(inner: S, stop: Arc<AtomicBool>, cancel_on_fetch: usize) -> Self {
        Self {
            inner,
            stop,
            cancel_on_fetch,
            fetches: 0,
        }
    }
}

impl<S: PageSource> PageSource for CancelAfter<S> {
    fn fetch(&mut self, cursor: Option<&ResumeCursor>) -> Result<String, Error> {
        self.fetches += 1;
        let body = self.inner.fetch(cursor);
        if self.fetches == self.cancel_on_fetch {
            self.stop.store(true, Ordering::SeqCst);
        }
        body
    }
}

pub fn note(i: usize) -> Option<String> {
    if i % 3 == 0 {
        None
    } else {
        Some(format!("line\nbreak {i}"))
    }
}

/// Encodes rows `first..first+count` the way the service does: schema on
/// the first record, constant column copied, missing notes as null bits.
pub fn page_body(first: usize, count: usize, cursor: &str) -> String {
    let mut records = Vec::new();
    for i in first..first + count {
        let status = (i % 2) as u64;
        let record = if i == first {
            let mut cells = vec![json!(format!("P-{i:04}")), json!(status), json!(UPDATED_MS)];
            let mut record = json!({
                "S": [
                    {"N": "G0", "T": 1},
                    {"N": "G1", "T": 1, "DN": "D0"},
                    {"N": "G2", "T": 7},
                    {"N": "G3", "T": 1}
                ]
            });
            match note(i) {
                Some(note) => cells.push(json!(note)),
                None => record["Ø"] = json!(0b1000),
            }
            record["C"] = Value::Array(cells);
            record
        } else {
            let mut cells = vec![json!(format!("P-{i:04}")), json!(status)];
            let mut record = json!({"R": 0b0100});
            match note(i) {
                Some(note) => cells.push(json!(note)),
                None => record["Ø"] = json!(0b1000),
            }
            record["C"] = Value::Array(cells);
            record
        };
        records.push(record);
    }
    json!({"results": [{"result": {"data": {
        "descriptor": {"Select": [
            {"Kind": 1, "Value": "G0", "GroupKeys": [{"Source": {"Entity": "Account", "Property": "Permit Number"}}]},
            {"Kind": 1, "Value": "G1", "GroupKeys": [{"Source": {"Entity": "Status", "Property": "Status"}}]},
            {"Kind": 1, "Value": "G2", "GroupKeys": [{"Source": {"Entity": "Permit", "Property": "Issue Date"}}]},
            {"Kind": 1, "Value": "G3", "GroupKeys": [{"Source": {"Entity": "Account", "Property": "Note"}}]}
        ]},
        "dsr": {"DS": [{
            "PH": [{"DM0": records}],
            "ValueDicts": {"D0": ["Active", "Expired"]},
            "RT": [[cursor]]
        }]}
    }}}]})
    .to_string()
}

pub fn broken_page_body() -> String {
    json!({"results": [{"result": {"data": {"dsr": {"DS": [{
        "PH": [{"DM0": [{"C": ["no schema"]}]}]
    }]}}}}]})
    .to_string()
}

/// CSV text an uninterrupted export of `total` rows produces.
pub fn expected_csv(total: usize) -> String {
    let mut out = String::from("Permit Number,Status,Issue Date,Note\r\n");
    for i in 0..total {
        let status = if i % 2 == 0 { "Active" } else { "Expired" };
        let note = note(i).map(|n| n.replace('\n', "")).unwrap_or_default();
        out.push_str(&format!("P-{i:04},{status},11.14.2023,{note}\r\n"));
    }
    out
}

pub fn run_config(page_size: usize) -> RunConfig {
    RunConfig {
        page_size,
        inter_page_delay: Duration::ZERO,
        fresh_start: false,
        retry: RetryPolicy::none(),
    }
}

pub fn paginator(config: RunConfig, stop: Option<Arc<AtomicBool>>) -> Paginator {
    let paginator = Paginator::new(config, Normalizer::new(CalendarZone::Utc));
    match stop {
        Some(stop) => paginator.with_stop(stop),
        None => paginator,
    }
}

/// Runs one export into `dir/out.csv` with the checkpoint at `dir/checkpoint.json`.
pub fn run_in<S: PageSource>(
    dir: &Path,
    source: &mut S,
    config: RunConfig,
    stop: Option<Arc<AtomicBool>>,
) -> Result<RunReport, Error> {
    let mut sink = CsvFileSink::new(dir.join("out.csv"));
    let mut store = FileCheckpointStore::new(dir.join("checkpoint.json"));
    paginator(config, stop).run(source, &mut sink, &mut store)
}

pub fn read_output(dir: &Path) -> String {
    std::fs::read_to_string(dir.join("out.csv")).expect("read output")
}

/// A request as seen by [`QueryServer`].
#[derive(Debug)]
pub struct SeenRequest {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Local HTTP server answering one scripted response per connection.
pub struct QueryServer {
    pub url: String,
    handle: std::thread::JoinHandle<Vec<SeenRequest>>,
}

impl QueryServer {
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!(
            "http://{}/public/reports/querydata?synchronous=true",
            listener.local_addr().expect("addr")
        );
        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                seen.push(read_request(&mut stream));
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).expect("write response");
            }
            seen
        });
        Self { url, handle }
    }

    /// Waits for every scripted response to be served.
    pub fn finish(self) -> Vec<SeenRequest> {
        self.handle.join().expect("server thread")
    }
}

fn read_request(stream: &mut TcpStream) -> SeenRequest {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("request line");
    let method = request_line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("header line");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).expect("body");
    SeenRequest {
        method,
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    }
}
