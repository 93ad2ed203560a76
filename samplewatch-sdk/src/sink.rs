//! Output sinks for metric records and monitor notices.
//!
//! The runtime only calls the [`Sink`] trait. Throttling is the sink's
//! business; the runtime hands over the [`RateLimit`] parameters at open.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use samplewatch_types::MetricRecord;
use tracing::{debug, error, info, warn};

/// Upper bound on a single TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on writing one record to the TCP stream.
pub const TCP_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// After a failed connect or write, records are dropped for this long
/// before the next connection attempt.
pub const TCP_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Leaky-bucket parameters for writes to a monitor's output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Sustained write rate in bytes per second (bucket fill rate).
    pub fill_rate: f64,
    /// Largest burst in bytes (bucket size).
    pub burst_size: u64,
}

impl RateLimit {
    pub const fn new(fill_rate: f64, burst_size: u64) -> Self {
        Self {
            fill_rate,
            burst_size,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(2000.0, 100_000)
    }
}

/// Destination for a monitor's records and notices.
pub trait Sink: Send + Sync {
    /// Prepare the sink for a monitor.
    fn open(&self, name: &str, destination: &Path, rate_limit: RateLimit) -> io::Result<()>;

    fn close(&self);

    /// Hand a record to the sink.
    ///
    /// Best-effort sinks return `Ok` for records they drop; the runtime's
    /// `reported_lines` counts records accepted here, not records delivered.
    fn emit(&self, record: &MetricRecord) -> io::Result<()>;

    fn log_error(&self, message: &str);

    fn log_info(&self, message: &str);
}

/// Where an [`OutputSink`] sends records.
#[derive(Debug)]
pub enum Output {
    /// Append records as JSON lines to the destination path given at open.
    File,

    /// Send each record to a TCP server as a newline-delimited JSON message.
    ///
    /// Best effort: while the server is unreachable records are dropped and
    /// reconnection is attempted at most once per [`TCP_RETRY_DELAY`].
    Tcp(String),

    /// Send records through a channel.
    ///
    /// Use `Output::channel()` to create this variant and get the receiver.
    /// Records are dropped when the channel is full.
    #[cfg(feature = "tokio")]
    Channel(tokio::sync::mpsc::Sender<MetricRecord>),
}

impl Output {
    /// Create a TCP output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use samplewatch_sdk::Output;
    ///
    /// let output = Output::tcp("localhost:9090");
    /// ```
    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    ///
    /// # Example
    ///
    /// ```rust
    /// use samplewatch_sdk::Output;
    ///
    /// let (output, mut rx) = Output::channel(16);
    ///
    /// // Later, receive records
    /// // while let Some(record) = rx.recv().await {
    /// //     println!("{} = {}", record.metric, record.value);
    /// // }
    /// ```
    #[cfg(feature = "tokio")]
    pub fn channel(buffer: usize) -> (Self, tokio::sync::mpsc::Receiver<MetricRecord>) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Wrap this output in a sink.
    pub fn into_sink(self) -> OutputSink {
        OutputSink::new(self)
    }
}

#[derive(Debug)]
struct OpenState {
    name: String,
    destination: PathBuf,
    rate_limit: RateLimit,
    file: Option<LineWriter<File>>,
    tcp: Option<TcpStream>,
    tcp_retry_at: Option<Instant>,
}

/// A [`Sink`] backed by an [`Output`], logging notices through `tracing`.
#[derive(Debug)]
pub struct OutputSink {
    output: Output,
    state: Mutex<Option<OpenState>>,
}

impl OutputSink {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            state: Mutex::new(None),
        }
    }

    /// The destination path and rate limit the sink was opened with.
    pub fn opened_with(&self) -> Option<(PathBuf, RateLimit)> {
        self.state
            .lock()
            .as_ref()
            .map(|s| (s.destination.clone(), s.rate_limit))
    }

    fn monitor_name(&self) -> String {
        self.state
            .lock()
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }
}

impl Sink for OutputSink {
    fn open(&self, name: &str, destination: &Path, rate_limit: RateLimit) -> io::Result<()> {
        let file = match self.output {
            Output::File => {
                if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let f = OpenOptions::new().create(true).append(true).open(destination)?;
                Some(LineWriter::new(f))
            }
            _ => None,
        };

        debug!(
            monitor = name,
            destination = %destination.display(),
            fill_rate = rate_limit.fill_rate,
            burst_size = rate_limit.burst_size,
            "opened output"
        );

        *self.state.lock() = Some(OpenState {
            name: name.to_string(),
            destination: destination.to_path_buf(),
            rate_limit,
            file,
            tcp: None,
            tcp_retry_at: None,
        });
        Ok(())
    }

    fn close(&self) {
        if let Some(mut state) = self.state.lock().take() {
            if let Some(file) = state.file.as_mut() {
                let _ = file.flush();
            }
            debug!(monitor = %state.name, "closed output");
        }
    }

    fn emit(&self, record: &MetricRecord) -> io::Result<()> {
        match &self.output {
            Output::File => {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                let mut guard = self.state.lock();
                match guard.as_mut().and_then(|s| s.file.as_mut()) {
                    Some(file) => file.write_all(&line),
                    None => Err(io::Error::new(io::ErrorKind::NotConnected, "output is not open")),
                }
            }
            Output::Tcp(addr) => {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                let mut guard = self.state.lock();
                let Some(state) = guard.as_mut() else {
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "output is not open"));
                };

                if state.tcp.is_none() {
                    if state.tcp_retry_at.is_some_and(|at| Instant::now() < at) {
                        return Ok(());
                    }
                    match connect(addr) {
                        Ok(stream) => {
                            debug!(monitor = %state.name, addr = %addr, "connected output");
                            state.tcp = Some(stream);
                            state.tcp_retry_at = None;
                        }
                        Err(e) => {
                            warn!(monitor = %state.name, addr = %addr, error = %e, "output unreachable, dropping records");
                            state.tcp_retry_at = Some(Instant::now() + TCP_RETRY_DELAY);
                            return Ok(());
                        }
                    }
                }
                if let Some(stream) = state.tcp.as_mut() {
                    if let Err(e) = stream.write_all(&line) {
                        warn!(monitor = %state.name, addr = %addr, error = %e, "output write failed");
                        state.tcp = None;
                        state.tcp_retry_at = Some(Instant::now() + TCP_RETRY_DELAY);
                    }
                }
                Ok(())
            }
            #[cfg(feature = "tokio")]
            Output::Channel(tx) => {
                if self.state.lock().is_none() {
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "output is not open"));
                }
                // Never block the sampling thread on a full channel
                let _ = tx.try_send(record.clone());
                Ok(())
            }
        }
    }

    fn log_error(&self, message: &str) {
        error!(monitor = %self.monitor_name(), "{}", message);
    }

    fn log_info(&self, message: &str) {
        info!(monitor = %self.monitor_name(), "{}", message);
    }
}

/// Connect to the first reachable address `addr` resolves to.
fn connect(addr: &str) -> io::Result<TcpStream> {
    let mut last_err = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, TCP_CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_write_timeout(Some(TCP_WRITE_TIMEOUT))?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{} resolved to no addresses", addr))
    }))
}

/// In-memory sink that keeps everything it is given.
///
/// Useful in tests and when embedding monitors in a host that pulls records.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    opened: Option<(String, PathBuf, RateLimit)>,
    open_calls: usize,
    close_calls: usize,
    records: Vec<MetricRecord>,
    errors: Vec<String>,
    infos: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.state.lock().records.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.state.lock().infos.clone()
    }

    /// Name, destination and rate limit of the current open, if any.
    pub fn opened_with(&self) -> Option<(String, PathBuf, RateLimit)> {
        self.state.lock().opened.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

impl Sink for MemorySink {
    fn open(&self, name: &str, destination: &Path, rate_limit: RateLimit) -> io::Result<()> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        state.opened = Some((name.to_string(), destination.to_path_buf(), rate_limit));
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.opened = None;
    }

    fn emit(&self, record: &MetricRecord) -> io::Result<()> {
        self.state.lock().records.push(record.clone());
        Ok(())
    }

    fn log_error(&self, message: &str) {
        self.state.lock().errors.push(message.to_string());
    }

    fn log_info(&self, message: &str) {
        self.state.lock().infos.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_limit() {
        let limit = RateLimit::default();
        assert_eq!(limit.fill_rate, 2000.0);
        assert_eq!(limit.burst_size, 100_000);
    }

    #[test]
    fn file_output_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("m.log");

        let sink = Output::File.into_sink();
        sink.open("m", &path, RateLimit::default()).unwrap();
        sink.emit(&MetricRecord::with_timestamp("a", 1, 10)).unwrap();
        sink.emit(&MetricRecord::with_timestamp("b", 2.5, 20)).unwrap();
        sink.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: MetricRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.metric, "a");
        assert_eq!(first.timestamp_ms, 10);
    }

    #[test]
    fn file_output_rejects_emit_when_closed() {
        let sink = Output::File.into_sink();
        let err = sink.emit(&MetricRecord::new("a", 1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn opened_with_reports_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.log");
        let sink = Output::File.into_sink();
        assert!(sink.opened_with().is_none());

        sink.open("m", &path, RateLimit::new(10.0, 20)).unwrap();
        assert_eq!(sink.opened_with(), Some((path, RateLimit::new(10.0, 20))));

        sink.close();
        assert!(sink.opened_with().is_none());
    }

    #[test]
    fn tcp_output_is_best_effort_when_unreachable() {
        let sink = Output::tcp("127.0.0.1:1").into_sink();
        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        assert!(sink.emit(&MetricRecord::new("a", 1)).is_ok());
    }

    #[test]
    fn tcp_output_backs_off_after_failed_connect() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let sink = Output::tcp(addr).into_sink();
        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        sink.emit(&MetricRecord::new("a", 1)).unwrap();

        let retry_at = sink.state.lock().as_ref().unwrap().tcp_retry_at.unwrap();
        assert!(retry_at > Instant::now());

        // Inside the retry window no new attempt is made
        sink.emit(&MetricRecord::new("b", 1)).unwrap();
        let state = sink.state.lock();
        assert_eq!(state.as_ref().unwrap().tcp_retry_at, Some(retry_at));
        assert!(state.as_ref().unwrap().tcp.is_none());
    }

    #[test]
    fn tcp_connect_is_bounded_by_timeout() {
        let started = Instant::now();
        assert!(connect("10.255.255.1:9").is_err());
        assert!(started.elapsed() < TCP_CONNECT_TIMEOUT + Duration::from_secs(1));
    }

    #[test]
    fn tcp_connected_stream_has_write_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = connect(&listener.local_addr().unwrap().to_string()).unwrap();
        assert_eq!(stream.write_timeout().unwrap(), Some(TCP_WRITE_TIMEOUT));
    }

    #[test]
    fn tcp_output_sends_newline_delimited_json() {
        use std::io::{BufRead, BufReader};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let sink = Output::tcp(addr).into_sink();
        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        sink.emit(&MetricRecord::with_timestamp("a", 1, 5)).unwrap();

        let (stream, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        let record: MetricRecord = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record.metric, "a");
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn channel_output_forwards_records() {
        let (output, mut rx) = Output::channel(4);
        let sink = output.into_sink();
        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        sink.emit(&MetricRecord::with_timestamp("a", 1, 5)).unwrap();

        let record = rx.try_recv().unwrap();
        assert_eq!(record.metric, "a");
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn channel_output_drops_when_full() {
        let (output, _rx) = Output::channel(1);
        let sink = output.into_sink();
        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        sink.emit(&MetricRecord::new("a", 1)).unwrap();
        assert!(sink.emit(&MetricRecord::new("b", 1)).is_ok());
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn channel_output_rejects_emit_when_closed() {
        let (output, mut rx) = Output::channel(4);
        let sink = output.into_sink();
        let err = sink.emit(&MetricRecord::new("a", 1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        sink.close();
        let err = sink.emit(&MetricRecord::new("b", 1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn memory_sink_records_everything() {
        let sink = MemorySink::new();
        sink.open("m", Path::new("m.log"), RateLimit::default()).unwrap();
        sink.emit(&MetricRecord::new("a", 1)).unwrap();
        sink.log_error("boom");
        sink.log_info("hello");
        sink.close();

        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.errors(), vec!["boom".to_string()]);
        assert_eq!(sink.infos(), vec!["hello".to_string()]);
        assert_eq!(sink.open_calls(), 1);
        assert_eq!(sink.close_calls(), 1);
        assert!(sink.opened_with().is_none());
    }
}
