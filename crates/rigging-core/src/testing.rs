//! In-process doubles for exercising the engine without a container engine.
//!
//! [`FakeBackend`] records every backend call and hands out fixed host
//! ports; [`StubHttpServer`] answers any request with a configurable body so
//! readiness probes and metric scrapes have something to talk to.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use rigging_common::error::{Result, RiggingError};
use rigging_common::types::PortMap;

use crate::backend::{Backend, LaunchSpec, Scope, Workload};
use crate::command::{Command, ExecOptions, ExecOutput};

/// One call observed by [`FakeBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `create_scope(name)`.
    CreateScope(String),
    /// `destroy_scope(name)`.
    DestroyScope(String),
    /// `launch(runnable)`.
    Launch(String),
    /// `stop(runnable)`.
    Stop(String),
    /// `kill(runnable)`.
    Kill(String),
    /// `exec(runnable, command)`.
    Exec(String, String),
}

#[derive(Debug, Default)]
struct FakeState {
    events: Vec<Event>,
    host_ports: BTreeMap<(String, String), u16>,
    failing_launch: HashSet<String>,
    failing_stop: HashSet<String>,
    launch_delays: BTreeMap<String, Duration>,
}

/// Backend double that launches nothing and records every call.
///
/// Host ports are allocated from a counter unless pinned with
/// [`FakeBackend::with_host_port`].
#[derive(Debug, Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    next_port: Arc<AtomicU16>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            next_port: Arc::new(AtomicU16::new(40_000)),
        }
    }
}

impl FakeBackend {
    /// Creates a backend with no pinned ports and no failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the host port handed out for `runnable`'s logical `port`.
    #[must_use]
    pub fn with_host_port(self, runnable: &str, port: &str, host_port: u16) -> Self {
        let _ = self
            .lock()
            .host_ports
            .insert((runnable.to_string(), port.to_string()), host_port);
        self
    }

    /// Makes every launch of `runnable` fail.
    #[must_use]
    pub fn failing_launch(self, runnable: &str) -> Self {
        let _ = self.lock().failing_launch.insert(runnable.to_string());
        self
    }

    /// Makes stop and kill of `runnable` fail.
    #[must_use]
    pub fn failing_stop(self, runnable: &str) -> Self {
        let _ = self.lock().failing_stop.insert(runnable.to_string());
        self
    }

    /// Makes every launch of `runnable` block for `delay` first.
    #[must_use]
    pub fn slow_launch(self, runnable: &str, delay: Duration) -> Self {
        let _ = self
            .lock()
            .launch_delays
            .insert(runnable.to_string(), delay);
        self
    }

    /// Lets stop and kill of `runnable` succeed again.
    pub fn heal_stop(&self, runnable: &str) {
        let _ = self.lock().failing_stop.remove(runnable);
    }

    /// Calls observed so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: Event) {
        self.lock().events.push(event);
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create_scope(&self, scope: &Scope) -> Result<()> {
        self.record(Event::CreateScope(scope.name.clone()));
        Ok(())
    }

    fn destroy_scope(&self, scope: &Scope) {
        self.record(Event::DestroyScope(scope.name.clone()));
    }

    fn internal_dir(&self, scope: &Scope, runnable: &str) -> PathBuf {
        scope.dir.join(runnable)
    }

    fn internal_endpoint(&self, scope: &Scope, runnable: &str, port: u16) -> String {
        format!("{}-{runnable}:{port}", scope.name)
    }

    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn Workload>> {
        self.record(Event::Launch(spec.name.to_string()));
        let delay = self.lock().launch_delays.get(spec.name).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        if state.failing_launch.contains(spec.name) {
            return Err(RiggingError::Tool {
                command: format!("fake launch {}", spec.name),
                status: "exit status: 125".into(),
                stderr: "launch refused".into(),
            });
        }
        let mut host_ports = PortMap::new();
        for port_name in spec.ports.keys() {
            let key = (spec.name.to_string(), port_name.clone());
            let host_port = match state.host_ports.get(&key) {
                Some(port) => *port,
                None => {
                    let port = self.next_port.fetch_add(1, Ordering::Relaxed);
                    let _ = state.host_ports.insert(key, port);
                    port
                }
            };
            let _ = host_ports.insert(port_name.clone(), host_port);
        }
        drop(state);
        Ok(Box::new(FakeWorkload {
            backend: self.clone(),
            name: spec.name.to_string(),
            host_ports,
        }))
    }
}

#[derive(Debug)]
struct FakeWorkload {
    backend: FakeBackend,
    name: String,
    host_ports: PortMap,
}

impl FakeWorkload {
    fn halt(&self, event: Event) -> Result<()> {
        self.backend.record(event);
        if self.backend.lock().failing_stop.contains(&self.name) {
            return Err(RiggingError::Tool {
                command: format!("fake stop {}", self.name),
                status: "exit status: 1".into(),
                stderr: "stop refused".into(),
            });
        }
        Ok(())
    }
}

impl Workload for FakeWorkload {
    fn host_ports(&self) -> &PortMap {
        &self.host_ports
    }

    fn host_address(&self) -> &str {
        "127.0.0.1"
    }

    fn stop(&self) -> Result<()> {
        self.halt(Event::Stop(self.name.clone()))
    }

    fn kill(&self) -> Result<()> {
        self.halt(Event::Kill(self.name.clone()))
    }

    /// `false` exits 1, `echo` prints its arguments, anything else exits 0.
    fn exec(&self, command: &Command, mut options: ExecOptions) -> Result<ExecOutput> {
        self.backend
            .record(Event::Exec(self.name.clone(), command.to_string()));
        let output = match command.cmd.as_str() {
            "false" => ExecOutput {
                stderr: "exit status 1\n".into(),
                exit_code: 1,
                ..ExecOutput::default()
            },
            "echo" => ExecOutput {
                stdout: format!("{}\n", command.args.join(" ")),
                ..ExecOutput::default()
            },
            _ => ExecOutput::default(),
        };
        for (sink, text) in [
            (options.stdout.as_mut(), &output.stdout),
            (options.stderr.as_mut(), &output.stderr),
        ] {
            if let Some(sink) = sink {
                sink.write_all(text.as_bytes()).map_err(|e| RiggingError::Io {
                    path: PathBuf::from("<exec sink>"),
                    source: e,
                })?;
            }
        }
        Ok(output)
    }
}

#[derive(Debug)]
struct StubResponse {
    status: u16,
    bodies: VecDeque<String>,
}

/// Minimal HTTP server answering every request with the configured status
/// and body.
///
/// Queued bodies are served once each in order; the last one keeps being
/// served. The server stops when dropped.
#[derive(Debug)]
pub struct StubHttpServer {
    addr: SocketAddr,
    response: Arc<Mutex<StubResponse>>,
    hits: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StubHttpServer {
    /// Binds an ephemeral localhost port and starts serving `200` with an
    /// empty body.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let response = Arc::new(Mutex::new(StubResponse {
            status: 200,
            bodies: VecDeque::from([String::new()]),
        }));
        let hits = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let response = Arc::clone(&response);
            let hits = Arc::clone(&hits);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || serve(&listener, &response, &hits, &shutdown))
        };

        Ok(Self {
            addr,
            response,
            hits,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Port the server listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Replaces the served body.
    pub fn set_body(&self, body: impl Into<String>) {
        self.lock().bodies = VecDeque::from([body.into()]);
    }

    /// Serves `bodies` once each in order, then keeps serving the last one.
    pub fn set_bodies<I, S>(&self, bodies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bodies: VecDeque<String> = bodies.into_iter().map(Into::into).collect();
        if !bodies.is_empty() {
            self.lock().bodies = bodies;
        }
    }

    /// Replaces the served status code.
    pub fn set_status(&self, status: u16) {
        self.lock().status = status;
    }

    /// Number of requests answered so far.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, StubResponse> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StubHttpServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    listener: &TcpListener,
    response: &Mutex<StubResponse>,
    hits: &AtomicUsize,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = answer(stream, response, hits) {
                    tracing::debug!(error = %err, "stub server failed to answer");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(err) => {
                tracing::debug!(error = %err, "stub server accept failed");
                return;
            }
        }
    }
}

fn answer(
    stream: TcpStream,
    response: &Mutex<StubResponse>,
    hits: &AtomicUsize,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let (status, body) = {
        let mut response = response.lock().unwrap_or_else(PoisonError::into_inner);
        let body = if response.bodies.len() > 1 {
            response.bodies.pop_front().unwrap_or_default()
        } else {
            response.bodies.front().cloned().unwrap_or_default()
        };
        (response.status, body)
    };
    let _ = hits.fetch_add(1, Ordering::SeqCst);

    let mut stream = reader.into_inner();
    write!(
        stream,
        "HTTP/1.1 {status} Stub\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}
