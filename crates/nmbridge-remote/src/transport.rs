//! Length-prefixed framing over a plugin process's standard streams.
//!
//! Every message in either direction is a 4-byte length in the platform's
//! native byte order followed by that many bytes of JSON:
//!
//! ```text
//! [u32 native: len][payload of len bytes]
//! ```

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{BridgeError, Result};

/// How long to wait for a child to report its exit status after its output
/// stream closed.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Byte order of the frame length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Probe the byte order of the running platform.
    pub fn probe() -> Self {
        if 1u16.to_ne_bytes()[0] == 1 {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    fn encode(self, len: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => len.to_le_bytes(),
            ByteOrder::Big => len.to_be_bytes(),
        }
    }

    fn decode(self, header: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(header),
            ByteOrder::Big => u32::from_be_bytes(header),
        }
    }
}

/// One decoded read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Vec<u8>),
    /// A header declaring zero length: "no message", not an error.
    Empty,
    /// Clean end of stream before any header byte.
    Closed,
}

/// Write one frame as a single buffer.
pub fn write_frame<W: Write>(writer: &mut W, order: ByteOrder, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| BridgeError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buffer = Vec::with_capacity(payload.len() + 4);
    buffer.extend_from_slice(&order.encode(len));
    buffer.extend_from_slice(payload);

    writer
        .write_all(&buffer)
        .map_err(BridgeError::TransportWrite)?;
    writer.flush().map_err(BridgeError::TransportWrite)?;
    Ok(())
}

/// Read one frame, looping over short reads until it is complete.
///
/// A stream that ends inside a header or payload is a read error, never a
/// silently short result.
pub fn read_frame<R: Read>(reader: &mut R, order: ByteOrder, max_len: usize) -> Result<Frame> {
    let mut header = [0u8; 4];
    match read_full(reader, &mut header)? {
        0 => return Ok(Frame::Closed),
        4 => {}
        n => {
            return Err(BridgeError::TransportRead(format!(
                "truncated frame header ({n} of 4 bytes)"
            )))
        }
    }

    let len = order.decode(header) as usize;
    if len == 0 {
        return Ok(Frame::Empty);
    }
    if len > max_len {
        return Err(BridgeError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    let read = read_full(reader, &mut payload)?;
    if read != len {
        return Err(BridgeError::TransportRead(format!(
            "truncated frame: expected {len} bytes, got {read}"
        )));
    }

    Ok(Frame::Message(payload))
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(BridgeError::TransportRead(err.to_string())),
        }
    }
    Ok(filled)
}

enum ReaderEvent {
    Frame(Vec<u8>),
    Empty,
    Failed(BridgeError),
    Eof,
    Cancelled,
}

struct Shutdown {
    closed: AtomicBool,
    child: Mutex<Option<Child>>,
    wake: Sender<ReaderEvent>,
}

impl Shutdown {
    fn cancel(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.wake.send(ReaderEvent::Cancelled);
        if let Ok(mut child) = self.child.lock() {
            if let Some(child) = child.as_mut() {
                if let Ok(None) = child.try_wait() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Closes a transport from any thread, unblocking an in-flight receive.
#[derive(Clone)]
pub struct Canceller {
    shutdown: Arc<Shutdown>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_closed()
    }
}

/// Framed channel to one plugin process (or any pair of byte streams).
pub struct Transport {
    order: ByteOrder,
    writer: Box<dyn Write + Send>,
    reader_rx: Receiver<ReaderEvent>,
    shutdown: Arc<Shutdown>,
}

impl Transport {
    /// Spawn the plugin executable with piped stdin/stdout.
    pub fn spawn(program: &Path, args: &[String], max_frame_bytes: usize) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                BridgeError::Spawn(format!("failed to start {}: {err}", program.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn("failed to capture plugin stdin pipe".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BridgeError::Spawn("failed to capture plugin stdout pipe".to_string())
        })?;

        debug!(program = %program.display(), pid = child.id(), "plugin process started");

        Ok(Self::build(stdout, stdin, Some(child), max_frame_bytes))
    }

    /// Build a transport over arbitrary byte streams.
    pub fn from_streams<R, W>(reader: R, writer: W, max_frame_bytes: usize) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::build(reader, writer, None, max_frame_bytes)
    }

    fn build<R, W>(reader: R, writer: W, child: Option<Child>, max_frame_bytes: usize) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let order = ByteOrder::probe();
        let (tx, rx) = mpsc::channel();
        spawn_reader(reader, order, max_frame_bytes, tx.clone());

        Self {
            order,
            writer: Box::new(writer),
            reader_rx: rx,
            shutdown: Arc::new(Shutdown {
                closed: AtomicBool::new(false),
                child: Mutex::new(child),
                wake: tx,
            }),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Send one payload as a frame.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.shutdown.is_closed() {
            return Err(BridgeError::TransportClosed);
        }

        trace!(bytes = payload.len(), "sending frame");
        match write_frame(&mut self.writer, self.order, payload) {
            Ok(()) => Ok(()),
            Err(_) if self.shutdown.is_closed() => Err(BridgeError::TransportClosed),
            Err(err) => match self.wait_for_exit() {
                Some(code) => Err(BridgeError::ProcessExited { code }),
                None => Err(err),
            },
        }
    }

    /// Receive one frame payload, `None` for a zero-length frame.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.shutdown.is_closed() {
            return Err(BridgeError::TransportClosed);
        }

        match self.reader_rx.recv_timeout(timeout) {
            Ok(ReaderEvent::Frame(payload)) => {
                trace!(bytes = payload.len(), "received frame");
                Ok(Some(payload))
            }
            Ok(ReaderEvent::Empty) => Ok(None),
            Ok(ReaderEvent::Cancelled) => Err(BridgeError::TransportClosed),
            Ok(ReaderEvent::Failed(err)) => Err(err),
            Ok(ReaderEvent::Eof) | Err(RecvTimeoutError::Disconnected) => Err(self.eof_error()),
            Err(RecvTimeoutError::Timeout) => match self.exit_status() {
                Some(code) => Err(BridgeError::ProcessExited { code }),
                None => Err(BridgeError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
        }
    }

    /// Kill the child process and refuse further I/O.
    pub fn close(&mut self) {
        self.shutdown.cancel();
    }

    fn exit_status(&self) -> Option<Option<i32>> {
        let mut child = self.shutdown.child.lock().ok()?;
        match child.as_mut()?.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) | Err(_) => None,
        }
    }

    /// Poll briefly for the child's exit status once its streams failed.
    fn wait_for_exit(&self) -> Option<Option<i32>> {
        if !matches!(self.shutdown.child.lock().as_deref(), Ok(Some(_))) {
            return None;
        }

        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            if let Some(code) = self.exit_status() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn eof_error(&self) -> BridgeError {
        if self.shutdown.is_closed() {
            return BridgeError::TransportClosed;
        }
        if !matches!(self.shutdown.child.lock().as_deref(), Ok(Some(_))) {
            return BridgeError::TransportClosed;
        }

        match self.wait_for_exit() {
            Some(code) => BridgeError::ProcessExited { code },
            None => BridgeError::TransportRead("plugin output stream ended unexpectedly".to_string()),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_reader<R>(mut reader: R, order: ByteOrder, max_len: usize, tx: Sender<ReaderEvent>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || loop {
        let event = match read_frame(&mut reader, order, max_len) {
            Ok(Frame::Message(payload)) => ReaderEvent::Frame(payload),
            Ok(Frame::Empty) => ReaderEvent::Empty,
            Ok(Frame::Closed) => {
                let _ = tx.send(ReaderEvent::Eof);
                return;
            }
            Err(err) => {
                let _ = tx.send(ReaderEvent::Failed(err));
                return;
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    });
}
