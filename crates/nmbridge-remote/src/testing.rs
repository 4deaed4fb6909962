//! In-memory plugin doubles shared by the crate's unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::session::{Session, SessionOptions};
use crate::transport::{read_frame, write_frame, ByteOrder, Frame, Transport};

pub const MAX_FRAME: usize = 64 * 1024;

/// A reader fed chunk by chunk from a channel; ends when every sender drops.
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl ChannelReader {
    pub fn new() -> (Self, Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                rx,
                pending: VecDeque::new(),
            },
            tx,
        )
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => return Ok(0),
            }
        }

        let len = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

/// Requests received by a scripted plugin, decoded as JSON.
#[derive(Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<Value>>>);

impl Transcript {
    pub fn requests(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// The `data` object of the request at `index`.
    pub fn data(&self, index: usize) -> Value {
        self.requests()[index]["data"].clone()
    }
}

/// Writer side of a fake plugin: answers every complete request frame with
/// the next scripted reply. Once the script runs dry requests go unanswered.
pub struct ScriptedWriter {
    buffer: Vec<u8>,
    replies: VecDeque<Value>,
    feed: Sender<Vec<u8>>,
    transcript: Transcript,
}

impl Write for ScriptedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.drain_frames();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ScriptedWriter {
    fn drain_frames(&mut self) {
        let order = ByteOrder::probe();
        loop {
            if self.buffer.len() < 4 {
                return;
            }
            let mut cursor = io::Cursor::new(self.buffer.as_slice());
            let frame = match read_frame(&mut cursor, order, MAX_FRAME) {
                Ok(frame) => frame,
                // Payload still incomplete.
                Err(_) => return,
            };
            let consumed = cursor.position() as usize;
            self.buffer.drain(..consumed);

            if let Frame::Message(payload) = frame {
                let request: Value = serde_json::from_slice(&payload).unwrap();
                self.transcript.0.lock().unwrap().push(request);
                if let Some(reply) = self.replies.pop_front() {
                    let _ = self.feed.send(encode(&reply));
                }
            }
        }
    }
}

/// Frame a JSON value with the platform byte order.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut framed = Vec::new();
    write_frame(&mut framed, ByteOrder::probe(), value.to_string().as_bytes()).unwrap();
    framed
}

/// A transport wired to a scripted fake plugin.
pub fn scripted_transport(replies: Vec<Value>) -> (Transport, Transcript) {
    let (reader, feed) = ChannelReader::new();
    let transcript = Transcript::default();
    let writer = ScriptedWriter {
        buffer: Vec::new(),
        replies: replies.into(),
        feed,
        transcript: transcript.clone(),
    };
    (
        Transport::from_streams(reader, writer, MAX_FRAME),
        transcript,
    )
}

pub fn test_options() -> SessionOptions {
    SessionOptions {
        response_timeout: Duration::from_millis(200),
        ..SessionOptions::default()
    }
}

/// A connected session; the init handshake consumes an implicit `OK` reply
/// and is request 0 in the transcript.
pub fn scripted_session(replies: Vec<Value>) -> (Session, Transcript) {
    let mut script = vec![ok()];
    script.extend(replies);
    let (transport, transcript) = scripted_transport(script);
    let session = Session::connect(transport, test_options()).unwrap();
    (session, transcript)
}

pub fn response(kind: &str, value: Value) -> Value {
    json!({
        "tabid": "CadesAgent",
        "data": {"retval": {"type": kind, "value": value}}
    })
}

pub fn ok() -> Value {
    response("string", json!("OK"))
}

pub fn object() -> Value {
    json!({
        "tabid": "CadesAgent",
        "data": {"retval": {"type": "object", "value": {}, "methods": [], "properties": []}}
    })
}

pub fn error(message: &str) -> Value {
    json!({"tabid": "CadesAgent", "data": {"type": "error", "message": message}})
}

pub fn callback(id: u32, kind: &str, value: &str) -> Value {
    json!({
        "tabid": "CadesAgent",
        "data": {"callback_id": id, "object": "", "type": kind, "value": value}
    })
}
