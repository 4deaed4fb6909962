//! Session state and the request dispatcher.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nmbridge_config::{BridgeConfig, SessionSection};
use tracing::{debug, info, trace, warn};

use crate::callback::{self, AnswerContext, CallbackState};
use crate::error::{BridgeError, Result};
use crate::protocol::{Reply, RequestData, RequestEnvelope, ResponseData};
use crate::proxy::Handle;
use crate::transport::{Canceller, Transport};

/// Protocol settings for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub tab_id: String,
    pub destination: String,
    pub callback_url: String,
    /// Consecutive callbacks tolerated while one request is in flight.
    pub max_callback_rounds: u32,
    pub response_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionSection::default())
    }
}

impl From<&SessionSection> for SessionOptions {
    fn from(section: &SessionSection) -> Self {
        Self {
            tab_id: section.tab_id.clone(),
            destination: section.destination.clone(),
            callback_url: section.callback_url.clone(),
            max_callback_rounds: section.max_callback_rounds,
            response_timeout: section.response_timeout(),
        }
    }
}

/// Counters and transport of one plugin connection.
///
/// Only reachable through the `Session` lock, which serializes all counter
/// mutation and transport I/O.
pub struct SessionState {
    id: String,
    next_request_id: u32,
    next_handle: u32,
    options: SessionOptions,
    transport: Transport,
}

impl SessionState {
    pub fn next_request_id(&self) -> u32 {
        self.next_request_id
    }

    pub fn current_handle(&self) -> u32 {
        self.next_handle
    }

    /// Claim the next handle id.
    pub fn allocate_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Run one request to completion, answering any callbacks the plugin
    /// interleaves before its reply.
    pub fn request(&mut self, mut data: RequestData) -> Result<ResponseData> {
        data.requestid = self.next_request_id;
        data.destination = self.options.destination.clone();
        let kind = data.request_kind();
        let requestid = data.requestid;

        let mut outgoing = RequestEnvelope {
            tabid: self.id.clone(),
            data,
        };
        let mut state = CallbackState::AwaitingResponse;
        let mut rounds = 0u32;

        loop {
            let payload = serde_json::to_vec(&outgoing).map_err(BridgeError::Encode)?;
            debug!(
                requestid,
                kind = ?kind,
                envelope = %String::from_utf8_lossy(&payload),
                "sending request"
            );
            self.transport.send(&payload)?;
            if state == CallbackState::CallbackAnswered {
                state = CallbackState::AwaitingResponse;
                trace!(requestid, state = state.as_str(), "waiting for response");
            }

            let reply = self
                .transport
                .receive(self.options.response_timeout)?
                .ok_or_else(|| BridgeError::ProtocolDecode {
                    message: "empty message".to_string(),
                    source: None,
                })?;

            match Reply::parse(&reply)? {
                Reply::Callback { callback, envelope } => {
                    state = CallbackState::CallbackReceived;
                    rounds += 1;
                    debug!(
                        requestid,
                        callback_id = callback.callback_id,
                        callback_type = %callback.kind,
                        round = rounds,
                        state = state.as_str(),
                        "plugin sent callback"
                    );
                    if rounds > self.options.max_callback_rounds {
                        warn!(requestid, rounds, "callback limit exceeded");
                        return Err(BridgeError::CallbackLimit {
                            rounds: self.options.max_callback_rounds,
                        });
                    }

                    let ctx = AnswerContext {
                        objid: self.next_handle,
                        destination: &self.options.destination,
                        callback_url: &self.options.callback_url,
                    };
                    let answer = callback::answer(&callback, ctx).ok_or_else(|| {
                        warn!(requestid, callback_type = %callback.kind, "unknown callback");
                        BridgeError::UnknownCallback { envelope }
                    })?;

                    outgoing = RequestEnvelope {
                        tabid: self.id.clone(),
                        data: answer,
                    };
                    state = CallbackState::CallbackAnswered;
                }
                Reply::Response(response) => {
                    state = CallbackState::ResponseReceived;
                    self.next_request_id = self.next_request_id.wrapping_add(1);
                    debug!(
                        requestid,
                        retval_type = %response.retval.kind,
                        state = state.as_str(),
                        "received response"
                    );
                    if response.is_error() {
                        return Err(BridgeError::Remote(response.message));
                    }
                    return Ok(response);
                }
            }
        }
    }
}

/// Shared handle to a connected plugin session.
#[derive(Clone)]
pub struct Session {
    id: Arc<str>,
    state: Arc<Mutex<SessionState>>,
    canceller: Canceller,
}

impl Session {
    /// Spawn the configured plugin and perform the init handshake.
    pub fn spawn(config: &BridgeConfig) -> Result<Self> {
        let executable = config
            .plugin
            .executable
            .as_deref()
            .ok_or_else(|| BridgeError::Spawn("plugin.executable is not configured".to_string()))?;

        let transport = Transport::spawn(
            executable,
            &config.plugin.args,
            config.session.max_frame_bytes,
        )?;
        Self::connect(transport, SessionOptions::from(&config.session))
    }

    /// Initialize a session over an established transport.
    pub fn connect(transport: Transport, options: SessionOptions) -> Result<Self> {
        let canceller = transport.canceller();
        let mut state = SessionState {
            id: options.tab_id.clone(),
            next_request_id: 0,
            next_handle: 0,
            options,
            transport,
        };

        let init = RequestData::init(&state.options.callback_url);
        if let Err(err) = state.request(init) {
            state.transport.close();
            return Err(err);
        }
        info!(tab_id = %state.id, "plugin session initialized");

        Ok(Self {
            id: Arc::from(state.id.as_str()),
            state: Arc::new(Mutex::new(state)),
            canceller,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn next_request_id(&self) -> Result<u32> {
        Ok(self.lock()?.next_request_id())
    }

    pub fn current_handle(&self) -> Result<u32> {
        Ok(self.lock()?.current_handle())
    }

    /// Instantiate a remote object by prog id, e.g. `CAdESCOM.Store`.
    pub fn create_object(&self, prog_id: &str) -> Result<Handle> {
        let id = self.with_state(|state| {
            let response = state.request(RequestData::create_object(prog_id))?;
            if !response.retval.is_object() {
                return Err(BridgeError::type_mismatch(prog_id, "object"));
            }
            Ok(state.allocate_handle())
        })?;
        debug!(prog_id, handle = id, "created remote object");
        Ok(Handle::new(self.clone(), id))
    }

    /// Close the transport, unblocking any call in flight.
    pub fn close(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        f(&mut state)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state.lock().map_err(|_| BridgeError::SessionPoisoned)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
