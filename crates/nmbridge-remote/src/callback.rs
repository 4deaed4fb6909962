//! Canned answers for callback solicitations sent by the plugin.
//!
//! The plugin host challenges its caller like a browser extension would:
//! capability probes, origin probes, and site approval. Only this closed set is
//! answered; anything else aborts the call in flight.

use crate::protocol::{CallbackData, Param, RequestData};

pub const CALLBACK_TYPE: &str = "callback";
pub const APPROVED_SITE_TYPE: &str = "approved_site";
pub const RESULT_TYPE: &str = "result";

/// Capability probe: answered with `false`.
pub const ENABLE_INTERNAL_CSP: &str = "result = cadesplugin.EnableInternalCSP";
/// Origin probe: answered with the local callback URL.
pub const DOCUMENT_URL: &str = "result = window.document.URL";

/// Where a dispatch cycle stands with respect to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    AwaitingResponse,
    CallbackReceived,
    CallbackAnswered,
    ResponseReceived,
}

impl CallbackState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackState::AwaitingResponse => "awaiting-response",
            CallbackState::CallbackReceived => "callback-received",
            CallbackState::CallbackAnswered => "callback-answered",
            CallbackState::ResponseReceived => "response-received",
        }
    }
}

/// Session facts an answer envelope carries.
#[derive(Debug, Clone, Copy)]
pub struct AnswerContext<'a> {
    /// Current handle counter of the session.
    pub objid: u32,
    pub destination: &'a str,
    pub callback_url: &'a str,
}

/// Build the answer for a callback, or `None` when its type is unrecognized.
///
/// Answers depend only on the callback and the context, so replaying the
/// same solicitation always yields the same envelope.
pub fn answer(callback: &CallbackData, ctx: AnswerContext<'_>) -> Option<RequestData> {
    let mut data = RequestData {
        callback_id: callback.callback_id,
        objid: ctx.objid,
        destination: ctx.destination.to_string(),
        ..RequestData::default()
    };

    match callback.kind.as_str() {
        CALLBACK_TYPE => {
            data.kind = Some(RESULT_TYPE.to_string());
            match callback.value_str() {
                Some(ENABLE_INTERNAL_CSP) => {
                    data.value = Some(ENABLE_INTERNAL_CSP.to_string());
                    data.params = vec![Param::Boolean(false)];
                }
                Some(DOCUMENT_URL) => {
                    data.value = Some(DOCUMENT_URL.to_string());
                    data.params = vec![Param::from(ctx.callback_url)];
                }
                // Pass-through acknowledgement.
                _ => {}
            }
        }
        APPROVED_SITE_TYPE => {
            data.kind = Some(APPROVED_SITE_TYPE.to_string());
            data.value = Some(format!("is_approved_site: {}", ctx.callback_url));
            data.params = vec![Param::Boolean(true)];
        }
        _ => return None,
    }

    Some(data)
}
