//! Generic property and method access on remote objects.

use crate::error::{BridgeError, Result};
use crate::protocol::{FromRemote, Param, RequestData, ResponseData};
use crate::session::Session;

/// A numbered reference to an object living in the plugin process.
///
/// Handles never release the remote object; it lives until the plugin exits.
#[derive(Debug, Clone)]
pub struct Handle {
    session: Session,
    id: u32,
}

impl Handle {
    pub(crate) fn new(session: Session, id: u32) -> Self {
        Self { session, id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read a property and decode it as `T`.
    pub fn get_property<T: FromRemote>(&self, name: &str) -> Result<T> {
        let response = self.dispatch(RequestData::get_property(self.id, name))?;
        decode::<T>(name, &response)
    }

    /// Read a property whose value is itself a remote object.
    pub fn get_object_property(&self, name: &str) -> Result<Handle> {
        self.object_request(name, RequestData::get_property(self.id, name))
    }

    /// Invoke a method and return the raw response.
    pub fn call_method(&self, name: &str, params: Vec<Param>) -> Result<ResponseData> {
        self.dispatch(RequestData::call_method(self.id, name, params))
    }

    /// Invoke a method and decode its return value as `T`.
    pub fn call_typed<T: FromRemote>(&self, name: &str, params: Vec<Param>) -> Result<T> {
        let response = self.call_method(name, params)?;
        decode::<T>(name, &response)
    }

    /// Invoke a method whose return value is a remote object.
    pub fn call_object_method(&self, name: &str, params: Vec<Param>) -> Result<Handle> {
        self.object_request(name, RequestData::call_method(self.id, name, params))
    }

    /// Invoke a method that must answer with the `OK` marker.
    pub fn call_void_method(&self, name: &str, params: Vec<Param>) -> Result<()> {
        let response = self.call_method(name, params)?;
        if !response.retval.is_ok_marker() {
            return Err(BridgeError::MethodExecution {
                method: name.to_string(),
            });
        }
        Ok(())
    }

    /// Assign a property; `true` only when the plugin answers `OK`.
    pub fn set_property(&self, name: &str, params: Vec<Param>) -> Result<bool> {
        let response = self.dispatch(RequestData::set_property(self.id, name, params))?;
        Ok(response.retval.is_ok_marker())
    }

    fn dispatch(&self, data: RequestData) -> Result<ResponseData> {
        self.session.with_state(|state| state.request(data))
    }

    // Dispatch and allocation share one lock so handle ids follow reply order.
    fn object_request(&self, name: &str, data: RequestData) -> Result<Handle> {
        let id = self.session.with_state(|state| {
            let response = state.request(data)?;
            if !response.retval.is_object() {
                return Err(BridgeError::type_mismatch(name, "object"));
            }
            Ok(state.allocate_handle())
        })?;
        Ok(Handle::new(self.session.clone(), id))
    }
}

fn decode<T: FromRemote>(name: &str, response: &ResponseData) -> Result<T> {
    T::from_remote(&response.retval.value).ok_or_else(|| BridgeError::type_mismatch(name, T::EXPECTED))
}
