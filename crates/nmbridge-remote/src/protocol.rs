//! Wire envelopes exchanged with the plugin host.
//!
//! Requests are `{"tabid": ..., "data": {...}}` objects. Replies share the
//! same outer shape; a reply whose `data` carries a `callback_id` key is an
//! unsolicited callback solicitation rather than a response.

use std::any::Any;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{BridgeError, Result};
use crate::proxy::Handle;

/// Method name used to instantiate a remote object by prog id.
pub const CREATE_OBJECT_METHOD: &str = "CreateObject";
/// Literal success marker returned by void methods and property setters.
pub const OK_MARKER: &str = "OK";

/// Outer request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub tabid: String,
    pub data: RequestData,
}

/// Which operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Init,
    CreateObject,
    GetProperty,
    SetProperty,
    CallMethod,
    CallbackResult,
}

/// Inner request payload. Zero ids and absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub callback_id: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub requestid: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub objid: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl RequestData {
    /// Session initialization announcing the local callback endpoint.
    pub fn init(url: &str) -> Self {
        Self {
            kind: Some("init".to_string()),
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    /// Instantiate a remote object on the root (`objid` 0) object.
    pub fn create_object(prog_id: &str) -> Self {
        Self::call_method(0, CREATE_OBJECT_METHOD, vec![Param::from(prog_id)])
    }

    pub fn get_property(objid: u32, name: &str) -> Self {
        Self {
            objid,
            get_property: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn set_property(objid: u32, name: &str, params: Vec<Param>) -> Self {
        Self {
            objid,
            set_property: Some(name.to_string()),
            params,
            ..Self::default()
        }
    }

    pub fn call_method(objid: u32, name: &str, params: Vec<Param>) -> Self {
        Self {
            objid,
            method: Some(name.to_string()),
            params,
            ..Self::default()
        }
    }

    /// Classify the request for logging.
    pub fn request_kind(&self) -> RequestKind {
        if self.callback_id != 0 {
            RequestKind::CallbackResult
        } else if self.kind.as_deref() == Some("init") {
            RequestKind::Init
        } else if self.method.as_deref() == Some(CREATE_OBJECT_METHOD) {
            RequestKind::CreateObject
        } else if self.get_property.is_some() {
            RequestKind::GetProperty
        } else if self.set_property.is_some() {
            RequestKind::SetProperty
        } else {
            RequestKind::CallMethod
        }
    }
}

/// Typed return value of a property read or method call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
}

impl ReturnValue {
    pub fn is_object(&self) -> bool {
        self.kind == "object"
    }

    /// True when the value is the literal `"OK"` success marker.
    pub fn is_ok_marker(&self) -> bool {
        self.value.as_str() == Some(OK_MARKER)
    }
}

/// A genuine response to the request in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseData {
    pub requestid: u32,
    pub retval: ReturnValue,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    pub message: String,
}

impl ResponseData {
    /// The remote signals failure with `type` equal to `"error"` in any case.
    pub fn is_error(&self) -> bool {
        self.kind.eq_ignore_ascii_case("error")
    }
}

/// An unsolicited solicitation the caller must answer before the original
/// request can complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackData {
    pub callback_id: u32,
    pub object: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

impl CallbackData {
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(ResponseData),
    Callback {
        callback: CallbackData,
        /// The raw envelope, surfaced when the callback is not recognized.
        envelope: Value,
    },
}

impl Reply {
    /// Parse a reply frame, telling callbacks apart by the presence of a
    /// `callback_id` key.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let envelope: Value = serde_json::from_slice(payload)
            .map_err(|err| BridgeError::decode("reply is not valid JSON", err))?;

        let data = match envelope.get("data") {
            Some(Value::Object(data)) => data,
            Some(_) => {
                return Err(BridgeError::ProtocolDecode {
                    message: "reply data is not an object".to_string(),
                    source: None,
                })
            }
            None => {
                return Err(BridgeError::ProtocolDecode {
                    message: "reply has no data field".to_string(),
                    source: None,
                })
            }
        };

        if data.contains_key("callback_id") {
            let callback = serde_json::from_value(Value::Object(data.clone()))
                .map_err(|err| BridgeError::decode("malformed callback envelope", err))?;
            return Ok(Reply::Callback { callback, envelope });
        }

        let mut response: ResponseData = serde_json::from_value(Value::Object(data.clone()))
            .map_err(|err| BridgeError::decode("malformed response envelope", err))?;
        normalize_integral(&mut response.retval.value);
        Ok(Reply::Response(response))
    }
}

/// Rewrite an integral floating-point number as an integer.
///
/// The plugin encodes every number the same way, so `3.0` must decode as an
/// integer for typed readers.
pub fn normalize_integral(value: &mut Value) {
    let Value::Number(number) = value else {
        return;
    };
    if number.is_i64() || number.is_u64() {
        return;
    }
    if let Some(float) = number.as_f64() {
        if float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64 {
            *value = Value::Number(Number::from(float as i64));
        }
    }
}

/// A marshalled method or setter argument, `{"type": ..., "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Param {
    String(String),
    Boolean(bool),
    Number(Number),
    /// Reference to another remote object by handle id.
    Object(u32),
}

impl Param {
    /// Marshal a float; non-finite values have no JSON form.
    pub fn float(value: f64) -> Result<Self> {
        Number::from_f64(value)
            .map(Param::Number)
            .ok_or(BridgeError::UnsupportedParam("non-finite number"))
    }

    /// Wire type tag.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Param::String(_) => "string",
            Param::Boolean(_) => "boolean",
            Param::Number(_) => "number",
            Param::Object(_) => "object",
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::String(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::String(value)
    }
}

impl From<DateTime<Utc>> for Param {
    fn from(value: DateTime<Utc>) -> Self {
        Param::String(format_utc(&value))
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Boolean(value)
    }
}

impl From<&Handle> for Param {
    fn from(handle: &Handle) -> Self {
        Param::Object(handle.id())
    }
}

macro_rules! number_params {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::Number(Number::from(value))
                }
            }
        )*
    };
}

number_params!(i8, i16, i32, i64, u8, u16, u32, u64);

/// Infer the wire type of a dynamically typed value.
///
/// Checks run string, temporal, boolean, object reference, numeric; the
/// order keeps dates from being mistaken for plain strings and handles from
/// falling through to numbers.
pub fn value_to_param(value: &dyn Any) -> Result<Param> {
    if let Some(text) = value.downcast_ref::<String>() {
        return Ok(Param::String(text.clone()));
    }
    if let Some(text) = value.downcast_ref::<&str>() {
        return Ok(Param::String((*text).to_string()));
    }
    if let Some(date) = value.downcast_ref::<DateTime<Utc>>() {
        return Ok(Param::from(*date));
    }
    if let Some(flag) = value.downcast_ref::<bool>() {
        return Ok(Param::Boolean(*flag));
    }
    if let Some(handle) = value.downcast_ref::<Handle>() {
        return Ok(Param::from(handle));
    }
    numeric_param(value)
}

fn numeric_param(value: &dyn Any) -> Result<Param> {
    macro_rules! try_integer {
        ($($ty:ty),*) => {
            $(
                if let Some(number) = value.downcast_ref::<$ty>() {
                    return Ok(Param::from(*number));
                }
            )*
        };
    }

    try_integer!(i8, i16, i32, i64, u8, u16, u32, u64);
    if let Some(number) = value.downcast_ref::<usize>() {
        return Ok(Param::Number(Number::from(*number as u64)));
    }
    if let Some(number) = value.downcast_ref::<isize>() {
        return Ok(Param::Number(Number::from(*number as i64)));
    }
    if let Some(number) = value.downcast_ref::<f64>() {
        return Param::float(*number);
    }
    if let Some(number) = value.downcast_ref::<f32>() {
        return Param::float(f64::from(*number));
    }

    Err(BridgeError::UnsupportedParam("value of unknown kind"))
}

/// Marshal at most `max` arguments, dropping the rest.
pub fn arguments_to_params(max: usize, args: &[&dyn Any]) -> Result<Vec<Param>> {
    args.iter().take(max).map(|arg| value_to_param(*arg)).collect()
}

/// Format a timestamp the way the plugin expects dates.
pub fn format_utc(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a plugin date string.
pub fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| BridgeError::InvalidDate {
            value: value.to_string(),
        })
}

/// Conversion from a reply's `retval.value` into a statically known type.
pub trait FromRemote: Sized {
    /// Type name used in mismatch errors.
    const EXPECTED: &'static str;

    fn from_remote(value: &Value) -> Option<Self>;
}

impl FromRemote for String {
    const EXPECTED: &'static str = "string";

    fn from_remote(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromRemote for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_remote(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromRemote for f64 {
    const EXPECTED: &'static str = "number";

    fn from_remote(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromRemote for Value {
    const EXPECTED: &'static str = "value";

    fn from_remote(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromRemote for Map<String, Value> {
    const EXPECTED: &'static str = "object";

    fn from_remote(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

macro_rules! integer_from_remote {
    ($($ty:ty),*) => {
        $(
            impl FromRemote for $ty {
                const EXPECTED: &'static str = "integer";

                fn from_remote(value: &Value) -> Option<Self> {
                    if let Some(number) = value.as_i64() {
                        return <$ty>::try_from(number).ok();
                    }
                    value.as_u64().and_then(|number| <$ty>::try_from(number).ok())
                }
            }
        )*
    };
}

integer_from_remote!(i64, i32, i16, u64, u32, u16, u8);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn init_request_matches_wire_shape() {
        let mut data = RequestData::init("http://localhost:42217/cades");
        data.destination = "nmcades".to_string();
        let envelope = RequestEnvelope {
            tabid: "CadesAgent".to_string(),
            data,
        };

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "tabid": "CadesAgent",
                "data": {
                    "destination": "nmcades",
                    "type": "init",
                    "url": "http://localhost:42217/cades"
                }
            })
        );
    }

    #[test]
    fn call_method_serializes_params_and_ids() {
        let mut data = RequestData::call_method(3, "Item", vec![Param::from(1u16)]);
        data.requestid = 7;
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(
            value,
            json!({
                "requestid": 7,
                "objid": 3,
                "method": "Item",
                "params": [{"type": "number", "value": 1}]
            })
        );
    }

    #[test]
    fn request_kind_classifies_envelopes() {
        assert_eq!(RequestData::init("u").request_kind(), RequestKind::Init);
        assert_eq!(
            RequestData::create_object("CAdESCOM.Store").request_kind(),
            RequestKind::CreateObject
        );
        assert_eq!(
            RequestData::get_property(1, "Version").request_kind(),
            RequestKind::GetProperty
        );
        assert_eq!(
            RequestData::set_property(1, "Name", vec![]).request_kind(),
            RequestKind::SetProperty
        );
        assert_eq!(
            RequestData::call_method(1, "Open", vec![]).request_kind(),
            RequestKind::CallMethod
        );
    }

    #[test]
    fn reply_with_callback_id_is_callback() {
        let raw = json!({
            "tabid": "CadesAgent",
            "data": {"callback_id": 4, "object": "", "type": "callback", "value": "result = window.document.URL"}
        });
        let reply = Reply::parse(raw.to_string().as_bytes()).unwrap();
        match reply {
            Reply::Callback { callback, envelope } => {
                assert_eq!(callback.callback_id, 4);
                assert_eq!(callback.kind, "callback");
                assert_eq!(callback.value_str(), Some("result = window.document.URL"));
                assert_eq!(envelope, raw);
            }
            other => panic!("expected callback, got {other:?}"),
        }
    }

    #[test]
    fn reply_without_callback_id_is_response() {
        let raw = br#"{"tabid":"CadesAgent","data":{"requestid":2,"retval":{"type":"string","value":"5.0.1"}}}"#;
        let Reply::Response(response) = Reply::parse(raw).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.requestid, 2);
        assert_eq!(response.retval.kind, "string");
        assert_eq!(response.retval.value, json!("5.0.1"));
        assert!(!response.is_error());
    }

    #[test]
    fn error_type_is_case_insensitive() {
        let raw = br#"{"data":{"type":"Error","message":"no such object"}}"#;
        let Reply::Response(response) = Reply::parse(raw).unwrap() else {
            panic!("expected response");
        };
        assert!(response.is_error());
        assert_eq!(response.message, "no such object");
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = Reply::parse(b"{not json").unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolDecode { .. }));
        let err = Reply::parse(br#"{"tabid":"x"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolDecode { .. }));
    }

    #[test]
    fn integral_floats_are_normalized() {
        let raw = br#"{"data":{"retval":{"type":"number","value":3.0}}}"#;
        let Reply::Response(response) = Reply::parse(raw).unwrap() else {
            panic!("expected response");
        };
        assert!(response.retval.value.is_i64());
        assert_eq!(i32::from_remote(&response.retval.value), Some(3));

        let mut fractional = json!(2.5);
        normalize_integral(&mut fractional);
        assert_eq!(fractional, json!(2.5));
        assert_eq!(i32::from_remote(&fractional), None);
    }

    #[test]
    fn value_to_param_follows_tie_break_order() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap();
        let owned = String::from("owned");
        let cases: Vec<(&dyn Any, Param)> = vec![
            (&owned as &dyn Any, Param::String("owned".into())),
            (&"borrowed" as &dyn Any, Param::String("borrowed".into())),
            (&date as &dyn Any, Param::String("2024-03-09T14:05:06.000Z".into())),
            (&true as &dyn Any, Param::Boolean(true)),
            (&7u16 as &dyn Any, Param::Number(Number::from(7u16))),
            (&-3i32 as &dyn Any, Param::Number(Number::from(-3i32))),
            (&42usize as &dyn Any, Param::Number(Number::from(42u64))),
            (&1.5f64 as &dyn Any, Param::Number(Number::from_f64(1.5).unwrap())),
        ];

        for (value, expected) in cases {
            assert_eq!(value_to_param(value).unwrap(), expected);
        }
    }

    #[test]
    fn temporal_values_never_become_numbers() {
        let date = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        let param = value_to_param(&date).unwrap();
        assert_eq!(param.wire_type(), "string");
        assert_eq!(
            serde_json::to_value(&param).unwrap(),
            json!({"type": "string", "value": "1999-12-31T23:59:59.000Z"})
        );
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        struct Opaque;
        let err = value_to_param(&Opaque).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedParam(_)));
        assert!(Param::float(f64::NAN).is_err());
    }

    #[test]
    fn arguments_to_params_truncates_to_max() {
        let params = arguments_to_params(2, &[&"a", &true, &3u8]).unwrap();
        assert_eq!(params, vec![Param::from("a"), Param::Boolean(true)]);
    }

    #[test]
    fn date_strings_round_trip() {
        let parsed = parse_utc("2031-05-01T10:20:30.000Z").unwrap();
        assert_eq!(format_utc(&parsed), "2031-05-01T10:20:30.000Z");
        assert!(parse_utc("2031-05-01T10:20:30Z").is_ok());
        assert!(matches!(
            parse_utc("yesterday").unwrap_err(),
            BridgeError::InvalidDate { .. }
        ));
    }

    #[test]
    fn from_remote_rejects_mismatched_values() {
        let string = json!("OK");
        let number = json!(12);
        let boolean = json!(true);

        assert_eq!(String::from_remote(&number), None);
        assert_eq!(bool::from_remote(&string), None);
        assert_eq!(f64::from_remote(&boolean), None);
        assert_eq!(i32::from_remote(&string), None);
        assert_eq!(u8::from_remote(&json!(300)), None);
        assert_eq!(u16::from_remote(&json!(-1)), None);
        assert_eq!(f64::from_remote(&number), Some(12.0));
        assert_eq!(u32::from_remote(&number), Some(12));
    }
}
