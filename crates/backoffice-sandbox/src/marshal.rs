//! Value marshaling across the host/script boundary
//!
//! Script values leave the VM through a closed set of target shapes
//! ([`FromScript`]). Generic export produces `serde_json::Value`:
//!
//! - integral numbers within +/-2^53 export as JSON integers (`i64`)
//! - every other finite number exports as `f64`
//! - `NaN` and the infinities export as `null`, the way `JSON.stringify` does
//! - `Uint8Array` and `ArrayBuffer` export as arrays of byte values
//! - `undefined` and function-valued properties are dropped from objects

use crate::{Result, SandboxError};
use rquickjs::{Array, ArrayBuffer, Ctx, IntoJs, Object, TypedArray, Value};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number};

/// Deepest nesting accepted by generic export; cyclic structures hit this
const MAX_EXPORT_DEPTH: usize = 128;

/// Largest integer a JS number represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// 2^63
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Conversion from a script value into a host type
pub trait FromScript: Sized {
    fn from_script(value: &Value<'_>) -> Result<Self>;
}

/// Record target: exports generically, then maps the structure with serde
#[derive(Debug, Clone, PartialEq)]
pub struct Structured<T>(pub T);

impl<T> Structured<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl FromScript for String {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        match value.as_string() {
            Some(string) => Ok(string.to_string()?),
            None => Err(mismatch("a string", value)),
        }
    }
}

impl FromScript for bool {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("a boolean", value))
    }
}

impl FromScript for f64 {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        number(value).ok_or_else(|| mismatch("a number", value))
    }
}

impl FromScript for i64 {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        if let Some(int) = value.as_int() {
            return Ok(i64::from(int));
        }
        match value.as_float() {
            // 2^63 is exact as f64, so the upper bound is exclusive
            Some(float) if float.fract() == 0.0 && float >= -I64_BOUND && float < I64_BOUND => Ok(float as i64),
            _ => Err(mismatch("an integer", value)),
        }
    }
}

impl FromScript for i32 {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        let wide = i64::from_script(value)?;
        i32::try_from(wide)
            .map_err(|_| SandboxError::InvalidCast(format!("{wide} does not fit in a 32-bit integer")))
    }
}

impl<T: FromScript> FromScript for Option<T> {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        if value.is_null() || value.is_undefined() {
            Ok(None)
        } else {
            T::from_script(value).map(Some)
        }
    }
}

impl<T: FromScript> FromScript for Vec<T> {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        let array = value.as_array().ok_or_else(|| mismatch("an array", value))?;
        let mut items = Vec::with_capacity(array.len());
        for item in array.iter::<Value>() {
            items.push(T::from_script(&item?)?);
        }
        Ok(items)
    }
}

impl FromScript for serde_json::Value {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        export_value(value)
    }
}

impl<T: DeserializeOwned> FromScript for Structured<T> {
    fn from_script(value: &Value<'_>) -> Result<Self> {
        let exported = export_value(value)?;
        serde_json::from_value(exported)
            .map(Structured)
            .map_err(|e| SandboxError::InvalidCast(e.to_string()))
    }
}

/// Export a script value into its generic host representation
pub fn export_value(value: &Value<'_>) -> Result<serde_json::Value> {
    export_at(value, 0)
}

fn export_at(value: &Value<'_>, depth: usize) -> Result<serde_json::Value> {
    if depth > MAX_EXPORT_DEPTH {
        return Err(SandboxError::InvalidCast(format!(
            "value nested deeper than {MAX_EXPORT_DEPTH} levels"
        )));
    }

    if value.is_null() || value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(boolean) = value.as_bool() {
        return Ok(serde_json::Value::Bool(boolean));
    }
    if let Some(int) = value.as_int() {
        return Ok(serde_json::Value::Number(int.into()));
    }
    if let Some(float) = value.as_float() {
        return Ok(export_number(float));
    }
    if let Some(string) = value.as_string() {
        return Ok(serde_json::Value::String(string.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for item in array.iter::<Value>() {
            let item = item?;
            if item.is_function() {
                items.push(serde_json::Value::Null);
            } else {
                items.push(export_at(&item, depth + 1)?);
            }
        }
        return Ok(serde_json::Value::Array(items));
    }
    if value.is_function() {
        return Err(mismatch("a data value", value));
    }
    if let Ok(bytes) = value.get::<TypedArray<u8>>() {
        // A detached buffer has no bytes left
        return Ok(export_bytes(bytes.as_bytes().unwrap_or_default()));
    }
    if let Ok(buffer) = value.get::<ArrayBuffer>() {
        return Ok(export_bytes(buffer.as_bytes().unwrap_or_default()));
    }
    if let Some(object) = value.as_object() {
        let mut map = Map::new();
        for prop in object.props::<String, Value>() {
            let (key, item) = prop?;
            if item.is_undefined() || item.is_function() {
                continue;
            }
            map.insert(key, export_at(&item, depth + 1)?);
        }
        return Ok(serde_json::Value::Object(map));
    }

    Err(mismatch("a data value", value))
}

fn export_number(float: f64) -> serde_json::Value {
    if float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::Number(Number::from(float as i64));
    }
    Number::from_f64(float)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn export_bytes(bytes: &[u8]) -> serde_json::Value {
    serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
}

/// Import a host value into the script runtime
pub(crate) fn import_value<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    let imported = match value {
        serde_json::Value::Null => Value::new_null(ctx.clone()),
        serde_json::Value::Bool(boolean) => Value::new_bool(ctx.clone(), *boolean),
        serde_json::Value::Number(number) => import_number(ctx, number),
        serde_json::Value::String(string) => string.as_str().into_js(ctx)?,
        serde_json::Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, import_value(ctx, item)?)?;
            }
            array.into_value()
        }
        serde_json::Value::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), import_value(ctx, item)?)?;
            }
            object.into_value()
        }
    };
    Ok(imported)
}

fn import_number<'js>(ctx: &Ctx<'js>, number: &Number) -> Value<'js> {
    match number.as_i64() {
        Some(wide) => match i32::try_from(wide) {
            Ok(int) => Value::new_int(ctx.clone(), int),
            Err(_) => Value::new_float(ctx.clone(), wide as f64),
        },
        None => Value::new_float(ctx.clone(), number.as_f64().unwrap_or(f64::NAN)),
    }
}

/// Human-readable rendering of an arbitrary thrown or rejected value
pub(crate) fn format_value(value: &Value<'_>) -> String {
    try_format_value(value).unwrap_or_else(|_| describe(value).to_string())
}

/// Like [`format_value`], but fails when a getter throws, leaving its
/// exception pending
pub(crate) fn try_format_value(value: &Value<'_>) -> Result<String> {
    if value.is_undefined() {
        return Ok("undefined".to_string());
    }
    match export_value(value) {
        Ok(serde_json::Value::String(string)) => Ok(string),
        Ok(other) => Ok(other.to_string()),
        Err(SandboxError::PendingException) => Err(SandboxError::PendingException),
        Err(_) => Ok(describe(value).to_string()),
    }
}

/// The `typeof`-style name of a script value, for error messages
pub(crate) fn describe(value: &Value<'_>) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.as_bool().is_some() {
        "boolean"
    } else if value.as_int().is_some() || value.as_float().is_some() {
        "number"
    } else if value.as_string().is_some() {
        "string"
    } else if value.as_array().is_some() {
        "array"
    } else if value.is_function() {
        "function"
    } else if value.as_object().is_some() {
        "object"
    } else {
        "unsupported value"
    }
}

fn number(value: &Value<'_>) -> Option<f64> {
    value.as_int().map(f64::from).or_else(|| value.as_float())
}

fn mismatch(expected: &str, value: &Value<'_>) -> SandboxError {
    SandboxError::InvalidCast(format!("expected {expected}, found {}", describe(value)))
}
