use serde_json::{Map, Value};

/// Largest accepted form body.
pub const MAX_FORM_BYTES: usize = 1 << 20;

const BLOCKED_KEYS: &[&str] = &[
    "password",
    "oldpassword",
    "newpassword",
    "token",
    "accesstoken",
    "refreshtoken",
    "turnstiletoken",
    "cfturnstileresponse",
    "captcha",
];

#[derive(Debug, PartialEq, Eq)]
pub enum FormRejection {
    TooLarge,
    InvalidJson,
    NotAnObject,
}

impl FormRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            FormRejection::TooLarge => "payload too large",
            FormRejection::InvalidJson => "invalid json",
            FormRejection::NotAnObject => "payload must be a json object",
        }
    }
}

fn is_blocked(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    BLOCKED_KEYS.contains(&key.as_str())
}

/// Remove credential-like keys at any depth.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !is_blocked(k))
                .map(|(k, v)| (k, sanitize(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

/// Parse a raw form body into a sanitized JSON object.
pub fn sanitize_body(body: &[u8]) -> Result<Value, FormRejection> {
    if body.len() > MAX_FORM_BYTES {
        return Err(FormRejection::TooLarge);
    }
    let value: Value = serde_json::from_slice(body).map_err(|_| FormRejection::InvalidJson)?;
    if !value.is_object() {
        return Err(FormRejection::NotAnObject);
    }
    Ok(sanitize(value))
}
