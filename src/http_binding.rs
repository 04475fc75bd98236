//! CloudEvents HTTP protocol binding
//!
//! Inbound requests may use structured mode (`application/cloudevents+json`)
//! or binary mode (`ce-*` headers). Outbound requests always use binary mode.

use crate::{Error, Event, Result};
use bytes::Bytes;
use http::{
    header::{CONTENT_TYPE, HeaderName, HeaderValue},
    HeaderMap,
};
use serde_json::Value;

/// Content type of a structured-mode event
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

const BATCH_CONTENT_TYPE: &str = "application/cloudevents-batch+json";

const HEADER_PREFIX: &str = "ce-";

/// Decodes an event from an HTTP request
pub fn from_request(headers: &HeaderMap, body: Bytes) -> Result<Event> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| Error::InvalidEvent("content-type is not visible ASCII".to_owned()))
        })
        .transpose()?;

    let essence = content_type
        .and_then(|content_type| content_type.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some(STRUCTURED_CONTENT_TYPE) => Event::from_json(&body),
        Some(BATCH_CONTENT_TYPE) => Err(Error::InvalidEvent(
            "batched events are not supported".to_owned(),
        )),
        _ => from_binary(headers, content_type, body),
    }
}

fn from_binary(headers: &HeaderMap, content_type: Option<&str>, body: Bytes) -> Result<Event> {
    let mut event = Event::new("", "", "");
    event.spec_version.clear();

    for (name, value) in headers {
        let Some(attribute) = name.as_str().strip_prefix(HEADER_PREFIX) else {
            continue;
        };

        let value = value
            .to_str()
            .map_err(|_| Error::InvalidEvent(format!("header {name} is not visible ASCII")))
            .and_then(percent_decode)?;

        match attribute {
            "specversion" => event.spec_version = value,
            "id" => event.id = value,
            "source" => event.source = value,
            "type" => event.ty = value,
            "subject" => event.subject = Some(value),
            "time" => event.time = Some(value),
            "dataschema" => event.data_schema = Some(value),
            reserved if crate::event::is_reserved(reserved) => {
                return Err(Error::InvalidEvent(format!(
                    "header {name} is not allowed in binary mode"
                )));
            }
            extension => {
                let _ = event.extensions.insert(extension.to_owned(), Value::String(value));
            }
        }
    }

    if event.spec_version.is_empty() {
        return Err(Error::InvalidEvent(
            "request is neither a structured event nor carries ce-specversion".to_owned(),
        ));
    }

    event.data_content_type = content_type.map(str::to_owned);
    event.data = (!body.is_empty()).then_some(body);
    event.validate()?;

    Ok(event)
}

/// Encodes an event as binary-mode headers and body
pub fn to_binary(event: &Event) -> Result<(HeaderMap, Bytes)> {
    let mut headers = HeaderMap::new();

    insert(&mut headers, "specversion", &event.spec_version)?;
    insert(&mut headers, "id", &event.id)?;
    insert(&mut headers, "source", &event.source)?;
    insert(&mut headers, "type", &event.ty)?;

    for (name, value) in [
        ("subject", &event.subject),
        ("time", &event.time),
        ("dataschema", &event.data_schema),
    ] {
        if let Some(value) = value {
            insert(&mut headers, name, value)?;
        }
    }

    for (name, value) in &event.extensions {
        match value {
            Value::String(text) => insert(&mut headers, name, text)?,
            other => insert(&mut headers, name, &other.to_string())?,
        }
    }

    if let Some(content_type) = &event.data_content_type {
        let value = HeaderValue::from_str(content_type)
            .map_err(|error| Error::InvalidEvent(format!("datacontenttype: {error}")))?;
        let _ = headers.insert(CONTENT_TYPE, value);
    }

    Ok((headers, event.data.clone().unwrap_or_default()))
}

fn insert(headers: &mut HeaderMap, attribute: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(format!("{HEADER_PREFIX}{attribute}").as_bytes())
        .map_err(|error| Error::InvalidEvent(format!("attribute {attribute}: {error}")))?;
    let value = HeaderValue::from_str(&percent_encode(value))
        .map_err(|error| Error::InvalidEvent(format!("attribute {attribute}: {error}")))?;

    let _ = headers.insert(name, value);

    Ok(())
}

fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());

    for byte in value.bytes() {
        match byte {
            b' ' | b'"' | b'%' => encoded.push_str(&format!("%{byte:02X}")),
            b'!'..=b'~' => encoded.push(char::from(byte)),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }

    encoded
}

fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'%' {
            let byte = value
                .get(index + 1..index + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| Error::InvalidEvent(format!("bad percent-encoding in {value:?}")))?;
            decoded.push(byte);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }

    String::from_utf8(decoded).map_err(|_| Error::InvalidEvent(format!("{value:?} is not UTF-8")))
}
