use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::{value::RawValue, Value};
use std::collections::BTreeMap;

/// Spec version stamped on events built with [`Event::new`]
pub const SPEC_VERSION: &str = "1.0";

const SUPPORTED_SPEC_VERSIONS: [&str; 2] = ["1.0", "0.3"];

const RESERVED_ATTRIBUTES: [&str; 10] = [
    "specversion",
    "id",
    "source",
    "type",
    "datacontenttype",
    "dataschema",
    "subject",
    "time",
    "data",
    "data_base64",
];

/// Whether `name` is a context attribute or data member rather than an extension
pub(crate) fn is_reserved(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}

/// A CloudEvent as it travels through the relay.
///
/// The relay reads and writes the envelope but never looks into `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event id
    pub id: String,

    /// Event source URI reference
    pub source: String,

    /// Event type
    pub ty: String,

    /// Value of the `specversion` attribute
    pub spec_version: String,

    /// Media type of `data`
    pub data_content_type: Option<String>,

    /// Schema `data` adheres to
    pub data_schema: Option<String>,

    /// Subject of the event in the context of its source
    pub subject: Option<String>,

    /// Occurrence timestamp, passed through as written
    pub time: Option<String>,

    /// Extension attributes
    pub extensions: BTreeMap<String, Value>,

    /// Payload
    pub data: Option<Bytes>,
}

impl Event {
    /// Creates an instance of [`Event`] without data
    pub fn new(id: impl Into<String>, source: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            ty: ty.into(),
            spec_version: SPEC_VERSION.to_owned(),
            data_content_type: None,
            data_schema: None,
            subject: None,
            time: None,
            extensions: BTreeMap::new(),
            data: None,
        }
    }

    /// Attaches a payload and its media type
    pub fn with_data(mut self, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.data_content_type = Some(content_type.into());
        self.data = Some(data.into());
        self
    }

    /// Checks the required context attributes
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SPEC_VERSIONS.contains(&self.spec_version.as_str()) {
            return Err(Error::InvalidEvent(format!(
                "unsupported specversion {:?}",
                self.spec_version
            )));
        }

        for (name, value) in [("id", &self.id), ("source", &self.source), ("type", &self.ty)] {
            if value.is_empty() {
                return Err(Error::InvalidEvent(format!("{name} must not be empty")));
            }
        }

        Ok(())
    }

    /// Decodes the JSON event format
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut attributes: BTreeMap<String, Box<RawValue>> = serde_json::from_slice(bytes)?;

        let spec_version = required(&mut attributes, "specversion")?;
        let id = required(&mut attributes, "id")?;
        let source = required(&mut attributes, "source")?;
        let ty = required(&mut attributes, "type")?;
        let data_content_type = optional(&mut attributes, "datacontenttype")?;
        let data_schema = optional(&mut attributes, "dataschema")?;
        let subject = optional(&mut attributes, "subject")?;
        let time = optional(&mut attributes, "time")?;

        let data = match (attributes.remove("data"), attributes.remove("data_base64")) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidEvent(
                    "data and data_base64 are mutually exclusive".to_owned(),
                ))
            }
            (Some(raw), None) => decode_data(&raw, data_content_type.as_deref())?,
            (None, Some(raw)) => {
                let encoded: String = serde_json::from_str(raw.get())?;
                let decoded = STANDARD
                    .decode(encoded)
                    .map_err(|error| Error::InvalidEvent(format!("data_base64: {error}")))?;
                Some(Bytes::from(decoded))
            }
            (None, None) => None,
        };

        let extensions = attributes
            .into_iter()
            .map(|(name, raw)| -> Result<(String, Value)> {
                Ok((name, serde_json::from_str(raw.get())?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let event = Self {
            id,
            source,
            ty,
            spec_version,
            data_content_type,
            data_schema,
            subject,
            time,
            extensions,
            data,
        };
        event.validate()?;

        Ok(event)
    }

    /// Encodes the JSON event format
    pub fn to_json(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("specversion", &self.spec_version)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("source", &self.source)?;
        map.serialize_entry("type", &self.ty)?;

        for (name, value) in [
            ("datacontenttype", &self.data_content_type),
            ("dataschema", &self.data_schema),
            ("subject", &self.subject),
            ("time", &self.time),
        ] {
            if let Some(value) = value {
                map.serialize_entry(name, value)?;
            }
        }

        for (name, value) in self.extensions.iter().filter(|(name, _)| !is_reserved(name)) {
            map.serialize_entry(name, value)?;
        }

        if let Some(data) = &self.data {
            match encode_data(data, self.data_content_type.as_deref()) {
                EncodedData::Json(raw) => map.serialize_entry("data", raw)?,
                EncodedData::Text(text) => map.serialize_entry("data", text)?,
                EncodedData::Base64(encoded) => map.serialize_entry("data_base64", &encoded)?,
            }
        }

        map.end()
    }
}

enum EncodedData<'a> {
    Json(&'a RawValue),
    Text(&'a str),
    Base64(String),
}

fn encode_data<'a>(data: &'a [u8], content_type: Option<&str>) -> EncodedData<'a> {
    let text = std::str::from_utf8(data).ok();

    if is_json(content_type) {
        // Embedded only when it round-trips byte for byte. A literal `null`
        // would read back as no data at all.
        let raw = text.and_then(|text| serde_json::from_str::<&RawValue>(text).ok());
        if let Some(raw) = raw.filter(|raw| raw.get().len() == data.len() && raw.get() != "null") {
            return EncodedData::Json(raw);
        }
    } else if is_text(content_type) {
        if let Some(text) = text {
            return EncodedData::Text(text);
        }
    }

    EncodedData::Base64(STANDARD.encode(data))
}

fn decode_data(raw: &RawValue, content_type: Option<&str>) -> Result<Option<Bytes>> {
    let text = raw.get();

    if text == "null" {
        return Ok(None);
    }

    if !is_json(content_type) && text.starts_with('"') {
        let decoded: String = serde_json::from_str(text)?;
        return Ok(Some(decoded.into()));
    }

    Ok(Some(Bytes::copy_from_slice(text.as_bytes())))
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(content_type: Option<&str>) -> bool {
    match content_type.map(essence) {
        None => true,
        Some(essence) => essence.ends_with("/json") || essence.ends_with("+json"),
    }
}

fn is_text(content_type: Option<&str>) -> bool {
    content_type.map(essence).map_or(false, |essence| {
        essence.starts_with("text/") || essence.ends_with("/xml") || essence.ends_with("+xml")
    })
}

fn required(attributes: &mut BTreeMap<String, Box<RawValue>>, name: &str) -> Result<String> {
    optional(attributes, name)?
        .ok_or_else(|| Error::InvalidEvent(format!("missing required attribute {name}")))
}

fn optional(
    attributes: &mut BTreeMap<String, Box<RawValue>>,
    name: &str,
) -> Result<Option<String>> {
    attributes
        .remove(name)
        .map(|raw| {
            serde_json::from_str(raw.get())
                .map_err(|_| Error::InvalidEvent(format!("attribute {name} must be a string")))
        })
        .transpose()
}
