//! Loosely-typed API payloads behind a declarative field table.
//!
//! Every payload object is kept as its raw JSON map. Reads go through a
//! per-shape table mapping a logical field name to the wire path and a parse
//! function, so "the title" means the same thing whether the service sent a
//! plain string or `{"_content": "..."}`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::model::SizeVariant;

/// A parsed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Date(DateTime<Utc>),
}

type ParseFn = fn(&Value) -> Option<FieldValue>;

/// One row of a field table: logical name, dotted wire path, parser.
pub struct FieldSpec {
    pub logical: &'static str,
    pub wire: &'static str,
    pub parse: ParseFn,
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <- {}", self.logical, self.wire)
    }
}

const fn field(logical: &'static str, wire: &'static str, parse: ParseFn) -> FieldSpec {
    FieldSpec {
        logical,
        wire,
        parse,
    }
}

/// Fields of a photo as returned by the listing endpoints with extras.
pub const PHOTO_FIELDS: &[FieldSpec] = &[
    field("id", "id", parse_text),
    field("owner", "owner", parse_text),
    field("owner_name", "ownername", parse_text),
    field("title", "title", parse_text),
    field("description", "description", parse_text),
    field("date_taken", "datetaken", parse_local_datetime),
    field("date_uploaded", "dateupload", parse_unix),
    field("last_updated", "lastupdate", parse_unix),
    field("views", "views", parse_int),
    field("faves", "count_faves", parse_int),
];

/// Fields shared by the single-collection metadata endpoints.
pub const COLLECTION_FIELDS: &[FieldSpec] = &[
    field("id", "id", parse_text),
    field("owner", "owner", parse_text),
    field("title", "title", parse_text),
    field("name", "name", parse_text),
    field("description", "description", parse_text),
    field("date_created", "date_create", parse_unix),
    field("date_updated", "date_update", parse_unix),
    field("count", "count_photos", parse_int),
    field("photo_count", "photos", parse_int),
    field("pool_count", "pool_count", parse_int),
];

/// Fields of a person record.
pub const USER_FIELDS: &[FieldSpec] = &[
    field("id", "nsid", parse_text),
    field("user_id", "id", parse_text),
    field("username", "username", parse_text),
    field("alias", "path_alias", parse_text),
    field("real_name", "realname", parse_text),
    field("photo_count", "photos.count", parse_int),
    field("first_upload", "photos.firstdate", parse_unix),
];

/// Fields of a collection summary inside a collections-of-collections list.
pub const SUMMARY_FIELDS: &[FieldSpec] = &[
    field("id", "id", parse_text),
    field("owner", "owner", parse_text),
    field("title", "title", parse_text),
];

/// An immutable API object with table-driven accessors.
#[derive(Clone)]
pub struct RemoteRecord {
    raw: Map<String, Value>,
    table: &'static [FieldSpec],
}

impl std::fmt::Debug for RemoteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRecord")
            .field("id", &self.text("id"))
            .finish_non_exhaustive()
    }
}

impl RemoteRecord {
    pub fn new(raw: Map<String, Value>, table: &'static [FieldSpec]) -> Self {
        Self { raw, table }
    }

    /// Wrap a JSON value, or `None` if it is not an object.
    pub fn from_value(value: Value, table: &'static [FieldSpec]) -> Option<Self> {
        match value {
            Value::Object(raw) => Some(Self::new(raw, table)),
            _ => None,
        }
    }

    /// Parsed value of a logical field, if present and well-formed.
    pub fn get(&self, logical: &str) -> Option<FieldValue> {
        let spec = self.table.iter().find(|f| f.logical == logical)?;
        let raw = self.wire_value(spec.wire)?;
        (spec.parse)(raw)
    }

    pub fn text(&self, logical: &str) -> Option<String> {
        match self.get(logical)? {
            FieldValue::Text(s) => Some(s),
            FieldValue::Int(n) => Some(n.to_string()),
            FieldValue::Date(_) => None,
        }
    }

    pub fn int(&self, logical: &str) -> Option<i64> {
        match self.get(logical)? {
            FieldValue::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn date(&self, logical: &str) -> Option<DateTime<Utc>> {
        match self.get(logical)? {
            FieldValue::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Raw string at a wire name, bypassing the table. Size URLs are looked
    /// up this way because their names come from [`SizeVariant`].
    pub fn raw_str(&self, wire: &str) -> Option<&str> {
        self.wire_value(wire)?.as_str().filter(|s| !s.is_empty())
    }

    fn wire_value(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.raw.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    // ── Photo accessors ──

    pub fn id(&self) -> Option<String> {
        self.text("id")
    }

    pub fn owner(&self) -> Option<String> {
        self.text("owner")
    }

    pub fn owner_name(&self) -> Option<String> {
        self.text("owner_name")
    }

    pub fn title(&self) -> Option<String> {
        self.text("title").or_else(|| self.text("name"))
    }

    pub fn description(&self) -> Option<String> {
        self.text("description")
    }

    pub fn date_taken(&self) -> Option<DateTime<Utc>> {
        self.date("date_taken")
    }

    pub fn date_uploaded(&self) -> Option<DateTime<Utc>> {
        self.date("date_uploaded")
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.date("last_updated")
    }

    pub fn views(&self) -> Option<u64> {
        self.int("views").and_then(|n| u64::try_from(n).ok())
    }

    pub fn faves(&self) -> Option<u64> {
        self.int("faves").and_then(|n| u64::try_from(n).ok())
    }

    /// The largest size variant that has a URL.
    pub fn largest_variant(&self) -> Option<(SizeVariant, String)> {
        SizeVariant::ASCENDING
            .iter()
            .rev()
            .find_map(|v| self.raw_str(v.url_field()).map(|url| (*v, url.to_string())))
    }

    // ── Collection accessors ──

    pub fn date_created(&self) -> Option<DateTime<Utc>> {
        self.date("date_created")
    }

    pub fn date_updated(&self) -> Option<DateTime<Utc>> {
        self.date("date_updated")
    }

    pub fn item_count(&self) -> Option<u64> {
        self.int("count")
            .or_else(|| self.int("photo_count"))
            .or_else(|| self.int("pool_count"))
            .and_then(|n| u64::try_from(n).ok())
    }
}

/// String, or `{"_content": "..."}`. Empty strings are absent.
fn parse_text(v: &Value) -> Option<FieldValue> {
    let s = match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Object(o) => o.get("_content")?.as_str()?.to_string(),
        _ => return None,
    };
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(FieldValue::Text(s))
}

/// Integer, possibly sent as a string or wrapped in `_content`.
fn parse_int(v: &Value) -> Option<FieldValue> {
    let n = match v {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        Value::Object(o) => return parse_int(o.get("_content")?),
        _ => return None,
    };
    Some(FieldValue::Int(n))
}

/// Unix seconds. Zero means "not set".
fn parse_unix(v: &Value) -> Option<FieldValue> {
    match parse_int(v)? {
        FieldValue::Int(0) => None,
        FieldValue::Int(secs) => Utc.timestamp_opt(secs, 0).single().map(FieldValue::Date),
        _ => None,
    }
}

/// `YYYY-MM-DD HH:MM:SS` without a zone, treated as UTC.
fn parse_local_datetime(v: &Value) -> Option<FieldValue> {
    let s = v.as_str()?;
    let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Some(FieldValue::Date(naive.and_utc()))
}
