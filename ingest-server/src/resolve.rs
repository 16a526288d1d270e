//! Message body resolution
//!
//! A queue message is an inline snapshot document, an enriched pointer to a
//! bulk object holding the item list, or a raw storage event notification
//! naming the object. Producers are sloppy: bodies arrive with UTF-8 BOMs
//! and occasionally double-encoded (a JSON string containing JSON), and bulk
//! objects are a full document, a bare JSON array of items, or NDJSON. All
//! of that is absorbed here; downstream code only ever sees a typed
//! `Snapshot`.

use serde_json::Value;
use shared::{ItemFact, PipelineError, Snapshot};

use crate::backoff::Backoff;
use crate::blob::BlobStore;

fn strip_bom(s: &str) -> &str {
    s.trim_start_matches('\u{feff}')
}

/// Parse a body that may be JSON or a JSON string containing JSON.
fn parse_loose(body: &str) -> Result<Value, PipelineError> {
    let value: Value = serde_json::from_str(strip_bom(body))?;
    match value {
        Value::String(inner) => Ok(serde_json::from_str(strip_bom(&inner))?),
        other => Ok(other),
    }
}

/// Pointer shapes: `{"s3": {"bucket": "...", "key": "..."}}` on an enriched
/// message (bucket occasionally nested as `{"name": ...}`, key under
/// `object.key`), or a raw storage event notification where the same `s3`
/// block sits under `Records[0]`.
fn pointer_target(value: &Value) -> Option<(String, String)> {
    let s3 = value
        .get("s3")
        .or_else(|| value.get("Records")?.get(0)?.get("s3"))?;
    let bucket = match s3.get("bucket") {
        Some(Value::String(b)) => b.clone(),
        Some(obj) => obj.get("name")?.as_str()?.to_string(),
        None => return None,
    };
    let key = match s3.get("key") {
        Some(Value::String(k)) => k.clone(),
        _ => s3.get("object")?.get("key")?.as_str()?.to_string(),
    };
    Some((bucket, key))
}

/// Parsed bulk object content: either a full document carrying its own
/// envelope, or a bare item list whose envelope lives on the pointer
/// message.
enum BulkObject {
    Document(Snapshot),
    Items(Vec<ItemFact>),
}

/// Accepts a full document, a bare JSON array of item facts, or NDJSON lines
/// of item facts.
fn parse_bulk(bytes: &[u8]) -> Result<BulkObject, PipelineError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::Parse(format!("bulk object is not utf-8: {e}")))?;
    let text = strip_bom(text);

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return match value {
            Value::Array(_) => Ok(BulkObject::Items(serde_json::from_value(value)?)),
            Value::Object(_) if value.get("items").is_some_and(Value::is_array) => {
                Ok(BulkObject::Document(serde_json::from_value(value)?))
            }
            Value::Object(_) => Err(PipelineError::Parse("bulk object has no items".into())),
            _ => Err(PipelineError::Parse("bulk object is not a document".into())),
        };
    }

    // NDJSON fallback: one item per line
    let items = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str::<ItemFact>(l).map_err(PipelineError::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BulkObject::Items(items))
}

/// Resolve a queue message body to a `Snapshot`, fetching the bulk item list
/// when the body is a pointer. Blob fetches retry transport errors per the
/// backoff policy.
pub async fn resolve_snapshot(
    body: &str,
    blobs: &dyn BlobStore,
    backoff: &Backoff,
) -> Result<Snapshot, PipelineError> {
    let value = parse_loose(body)?;

    if value.get("items").is_some_and(Value::is_array) {
        return Ok(serde_json::from_value(value)?);
    }

    let Some((bucket, key)) = pointer_target(&value) else {
        return Err(PipelineError::Validation(
            "unsupported message shape; need items[] or an s3 pointer".into(),
        ));
    };

    let bytes = backoff
        .retry("blob fetch", || blobs.fetch(&bucket, &key))
        .await?;
    let mut snapshot = match parse_bulk(&bytes)? {
        // full document: the blob carries its own envelope (raw storage
        // events have nothing else to offer)
        BulkObject::Document(snapshot) => snapshot,
        // bare item list: envelope comes from the pointer message
        BulkObject::Items(items) => {
            let mut snapshot: Snapshot = serde_json::from_value(value)?;
            snapshot.items = items;
            snapshot
        }
    };
    if snapshot.src_key.is_none() {
        snapshot.src_key = Some(key);
    }
    Ok(snapshot)
}
