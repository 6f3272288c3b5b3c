//! JSON-lines watch source.
//!
//! Each non-empty line is one watch record:
//!
//! ```text
//! {"resource":"service","event":"added","object":{...}}
//! {"resource":"endpointSlice","event":"updated","old":{...},"new":{...}}
//! {"resource":"endpointSlice","event":"deleted","object":{...}}
//! {"resource":"service","event":"synced"}
//! ```
//!
//! Lines starting with `#` are comments.

use crate::event::{KubeEvent, Resource, WatchEvent};
use crate::{IngestError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum EventKind {
    Added,
    Updated,
    Deleted,
    Synced,
}

#[derive(Debug, Deserialize)]
struct WatchRecord {
    resource: Resource,
    event: EventKind,
    #[serde(default)]
    object: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
    #[serde(default)]
    new: Option<Value>,
}

fn payload<T: DeserializeOwned>(value: Option<Value>, field: &str) -> std::result::Result<T, String> {
    let value = value.ok_or_else(|| format!("missing '{}'", field))?;
    serde_json::from_value(value).map_err(|e| format!("bad '{}': {}", field, e))
}

fn watch_event<T: DeserializeOwned>(record: WatchRecord) -> std::result::Result<WatchEvent<T>, String> {
    Ok(match record.event {
        EventKind::Added => WatchEvent::Added(payload(record.object, "object")?),
        EventKind::Updated => WatchEvent::Updated {
            old: payload(record.old, "old")?,
            new: payload(record.new, "new")?,
        },
        EventKind::Deleted => WatchEvent::Deleted(payload(record.object, "object")?),
        EventKind::Synced => return Err("synced records carry no object".to_string()),
    })
}

/// Decodes one JSON watch record into a typed event.
///
/// # Errors
///
/// Returns [`IngestError::Decode`] naming `line` if the record is not valid
/// JSON, names an unknown resource or event, or lacks its payload.
pub fn decode_record(text: &str, line: usize) -> Result<KubeEvent> {
    let decode_err = |message: String| IngestError::Decode { line, message };

    let record: WatchRecord = serde_json::from_str(text).map_err(|e| decode_err(e.to_string()))?;
    if matches!(record.event, EventKind::Synced) {
        return Ok(KubeEvent::Synced(record.resource));
    }
    let event = match record.resource {
        Resource::Service => watch_event(record).map(KubeEvent::Service),
        Resource::EndpointSlice => watch_event(record).map(KubeEvent::EndpointSlice),
    };
    event.map_err(decode_err)
}

/// Reads watch records line by line and forwards them as events.
pub struct JsonLinesSource<R> {
    name: String,
    reader: R,
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    /// Forwards every record until end of input, cancellation, or the
    /// receiver going away. Malformed records are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if reading fails.
    pub async fn run(self, events: mpsc::Sender<KubeEvent>, cancel: CancellationToken) -> Result<()> {
        let mut lines = self.reader.lines();
        let mut line_no = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = lines.next_line() => next,
            };
            let line = next.map_err(|source| IngestError::Io {
                path: self.name.clone(),
                source,
            })?;
            let Some(line) = line else {
                info!(source = %self.name, records = line_no, "watch source reached end of input");
                break;
            };
            line_no += 1;

            let text = line.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let event = match decode_record(text, line_no) {
                Ok(event) => event,
                Err(e) => {
                    warn!(source = %self.name, error = %e, "skipping watch record");
                    continue;
                }
            };
            debug!(source = %self.name, line = line_no, resource = ?event.resource(), "watch event");

            if events.send(event).await.is_err() {
                debug!(source = %self.name, "event receiver closed");
                break;
            }
        }

        Ok(())
    }
}

impl JsonLinesSource<BufReader<Box<dyn tokio::io::AsyncRead + Unpin + Send>>> {
    /// Opens `path`, or stdin for `-`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be opened.
    pub async fn open(path: &str) -> Result<Self> {
        let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = if path == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|source| IngestError::Io {
                    path: path.to_string(),
                    source,
                })?;
            Box::new(file)
        };
        Ok(Self::new(path, BufReader::new(reader)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SERVICE: &str = r#"{"metadata":{"namespace":"ns","name":"svc1"},"spec":{"clusterIP":"10.0.0.5"}}"#;

    #[test]
    fn test_decode_added_and_synced() {
        let text = format!(r#"{{"resource":"service","event":"added","object":{}}}"#, SERVICE);
        let event = decode_record(&text, 1).unwrap();
        assert!(matches!(event, KubeEvent::Service(WatchEvent::Added(ref s)) if s.metadata.name == "svc1"));

        let event = decode_record(r#"{"resource":"endpointSlice","event":"synced"}"#, 2).unwrap();
        assert_eq!(event, KubeEvent::Synced(Resource::EndpointSlice));
    }

    #[test]
    fn test_decode_updated_needs_old_and_new() {
        let text = format!(
            r#"{{"resource":"service","event":"updated","old":{0},"new":{0}}}"#,
            SERVICE
        );
        assert!(matches!(
            decode_record(&text, 1).unwrap(),
            KubeEvent::Service(WatchEvent::Updated { .. })
        ));

        let text = format!(r#"{{"resource":"service","event":"updated","new":{}}}"#, SERVICE);
        let err = decode_record(&text, 7).unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_decode_rejects_unknown_resource() {
        assert!(decode_record(r#"{"resource":"pod","event":"added","object":{}}"#, 1).is_err());
        assert!(decode_record("not json", 1).is_err());
    }

    #[tokio::test]
    async fn test_source_forwards_and_skips() {
        let input = format!(
            "# comment\n\n{{\"resource\":\"service\",\"event\":\"added\",\"object\":{}}}\ngarbage\n{{\"resource\":\"service\",\"event\":\"synced\"}}\n",
            SERVICE
        );
        let source = JsonLinesSource::new("test", input.as_bytes());
        let (tx, mut rx) = mpsc::channel(8);

        source.run(tx, CancellationToken::new()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.resource(), Resource::Service);
        assert_eq!(rx.recv().await.unwrap(), KubeEvent::Synced(Resource::Service));
        assert!(rx.recv().await.is_none());
    }
}
