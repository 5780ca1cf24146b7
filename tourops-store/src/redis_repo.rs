use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, Script};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tourops_core::store::{prune, DEFAULT_TRANSACTION_RETRIES};
use tourops_core::tree::{get_at, set_at};
use tourops_core::{RealtimeStore, Revision, StoreError, StorePath, StoreResult, Subscription};
use tracing::{debug, info, warn};

const DOC_PREFIX: &str = "tourops:doc:";
const REV_PREFIX: &str = "tourops:rev:";
const CHANGES_CHANNEL: &str = "tourops:changes";

/// Replace a document only if its revision is still the expected one, then bump and announce.
/// An empty payload deletes the document. Returns the new revision, or -1 on conflict.
const CAS_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if current ~= tonumber(ARGV[1]) then
  return -1
end
if ARGV[2] == '' then
  redis.call('DEL', KEYS[1])
else
  redis.call('SET', KEYS[1], ARGV[2])
end
local rev = redis.call('INCR', KEYS[2])
redis.call('PUBLISH', ARGV[3], ARGV[4])
return rev
"#;

/// Realtime store on Redis.
///
/// The tree is sharded into documents keyed by the first two path segments
/// (`tours/T1`, `bookings/T1`, ...). Each document is one JSON string with its own
/// revision counter; deeper paths are edited inside the document and committed
/// through a Lua compare-and-set, so every write is atomic per document.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    cas: Script,
    retries: u32,
}

struct DocPath {
    id: String,
    inner: Vec<String>,
}

impl DocPath {
    fn doc_key(&self) -> String {
        format!("{}{}", DOC_PREFIX, self.id)
    }

    fn rev_key(&self) -> String {
        format!("{}{}", REV_PREFIX, self.id)
    }
}

fn doc_path(path: &StorePath) -> Option<DocPath> {
    let segments = path.segments();
    if segments.len() < 2 {
        return None;
    }
    Some(DocPath {
        id: segments[..2].join("/"),
        inner: segments[2..].to_vec(),
    })
}

fn backend(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

impl RedisStore {
    pub async fn new(connection_string: &str) -> Result<Self, RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected realtime store to Redis");
        Ok(Self {
            client,
            conn,
            cas: Script::new(CAS_SCRIPT),
            retries: DEFAULT_TRANSACTION_RETRIES,
        })
    }

    pub fn with_transaction_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    async fn load_doc(&self, doc: &DocPath) -> StoreResult<(Option<Value>, u64)> {
        let mut conn = self.conn.clone();
        let (raw, rev): (Option<String>, Option<u64>) = redis::cmd("MGET")
            .arg(doc.doc_key())
            .arg(doc.rev_key())
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        let value = raw.map(|raw| serde_json::from_str(&raw)).transpose()?;
        Ok((value, rev.unwrap_or(0)))
    }

    async fn commit_doc(&self, doc: &DocPath, expected: u64, value: Option<Value>, changed: &StorePath) -> StoreResult<bool> {
        let payload = match value {
            Some(value) => serde_json::to_string(&value)?,
            None => String::new(),
        };
        let mut conn = self.conn.clone();
        let mut invocation = self.cas.prepare_invoke();
        invocation
            .key(doc.doc_key())
            .key(doc.rev_key())
            .arg(expected)
            .arg(payload)
            .arg(CHANGES_CHANNEL)
            .arg(changed.to_string());
        let rev: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        Ok(rev >= 0)
    }

    /// Apply `edit` to the document holding `path`, retrying on lost races.
    async fn edit_doc<F>(&self, path: &StorePath, edit: F) -> StoreResult<()>
    where
        F: Fn(&mut Value, &[String]) -> StoreResult<()> + Send + Sync,
    {
        let doc = doc_path(path).ok_or_else(|| {
            StoreError::InvalidPath(format!("{}: writes must target a tour-level document or below", path))
        })?;

        for attempt in 1..=self.retries {
            let (current, rev) = self.load_doc(&doc).await?;
            let mut root = current.unwrap_or_else(|| Value::Object(Map::new()));
            edit(&mut root, &doc.inner)?;
            if self.commit_doc(&doc, rev, prune(root), path).await? {
                return Ok(());
            }
            debug!("Redis write on {} lost race (attempt {}/{})", path, attempt, self.retries);
        }
        Err(StoreError::TransactionContention {
            path: path.to_string(),
            attempts: self.retries,
        })
    }

    /// Collection-level read: merge every document under `collection`.
    async fn read_collection(&self, collection: &str) -> StoreResult<(Option<Value>, Vec<u64>)> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}{}/*", DOC_PREFIX, collection.replace('\\', "\\\\"));
        let mut keys: Vec<String> = conn.keys(pattern).await.map_err(backend)?;
        keys.sort();

        let mut merged = Map::new();
        let mut revs = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(id) = key.strip_prefix(DOC_PREFIX).and_then(|id| id.split_once('/')) else {
                continue;
            };
            let doc = DocPath {
                id: format!("{}/{}", id.0, id.1),
                inner: Vec::new(),
            };
            let (value, rev) = self.load_doc(&doc).await?;
            revs.push(rev);
            if let Some(value) = value {
                merged.insert(id.1.to_string(), value);
            }
        }
        Ok((prune(Value::Object(merged)), revs))
    }
}

#[async_trait]
impl RealtimeStore for RedisStore {
    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        Ok(self.read_versioned(path).await?.0)
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.edit_doc(path, |root, inner| {
            set_at(root, inner, prune(value.clone()));
            Ok(())
        })
        .await
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> StoreResult<()> {
        let children = fields
            .into_iter()
            .map(|(key, value)| Ok((path.child(&key)?, value)))
            .collect::<StoreResult<Vec<_>>>()?;
        let base = path.segments().len();

        self.edit_doc(path, |root, inner| {
            for (child, value) in &children {
                let mut segments = inner.to_vec();
                segments.extend_from_slice(&child.segments()[base..]);
                set_at(root, &segments, prune(value.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn read_versioned(&self, path: &StorePath) -> StoreResult<(Option<Value>, Revision)> {
        match doc_path(path) {
            Some(doc) => {
                let (value, rev) = self.load_doc(&doc).await?;
                let value = value.and_then(|root| get_at(&root, &doc.inner).cloned());
                Ok((value, Revision(vec![rev])))
            }
            None => {
                let (value, revs) = self.read_collection(&path.segments()[0]).await?;
                Ok((value, Revision(revs)))
            }
        }
    }

    async fn compare_and_set(&self, path: &StorePath, expected: &Revision, value: Value) -> StoreResult<bool> {
        let doc = doc_path(path).ok_or_else(|| {
            StoreError::InvalidPath(format!("{}: writes must target a tour-level document or below", path))
        })?;
        let [expected] = expected.0.as_slice() else {
            return Ok(false);
        };

        let (current, rev) = self.load_doc(&doc).await?;
        if rev != *expected {
            return Ok(false);
        }
        let mut root = current.unwrap_or_else(|| Value::Object(Map::new()));
        set_at(&mut root, &doc.inner, prune(value));
        self.commit_doc(&doc, rev, prune(root), path).await
    }

    fn transaction_retries(&self) -> u32 {
        self.retries
    }

    async fn watch(&self, path: &StorePath) -> StoreResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(backend)?;
        pubsub.subscribe(CHANGES_CHANNEL).await.map_err(backend)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();
        let watched = path.clone();

        let task = tokio::spawn(async move {
            let mut last = match store.read(&watched).await {
                Ok(value) => value,
                Err(err) => {
                    warn!("Initial read for watch on {} failed: {}", watched, err);
                    None
                }
            };
            if tx.send(last.clone()).is_err() {
                return;
            }

            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let Ok(changed) = msg.get_payload::<String>() else {
                    continue;
                };
                match StorePath::parse(&changed) {
                    Ok(changed) if changed.overlaps(&watched) => {}
                    _ => continue,
                }
                match store.read(&watched).await {
                    Ok(current) if current != last => {
                        if tx.send(current.clone()).is_err() {
                            return;
                        }
                        last = current;
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Re-read for watch on {} failed: {}", watched, err),
                }
            }
            debug!("Change feed for {} closed", watched);
        });

        Ok(Subscription::new(rx, task))
    }
}
