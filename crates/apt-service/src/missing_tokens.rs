//! Missing-token store: an append-only collector for surface forms the MT
//! marked unknown (`*token`), buffered in memory and flushed to durable
//! storage in batches.

use std::path::PathBuf;

use apt_core::PairKey;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Buffers unknown tokens up to `limit` entries, then flushes them as one
/// batched append to `path` (if configured). The buffer and the flush share
/// a single lock, so a flush is atomic with respect to concurrent inserts:
/// no insert can land between "snapshot the buffer" and "clear it".
pub struct MissingTokenStore {
    limit: usize,
    path: Option<PathBuf>,
    buffer: Mutex<Vec<(PairKey, String)>>,
}

impl MissingTokenStore {
    pub fn new(limit: usize, path: Option<PathBuf>) -> Self {
        Self {
            limit,
            path,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Record one unknown token for `pair`. Triggers an automatic flush
    /// once the buffer reaches `limit` entries.
    pub async fn insert(&self, pair: &PairKey, token: &str) {
        let mut buf = self.buffer.lock().await;
        buf.push((pair.clone(), token.to_string()));
        if buf.len() >= self.limit {
            self.flush_locked(&mut buf).await;
        }
    }

    /// Force a flush regardless of buffer size; called by the janitor's
    /// periodic tick and by shutdown.
    pub async fn flush(&self) {
        let mut buf = self.buffer.lock().await;
        self.flush_locked(&mut buf).await;
    }

    async fn flush_locked(&self, buf: &mut Vec<(PairKey, String)>) {
        if buf.is_empty() {
            return;
        }
        if let Some(path) = &self.path {
            let mut body = String::new();
            for (pair, token) in buf.iter() {
                body.push_str(&pair.to_string());
                body.push('\t');
                body.push_str(token);
                body.push('\n');
            }
            match tokio::fs::OpenOptions::new().create(true).append(true).open(path).await {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(body.as_bytes()).await {
                        warn!(error = %e, "failed to flush missing-token store");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to open missing-token store file");
                    return;
                }
            }
        }
        buf.clear();
    }

    /// Flush whatever remains and stop accepting writes; called during
    /// graceful shutdown.
    pub async fn close(&self) {
        self.flush().await;
    }

    #[cfg(test)]
    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn idn_pair() -> PairKey {
        PairKey::new(
            apt_core::LangCode::parse("idn").unwrap(),
            apt_core::LangCode::parse("idn").unwrap(),
        )
    }

    #[tokio::test]
    async fn auto_flushes_once_limit_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.tsv");
        let store = MissingTokenStore::new(2, Some(path.clone()));
        let pair = idn_pair();

        store.insert(&pair, "foo").await;
        assert_eq!(store.buffered_len().await, 1);
        store.insert(&pair, "bar").await;
        assert_eq!(store.buffered_len().await, 0);

        let mut contents = String::new();
        std::fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("foo"));
        assert!(contents.contains("bar"));
    }

    #[tokio::test]
    async fn close_flushes_remaining_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.tsv");
        let store = MissingTokenStore::new(100, Some(path.clone()));
        store.insert(&idn_pair(), "lonely").await;
        store.close().await;

        let mut contents = String::new();
        std::fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("lonely"));
    }

    #[tokio::test]
    async fn without_a_path_buffer_still_clears_on_flush() {
        let store = MissingTokenStore::new(10, None);
        store.insert(&idn_pair(), "x").await;
        store.flush().await;
        assert_eq!(store.buffered_len().await, 0);
    }
}
