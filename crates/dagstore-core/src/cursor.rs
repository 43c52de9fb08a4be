//! Lazy result cursors
//!
//! A [`Cursor`] is a finite, forward-only sequence of result documents. It
//! owns whatever store-side resource backs the result and releases it when
//! dropped, so abandoning a cursor early or on an error path never leaks.

use crate::{DagError, Result, StoreResult};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

type Release = Box<dyn FnOnce() + Send>;

/// Lazy sequence of query result documents
pub struct Cursor {
    documents: BoxStream<'static, StoreResult<Value>>,
    count: Option<u64>,
    release: Option<Release>,
}

impl Cursor {
    /// Wrap a stream of documents
    pub fn new(documents: BoxStream<'static, StoreResult<Value>>) -> Self {
        Self {
            documents,
            count: None,
            release: None,
        }
    }

    /// Cursor over already fetched documents; the count is known
    pub fn from_documents(documents: Vec<Value>) -> Self {
        let count = documents.len() as u64;
        Self::new(stream::iter(documents.into_iter().map(Ok)).boxed()).with_count(count)
    }

    pub fn empty() -> Self {
        Self::from_documents(Vec::new())
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Register the action releasing the backing resource
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Total number of results, when the store reported it
    pub fn reported_count(&self) -> Option<u64> {
        self.count
    }

    /// Next raw document, `None` once the cursor is exhausted
    pub async fn next_document(&mut self) -> StoreResult<Option<Value>> {
        self.documents.next().await.transpose()
    }

    /// Next document deserialized into `T`
    pub async fn read_document<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.next_document().await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    /// Drain the cursor into typed documents
    pub async fn collect_documents<T: DeserializeOwned>(mut self) -> Result<Vec<T>> {
        let mut documents = Vec::new();
        while let Some(document) = self.read_document().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    /// Drain the cursor into the `_key` of every document
    pub async fn collect_keys(mut self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        while let Some(document) = self.next_document().await? {
            keys.push(document_key(&document)?);
        }
        Ok(keys)
    }

    /// Number of results, draining the cursor if the store did not report it
    pub async fn total(mut self) -> Result<u64> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        let mut total = 0;
        while self.next_document().await?.is_some() {
            total += 1;
        }
        Ok(total)
    }

    /// Release the cursor before it is exhausted
    pub fn close(self) {
        drop(self);
    }
}

/// `_key` of a result document
pub fn document_key(document: &Value) -> Result<String> {
    document
        .get("_key")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DagError::Other(anyhow::anyhow!("result document has no _key: {document}")))
}

impl Stream for Cursor {
    type Item = StoreResult<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.documents.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("count", &self.count)
            .field("releasable", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cursor_yields_documents_in_order() {
        let mut cursor = Cursor::from_documents(vec![json!({"_key": "a"}), json!({"_key": "b"})]);
        assert_eq!(cursor.reported_count(), Some(2));
        assert_eq!(cursor.next_document().await.unwrap(), Some(json!({"_key": "a"})));
        assert_eq!(cursor.next_document().await.unwrap(), Some(json!({"_key": "b"})));
        assert_eq!(cursor.next_document().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_collect_keys() {
        let cursor = Cursor::from_documents(vec![json!({"_key": "x"}), json!({"_key": "y"})]);
        assert_eq!(cursor.collect_keys().await.unwrap(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_collect_keys_rejects_keyless_document() {
        let cursor = Cursor::from_documents(vec![json!({"data": 1})]);
        assert!(cursor.collect_keys().await.is_err());
    }

    #[tokio::test]
    async fn test_total_without_reported_count() {
        let documents = stream::iter(vec![Ok(json!({"_key": "1"})), Ok(json!({"_key": "2"}))]);
        let cursor = Cursor::new(documents.boxed());
        assert_eq!(cursor.reported_count(), None);
        assert_eq!(cursor.total().await.unwrap(), 2);
    }

    #[test]
    fn test_release_runs_once_on_early_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let cursor = Cursor::from_documents(vec![json!({"_key": "a"})])
            .on_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        cursor.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_errors_surface() {
        let documents = stream::iter(vec![Err(crate::StoreError::connection("lost"))]);
        let mut cursor = Cursor::new(documents.boxed());
        let result = tokio_test::block_on(cursor.next_document());
        assert!(result.is_err());
    }
}
