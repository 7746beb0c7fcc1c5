use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use hoard_blob::{
    backend::MemoryBackend, metadata::MemoryMetadataStore, BlobConfig, BlobError, ChunkAssembler, ChunkedInit,
    FileType, RetryPolicy, StorageAdapter, StorageKey,
};

/// Test factory functions
fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(3)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
}

fn create_adapter(backend: MemoryBackend) -> (StorageAdapter, MemoryMetadataStore) {
    let meta = MemoryMetadataStore::new();
    let config = BlobConfig::default()
        .with_max_chunks(10)
        .with_max_file_bytes(1024)
        .with_retry(fast_retry());
    let adapter = StorageAdapter::new(Arc::new(meta.clone()), Arc::new(backend), config);
    (adapter, meta)
}

fn init_request(total_chunks: u32, file_size: u64) -> ChunkedInit {
    ChunkedInit {
        file_type: FileType::Audio,
        file_name: "song.flac".to_string(),
        file_size,
        total_chunks,
    }
}

async fn read_all(adapter: &StorageAdapter, key: &StorageKey, range: Option<&str>) -> (u16, Option<String>, Bytes) {
    let read = adapter.get(key, range).await.unwrap();
    let status = read.status;
    let content_range = read.content_range.clone();
    let body = ChunkAssembler::collect(read.stream).await.unwrap();
    (status, content_range, body)
}

const PARTS: [&[u8]; 3] = [b"ABCDE", b"FGHIJ", b"KLMNOP"];

/// C1. Out-of-order chunks assemble in index order
#[tokio::test]
async fn test_out_of_order_chunks_assemble_in_index_order() {
    let (adapter, _) = create_adapter(MemoryBackend::new());
    let key = adapter.init_chunked(init_request(3, 16)).await.unwrap();
    assert!(key.is_chunked());

    // Arrange: arrival order 2, 0, 1
    for index in [2u32, 0, 1] {
        let ack = adapter
            .upload_chunk(&key, index, Bytes::from_static(PARTS[index as usize]))
            .await
            .unwrap();
        assert!(!ack.duplicate);
    }
    adapter.drain().await;

    // Act
    let (status, content_range, body) = read_all(&adapter, &key, None).await;

    // Assert
    assert_eq!(status, 200);
    assert!(content_range.is_none());
    assert_eq!(&body[..], b"ABCDEFGHIJKLMNOP");
}

/// C2. A range straddling chunk boundaries returns exactly the window
#[tokio::test]
async fn test_range_across_chunk_boundary() {
    let (adapter, _) = create_adapter(MemoryBackend::new().without_range());
    let key = adapter.init_chunked(init_request(3, 16)).await.unwrap();
    for index in [2u32, 0, 1] {
        adapter
            .upload_chunk(&key, index, Bytes::from_static(PARTS[index as usize]))
            .await
            .unwrap();
    }
    adapter.drain().await;

    let (status, content_range, body) = read_all(&adapter, &key, Some("bytes=4-9")).await;

    assert_eq!(status, 206);
    assert_eq!(content_range.as_deref(), Some("bytes 4-9/16"));
    assert_eq!(&body[..], b"EFGHIJ");
}

/// C3. Re-submitting a persisted chunk records one descriptor
#[tokio::test]
async fn test_duplicate_chunk_is_idempotent() {
    let backend = MemoryBackend::new();
    let (adapter, meta) = create_adapter(backend.clone());
    let key = adapter.init_chunked(init_request(2, 10)).await.unwrap();

    adapter.upload_chunk(&key, 0, Bytes::from_static(b"01234")).await.unwrap();
    adapter.drain().await;

    // Act: the same index again
    let ack = adapter.upload_chunk(&key, 0, Bytes::from_static(b"01234")).await.unwrap();

    // Assert: existing descriptor returned, nothing staged or pushed
    assert!(ack.duplicate);
    assert_eq!(ack.descriptor.as_ref().map(|d| d.idx), Some(0));
    assert!(meta.keys_with_prefix("staging:").is_empty());
    assert_eq!(backend.put_count(), 1);

    let progress = adapter.progress(&key).await.unwrap();
    assert_eq!(progress.uploaded_indices, vec![0]);
    assert_eq!(progress.uploaded, 1);
    assert!(!progress.complete);

    let view = adapter.get_metadata(&key).await.unwrap();
    assert_eq!(view.value.as_array().map(|a| a.len()), Some(1));
}

/// C4. Concurrent duplicate submissions never double count
#[tokio::test]
async fn test_concurrent_duplicates_record_once() {
    let backend = MemoryBackend::new().with_put_delay(Duration::from_millis(5));
    let (adapter, _) = create_adapter(backend.clone());
    let key = adapter.init_chunked(init_request(2, 10)).await.unwrap();

    // Both are staged before either persists
    adapter.upload_chunk(&key, 1, Bytes::from_static(b"56789")).await.unwrap();
    adapter.upload_chunk(&key, 1, Bytes::from_static(b"56789")).await.unwrap();
    adapter.upload_chunk(&key, 0, Bytes::from_static(b"01234")).await.unwrap();
    adapter.drain().await;

    let view = adapter.get_metadata(&key).await.unwrap();
    let descriptors = view.value.as_array().cloned().unwrap_or_default();
    assert_eq!(descriptors.len(), 2);

    let progress = adapter.progress(&key).await.unwrap();
    assert!(progress.complete);
    assert_eq!(progress.uploaded, 2);

    // A discarded duplicate push leaves no stray object behind
    assert_eq!(backend.object_count(), 2);
    let (_, _, body) = read_all(&adapter, &key, None).await;
    assert_eq!(&body[..], b"0123456789");
}

/// C5. Reads before completion are refused, never truncated
#[tokio::test]
async fn test_incomplete_upload_is_not_readable() {
    let (adapter, _) = create_adapter(MemoryBackend::new());
    let key = adapter.init_chunked(init_request(3, 16)).await.unwrap();
    adapter.upload_chunk(&key, 0, Bytes::from_static(PARTS[0])).await.unwrap();
    adapter.upload_chunk(&key, 2, Bytes::from_static(PARTS[2])).await.unwrap();
    adapter.drain().await;

    for range in [None, Some("bytes=0-3")] {
        let err = adapter.get(&key, range).await.unwrap_err();
        assert!(matches!(err, BlobError::IncompleteUpload { uploaded: 2, total: 3 }));
    }
}

/// C6. Limits are enforced before any store or backend I/O
#[tokio::test]
async fn test_init_preflight_rejects_without_io() {
    let backend = MemoryBackend::relay_like(8);
    let (adapter, meta) = create_adapter(backend.clone());

    let too_many = adapter.init_chunked(init_request(11, 100)).await.unwrap_err();
    assert!(matches!(too_many, BlobError::Invalid { .. }));

    let too_big = adapter.init_chunked(init_request(5, 2048)).await.unwrap_err();
    assert!(matches!(too_big, BlobError::SizeLimitExceeded { size: 2048, max: 1024 }));

    // 100 bytes in 10 chunks cannot fit 8-byte objects
    let chunks_too_big = adapter.init_chunked(init_request(10, 100)).await.unwrap_err();
    assert!(matches!(chunks_too_big, BlobError::SizeLimitExceeded { max: 8, .. }));

    let zero = adapter.init_chunked(init_request(0, 10)).await.unwrap_err();
    assert!(matches!(zero, BlobError::Invalid { .. }));

    assert_eq!(backend.call_count(), 0);
    assert_eq!(meta.write_count(), 0);
}

/// C7. A transient backend failure is retried transparently
#[tokio::test]
async fn test_transient_push_failure_is_retried() {
    let backend = MemoryBackend::new();
    let (adapter, _) = create_adapter(backend.clone());
    let key = adapter.init_chunked(init_request(1, 5)).await.unwrap();

    backend.fail_next_puts(2);
    adapter.upload_chunk(&key, 0, Bytes::from_static(b"hello")).await.unwrap();
    adapter.drain().await;

    assert_eq!(backend.put_count(), 3);
    assert!(adapter.progress(&key).await.unwrap().complete);
}

/// C8. Exhausted retries leave the index absent for the client to resend
#[tokio::test]
async fn test_exhausted_push_leaves_index_absent() {
    let backend = MemoryBackend::new();
    let (adapter, meta) = create_adapter(backend.clone());
    let key = adapter.init_chunked(init_request(2, 10)).await.unwrap();

    backend.set_fail_all_puts(true);
    let ack = adapter.upload_chunk(&key, 1, Bytes::from_static(b"56789")).await.unwrap();
    assert!(!ack.duplicate);
    adapter.drain().await;

    let progress = adapter.progress(&key).await.unwrap();
    assert!(progress.uploaded_indices.is_empty());
    assert!(meta.keys_with_prefix("staging:").is_empty());

    // Client notices and resends once the backend recovers
    backend.set_fail_all_puts(false);
    adapter.upload_chunk(&key, 1, Bytes::from_static(b"56789")).await.unwrap();
    adapter.drain().await;
    assert_eq!(adapter.progress(&key).await.unwrap().uploaded_indices, vec![1]);
}

/// C9. Chunk validation errors are synchronous
#[tokio::test]
async fn test_chunk_input_validation() {
    let (adapter, _) = create_adapter(MemoryBackend::relay_like(8));
    let key = adapter.init_chunked(init_request(2, 10)).await.unwrap();

    let out_of_range = adapter.upload_chunk(&key, 2, Bytes::from_static(b"x")).await.unwrap_err();
    assert!(matches!(out_of_range, BlobError::Invalid { .. }));

    let oversized = adapter.upload_chunk(&key, 0, Bytes::from_static(b"123456789")).await.unwrap_err();
    assert!(matches!(oversized, BlobError::SizeLimitExceeded { size: 9, max: 8 }));

    let unknown = StorageKey::parse("audio:chunk_missing.flac").unwrap();
    let missing = adapter.upload_chunk(&unknown, 0, Bytes::from_static(b"x")).await.unwrap_err();
    assert!(matches!(missing, BlobError::NotFound { .. }));

    let whole = StorageKey::parse("audio:plain.flac").unwrap();
    assert!(matches!(
        adapter.progress(&whole).await,
        Err(BlobError::NotFound { .. }) | Err(BlobError::Invalid { .. })
    ));
}

/// C10. Unfinished uploads expire on their own
#[tokio::test(start_paused = true)]
async fn test_abandoned_upload_expires() {
    let meta = MemoryMetadataStore::new();
    let config = BlobConfig::default()
        .with_init_ttl(Duration::from_secs(60))
        .with_retry(fast_retry());
    let adapter = StorageAdapter::new(Arc::new(meta.clone()), Arc::new(MemoryBackend::new()), config);

    let key = adapter.init_chunked(init_request(2, 10)).await.unwrap();
    adapter.upload_chunk(&key, 0, Bytes::from_static(b"01234")).await.unwrap();
    adapter.drain().await;
    assert!(adapter.progress(&key).await.is_ok());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(matches!(adapter.progress(&key).await, Err(BlobError::NotFound { .. })));
}

/// C11. Completed uploads drop their TTL
#[tokio::test(start_paused = true)]
async fn test_completed_upload_is_permanent() {
    let meta = MemoryMetadataStore::new();
    let config = BlobConfig::default()
        .with_init_ttl(Duration::from_secs(60))
        .with_retry(fast_retry());
    let adapter = StorageAdapter::new(Arc::new(meta.clone()), Arc::new(MemoryBackend::new()), config);

    let key = adapter.init_chunked(init_request(1, 5)).await.unwrap();
    adapter.upload_chunk(&key, 0, Bytes::from_static(b"01234")).await.unwrap();
    adapter.drain().await;

    tokio::time::advance(Duration::from_secs(3600)).await;
    let (status, _, body) = read_all(&adapter, &key, None).await;
    assert_eq!(status, 200);
    assert_eq!(&body[..], b"01234");
}

/// C12. A resend while the first push is still retrying is not cleared by it
#[tokio::test(start_paused = true)]
async fn test_resend_survives_failed_earlier_push() {
    let meta = MemoryMetadataStore::new();
    let backend = MemoryBackend::new().with_put_delay(Duration::from_millis(100));
    let config = BlobConfig::default()
        .with_max_background_tasks(1)
        .with_retry(fast_retry());
    let adapter = StorageAdapter::new(Arc::new(meta.clone()), Arc::new(backend.clone()), config);
    let key = adapter.init_chunked(init_request(1, 5)).await.unwrap();

    // Arrange: the first task burns every attempt
    backend.fail_next_puts(3);
    adapter.upload_chunk(&key, 0, Bytes::from_static(b"hello")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Act: the client resends while that task still holds the only slot
    let ack = adapter.upload_chunk(&key, 0, Bytes::from_static(b"hello")).await.unwrap();
    assert!(!ack.duplicate);
    adapter.drain().await;

    // Assert
    let progress = adapter.progress(&key).await.unwrap();
    assert!(progress.complete);
    assert_eq!(progress.uploaded_indices, vec![0]);
    assert_eq!(backend.put_count(), 4);
    assert_eq!(backend.object_count(), 1);
    assert!(meta.keys_with_prefix("staging:").is_empty());

    let (status, _, body) = read_all(&adapter, &key, None).await;
    assert_eq!(status, 200);
    assert_eq!(&body[..], b"hello");
}
