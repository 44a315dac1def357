use std::time::Duration;

use bytes::Bytes;
use file_share::object_store::{
    LinkSigner, LocalStore, ObjectStore, ObjectStoreError, ResponseOverrides,
};

fn local_store(dir: &tempfile::TempDir) -> LocalStore {
    let signer = LinkSigner::new(b"secret", "http://files.test");
    LocalStore::new(dir.path(), signer).unwrap()
}

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let data = Bytes::from("hello world");
    store.put("test-key", data.clone(), "text/plain").await.unwrap();

    let retrieved = store.get("test-key").await.unwrap();
    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn test_local_store_exists() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    assert!(!store.exists("missing").await.unwrap());

    store
        .put("present", Bytes::from("data"), "text/plain")
        .await
        .unwrap();
    assert!(store.exists("present").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    store
        .put("to-delete", Bytes::from("data"), "text/plain")
        .await
        .unwrap();
    assert!(store.exists("to-delete").await.unwrap());

    store.delete("to-delete").await.unwrap();
    assert!(!store.exists("to-delete").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    // Deleting a nonexistent key should not error, twice over
    store.delete("nonexistent").await.unwrap();
    store.delete("nonexistent").await.unwrap();
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    store
        .put("key", Bytes::from("first"), "text/plain")
        .await
        .unwrap();
    store
        .put("key", Bytes::from("second"), "text/plain")
        .await
        .unwrap();

    let data = store.get("key").await.unwrap();
    assert_eq!(data, Bytes::from("second"));
}

#[tokio::test]
async fn test_local_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    for key in ["", "../etc/passwd", "a/b", "..", ".hidden", "a\\b"] {
        let result = store.put(key, Bytes::from("x"), "text/plain").await;
        assert!(
            matches!(result, Err(ObjectStoreError::InvalidKey(_))),
            "key {key:?} was accepted"
        );
    }
}

#[tokio::test]
async fn test_local_presigned_link_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let signer = LinkSigner::new(b"secret", "http://files.test/");
    let store = LocalStore::new(dir.path(), signer.clone()).unwrap();

    let url = store
        .presigned_get("20261017-abcd.txt", Duration::from_secs(60), None)
        .await
        .unwrap();
    let rest = url
        .strip_prefix("http://files.test/blobs/20261017-abcd.txt?expires=")
        .expect("link shape");
    let (expires, signature) = rest.split_once("&signature=").unwrap();

    let expires: i64 = expires.parse().unwrap();
    assert!(signer
        .verify("20261017-abcd.txt", expires, None, signature)
        .is_ok());
    assert!(signer.verify("other.txt", expires, None, signature).is_err());
}

#[tokio::test]
async fn test_local_presigned_link_with_download_headers() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);
    let headers = ResponseOverrides::attachment("application/pdf", "Q3 report.pdf");

    let url = store
        .presigned_get("k.pdf", Duration::from_secs(60), Some(&headers))
        .await
        .unwrap();
    assert!(url.contains("&response-content-type=application%2Fpdf"));
    assert!(url.contains("&response-content-disposition=attachment%3B%20filename%3D"));
}

#[test]
fn test_local_store_removes_stale_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".abandoned.txt.part"), b"half").unwrap();
    std::fs::write(dir.path().join("kept.txt"), b"whole").unwrap();

    let _store = local_store(&dir);
    assert!(!dir.path().join(".abandoned.txt.part").exists());
    assert!(dir.path().join("kept.txt").exists());
}
