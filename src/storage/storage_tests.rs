use super::*;

#[test]
fn memory_storage_set_get_remove() {
    let store = MemoryStorage::new();
    assert_eq!(store.get(keys::ACCESS_TOKEN), None);
    store.set(keys::ACCESS_TOKEN, "abc".into()).unwrap();
    assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("abc"));
    store.remove_all(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN]).unwrap();
    assert!(store.keys().is_empty());
}

#[test]
fn file_storage_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("client.json");
    {
        let store = FileStorage::open(&path).unwrap();
        store.set(keys::REFRESH_TOKEN, "r-1".into()).unwrap();
        store.set(&keys::permissions(7), r#"["riders.view"]"#.into()).unwrap();
        store.remove(keys::REFRESH_TOKEN).unwrap();
    }
    let reopened = FileStorage::open(&path).unwrap();
    assert_eq!(reopened.get(keys::REFRESH_TOKEN), None);
    assert_eq!(reopened.get("permissions:7").as_deref(), Some(r#"["riders.view"]"#));
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn corrupt_snapshot_starts_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("client.json");
    std::fs::write(&path, b"{not json").unwrap();
    let store = FileStorage::open(&path).unwrap();
    assert!(store.keys().is_empty());
    store.set(keys::USER_PROFILE, "{}".into()).unwrap();
    let reopened = FileStorage::open(&path).unwrap();
    assert_eq!(reopened.get(keys::USER_PROFILE).as_deref(), Some("{}"));
}

#[test]
fn failed_snapshot_write_keeps_memory_and_disk_in_step() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("client.json");
    let store = FileStorage::open(&path).unwrap();
    store.set(keys::ACCESS_TOKEN, "a".into()).unwrap();
    store.set(keys::REFRESH_TOKEN, "r".into()).unwrap();

    // a directory where the temp file goes makes every write fail
    let blocker = path.with_extension("json.tmp");
    std::fs::create_dir(&blocker).unwrap();
    assert!(store.remove_all(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN]).is_err());
    assert!(store.set(keys::USER_PROFILE, "{}".into()).is_err());
    assert_eq!(store.get(keys::ACCESS_TOKEN).as_deref(), Some("a"));
    assert_eq!(store.get(keys::USER_PROFILE), None);
    assert_eq!(FileStorage::open(&path).unwrap().get(keys::ACCESS_TOKEN).as_deref(), Some("a"));

    std::fs::remove_dir(&blocker).unwrap();
    store.remove_all(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN]).unwrap();
    let reopened = FileStorage::open(&path).unwrap();
    assert_eq!(reopened.get(keys::ACCESS_TOKEN), None);
    assert_eq!(reopened.get(keys::REFRESH_TOKEN), None);
}

/// Refuses to remove one key; records every removal attempt.
struct StickyKey {
    inner: MemoryStorage,
    sticky: &'static str,
    attempts: parking_lot::Mutex<Vec<String>>,
}

impl ClientStorage for StickyKey {
    fn get(&self, key: &str) -> Option<String> { self.inner.get(key) }
    fn set(&self, key: &str, value: String) -> anyhow::Result<()> { self.inner.set(key, value) }
    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.attempts.lock().push(key.to_string());
        if key == self.sticky {
            return Err(anyhow::anyhow!("cannot remove {}", key));
        }
        self.inner.remove(key)
    }
    fn keys(&self) -> Vec<String> { self.inner.keys() }
}

#[test]
fn remove_all_attempts_every_key() {
    let store = StickyKey { inner: MemoryStorage::new(), sticky: keys::ACCESS_TOKEN, attempts: parking_lot::Mutex::new(Vec::new()) };
    for k in [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::USER_PROFILE] {
        store.set(k, "x".into()).unwrap();
    }

    let err = store.remove_all(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::USER_PROFILE]).unwrap_err();
    assert!(err.to_string().contains(keys::ACCESS_TOKEN));
    assert_eq!(store.attempts.lock().len(), 3);
    assert_eq!(store.keys(), vec![keys::ACCESS_TOKEN.to_string()]);
}
