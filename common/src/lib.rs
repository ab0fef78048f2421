

pub mod samples;

/// Convenience helper for passing the last of a value between threads. For example from a thread
/// fetching sensor data from the cloud API to the UI thread rendering it.
#[derive(Clone, Default)]
pub struct ValueStore<T>(std::sync::Arc<std::sync::Mutex<Option<T>>>);

impl<T: Clone> ValueStore<T> {
    /// Sets `value` as the last value.
    ///
    /// # Panics
    ///
    /// If the locking the interally used mutex fails.
    pub fn set(&self, value: T) {
        let mut data = self.0.lock().unwrap();
        let _ = data.insert(value);
    }

    /// Gets the stored value.
    ///
    /// # Panics
    ///
    /// If the locking of the mutex fails
    pub fn get(&self) -> Option<T> {
        let mut data = self.0.lock().unwrap();
        data.take()
    }
}

#[test]
fn test_value_store_keeps_the_last_value() {
    let store = ValueStore::default();
    store.set(1);
    store.set(2);
    assert_eq!(store.get(), Some(2));
    assert_eq!(store.get(), None);
}
