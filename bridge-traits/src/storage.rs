//! Key-value settings storage.
//!
//! Backs persisted per-track resume positions:
//! - Web: localStorage
//! - iOS: UserDefaults
//! - Android: SharedPreferences / DataStore
//! - Desktop: config file

use crate::{error::Result, platform::PlatformSendSync};

/// Key-value settings storage trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_position(store: &dyn SettingsStore, track: &str, secs: f64) -> Result<()> {
///     store.set_f64(&format!("resume:{track}"), secs).await
/// }
/// ```
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait SettingsStore: PlatformSendSync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Store a floating-point value
    async fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.set_string(key, &value.to_string()).await
    }

    /// Retrieve a floating-point value; unparsable entries read as absent.
    async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self
            .get_string(key)
            .await?
            .and_then(|raw| raw.trim().parse::<f64>().ok()))
    }

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl SettingsStore for MemoryStore {
        async fn set_string(&self, key: &str, value: &str) -> Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> Result<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn f64_values_round_through_strings() {
        let store = MemoryStore::default();
        store.set_f64("resume:t1", 42.5).await.unwrap();

        assert_eq!(store.get_f64("resume:t1").await.unwrap(), Some(42.5));
        assert!(store.has_key("resume:t1").await.unwrap());

        store.delete("resume:t1").await.unwrap();
        assert_eq!(store.get_f64("resume:t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_f64_reads_as_absent() {
        let store = MemoryStore::default();
        store.set_string("resume:t2", "not-a-number").await.unwrap();
        assert_eq!(store.get_f64("resume:t2").await.unwrap(), None);
    }
}
