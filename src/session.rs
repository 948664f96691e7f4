//! Session token persistence.
//!
//! The backend issues the token at sign-in; this module only stores it under
//! `"userToken"` and hands it back wrapped in a [`SecretString`].

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use crate::storage::{KeyValueStore, PersistenceError, USER_TOKEN_KEY};

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored token. A blank value counts as signed out.
    pub async fn token(&self) -> Result<Option<SecretString>, PersistenceError> {
        let token = self.store.get(USER_TOKEN_KEY).await?;
        Ok(token
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from))
    }

    /// Whether a token is stored. Storage errors count as signed out.
    pub async fn is_signed_in(&self) -> bool {
        match self.token().await {
            Ok(token) => token.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session token");
                false
            }
        }
    }

    pub async fn store_token(&self, token: &SecretString) -> Result<(), PersistenceError> {
        self.store
            .set(USER_TOKEN_KEY, token.expose_secret().trim())
            .await?;
        tracing::info!("Session token stored");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), PersistenceError> {
        self.store.remove(USER_TOKEN_KEY).await?;
        tracing::info!("Session token cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    #[tokio::test]
    async fn test_store_read_clear() {
        let session = SessionStore::new(Arc::new(MemoryKeyValueStore::new()));
        assert!(!session.is_signed_in().await);

        session
            .store_token(&SecretString::from("  tok-123 \n"))
            .await
            .unwrap();
        let token = session.token().await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "tok-123");
        assert!(session.is_signed_in().await);

        session.clear().await.unwrap();
        assert!(session.token().await.unwrap().is_none());
        // clearing twice is fine
        session.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_token_is_signed_out() {
        let store = Arc::new(MemoryKeyValueStore::new());
        store.set(USER_TOKEN_KEY, "   ").await.unwrap();
        let session = SessionStore::new(store);
        assert!(!session.is_signed_in().await);
    }
}
