use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::SessionError;
use crate::llm::LlmProvider;
use crate::moderation::ModerationClient;
use crate::session::SessionHandle;
use crate::types::{GameConfig, Player, SessionCode};

/// Uppercase-alphabetic session codes
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const CODE_LENGTH: usize = 5;

fn generate_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Keyed store mapping a session code to its handle. Insert and lookup only;
/// all session mutation goes through the handle itself.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionCode, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(code).cloned()
    }

    async fn insert(&self, code: SessionCode, handle: SessionHandle) {
        self.sessions.write().await.insert(code, handle);
    }

    /// Generate a code not currently in use (collision retry, rare with 26^5 combinations)
    async fn unused_code(&self) -> SessionCode {
        loop {
            let code = generate_code();
            if !self.sessions.read().await.contains_key(&code) {
                return code;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state: the registry plus the backends every session uses
pub struct AppState {
    pub sessions: SessionRegistry,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub moderation: Arc<ModerationClient>,
    pub config: GameConfig,
}

impl AppState {
    pub fn new(
        llm: Option<Arc<dyn LlmProvider>>,
        moderation: Arc<ModerationClient>,
        config: GameConfig,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            llm,
            moderation,
            config,
        }
    }

    /// Create a new session with the caller as host
    pub async fn create_session(
        &self,
        host_alias: &str,
    ) -> Result<(SessionHandle, Player), SessionError> {
        let code = self.sessions.unused_code().await;
        let (handle, host) = SessionHandle::new(
            code.clone(),
            host_alias,
            self.config.clone(),
            self.llm.clone(),
            self.moderation.clone(),
        )?;
        self.sessions.insert(code.clone(), handle.clone()).await;
        tracing::info!("Created session {} hosted by {}", code, host.alias);
        Ok((handle, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_create_and_fetch_session() {
        let state = AppState::new(
            None,
            Arc::new(ModerationClient::disabled()),
            GameConfig::default(),
        );

        let (handle, host) = state.create_session("ada").await.unwrap();
        assert_eq!(handle.code.len(), CODE_LENGTH);
        assert_eq!(host.alias, "ada");

        let fetched = state.sessions.get(&handle.code).await;
        assert!(fetched.is_some());
        assert!(state.sessions.get("ZZZZZ").await.is_none() || handle.code == "ZZZZZ");
    }
}
