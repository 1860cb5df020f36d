//! # Authentication Client
//!
//! Orchestrates the lifecycle of the current session.
//!
//! ## Overview
//!
//! [`AuthenticationClientImpl`] owns at most one [`AuthenticationData`] at a
//! time. It obtains sessions from an [`OAuthCaller`] (interactive login) or a
//! [`Persistence`] (restore on launch), keeps them durable by persisting on
//! every change the session reports, and decorates outgoing requests with a
//! fresh access token.
//!
//! ## State
//!
//! | Configuration | Session authorized | [`AuthenticationState`] |
//! |---------------|--------------------|-------------------------|
//! | absent        | any                | `NotAvailable`          |
//! | present       | no session / false | `NotAuthenticated`      |
//! | present       | true               | `Authenticated`         |
//!
//! The state is recomputed on every read.
//!
//! ## Persistence failures
//!
//! Failing to clear, persist or retrieve the stored session never fails an
//! operation. It is logged and the in-memory session stays usable.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthenticationClient, AuthenticationClientImpl, OidcCaller};
//! # use core_auth::Persistence;
//! # use bridge_traits::http::{HttpClient, HttpRequest};
//! # use bridge_traits::AuthorizationPresenter;
//! # use std::sync::Arc;
//! # async fn run(
//! #     http_client: Arc<dyn HttpClient>,
//! #     persistence: Arc<dyn Persistence>,
//! #     presenter: &dyn AuthorizationPresenter,
//! # ) -> core_auth::Result<()> {
//! let configuration = core_runtime::OAuthAppConfiguration::from_env().ok().flatten();
//! let client = AuthenticationClientImpl::new(
//!     configuration,
//!     Arc::new(OidcCaller::new(http_client)),
//!     persistence,
//! );
//!
//! if !client.restore_state().await? {
//!     client.login(presenter).await?;
//! }
//! let request = client
//!     .authenticate(HttpRequest::post("https://api.example/bookmarks"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::oauth::OAuthCaller;
use crate::persistence::Persistence;
use crate::session::AuthenticationData;
use crate::types::AuthenticationState;
use async_trait::async_trait;
use bridge_traits::authorization::AuthorizationPresenter;
use bridge_traits::http::HttpRequest;
use core_runtime::config::OAuthAppConfiguration;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Header carrying the fresh access token.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Header carrying the configured OAuth client id.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

#[async_trait]
pub trait AuthenticationClient: Send + Sync {
    async fn authentication_state(&self) -> AuthenticationState;

    /// Runs an interactive login and makes the result the current session.
    ///
    /// `presenter` is the UI context the authorization page is shown in.
    async fn login(&self, presenter: &dyn AuthorizationPresenter) -> Result<()>;

    /// Restores the persisted session, if any. Returns whether the restored
    /// session is authorized.
    async fn restore_state(&self) -> Result<bool>;

    /// Adds [`AUTH_TOKEN_HEADER`] and [`CLIENT_ID_HEADER`] to `request`.
    async fn authenticate(&self, request: HttpRequest) -> Result<HttpRequest>;
}

/// The current session and the task persisting its changes. They are only
/// ever replaced together.
struct ActiveSession {
    session: Arc<dyn AuthenticationData>,
    persist_task: JoinHandle<()>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.persist_task.abort();
    }
}

pub struct AuthenticationClientImpl {
    configuration: Option<OAuthAppConfiguration>,
    caller: Arc<dyn OAuthCaller>,
    persistence: Arc<dyn Persistence>,
    active: RwLock<Option<ActiveSession>>,
}

impl AuthenticationClientImpl {
    /// `configuration` of `None` puts the client in its unavailable mode for
    /// its whole lifetime.
    pub fn new(
        configuration: Option<OAuthAppConfiguration>,
        caller: Arc<dyn OAuthCaller>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        if configuration.is_none() {
            info!("No OAuth configuration supplied, authentication is unavailable");
        }

        Self {
            configuration,
            caller,
            persistence,
            active: RwLock::new(None),
        }
    }

    pub fn configuration(&self) -> Option<&OAuthAppConfiguration> {
        self.configuration.as_ref()
    }

    fn require_configuration(&self) -> Result<&OAuthAppConfiguration> {
        self.configuration
            .as_ref()
            .ok_or(AuthError::ConfigurationMissing)
    }

    async fn current_session(&self) -> Option<Arc<dyn AuthenticationData>> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.session))
    }

    /// Makes `session` current and persists it whenever it reports a change.
    ///
    /// `changes` must have been taken from `session`. Taking it before the
    /// session is first used keeps changes made in between.
    async fn adopt(
        &self,
        session: Arc<dyn AuthenticationData>,
        changes: broadcast::Receiver<()>,
    ) {
        let mut active = self.active.write().await;
        let persist_task = spawn_persist_on_change(
            Arc::downgrade(&session),
            changes,
            Arc::clone(&self.persistence),
        );
        // Dropping the previous session aborts its task.
        *active = Some(ActiveSession {
            session,
            persist_task,
        });
    }
}

fn spawn_persist_on_change(
    session: std::sync::Weak<dyn AuthenticationData>,
    mut changes: broadcast::Receiver<()>,
    persistence: Arc<dyn Persistence>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(()) => {}
                // Any number of missed changes still means one persist of the latest state.
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Coalesced session change notifications");
                }
                Err(RecvError::Closed) => break,
            }

            let Some(session) = session.upgrade() else {
                break;
            };
            match persistence.persist(session.as_ref()).await {
                Ok(()) => debug!("Persisted session after change"),
                Err(e) => warn!(error = %e, "Failed to persist session after change"),
            }
        }
    })
}

#[async_trait]
impl AuthenticationClient for AuthenticationClientImpl {
    async fn authentication_state(&self) -> AuthenticationState {
        if self.configuration.is_none() {
            return AuthenticationState::NotAvailable;
        }

        match self.current_session().await {
            Some(session) if session.is_authorized() => AuthenticationState::Authenticated,
            _ => AuthenticationState::NotAuthenticated,
        }
    }

    #[instrument(skip(self, presenter))]
    async fn login(&self, presenter: &dyn AuthorizationPresenter) -> Result<()> {
        if let Err(e) = self.persistence.clear().await {
            warn!(error = %e, "Failed to clear persisted session before login");
        }

        let configuration = self.require_configuration()?;

        let session = self.caller.login(configuration, presenter).await?;
        let changes = session.changes();
        self.adopt(Arc::clone(&session), changes).await;

        if let Err(e) = self.persistence.persist(session.as_ref()).await {
            warn!(error = %e, "Failed to persist session after login");
        }

        info!(authorized = session.is_authorized(), "Login completed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restore_state(&self) -> Result<bool> {
        self.require_configuration()?;

        let session = match self.persistence.retrieve().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!("No persisted session to restore");
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "Failed to retrieve persisted session");
                return Ok(false);
            }
        };

        let changes = session.changes();

        if let Err(e) = session.get_fresh_tokens().await {
            warn!(error = %e, "Token refresh failed while restoring session");
        }

        let authorized = session.is_authorized();
        self.adopt(session, changes).await;

        info!(authorized, "Restored persisted session");
        Ok(authorized)
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn authenticate(&self, request: HttpRequest) -> Result<HttpRequest> {
        let configuration = self.require_configuration()?;

        let session = match self.current_session().await {
            Some(session) if session.is_authorized() => session,
            _ => return Err(AuthError::NotAuthenticated),
        };

        let token = session.get_fresh_tokens().await?;

        Ok(request
            .header(AUTH_TOKEN_HEADER, token)
            .header(CLIENT_ID_HEADER, configuration.client_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSession {
        authorized: bool,
        changes: broadcast::Sender<()>,
    }

    impl StaticSession {
        fn new(authorized: bool) -> Arc<Self> {
            Arc::new(Self {
                authorized,
                changes: broadcast::channel(4).0,
            })
        }
    }

    #[async_trait]
    impl AuthenticationData for StaticSession {
        fn is_authorized(&self) -> bool {
            self.authorized
        }

        async fn get_fresh_tokens(&self) -> Result<String> {
            Ok("token".to_string())
        }

        fn changes(&self) -> broadcast::Receiver<()> {
            self.changes.subscribe()
        }

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(vec![u8::from(self.authorized)])
        }
    }

    #[derive(Default)]
    struct CountingPersistence {
        persists: AtomicUsize,
    }

    #[async_trait]
    impl Persistence for CountingPersistence {
        async fn persist(&self, _session: &dyn AuthenticationData) -> Result<()> {
            self.persists.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn retrieve(&self) -> Result<Option<Arc<dyn AuthenticationData>>> {
            Ok(None)
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    struct UnreachableCaller;

    #[async_trait]
    impl OAuthCaller for UnreachableCaller {
        async fn login(
            &self,
            _configuration: &OAuthAppConfiguration,
            _presenter: &dyn AuthorizationPresenter,
        ) -> Result<Arc<dyn AuthenticationData>> {
            Err(AuthError::OAuthDiscoveryFailed("unreachable".to_string()))
        }
    }

    /// Lets spawned and aborted tasks run on the test runtime.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn client(persistence: Arc<CountingPersistence>) -> AuthenticationClientImpl {
        let configuration =
            OAuthAppConfiguration::new("https://idp.example", "abc", "app://cb").unwrap();
        AuthenticationClientImpl::new(
            Some(configuration),
            Arc::new(UnreachableCaller),
            persistence,
        )
    }

    #[tokio::test]
    async fn test_state_follows_current_session() {
        let client = client(Arc::new(CountingPersistence::default()));
        assert_eq!(
            client.authentication_state().await,
            AuthenticationState::NotAuthenticated
        );

        let session = StaticSession::new(true);
        client.adopt(session.clone(), session.changes()).await;
        assert_eq!(
            client.authentication_state().await,
            AuthenticationState::Authenticated
        );

        let session = StaticSession::new(false);
        client.adopt(session.clone(), session.changes()).await;
        assert_eq!(
            client.authentication_state().await,
            AuthenticationState::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_replaced_session_is_no_longer_persisted() {
        let persistence = Arc::new(CountingPersistence::default());
        let client = client(persistence.clone());

        let first = StaticSession::new(true);
        client.adopt(first.clone(), first.changes()).await;
        let second = StaticSession::new(true);
        client.adopt(second.clone(), second.changes()).await;
        settle().await;

        // Nothing listens to the first session any more.
        assert_eq!(first.changes.receiver_count(), 0);
        assert_eq!(second.changes.receiver_count(), 1);
        assert_eq!(persistence.persists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adopts_leave_current_session_subscribed() {
        let client = Arc::new(client(Arc::new(CountingPersistence::default())));
        let sessions: Vec<_> = (0..32).map(|_| StaticSession::new(true)).collect();
        let start = Arc::new(tokio::sync::Barrier::new(2));

        let adopters: Vec<_> = sessions
            .chunks(16)
            .map(|chunk| {
                let client = Arc::clone(&client);
                let start = Arc::clone(&start);
                let chunk = chunk.to_vec();
                tokio::spawn(async move {
                    start.wait().await;
                    for session in chunk {
                        let changes = session.changes();
                        client.adopt(session, changes).await;
                    }
                })
            })
            .collect();
        for adopter in adopters {
            adopter.await.unwrap();
        }

        let current = client.current_session().await.unwrap();
        let current = Arc::as_ptr(&current) as *const ();

        // Aborted tasks drop their receivers on whichever worker ran them.
        let mut listening = Vec::new();
        for _ in 0..100 {
            listening = sessions
                .iter()
                .filter(|session| session.changes.receiver_count() > 0)
                .collect();
            if listening.len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(listening.len(), 1);
        assert_eq!(Arc::as_ptr(listening[0]) as *const (), current);
    }

    #[tokio::test]
    async fn test_drop_aborts_subscription() {
        let client = client(Arc::new(CountingPersistence::default()));
        let session = StaticSession::new(true);
        client.adopt(session.clone(), session.changes()).await;
        assert_eq!(session.changes.receiver_count(), 1);

        drop(client);
        settle().await;
        assert_eq!(session.changes.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_previous_session() {
        let client = client(Arc::new(CountingPersistence::default()));
        let session = StaticSession::new(true);
        client.adopt(session.clone(), session.changes()).await;

        struct NoPresenter;

        #[async_trait]
        impl AuthorizationPresenter for NoPresenter {
            async fn present(
                &self,
                _request: bridge_traits::authorization::AuthorizationRequest,
            ) -> bridge_traits::error::Result<String> {
                Err(bridge_traits::error::BridgeError::Cancelled)
            }
        }

        let result = client.login(&NoPresenter).await;
        assert!(matches!(result, Err(AuthError::OAuthDiscoveryFailed(_))));
        assert_eq!(
            client.authentication_state().await,
            AuthenticationState::Authenticated
        );
    }
}
