//! Authentication hook for the login handshake.
//!
//! Realmgate doesn't verify credentials itself. It defines the
//! [`Authenticator`] trait: one async method that takes the token from the
//! client's `Hello` frame and returns the [`AccountIdentity`] the session
//! is created with, or an error that ends the handshake.
//!
//! # Why a trait?
//!
//! The same server code then runs against a real account service in
//! production, a permissive authenticator in development and a scripted
//! one in tests.

use std::net::SocketAddr;

use realmgate_protocol::AccountId;

use crate::SessionError;

/// Who is on the other end of a session. Immutable once the session
/// exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub account: AccountId,
    /// GM level; feeds the permission provider.
    pub security_level: u8,
    pub locale: String,
    pub remote_addr: SocketAddr,
}

/// Validates a client's login token.
///
/// # Trait bounds
///
/// - `Send + Sync` → one authenticator is shared by every connection task.
/// - `'static` → it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use std::net::SocketAddr;
///
/// use realmgate_protocol::AccountId;
/// use realmgate_session::{AccountIdentity, Authenticator, SessionError};
///
/// /// Accepts any numeric token as the account id.
/// /// Only for development.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(
///         &self,
///         token: &str,
///         remote_addr: SocketAddr,
///     ) -> Result<AccountIdentity, SessionError> {
///         let id: u32 = token
///             .parse()
///             .map_err(|_| SessionError::AuthFailed("token must be a number".into()))?;
///         Ok(AccountIdentity {
///             account: AccountId(id),
///             security_level: 0,
///             locale: "enUS".into(),
///             remote_addr,
///         })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` sent from `remote_addr`.
    ///
    /// # Returns
    /// - `Ok(AccountIdentity)` → a session is created for this account
    /// - `Err(SessionError::AuthFailed)` → the connection is refused
    fn authenticate(
        &self,
        token: &str,
        remote_addr: SocketAddr,
    ) -> impl std::future::Future<Output = Result<AccountIdentity, SessionError>> + Send;
}
