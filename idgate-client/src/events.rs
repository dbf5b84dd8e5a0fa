//! Authentication lifecycle events.

/// Broadcast whenever the session state changes.
///
/// Applications listen for [`AuthEvent::ReauthenticationRequired`] and
/// [`AuthEvent::LoggedOut`] to send the user back to the login screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A user logged in.
    LoggedIn {
        /// Username of the user.
        username: String,
    },
    /// The access token was refreshed.
    TokenRefreshed,
    /// The user logged out.
    LoggedOut,
    /// Tokens were cleared because they could not be refreshed.
    ReauthenticationRequired {
        /// Why the session ended.
        reason: String,
    },
}

/// Capacity of the event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 32;
