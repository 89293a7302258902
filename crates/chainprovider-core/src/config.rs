//! Provider configuration.

use crate::auth::AccountPolicy;

/// Configuration for [`Provider`](crate::Provider).
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Accounts the user authorized in an earlier session. When non-empty,
    /// `enable` resolves without asking again.
    pub authorized_accounts: Vec<String>,
    /// Methods that need an authorized account.
    pub account_policy: AccountPolicy,
    /// Also fail in-flight plain requests when the connection closes. Off by
    /// default: only subscriptions are failed, other requests stay pending.
    pub fail_pending_on_close: bool,
}

impl ProviderConfig {
    pub fn with_accounts(mut self, accounts: Vec<String>) -> Self {
        self.authorized_accounts = accounts;
        self
    }

    pub fn with_policy(mut self, policy: AccountPolicy) -> Self {
        self.account_policy = policy;
        self
    }

    pub fn fail_pending_on_close(mut self, enabled: bool) -> Self {
        self.fail_pending_on_close = enabled;
        self
    }
}
