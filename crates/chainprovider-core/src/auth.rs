//! Authorization gate.
//!
//! Tracks which accounts the user has exposed to the dapp and rejects
//! account-requiring calls until at least one account is authorized.

use std::collections::HashSet;

use async_trait::async_trait;

/// Decision returned by the consent UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// The user exposed these accounts, in authorization order.
    Approved(Vec<String>),
    /// The user refused to enable the provider.
    Denied,
    /// The user refused to create an account.
    AccountCreationDenied,
}

/// The consent UI collaborator.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn request_consent(&self) -> ConsentDecision;
}

/// Authorizer that refuses every request. Used when the embedding has no
/// consent UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl Authorizer for DenyAll {
    async fn request_consent(&self) -> ConsentDecision {
        ConsentDecision::Denied
    }
}

const DEFAULT_GATED_METHODS: &[&str] = &[
    "eth_accounts",
    "eth_coinbase",
    "eth_sendTransaction",
    "eth_signTransaction",
    "eth_sign",
    "personal_sign",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
];

/// Which methods need an authorized account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPolicy {
    gated: HashSet<String>,
}

impl AccountPolicy {
    /// A policy gating exactly `methods`.
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gated: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that gates nothing.
    pub fn open() -> Self {
        Self {
            gated: HashSet::new(),
        }
    }

    pub fn requires_account(&self, method: &str) -> bool {
        self.gated.contains(method)
    }
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_GATED_METHODS.iter().copied())
    }
}

/// Enabled flag plus the ordered list of authorized accounts.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationGate {
    enabled: bool,
    accounts: Vec<String>,
    policy: AccountPolicy,
}

impl AuthorizationGate {
    /// Start with remembered `accounts`; a non-empty list counts as enabled.
    pub fn new(policy: AccountPolicy, accounts: Vec<String>) -> Self {
        Self {
            enabled: !accounts.is_empty(),
            accounts,
            policy,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    /// `true` when `enable` can resolve without asking the user.
    pub fn is_remembered(&self) -> bool {
        self.enabled && !self.accounts.is_empty()
    }

    /// Whether a call to `method` may go out right now.
    pub fn is_authorized(&self, method: &str) -> bool {
        !self.policy.requires_account(method) || !self.accounts.is_empty()
    }

    /// Record an approval. Returns the new list if it differs from the old one.
    pub fn approve(&mut self, accounts: Vec<String>) -> Option<Vec<String>> {
        self.enabled = true;
        self.replace(accounts)
    }

    /// Record an externally observed account change. An empty list disables
    /// the gate. Returns the new list if it differs from the old one.
    pub fn set_accounts(&mut self, accounts: Vec<String>) -> Option<Vec<String>> {
        self.enabled = !accounts.is_empty();
        self.replace(accounts)
    }

    fn replace(&mut self, accounts: Vec<String>) -> Option<Vec<String>> {
        if self.accounts == accounts {
            return None;
        }
        tracing::info!(count = accounts.len(), "authorized accounts changed");
        self.accounts = accounts;
        Some(self.accounts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gated_methods_need_an_account() {
        let gate = AuthorizationGate::default();
        assert!(!gate.is_authorized("eth_sendTransaction"));
        assert!(gate.is_authorized("net_version"));
        assert!(!gate.is_remembered());
    }

    #[test]
    fn remembered_accounts_enable_the_gate() {
        let gate = AuthorizationGate::new(AccountPolicy::default(), vec!["0xabc".into()]);
        assert!(gate.is_remembered());
        assert!(gate.is_authorized("eth_sendTransaction"));
    }

    #[test]
    fn approve_reports_only_changes() {
        let mut gate = AuthorizationGate::default();
        assert_eq!(gate.approve(vec!["0xa".into()]), Some(vec!["0xa".to_string()]));
        assert!(gate.is_enabled());
        assert_eq!(gate.approve(vec!["0xa".into()]), None);
        assert_eq!(
            gate.approve(vec!["0xb".into(), "0xa".into()]),
            Some(vec!["0xb".to_string(), "0xa".to_string()])
        );
    }

    #[test]
    fn clearing_accounts_disables() {
        let mut gate = AuthorizationGate::new(AccountPolicy::default(), vec!["0xa".into()]);
        assert_eq!(gate.set_accounts(vec![]), Some(vec![]));
        assert!(!gate.is_enabled());
        assert!(!gate.is_authorized("eth_sign"));
    }

    #[test]
    fn custom_policy() {
        let gate = AuthorizationGate::new(AccountPolicy::new(["eth_call"]), vec![]);
        assert!(!gate.is_authorized("eth_call"));
        assert!(gate.is_authorized("eth_sendTransaction"));
        assert!(AuthorizationGate::new(AccountPolicy::open(), vec![]).is_authorized("eth_sign"));
    }
}
