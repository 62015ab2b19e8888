//! Vault configuration.

/// One year in milliseconds.
pub const DEFAULT_KEY_LIFETIME_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Configuration for the Vault.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Verify identifier and signature of every envelope loaded from the
    /// store.
    pub verify_on_read: bool,
    /// Lifetime of generated keys; sets `PublicKey.expires_at`.
    pub key_lifetime_ms: i64,
    /// Refuse to sign with, or wrap secrets for, keys past `expires_at`.
    pub reject_expired_keys: bool,
    /// Evaluate attached policies before credential operations.
    pub enforce_policies: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            verify_on_read: true,
            key_lifetime_ms: DEFAULT_KEY_LIFETIME_MS,
            reject_expired_keys: true,
            enforce_policies: false,
        }
    }
}
