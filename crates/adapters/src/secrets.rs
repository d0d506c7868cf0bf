// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret decryption and the canonical provider → env-name mapping.
//!
//! Secrets are ciphertext everywhere except the dispatch path, where the
//! wired [`SecretCipher`] opens them into the outbound env map. The cipher
//! itself is deployment infrastructure (KMS, age, sealed files); the kernel
//! only depends on this seam.

use gf_core::SecretRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("decryption failed for provider {provider}: {reason}")]
    Decrypt { provider: String, reason: String },
}

/// Opens repository secrets on the dispatch path.
pub trait SecretCipher: Send + Sync + 'static {
    fn open(&self, secret: &SecretRecord) -> Result<String, SecretError>;
}

/// Cipher for deployments that store secrets unencrypted (dev, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl SecretCipher for PassthroughCipher {
    fn open(&self, secret: &SecretRecord) -> Result<String, SecretError> {
        Ok(secret.encrypted_value.clone())
    }
}

/// Canonical env names a provider's secret is injected under.
///
/// Known providers map to their harness conventions; anything else falls
/// back to `SECRET_<UPPER_SNAKE>` of the provider name.
pub fn provider_env_names(provider: &str) -> Vec<String> {
    match provider {
        "github" => vec!["GH_TOKEN".to_string(), "GITHUB_TOKEN".to_string()],
        "codex" => vec!["CODEX_API_KEY".to_string()],
        "opencode" => vec!["OPENCODE_API_KEY".to_string()],
        "claude-code" => vec!["ANTHROPIC_API_KEY".to_string()],
        "zai" => vec!["Z_AI_API_KEY".to_string()],
        other => vec![format!("SECRET_{}", upper_snake(other))],
    }
}

/// `some-provider.name` → `SOME_PROVIDER_NAME`.
pub fn upper_snake(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
