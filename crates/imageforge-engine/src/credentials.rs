use anyhow::{bail, Result};
use imageforge_contracts::generation::ProviderKeys;

pub const INSUFFICIENT_CREDITS_MESSAGE: &str =
    "Not enough credits to generate an image. Please purchase credits or use your own API keys.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Operator-held vendor secret; the caller pays in credits.
    Platform,
    /// Key supplied by the caller with the request.
    Caller,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Platform => "platform",
            CredentialSource::Caller => "caller",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub source: CredentialSource,
    pub api_key: String,
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("source", &self.source)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Credit gate, checked before any dispatch work.
///
/// Only a reported balance is checked; when none is supplied the platform
/// key is used without a gate.
pub fn ensure_credits(use_credits: bool, credits: Option<u64>, min_credits: u64) -> Result<()> {
    if !use_credits {
        return Ok(());
    }
    if let Some(balance) = credits {
        if balance < min_credits {
            bail!(INSUFFICIENT_CREDITS_MESSAGE);
        }
    }
    Ok(())
}

/// Picks exactly one key: the platform secret when spending credits,
/// otherwise the caller's own key. The other source is never consulted.
pub fn resolve_credential(
    provider: &str,
    use_credits: bool,
    platform: &ProviderKeys,
    caller: &ProviderKeys,
) -> Result<ResolvedCredential> {
    if use_credits {
        let Some(api_key) = platform.for_provider(provider) else {
            bail!("Platform API key for {provider} is not configured.");
        };
        return Ok(ResolvedCredential {
            source: CredentialSource::Platform,
            api_key: api_key.to_string(),
        });
    }
    let Some(api_key) = caller.for_provider(provider) else {
        bail!("No {provider} API key supplied. Provide your own key or use credits.");
    };
    Ok(ResolvedCredential {
        source: CredentialSource::Caller,
        api_key: api_key.to_string(),
    })
}
