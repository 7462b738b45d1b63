//! Interfaces to the services around the engine.
//!
//! The engine does not manage accounts or store API keys. It asks a
//! [`UsageAuthority`] how many AI pages an account may still use and reports
//! what a document consumed, and it asks a [`CredentialSource`] whether a
//! provider can be used at all. Both are implemented by the host
//! application.

use crate::error::EngineError;
use crate::usage::UsageRecord;
use async_trait::async_trait;

/// What an account's plan still allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCeiling {
    /// AI pages left in the current period; `None` means no limit.
    pub max_ai_pages_remaining: Option<u32>,
}

/// The account and usage-limit service.
#[async_trait]
pub trait UsageAuthority: Send + Sync {
    async fn get_plan_ceiling(&self, account: &str) -> Result<PlanCeiling, EngineError>;

    async fn report_usage(&self, account: &str, usage: &UsageRecord) -> Result<(), EngineError>;
}

/// Where provider API keys come from.
pub trait CredentialSource: Send + Sync {
    fn credential(&self, provider: &str) -> Option<String>;

    /// Whether `provider` can be constructed. Local providers that need no
    /// key always can.
    fn has_credential(&self, provider: &str) -> bool {
        !requires_key(provider) || self.credential(provider).is_some_and(|k| !k.is_empty())
    }
}

/// Environment variable holding each known provider's key.
pub fn env_var_for(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "azure" | "azure_openai" => Some("AZURE_OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "xai" => Some("XAI_API_KEY"),
        _ => None,
    }
}

fn requires_key(provider: &str) -> bool {
    !matches!(provider.to_ascii_lowercase().as_str(), "ollama" | "lmstudio" | "mock")
}

/// Reads keys from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credential(&self, provider: &str) -> Option<String> {
        let var = env_var_for(provider)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_API_KEY", provider.to_ascii_uppercase()));
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixed(HashMap<&'static str, &'static str>);

    impl CredentialSource for Fixed {
        fn credential(&self, provider: &str) -> Option<String> {
            self.0.get(provider).map(|s| s.to_string())
        }
    }

    #[test]
    fn local_providers_need_no_key() {
        let creds = Fixed(HashMap::new());
        assert!(creds.has_credential("ollama"));
        assert!(creds.has_credential("lmstudio"));
        assert!(!creds.has_credential("openai"));
    }

    #[test]
    fn empty_key_does_not_count() {
        let creds = Fixed(HashMap::from([("openai", ""), ("gemini", "g-123")]));
        assert!(!creds.has_credential("openai"));
        assert!(creds.has_credential("gemini"));
    }

    #[test]
    fn env_var_names() {
        assert_eq!(env_var_for("openai"), Some("OPENAI_API_KEY"));
        assert_eq!(env_var_for("Anthropic"), Some("ANTHROPIC_API_KEY"));
        assert_eq!(env_var_for("ollama"), None);
    }
}
