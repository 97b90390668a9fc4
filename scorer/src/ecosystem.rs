// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The configured set of mint-identifier suffixes that admit a mint into cross-token scoring
//! (Wallet Scorer's history filter, Token Scorer's and the Gateway's admission check). One
//! config, three callers, so the set can never drift between them.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EcosystemConfig {
    #[serde(default)]
    pub suffixes: Vec<String>,
}

impl EcosystemConfig {
    /// Case-insensitive suffix match. An empty suffix set admits nothing, not everything: an
    /// unconfigured ecosystem is a misconfiguration, not a wildcard.
    pub fn admits(&self, mint: &str) -> bool {
        let mint = mint.to_ascii_lowercase();
        self.suffixes
            .iter()
            .any(|suffix| mint.ends_with(&suffix.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_is_case_insensitive() {
        let config = EcosystemConfig { suffixes: vec!["pump".to_owned()] };
        assert!(config.admits("FooPUMP"));
        assert!(!config.admits("foobar"));
    }

    #[test]
    fn empty_suffix_set_admits_nothing() {
        let config = EcosystemConfig::default();
        assert!(!config.admits("anything"));
    }
}
