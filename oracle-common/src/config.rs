// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Config loading shared by every conviction-oracle binary: a YAML file merged with `ORACLE_`
//! prefixed environment variable overrides, via `figment`.

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;

/// Name of the environment variable pointing at the config file; falls back to `config.yaml` in
/// the current directory when unset.
const CONFIG_PATH_ENV_VAR: &str = "ORACLE_CONFIG";

/// Blanket-implemented `load` for any binary's top-level `Config` struct.
pub trait ConfigExt: DeserializeOwned {
    fn load() -> Result<Self, figment::Error> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV_VAR).unwrap_or_else(|_| "config.yaml".to_owned());

        Figment::new()
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed("ORACLE_").split("__"))
            .extract()
    }
}

impl<T> ConfigExt for T where T: DeserializeOwned {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct ExampleConfig {
        #[serde(default = "default_listen_on")]
        listen_on: String,
    }

    fn default_listen_on() -> String {
        "0.0.0.0:8080".to_owned()
    }

    #[test]
    fn loads_from_env_when_no_file_present() {
        // SAFETY: test-only; no other test in this process mutates this specific var.
        unsafe {
            std::env::set_var("ORACLE_CONFIG", "/nonexistent/config.yaml");
            std::env::set_var("ORACLE_LISTEN_ON", "127.0.0.1:9090");
        }

        let config: ExampleConfig = ExampleConfig::load().unwrap();
        assert_eq!(config.listen_on, "127.0.0.1:9090");

        unsafe {
            std::env::remove_var("ORACLE_CONFIG");
            std::env::remove_var("ORACLE_LISTEN_ON");
        }
    }
}
