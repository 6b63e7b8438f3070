use serde::{Deserialize, Serialize};

pub const BASE_PATH_ENV: &str = "WAKU_CONFIG_BASE_PATH";
pub const RSC_BASE_ENV: &str = "WAKU_CONFIG_RSC_BASE";

/// Where RSC payloads are served from, and whether fetches take part in hot
/// reloading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_path: String,
    pub rsc_base: String,
    pub hot: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_path: "/".to_string(),
            rsc_base: "RSC".to_string(),
            hot: false,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `WAKU_CONFIG_BASE_PATH` and
    /// `WAKU_CONFIG_RSC_BASE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            config.base_path = base_path;
        }
        if let Ok(rsc_base) = std::env::var(RSC_BASE_ENV) {
            config.rsc_base = rsc_base;
        }
        config
    }

    /// `<basePath><rscBase>/<encoded>`
    pub fn rsc_url(&self, encoded_rsc_path: &str) -> String {
        format!("{}{}/{}", self.base_path, self.rsc_base, encoded_rsc_path)
    }
}
