use {
    std::path::{
        Path,
        PathBuf,
    },
    wheel::fs,
    crate::{
        Environment,
        mirror::DEFAULT_CACHE_TTL,
        prelude::*,
    },
};
#[cfg(unix)] use xdg::BaseDirectories;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)] Wheel(#[from] wheel::Error),
    #[cfg(unix)]
    #[error("missing config file")]
    Missing,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Config {
    pub(crate) discord: ConfigDiscord,
    #[serde(default)]
    pub(crate) database: Option<ConfigDatabase>,
    /// The spreadsheet mirror is disabled if this is missing.
    #[serde(default)]
    pub(crate) sheets: Option<ConfigSheets>,
}

impl Config {
    pub(crate) async fn load(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Ok(fs::read_json(path).await?)
        }
        #[cfg(unix)] {
            if let Some(config_path) = BaseDirectories::new().find_config_file(if Environment::default().is_dev() { "match-results-dev.json" } else { "match-results.json" }) {
                Ok(fs::read_json(config_path).await?)
            } else {
                Err(Error::Missing)
            }
        }
        #[cfg(not(unix))] {
            Ok(fs::read_json("cfg/match-results.json").await?)
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigDiscord {
    pub(crate) bot_token: String,
    /// Receives error reports from the Discord event handlers.
    pub(crate) admin_user: UserId,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigDatabase {
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigSheets {
    pub(crate) spreadsheet_id: String,
    #[serde(default = "default_service_account_key")]
    pub(crate) service_account_key: PathBuf,
    #[serde(default = "default_players_tab")]
    pub(crate) players_tab: String,
    #[serde(default = "default_matches_tab")]
    pub(crate) matches_tab: String,
    #[serde(default = "default_cache_ttl_seconds")]
    pub(crate) cache_ttl_seconds: u64,
}

impl ConfigSheets {
    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn default_service_account_key() -> PathBuf { PathBuf::from("assets/google-client-secret.json") }
fn default_players_tab() -> String { format!("Players") }
fn default_matches_tab() -> String { format!("Matches") }
fn default_cache_ttl_seconds() -> u64 { DEFAULT_CACHE_TTL.as_secs() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheets_defaults() {
        let config = serde_json::from_str::<Config>(r#"{
            "discord": { "botToken": "token", "adminUser": "82783364175630336" },
            "sheets": { "spreadsheetId": "abc" }
        }"#).unwrap();
        assert!(config.database.is_none());
        let sheets = config.sheets.unwrap();
        assert_eq!(sheets.players_tab, "Players");
        assert_eq!(sheets.matches_tab, "Matches");
        assert_eq!(sheets.cache_ttl(), Duration::from_secs(300));
        assert_eq!(sheets.service_account_key, Path::new("assets/google-client-secret.json"));
    }

    #[test]
    fn mirror_is_optional() {
        let config = serde_json::from_str::<Config>(r#"{ "discord": { "botToken": "token", "adminUser": 1 } }"#).unwrap();
        assert!(config.sheets.is_none());
    }
}
