use std::path::PathBuf;

use crate::error::GridmarkError;

/// Application configuration loaded from environment variables.
/// Contains only secrets and env-specific values; driver tuning and
/// scraping selectors live in the TOML FileConfig.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database. Optional so offline commands (`resolve --registry`,
    // dry runs) work without one.
    pub database_url: Option<String>,

    // Sources
    pub eia_api_key: Option<String>,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,

    // Local output (raw page logs, unresolved-name logs, stats)
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Load from the process environment (after reading `.env` if present).
    pub fn from_env() -> Result<Self, GridmarkError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build from an arbitrary key lookup. `DATABASE_URL` wins; otherwise the
    /// URL is assembled from `DB_HOST`/`DB_NAME`/`DB_USER`/`DB_PASSWORD`/`DB_PORT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GridmarkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = match (non_empty("DATABASE_URL"), non_empty("DB_HOST")) {
            (Some(url), _) => Some(url),
            (None, None) => None,
            (None, Some(host)) => {
                let name = non_empty("DB_NAME")
                    .ok_or_else(|| GridmarkError::MissingEnv("DB_NAME".into()))?;
                let user = non_empty("DB_USER")
                    .ok_or_else(|| GridmarkError::MissingEnv("DB_USER".into()))?;
                let password = non_empty("DB_PASSWORD").unwrap_or_default();
                let port: u16 = match non_empty("DB_PORT") {
                    Some(p) => p
                        .parse()
                        .map_err(|_| GridmarkError::Config(format!("DB_PORT must be a number, got {p}")))?,
                    None => 5432,
                };
                Some(database_url_from_parts(&host, &name, &user, &password, port))
            }
        };

        Ok(Self {
            database_url,
            eia_api_key: non_empty("EIA_API_KEY"),
            browserless_url: non_empty("BROWSERLESS_URL"),
            browserless_token: non_empty("BROWSERLESS_TOKEN"),
            data_dir: PathBuf::from(non_empty("DATA_DIR").unwrap_or_else(|| "data".to_string())),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, GridmarkError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| GridmarkError::MissingEnv("DATABASE_URL or DB_HOST".into()))
    }

    /// EIA key, or a config error naming the missing variable.
    pub fn require_eia_key(&self) -> Result<&str, GridmarkError> {
        self.eia_api_key
            .as_deref()
            .ok_or_else(|| GridmarkError::MissingEnv("EIA_API_KEY".into()))
    }

    pub fn require_browserless_url(&self) -> Result<&str, GridmarkError> {
        self.browserless_url
            .as_deref()
            .ok_or_else(|| GridmarkError::MissingEnv("BROWSERLESS_URL".into()))
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{}...({} chars)", head, val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) => preview(v),
                None => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!(
            "  DATABASE_URL: {}",
            self.database_url
                .as_deref()
                .map(redact_url)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  EIA_API_KEY: {}", preview_opt(&self.eia_api_key));
        tracing::info!("  BROWSERLESS_URL: {}", preview_opt(&self.browserless_url));
        tracing::info!("  BROWSERLESS_TOKEN: {}", preview_opt(&self.browserless_token));
        tracing::info!("  DATA_DIR: {}", self.data_dir.display());
    }
}

fn database_url_from_parts(host: &str, name: &str, user: &str, password: &str, port: u16) -> String {
    if password.is_empty() {
        format!("postgres://{user}@{host}:{port}/{name}")
    } else {
        format!("postgres://{user}:{password}@{host}:{port}/{name}")
    }
}

/// Hide the password component of a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<unparseable>".to_string();
    };
    match rest.split_once('@') {
        Some((creds, host)) => {
            let user = creds.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
