use std::net::SocketAddr;

/// Runtime settings, read once from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub local_state_path: Option<String>,
    pub admin_password_hash: Option<String>,
    pub admin_password: Option<String>,
    pub allowed_origins: Vec<String>,
    pub seed_demo: bool,
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag_enabled(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    pub fn from_env() -> Self {
        let host = non_empty_var("BACKEND_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = non_empty_var("BACKEND_PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(8080);

        // An explicitly empty LOCAL_STATE_PATH turns snapshot persistence off.
        let local_state_path = match std::env::var("LOCAL_STATE_PATH") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => Some(format!("{}/local_state.json", env!("CARGO_MANIFEST_DIR"))),
        };

        let allowed_origins = non_empty_var("ALLOWED_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);

        Self {
            host,
            port,
            database_url: non_empty_var("DATABASE_URL"),
            local_state_path,
            admin_password_hash: non_empty_var("ADMIN_PASSWORD_HASH"),
            admin_password: non_empty_var("ADMIN_PASSWORD"),
            allowed_origins,
            seed_demo: non_empty_var("SEED_DEMO").is_some_and(|v| flag_enabled(&v)),
        }
    }

    /// In-memory, non-persistent settings with the given admin password.
    pub fn ephemeral(admin_password: Option<&str>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            local_state_path: None,
            admin_password_hash: None,
            admin_password: admin_password.map(str::to_string),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            seed_demo: false,
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_split() {
        let origins = parse_origins(" http://a.test/ ,https://b.test,, ");
        assert_eq!(origins, vec!["http://a.test", "https://b.test"]);
    }

    #[test]
    fn seed_flag_accepts_common_truthy_values() {
        assert!(flag_enabled("1"));
        assert!(flag_enabled(" TRUE "));
        assert!(flag_enabled("yes"));
        assert!(!flag_enabled("0"));
        assert!(!flag_enabled("off"));
    }

    #[test]
    fn ephemeral_config_binds_loopback() {
        let cfg = Config::ephemeral(Some("secret"));
        assert!(cfg.local_state_path.is_none());
        assert!(!cfg.seed_demo);
        assert_eq!(cfg.bind_addr().unwrap().to_string(), "127.0.0.1:0");
    }
}
