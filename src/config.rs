use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Brand prefix stamped onto every activation code (default "KM").
    pub code_prefix: String,
    /// Plaintext admin key from the environment; only its digest is kept
    /// in memory after startup.
    pub admin_api_key: Option<String>,
    pub gumroad_webhook_secret: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub email_webhook_url: Option<String>,
    pub email_enabled: bool,
    /// Auto-release device bindings not seen for this many days.
    /// Unset disables the background sweep.
    pub stale_device_days: Option<i64>,
    pub rate_limit_public_rpm: u32,
    pub rate_limit_webhook_rpm: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("KEYMINT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("KEYMINT_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8743);

        let email_enabled = env::var("KEYMINT_EMAIL_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            host,
            port,
            database_path: env::var("KEYMINT_DATABASE_PATH")
                .unwrap_or_else(|_| "keymint.db".to_string()),
            code_prefix: env::var("KEYMINT_CODE_PREFIX")
                .map(|p| p.trim().to_uppercase())
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "KM".to_string()),
            admin_api_key: env::var("KEYMINT_ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),
            gumroad_webhook_secret: env::var("KEYMINT_GUMROAD_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            resend_api_key: env::var("KEYMINT_RESEND_API_KEY").ok().filter(|k| !k.is_empty()),
            email_from: env::var("KEYMINT_EMAIL_FROM")
                .unwrap_or_else(|_| "licenses@keymint.local".to_string()),
            email_webhook_url: env::var("KEYMINT_EMAIL_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
            email_enabled,
            stale_device_days: env::var("KEYMINT_STALE_DEVICE_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .filter(|d| *d > 0),
            rate_limit_public_rpm: env::var("KEYMINT_RATE_LIMIT_PUBLIC_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            rate_limit_webhook_rpm: env::var("KEYMINT_RATE_LIMIT_WEBHOOK_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
