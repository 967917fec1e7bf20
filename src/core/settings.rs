/// Connection and server settings, read from the process environment at
/// startup.
///
/// A missing backend URL or key does not abort startup: the server runs in a
/// degraded "setup required" mode and every data endpoint says so instead.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Base URL of the hosted backend, e.g. `https://xyz.supabase.co`.
    pub supabase_url: Option<String>,

    /// The backend's public (anon) API key.
    pub supabase_anon_key: Option<String>,

    /// Port for the web interface.
    pub web_port: Option<u16>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            supabase_url: env_nonempty("SUPABASE_URL"),
            supabase_anon_key: env_nonempty("SUPABASE_ANON_KEY"),
            web_port: env_nonempty("TRIPDESK_PORT").and_then(|p| p.parse().ok()),
        }
    }

    /// Both connection parameters are present.
    pub fn is_configured(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_anon_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured() {
        let mut settings = Settings::default();
        assert!(!settings.is_configured());

        settings.supabase_url = Some("https://example.supabase.co".to_string());
        assert!(!settings.is_configured());

        settings.supabase_anon_key = Some("anon-key".to_string());
        assert!(settings.is_configured());
    }
}
