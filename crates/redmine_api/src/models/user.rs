//! Account models returned by Redmine identity endpoints.

use serde::Deserialize;

/// Account behind the configured API key (`users/current.json`).
#[derive(Debug, Deserialize, Clone)]
pub struct CurrentUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

impl CurrentUser {
    /// Returns "First Last" when available, the login otherwise.
    pub fn display_name(&self) -> String {
        let full = [self.firstname.as_deref(), self.lastname.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.login.clone()
        } else {
            full
        }
    }
}
