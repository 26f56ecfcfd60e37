use serde::Deserialize;

use super::NamedRef;

#[derive(Debug, Deserialize, Clone)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent: Option<NamedRef>,
    #[serde(default)]
    pub status: Option<u8>,
}
