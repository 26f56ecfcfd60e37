use serde::Deserialize;

/// Time entry activity enumeration (`Development`, `Design`, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct Activity {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssueStatus {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub is_closed: bool,
}

fn default_true() -> bool {
    true
}

/// Picks the activity flagged as default among the active ones.
pub fn default_activity(activities: &[Activity]) -> Option<&Activity> {
    activities
        .iter()
        .filter(|activity| activity.active)
        .find(|activity| activity.is_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_activity_skips_inactive_entries() {
        let activities: Vec<Activity> = serde_json::from_str(
            r#"[{"id": 8, "name": "Design", "is_default": true, "active": false},
                {"id": 9, "name": "Development", "is_default": true},
                {"id": 10, "name": "Testing"}]"#,
        )
        .unwrap();
        assert_eq!(default_activity(&activities).map(|a| a.id), Some(9));
    }
}
