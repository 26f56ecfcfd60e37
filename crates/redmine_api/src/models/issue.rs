use serde::{Deserialize, Serialize};

use super::NamedRef;

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub id: u64,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    pub project: NamedRef,
    #[serde(default)]
    pub tracker: Option<NamedRef>,
    #[serde(default)]
    pub status: Option<NamedRef>,
    #[serde(default)]
    pub priority: Option<NamedRef>,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub assigned_to: Option<NamedRef>,
    #[serde(default)]
    pub done_ratio: Option<u8>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub spent_hours: Option<f64>,
    #[serde(default)]
    pub updated_on: Option<String>,
}

impl Issue {
    /// `#42 Subject` label used when listing timers.
    pub fn label(&self) -> String {
        format!("#{} {}", self.id, self.subject.trim())
    }

    pub fn is_assigned_to(&self, user_id: u64) -> bool {
        self.assigned_to
            .as_ref()
            .map(|assignee| assignee.id == user_id)
            .unwrap_or(false)
    }
}

/// Partial issue update; unset fields are left out of the request body.
#[derive(Debug, Serialize, Clone, Default)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_ratio: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_decodes_minimal_payload() {
        let issue: Issue = serde_json::from_str(
            r#"{"id": 42, "subject": " Fix login ", "project": {"id": 1, "name": "Web"},
                "assigned_to": {"id": 7, "name": "Dana"}}"#,
        )
        .unwrap();
        assert_eq!(issue.label(), "#42 Fix login");
        assert!(issue.is_assigned_to(7));
        assert!(!issue.is_assigned_to(8));
        assert!(issue.status.is_none());
    }

    #[test]
    fn empty_update_serializes_to_empty_object() {
        let body = serde_json::to_string(&IssueUpdate::default()).unwrap();
        assert_eq!(body, "{}");
    }
}
