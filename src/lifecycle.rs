use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{IssueCategory, IssuePriority, IssueStatus, Role, UpdateIssueRequest, User},
};

/// History comment written alongside every newly created issue.
pub const CREATION_COMMENT: &str = "Issue created";

/// IssueChanges
///
/// The subset of an `UpdateIssueRequest` the caller is allowed to apply. `None` leaves a
/// column untouched. Produced only through `from_request`, which enforces the role rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<IssueCategory>,
    pub priority: Option<IssuePriority>,
    pub severity: Option<i32>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: Option<IssueStatus>,
    pub assignee_id: Option<Uuid>,
    /// Set only when `status` becomes RESOLVED.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl IssueChanges {
    /// from_request
    ///
    /// Citizens keep only title, description, location and coordinates; every other field
    /// is dropped without error. If nothing survives the filter the update is refused with
    /// 400 "No valid fields to update". Admins keep every field.
    pub fn from_request(
        req: UpdateIssueRequest,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        let changes = match role {
            Role::Citizen => {
                let kept = Self {
                    title: req.title,
                    description: req.description,
                    location: req.location,
                    latitude: req.latitude,
                    longitude: req.longitude,
                    ..Self::default()
                };
                if kept.is_empty() {
                    return Err(ApiError::BadRequest("No valid fields to update".to_string()));
                }
                kept
            }
            Role::Admin => Self {
                title: req.title,
                description: req.description,
                category: req.category,
                priority: req.priority,
                severity: req.severity,
                location: req.location,
                latitude: req.latitude,
                longitude: req.longitude,
                status: req.status,
                assignee_id: req.assignee_id,
                resolved_at: (req.status == Some(IssueStatus::Resolved)).then_some(now),
            },
        };

        Ok(changes)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// StatusTransition
///
/// A status write plus the history row that records it. Any status may follow any other.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub status: IssueStatus,
    pub comment: String,
    /// Stamped only for RESOLVED; other transitions keep the previous value.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl StatusTransition {
    pub fn new(status: IssueStatus, comment: Option<String>, now: DateTime<Utc>) -> Self {
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("Status changed to {}", status.as_str()));

        Self {
            status,
            comment,
            resolved_at: (status == IssueStatus::Resolved).then_some(now),
        }
    }
}

/// History comment for an assignment: the assignee's name, or their email when unnamed.
pub fn assignment_comment(assignee: &User) -> String {
    format!("Assigned to {}", assignee.display_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citizen_changes_drop_admin_fields() {
        let req = UpdateIssueRequest {
            title: Some("New title here".to_string()),
            status: Some(IssueStatus::Closed),
            priority: Some(IssuePriority::Critical),
            ..UpdateIssueRequest::default()
        };
        let changes = IssueChanges::from_request(req, Role::Citizen, Utc::now()).unwrap();
        assert_eq!(changes.title.as_deref(), Some("New title here"));
        assert_eq!(changes.status, None);
        assert_eq!(changes.priority, None);
    }

    #[test]
    fn citizen_status_only_update_is_rejected() {
        let req = UpdateIssueRequest {
            status: Some(IssueStatus::Resolved),
            ..UpdateIssueRequest::default()
        };
        let err = IssueChanges::from_request(req, Role::Citizen, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "No valid fields to update"));
    }

    #[test]
    fn admin_resolution_stamps_resolved_at() {
        let now = Utc::now();
        let req = UpdateIssueRequest {
            status: Some(IssueStatus::Resolved),
            ..UpdateIssueRequest::default()
        };
        let changes = IssueChanges::from_request(req, Role::Admin, now).unwrap();
        assert_eq!(changes.resolved_at, Some(now));

        let req = UpdateIssueRequest {
            status: Some(IssueStatus::InProgress),
            ..UpdateIssueRequest::default()
        };
        let changes = IssueChanges::from_request(req, Role::Admin, now).unwrap();
        assert_eq!(changes.resolved_at, None);
    }

    #[test]
    fn transition_comment_defaults_to_status_name() {
        let t = StatusTransition::new(IssueStatus::InProgress, None, Utc::now());
        assert_eq!(t.comment, "Status changed to IN_PROGRESS");
        assert!(t.resolved_at.is_none());

        let t = StatusTransition::new(IssueStatus::Resolved, Some("Fixed".into()), Utc::now());
        assert_eq!(t.comment, "Fixed");
        assert!(t.resolved_at.is_some());
    }

    #[test]
    fn assignment_comment_prefers_name() {
        let mut user = User {
            email: "crew@city.gov".to_string(),
            ..User::default()
        };
        assert_eq!(assignment_comment(&user), "Assigned to crew@city.gov");
        user.name = Some("Road Crew".to_string());
        assert_eq!(assignment_comment(&user), "Assigned to Road Crew");
    }
}
