use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub course_code: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Scheduled,
    Active,
    Closed,
}

impl ActivityState {
    /// Scheduled and active activities still expect submissions.
    pub fn is_open(self) -> bool {
        !matches!(self, ActivityState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityState::Scheduled => "scheduled",
            ActivityState::Active => "active",
            ActivityState::Closed => "closed",
        }
    }
}

impl FromStr for ActivityState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" | "programmed" | "pending" => Ok(ActivityState::Scheduled),
            "active" | "open" => Ok(ActivityState::Active),
            "closed" | "finished" => Ok(ActivityState::Closed),
            other => anyhow::bail!("unknown activity state: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub weight: f64,
    pub state: ActivityState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub student_id: Uuid,
    pub activity_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    /// Set once when the submission is recorded; never recomputed.
    pub late: bool,
}

impl Submission {
    /// Records a new submission, fixing its lateness against the activity's due date.
    pub fn new(
        student_id: Uuid,
        activity_id: Uuid,
        submitted_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            activity_id,
            submitted_at,
            late: submitted_at > due_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub score: f64,
    pub feedback: Option<String>,
}

/// Everything the aggregator needs for one group, in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group: Group,
    pub students: Vec<Student>,
    pub enrollments: Vec<Enrollment>,
    pub activities: Vec<Activity>,
    pub submissions: Vec<Submission>,
    pub grades: Vec<Grade>,
}

/// Who is asking and for which group. Passed explicitly instead of read from session state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub group_id: Uuid,
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyPoint {
    pub week: String,
    pub average: f64,
    pub graded_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GradeDistribution {
    pub excellent: usize,
    pub good: usize,
    pub regular: usize,
    pub deficient: usize,
}

impl GradeDistribution {
    pub fn total(&self) -> usize {
        self.excellent + self.good + self.regular + self.deficient
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtRiskStudent {
    pub student_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub average: f64,
    pub graded_count: usize,
}

/// Records left out of the aggregation because they did not fit the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataQuality {
    pub unknown_student_submissions: usize,
    pub unknown_activity_submissions: usize,
    pub duplicate_submissions: usize,
    pub orphan_grades: usize,
    pub duplicate_grades: usize,
    pub invalid_scores: usize,
    pub orphan_enrollments: usize,
}

impl DataQuality {
    pub fn excluded_total(&self) -> usize {
        self.unknown_student_submissions
            + self.unknown_activity_submissions
            + self.duplicate_submissions
            + self.orphan_grades
            + self.duplicate_grades
            + self.invalid_scores
            + self.orphan_enrollments
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatistics {
    pub group_id: Uuid,
    pub group_name: String,
    pub active_students_count: usize,
    pub activities_count: usize,
    pub open_activities_count: usize,
    pub submissions_count: usize,
    pub graded_count: usize,
    pub ungraded_count: usize,
    pub late_submissions: usize,
    pub on_time_submissions: usize,
    pub pending_submissions: usize,
    pub general_average: f64,
    pub submission_rate: f64,
    pub weekly_progress: Vec<WeeklyPoint>,
    pub grade_distribution: GradeDistribution,
    pub at_risk_students: Vec<AtRiskStudent>,
    /// Students that qualified as at risk before the list was capped.
    pub at_risk_total: usize,
    pub data_quality: DataQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "Info"),
            AlertSeverity::Warning => write!(f, "Warning"),
            AlertSeverity::Critical => write!(f, "Critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub suggested_action: String,
    /// False when the description came from the deterministic fallback.
    pub enriched: bool,
}

/// Statistics plus the alerts derived from them, as handed to the views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    #[serde(flatten)]
    pub statistics: GroupStatistics,
    pub alerts: Vec<Alert>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn activity(due_at: DateTime<Utc>) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            title: "Essay".to_string(),
            due_at,
            weight: 20.0,
            state: ActivityState::Active,
        }
    }

    #[test]
    fn recorded_submission_fixes_lateness_against_due_date() {
        let due = Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 0).unwrap();
        let essay = activity(due);

        let on_time = Submission::new(Uuid::new_v4(), essay.id, due, essay.due_at);
        let late = Submission::new(
            Uuid::new_v4(),
            essay.id,
            due + chrono::Duration::minutes(1),
            essay.due_at,
        );

        assert!(!on_time.late);
        assert!(late.late);
        assert_eq!(late.activity_id, essay.id);
    }

    #[test]
    fn activity_state_parses_aliases() {
        assert_eq!("Active".parse::<ActivityState>().unwrap(), ActivityState::Active);
        assert_eq!("programmed".parse::<ActivityState>().unwrap(), ActivityState::Scheduled);
        assert_eq!("closed".parse::<ActivityState>().unwrap(), ActivityState::Closed);
        assert!("archived".parse::<ActivityState>().is_err());
        assert!(ActivityState::Scheduled.is_open());
        assert!(!ActivityState::Closed.is_open());
    }
}
