//! Advisory alert rules.
//!
//! Rules run in a fixed order over the computed statistics and decide which
//! alerts fire. Each rule keeps its fallback description beside it, so later
//! text enrichment can only reword an alert, never add or drop one.

use crate::aggregate::REGULAR_MIN;
use crate::config::Thresholds;
use crate::models::{Alert, AlertSeverity, AtRiskStudent, GroupStatistics};

/// The facts an alert was raised from.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    GroupInsight {
        group_name: String,
        general_average: f64,
        graded_count: usize,
        submission_rate: f64,
        at_risk_total: usize,
    },
    StudentAtRisk {
        student: AtRiskStudent,
        general_average: f64,
        risk_floor: f64,
    },
    PendingSubmissions {
        pending: usize,
        open_activities: usize,
        active_students: usize,
    },
    LowSubmissionRate {
        rate: f64,
        threshold: f64,
    },
}

/// An alert that has fired but has no final description yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub suggested_action: String,
    pub kind: AlertKind,
}

impl AlertDraft {
    pub fn fallback_description(&self) -> String {
        match &self.kind {
            AlertKind::GroupInsight {
                group_name,
                general_average,
                graded_count,
                submission_rate,
                at_risk_total,
            } => group_insight_text(
                group_name,
                *general_average,
                *graded_count,
                *submission_rate,
                *at_risk_total,
            ),
            AlertKind::StudentAtRisk {
                student,
                general_average,
                risk_floor,
            } => student_at_risk_text(student, *general_average, *risk_floor),
            AlertKind::PendingSubmissions {
                pending,
                open_activities,
                active_students,
            } => pending_text(*pending, *open_activities, *active_students),
            AlertKind::LowSubmissionRate { rate, threshold } => low_rate_text(*rate, *threshold),
        }
    }

    /// Turns the draft into an alert, falling back to the rule's own text when no description is supplied.
    pub fn finalize(self, description: Option<String>) -> Alert {
        let (description, enriched) = match description {
            Some(text) => (text, true),
            None => (self.fallback_description(), false),
        };
        Alert {
            id: self.id,
            severity: self.severity,
            title: self.title,
            description,
            suggested_action: self.suggested_action,
            enriched,
        }
    }
}

/// Evaluates every rule in order: group insight, at-risk students, pending volume, low rate.
pub fn evaluate(stats: &GroupStatistics, thresholds: &Thresholds) -> Vec<AlertDraft> {
    let mut drafts = Vec::new();
    drafts.extend(group_insight_rule(stats, thresholds));
    drafts.extend(
        stats
            .at_risk_students
            .iter()
            .map(|student| student_at_risk_rule(student, stats, thresholds)),
    );
    drafts.extend(pending_submissions_rule(stats, thresholds));
    drafts.extend(low_submission_rate_rule(stats, thresholds));
    drafts
}

/// Deterministic alerts, used when enrichment is off.
pub fn finalize_alerts(drafts: Vec<AlertDraft>) -> Vec<Alert> {
    drafts.into_iter().map(|draft| draft.finalize(None)).collect()
}

fn group_insight_rule(stats: &GroupStatistics, thresholds: &Thresholds) -> Option<AlertDraft> {
    if stats.graded_count == 0 {
        return None;
    }

    let (severity, suggested_action) = if stats.general_average >= thresholds.risk_floor {
        (
            AlertSeverity::Info,
            "Keep the current pace and share exemplary work with the group.",
        )
    } else if stats.general_average >= REGULAR_MIN {
        (
            AlertSeverity::Warning,
            "Schedule a review session on the topics with the lowest scores.",
        )
    } else {
        (
            AlertSeverity::Critical,
            "Revisit the course plan and arrange tutoring for the whole group.",
        )
    };

    Some(AlertDraft {
        id: "group-insight".to_string(),
        severity,
        title: format!("Group performance: {}", stats.group_name),
        suggested_action: suggested_action.to_string(),
        kind: AlertKind::GroupInsight {
            group_name: stats.group_name.clone(),
            general_average: stats.general_average,
            graded_count: stats.graded_count,
            submission_rate: stats.submission_rate,
            at_risk_total: stats.at_risk_total,
        },
    })
}

fn group_insight_text(
    group_name: &str,
    general_average: f64,
    graded_count: usize,
    submission_rate: f64,
    at_risk_total: usize,
) -> String {
    format!(
        "{} averages {:.2}/5.0 across {} graded submissions with a {:.0}% submission rate; \
         {} student(s) are below both the group average and the risk floor.",
        group_name, general_average, graded_count, submission_rate, at_risk_total
    )
}

fn student_at_risk_rule(
    student: &AtRiskStudent,
    stats: &GroupStatistics,
    thresholds: &Thresholds,
) -> AlertDraft {
    let severity = if student.average < REGULAR_MIN {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    };

    AlertDraft {
        id: format!("at-risk-{}", student.student_id),
        severity,
        title: format!("{} is at risk", student.full_name),
        suggested_action: format!(
            "Contact {} to agree on a recovery plan for pending work.",
            student.email
        ),
        kind: AlertKind::StudentAtRisk {
            student: student.clone(),
            general_average: stats.general_average,
            risk_floor: thresholds.risk_floor,
        },
    }
}

fn student_at_risk_text(student: &AtRiskStudent, general_average: f64, risk_floor: f64) -> String {
    format!(
        "{} averages {:.2}/5.0 over {} graded submission(s), below the group average of {:.2} \
         and the {:.1} risk floor.",
        student.full_name, student.average, student.graded_count, general_average, risk_floor
    )
}

fn pending_submissions_rule(stats: &GroupStatistics, thresholds: &Thresholds) -> Option<AlertDraft> {
    if stats.pending_submissions == 0
        || stats.pending_submissions < thresholds.pending_alert_threshold
    {
        return None;
    }

    Some(AlertDraft {
        id: "pending-submissions".to_string(),
        severity: AlertSeverity::Warning,
        title: format!("{} submissions pending", stats.pending_submissions),
        suggested_action: "Send a reminder about open activities and their due dates.".to_string(),
        kind: AlertKind::PendingSubmissions {
            pending: stats.pending_submissions,
            open_activities: stats.open_activities_count,
            active_students: stats.active_students_count,
        },
    })
}

fn pending_text(pending: usize, open_activities: usize, active_students: usize) -> String {
    format!(
        "{} submissions are still missing across {} open activities for {} enrolled students.",
        pending, open_activities, active_students
    )
}

fn low_submission_rate_rule(stats: &GroupStatistics, thresholds: &Thresholds) -> Option<AlertDraft> {
    let possible = stats.active_students_count * stats.activities_count;
    if possible == 0 || stats.submission_rate >= thresholds.low_submission_rate {
        return None;
    }

    Some(AlertDraft {
        id: "low-submission-rate".to_string(),
        severity: AlertSeverity::Warning,
        title: "Low submission rate".to_string(),
        suggested_action: "Review activity load and deadlines with the group.".to_string(),
        kind: AlertKind::LowSubmissionRate {
            rate: stats.submission_rate,
            threshold: thresholds.low_submission_rate,
        },
    })
}

fn low_rate_text(rate: f64, threshold: f64) -> String {
    format!(
        "Only {:.0}% of expected submissions have been received, under the {:.0}% target.",
        rate, threshold
    )
}
