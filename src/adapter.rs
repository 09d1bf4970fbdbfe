//! Snapshot files exported from the backend.
//!
//! The REST layer and the hosted database return the same records with
//! different field names (`studentId` vs `student_id`, `assignment_id`,
//! nested `student: { id }` objects). Joined rows may carry several
//! spellings at once, so each spelling is its own field and the first one
//! present wins. Everything is normalized here so the aggregator only ever
//! sees the canonical models.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Activity, ActivityState, Enrollment, Grade, Group, GroupSnapshot, Student, Submission,
};

/// Collections stay untyped so one malformed record cannot reject the file.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    group: RawGroup,
    #[serde(default)]
    students: Vec<Value>,
    #[serde(default)]
    roster: Vec<Value>,
    #[serde(default)]
    enrollments: Vec<Value>,
    #[serde(default)]
    activities: Vec<Value>,
    #[serde(default)]
    assignments: Vec<Value>,
    #[serde(default)]
    submissions: Vec<Value>,
    #[serde(default)]
    grades: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    id: Uuid,
    #[serde(default)]
    name: String,
    course_code: Option<String>,
    #[serde(rename = "courseCode")]
    course_code_camel: Option<String>,
    code: Option<String>,
    term: Option<String>,
    period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RawStudent {
    id: Option<Uuid>,
    full_name: Option<String>,
    #[serde(rename = "fullName")]
    full_name_camel: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnrollment {
    student_id: Option<Uuid>,
    #[serde(rename = "studentId")]
    student_id_camel: Option<Uuid>,
    user_id: Option<Uuid>,
    group_id: Option<Uuid>,
    #[serde(rename = "groupId")]
    group_id_camel: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct RawActivity {
    id: Option<Uuid>,
    group_id: Option<Uuid>,
    #[serde(rename = "groupId")]
    group_id_camel: Option<Uuid>,
    title: Option<String>,
    name: Option<String>,
    due_at: Option<DateTime<Utc>>,
    #[serde(rename = "dueAt")]
    due_at_camel: Option<DateTime<Utc>>,
    due_date: Option<DateTime<Utc>>,
    #[serde(rename = "dueDate")]
    due_date_camel: Option<DateTime<Utc>>,
    weight: Option<f64>,
    percentage: Option<f64>,
    state: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubmission {
    id: Option<Uuid>,
    student_id: Option<Uuid>,
    #[serde(rename = "studentId")]
    student_id_camel: Option<Uuid>,
    user_id: Option<Uuid>,
    student: Option<RawRef>,
    activity_id: Option<Uuid>,
    #[serde(rename = "activityId")]
    activity_id_camel: Option<Uuid>,
    assignment_id: Option<Uuid>,
    #[serde(rename = "assignmentId")]
    assignment_id_camel: Option<Uuid>,
    activity: Option<RawRef>,
    assignment: Option<RawRef>,
    submitted_at: Option<DateTime<Utc>>,
    #[serde(rename = "submittedAt")]
    submitted_at_camel: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    created_at_camel: Option<DateTime<Utc>>,
    late: Option<bool>,
    #[serde(rename = "isLate")]
    is_late_camel: Option<bool>,
    is_late: Option<bool>,
}

impl RawSubmission {
    fn student_id(&self) -> Option<Uuid> {
        self.student_id
            .or(self.student_id_camel)
            .or(self.user_id)
            .or(self.student.as_ref().map(|r| r.id))
    }

    fn activity_id(&self) -> Option<Uuid> {
        self.activity_id
            .or(self.activity_id_camel)
            .or(self.assignment_id)
            .or(self.assignment_id_camel)
            .or(self.activity.as_ref().map(|r| r.id))
            .or(self.assignment.as_ref().map(|r| r.id))
    }

    fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
            .or(self.submitted_at_camel)
            .or(self.created_at)
            .or(self.created_at_camel)
    }
}

#[derive(Debug, Deserialize)]
struct RawGrade {
    id: Option<Uuid>,
    submission_id: Option<Uuid>,
    #[serde(rename = "submissionId")]
    submission_id_camel: Option<Uuid>,
    score: Option<f64>,
    grade: Option<f64>,
    value: Option<f64>,
    feedback: Option<String>,
    comment: Option<String>,
}

/// A normalized snapshot plus the number of raw records that could not be mapped.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot: GroupSnapshot,
    pub dropped_records: usize,
}

pub fn load_snapshot_file(path: &Path) -> anyhow::Result<LoadedSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    parse_snapshot(&content).with_context(|| format!("invalid snapshot {}", path.display()))
}

/// Fails only when the document or its group header is unusable; bad records are dropped.
pub fn parse_snapshot(content: &str) -> anyhow::Result<LoadedSnapshot> {
    let raw: RawSnapshot = serde_json::from_str(content)?;
    Ok(normalize(raw))
}

/// Decodes each record on its own, counting the ones that do not fit `T`.
fn decode_records<T: DeserializeOwned>(
    kind: &str,
    values: Vec<Value>,
    dropped: &mut usize,
) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Dropping malformed {} record: {}", kind, e);
                *dropped += 1;
                None
            }
        })
        .collect()
}

fn normalize(raw: RawSnapshot) -> LoadedSnapshot {
    let mut dropped = 0usize;
    let group = Group {
        id: raw.group.id,
        name: raw.group.name,
        course_code: raw
            .group
            .course_code
            .or(raw.group.course_code_camel)
            .or(raw.group.code)
            .unwrap_or_default(),
        term: raw.group.term.or(raw.group.period).unwrap_or_default(),
    };

    let raw_students: Vec<RawStudent> = decode_records(
        "student",
        raw.students.into_iter().chain(raw.roster).collect(),
        &mut dropped,
    );
    let raw_enrollments: Vec<RawEnrollment> =
        decode_records("enrollment", raw.enrollments, &mut dropped);
    let raw_activities: Vec<RawActivity> = decode_records(
        "activity",
        raw.activities.into_iter().chain(raw.assignments).collect(),
        &mut dropped,
    );
    let raw_submissions: Vec<RawSubmission> =
        decode_records("submission", raw.submissions, &mut dropped);
    let raw_grades: Vec<RawGrade> = decode_records("grade", raw.grades, &mut dropped);

    let students: Vec<Student> = raw_students
        .into_iter()
        .filter_map(|s| {
            let full_name = s.full_name.or(s.full_name_camel).or(s.name);
            match (s.id, full_name) {
                (Some(id), Some(full_name)) => Some(Student {
                    id,
                    full_name,
                    email: s.email.unwrap_or_default(),
                }),
                _ => {
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    // Roster exports have no enrollment rows; everyone listed belongs to the group.
    let enrollments: Vec<Enrollment> = if raw_enrollments.is_empty() {
        students
            .iter()
            .map(|s| Enrollment {
                student_id: s.id,
                group_id: group.id,
            })
            .collect()
    } else {
        raw_enrollments
            .into_iter()
            .filter_map(
                |e| match e.student_id.or(e.student_id_camel).or(e.user_id) {
                    Some(student_id) => Some(Enrollment {
                        student_id,
                        group_id: e.group_id.or(e.group_id_camel).unwrap_or(group.id),
                    }),
                    None => {
                        dropped += 1;
                        None
                    }
                },
            )
            .collect()
    };

    let mut activities = Vec::new();
    for a in raw_activities {
        let state = match a.state.or(a.status).as_deref().map(str::parse::<ActivityState>) {
            None => Ok(ActivityState::Active),
            Some(parsed) => parsed,
        };
        let title = a.title.or(a.name);
        let due_at = a
            .due_at
            .or(a.due_at_camel)
            .or(a.due_date)
            .or(a.due_date_camel);
        match (a.id, title, due_at, state) {
            (Some(id), Some(title), Some(due_at), Ok(state)) => activities.push(Activity {
                id,
                group_id: a.group_id.or(a.group_id_camel).unwrap_or(group.id),
                title,
                due_at,
                weight: a.weight.or(a.percentage).unwrap_or_default(),
                state,
            }),
            (_, _, _, Err(e)) => {
                warn!("Dropping activity with unusable state: {}", e);
                dropped += 1;
            }
            _ => dropped += 1,
        }
    }

    let due_dates: HashMap<Uuid, DateTime<Utc>> =
        activities.iter().map(|a| (a.id, a.due_at)).collect();

    let submissions: Vec<Submission> = raw_submissions
        .into_iter()
        .filter_map(|s| {
            match (s.id, s.student_id(), s.activity_id(), s.submitted_at()) {
                (Some(id), Some(student_id), Some(activity_id), Some(submitted_at)) => {
                    let late = s.late.or(s.is_late).or(s.is_late_camel).unwrap_or_else(|| {
                        due_dates
                            .get(&activity_id)
                            .is_some_and(|due_at| submitted_at > *due_at)
                    });
                    Some(Submission {
                        id,
                        student_id,
                        activity_id,
                        submitted_at,
                        late,
                    })
                }
                _ => {
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    let grades: Vec<Grade> = raw_grades
        .into_iter()
        .filter_map(|g| {
            let submission_id = g.submission_id.or(g.submission_id_camel);
            match (submission_id, g.score.or(g.grade).or(g.value)) {
                (Some(submission_id), Some(score)) => Some(Grade {
                    id: g.id.unwrap_or_else(Uuid::new_v4),
                    submission_id,
                    score,
                    feedback: g.feedback.or(g.comment),
                }),
                _ => {
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    if dropped > 0 {
        warn!("Dropped {} snapshot records that were incomplete or malformed", dropped);
    }
    debug!(
        "Normalized snapshot for group {}: {} students, {} submissions, {} grades",
        group.id,
        students.len(),
        submissions.len(),
        grades.len()
    );

    LoadedSnapshot {
        snapshot: GroupSnapshot {
            group,
            students,
            enrollments,
            activities,
            submissions,
            grades,
        },
        dropped_records: dropped,
    }
}
