use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::models::{
    Activity, ActivityState, Enrollment, Grade, Group, GroupSnapshot, RequestContext, Student,
    Submission,
};

/// Builds group snapshots for tests. Activities are due a week after `base`.
pub struct SnapshotBuilder {
    snapshot: GroupSnapshot,
    base: DateTime<Utc>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        let group = Group {
            id: Uuid::new_v4(),
            name: "Databases 1 - G01".to_string(),
            course_code: "DB101".to_string(),
            term: "2026-1".to_string(),
        };
        Self {
            snapshot: GroupSnapshot {
                group,
                students: Vec::new(),
                enrollments: Vec::new(),
                activities: Vec::new(),
                submissions: Vec::new(),
                grades: Vec::new(),
            },
            base: Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap(),
        }
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            group_id: self.snapshot.group.id,
            requested_by: "instructor@example.edu".to_string(),
        }
    }

    /// Adds a student to the roster and enrolls them in the group.
    pub fn student(&mut self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let email = format!("{}@example.edu", name.to_lowercase().replace(' ', "."));
        self.snapshot.students.push(Student {
            id,
            full_name: name.to_string(),
            email,
        });
        self.snapshot.enrollments.push(Enrollment {
            student_id: id,
            group_id: self.snapshot.group.id,
        });
        id
    }

    pub fn activity(&mut self, title: &str, state: ActivityState) -> Uuid {
        let id = Uuid::new_v4();
        self.snapshot.activities.push(Activity {
            id,
            group_id: self.snapshot.group.id,
            title: title.to_string(),
            due_at: self.base + Duration::days(7),
            weight: 25.0,
            state,
        });
        id
    }

    pub fn submit(&mut self, student_id: Uuid, activity_id: Uuid) -> Uuid {
        self.submit_at(student_id, activity_id, self.base)
    }

    pub fn submit_at(
        &mut self,
        student_id: Uuid,
        activity_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Uuid {
        let activity = self
            .snapshot
            .activities
            .iter()
            .find(|a| a.id == activity_id)
            .expect("activity must be added before submitting");
        let submission = Submission::new(student_id, activity_id, submitted_at, activity.due_at);
        let id = submission.id;
        self.snapshot.submissions.push(submission);
        id
    }

    pub fn grade(&mut self, submission_id: Uuid, score: f64) {
        self.snapshot.grades.push(Grade {
            id: Uuid::new_v4(),
            submission_id,
            score,
            feedback: None,
        });
    }

    pub fn submit_graded(&mut self, student_id: Uuid, activity_id: Uuid, score: f64) -> Uuid {
        let submission = self.submit(student_id, activity_id);
        self.grade(submission, score);
        submission
    }

    pub fn build(&self) -> GroupSnapshot {
        self.snapshot.clone()
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
