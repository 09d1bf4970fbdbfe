use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::MAX_SCORE;
use crate::models::{
    Activity, ActivityState, Enrollment, Grade, Group, GroupSnapshot, Student, Submission,
};

pub const SEED_GROUP_ID: &str = "5b0c7a43-5f8e-4d0c-9d1a-2f6b8e1c4a10";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let group_id = Uuid::parse_str(SEED_GROUP_ID)?;
    sqlx::query(
        r#"
        INSERT INTO academic_performance.groups (id, name, course_code, term)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name, course_code = EXCLUDED.course_code, term = EXCLUDED.term
        "#,
    )
    .bind(group_id)
    .bind("Data Structures - G02")
    .bind("CS201")
    .bind("2026-1")
    .execute(pool)
    .await?;

    let start = Utc
        .with_ymd_and_hms(2026, 2, 2, 23, 59, 0)
        .single()
        .context("invalid seed date")?;
    let activities = vec![
        ("Linked lists lab", start, 20.0, ActivityState::Closed),
        ("Trees quiz", start + Duration::days(7), 15.0, ActivityState::Active),
        ("Graphs project", start + Duration::days(28), 35.0, ActivityState::Scheduled),
    ];

    let mut activity_rows = Vec::new();
    for (title, due_at, weight, state) in activities {
        let activity_id = upsert_activity(pool, group_id, title, due_at, weight, state).await?;
        activity_rows.push((activity_id, due_at));
    }

    // (name, email, per-activity (days relative to due date, score))
    let students = vec![
        (
            "Avery Lee",
            "avery.lee@university.edu",
            vec![Some((-1, Some(4.6))), Some((-2, Some(4.8)))],
        ),
        (
            "Jules Moreno",
            "jules.moreno@university.edu",
            vec![Some((1, Some(2.4))), Some((2, None))],
        ),
        (
            "Kiara Patel",
            "kiara.patel@university.edu",
            vec![Some((0, Some(3.9))), None],
        ),
        (
            "Noah Silva",
            "noah.silva@university.edu",
            vec![Some((-3, Some(2.9))), Some((-1, Some(3.1)))],
        ),
        ("Mara Quint", "mara.quint@university.edu", vec![None, None]),
    ];

    for (name, email, work) in students {
        let student_id = upsert_student(pool, name, email).await?;
        enroll(pool, student_id, group_id).await?;

        for ((activity_id, due_at), entry) in activity_rows.iter().zip(work) {
            let Some((offset_days, score)) = entry else {
                continue;
            };
            let submitted_at = *due_at + Duration::days(offset_days) - Duration::hours(2);
            if let Some(submission_id) =
                insert_submission(pool, student_id, *activity_id, submitted_at, *due_at).await?
            {
                if let Some(score) = score {
                    insert_grade(pool, submission_id, score, None).await?;
                }
            }
        }
    }

    Ok(group_id)
}

pub async fn fetch_snapshot(pool: &PgPool, group_id: Uuid) -> anyhow::Result<GroupSnapshot> {
    let row = sqlx::query(
        "SELECT id, name, course_code, term FROM academic_performance.groups WHERE id = $1",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("group {group_id} not found"))?;

    let group = Group {
        id: row.get("id"),
        name: row.get("name"),
        course_code: row.get("course_code"),
        term: row.get("term"),
    };

    let students = sqlx::query(
        "SELECT st.id, st.full_name, st.email \
         FROM academic_performance.students st \
         JOIN academic_performance.enrollments e ON e.student_id = st.id \
         WHERE e.group_id = $1 \
         ORDER BY st.full_name",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Student {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
    })
    .collect::<Vec<_>>();

    let enrollments = sqlx::query(
        "SELECT student_id, group_id FROM academic_performance.enrollments WHERE group_id = $1",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Enrollment {
        student_id: row.get("student_id"),
        group_id: row.get("group_id"),
    })
    .collect::<Vec<_>>();

    let mut activities = Vec::new();
    for row in sqlx::query(
        "SELECT id, group_id, title, due_at, weight, state \
         FROM academic_performance.activities WHERE group_id = $1 ORDER BY due_at",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?
    {
        let state: String = row.get("state");
        activities.push(Activity {
            id: row.get("id"),
            group_id: row.get("group_id"),
            title: row.get("title"),
            due_at: row.get("due_at"),
            weight: row.get("weight"),
            state: state.parse()?,
        });
    }

    let submissions = sqlx::query(
        "SELECT s.id, s.student_id, s.activity_id, s.submitted_at, s.late \
         FROM academic_performance.submissions s \
         JOIN academic_performance.activities a ON a.id = s.activity_id \
         WHERE a.group_id = $1 \
         ORDER BY s.submitted_at",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Submission {
        id: row.get("id"),
        student_id: row.get("student_id"),
        activity_id: row.get("activity_id"),
        submitted_at: row.get("submitted_at"),
        late: row.get("late"),
    })
    .collect::<Vec<_>>();

    let grades = sqlx::query(
        "SELECT g.id, g.submission_id, g.score, g.feedback \
         FROM academic_performance.grades g \
         JOIN academic_performance.submissions s ON s.id = g.submission_id \
         JOIN academic_performance.activities a ON a.id = s.activity_id \
         WHERE a.group_id = $1",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Grade {
        id: row.get("id"),
        submission_id: row.get("submission_id"),
        score: row.get("score"),
        feedback: row.get("feedback"),
    })
    .collect::<Vec<_>>();

    debug!(
        "Loaded group {}: {} students, {} activities, {} submissions, {} grades",
        group_id,
        students.len(),
        activities.len(),
        submissions.len(),
        grades.len()
    );

    Ok(GroupSnapshot {
        group,
        students,
        enrollments,
        activities,
        submissions,
        grades,
    })
}

/// Imports graded work for one group. Returns the number of new submissions.
pub async fn import_csv(
    pool: &PgPool,
    group_id: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        activity_title: String,
        due_at: DateTime<Utc>,
        weight: f64,
        submitted_at: DateTime<Utc>,
        score: Option<f64>,
        feedback: Option<String>,
    }

    sqlx::query("SELECT id FROM academic_performance.groups WHERE id = $1")
        .bind(group_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("group {group_id} not found"))?;

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id = upsert_student(pool, &row.full_name, &row.email).await?;
        enroll(pool, student_id, group_id).await?;

        let activity_id = upsert_activity(
            pool,
            group_id,
            &row.activity_title,
            row.due_at,
            row.weight,
            ActivityState::Active,
        )
        .await?;
        let due_at: DateTime<Utc> =
            sqlx::query("SELECT due_at FROM academic_performance.activities WHERE id = $1")
                .bind(activity_id)
                .fetch_one(pool)
                .await?
                .get("due_at");

        let Some(submission_id) =
            insert_submission(pool, student_id, activity_id, row.submitted_at, due_at).await?
        else {
            continue;
        };
        inserted += 1;

        match row.score {
            Some(score) if (0.0..=MAX_SCORE).contains(&score) => {
                insert_grade(pool, submission_id, score, row.feedback.as_deref()).await?;
            }
            Some(score) => warn!(
                "Skipping out-of-range score {} for {} on {}",
                score, row.email, row.activity_title
            ),
            None => {}
        }
    }

    info!("Imported {} submissions into group {}", inserted, group_id);
    Ok(inserted)
}

async fn upsert_student(pool: &PgPool, full_name: &str, email: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO academic_performance.students (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn enroll(pool: &PgPool, student_id: Uuid, group_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO academic_performance.enrollments (student_id, group_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(group_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Existing activities keep their due date so recorded lateness stays consistent.
async fn upsert_activity(
    pool: &PgPool,
    group_id: Uuid,
    title: &str,
    due_at: DateTime<Utc>,
    weight: f64,
    state: ActivityState,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO academic_performance.activities (id, group_id, title, due_at, weight, state)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (group_id, title) DO UPDATE SET weight = EXCLUDED.weight
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(group_id)
    .bind(title)
    .bind(due_at)
    .bind(weight)
    .bind(state.as_str())
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

/// Returns the new submission id, or `None` when the student already submitted.
async fn insert_submission(
    pool: &PgPool,
    student_id: Uuid,
    activity_id: Uuid,
    submitted_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
) -> anyhow::Result<Option<Uuid>> {
    let submission = Submission::new(student_id, activity_id, submitted_at, due_at);
    let row = sqlx::query(
        r#"
        INSERT INTO academic_performance.submissions
        (id, student_id, activity_id, submitted_at, late)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id, activity_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(submission.id)
    .bind(submission.student_id)
    .bind(submission.activity_id)
    .bind(submission.submitted_at)
    .bind(submission.late)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| row.get("id")))
}

async fn insert_grade(
    pool: &PgPool,
    submission_id: Uuid,
    score: f64,
    feedback: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO academic_performance.grades (id, submission_id, score, feedback)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (submission_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(submission_id)
    .bind(score)
    .bind(feedback)
    .execute(pool)
    .await?;
    Ok(())
}
