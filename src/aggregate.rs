use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Datelike;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Thresholds;
use crate::models::{
    AtRiskStudent, DataQuality, GradeDistribution, GroupSnapshot, GroupStatistics, RequestContext,
    Student, Submission, WeeklyPoint,
};

pub const EXCELLENT_MIN: f64 = 4.5;
pub const GOOD_MIN: f64 = 3.5;
pub const REGULAR_MIN: f64 = 3.0;
pub const MAX_SCORE: f64 = 5.0;

/// Builds the dashboard statistics for `ctx.group_id` from one snapshot.
///
/// Pure and idempotent: the same snapshot always yields the same output.
/// Records that reference students or activities outside the group are
/// left out and counted in `data_quality` instead of failing the run.
pub fn compute_statistics(
    ctx: &RequestContext,
    snapshot: &GroupSnapshot,
    thresholds: &Thresholds,
) -> GroupStatistics {
    debug!(
        "Computing statistics for group {} on behalf of {}",
        ctx.group_id, ctx.requested_by
    );
    if snapshot.group.id != ctx.group_id {
        warn!(
            "Snapshot group {} does not match requested group {}",
            snapshot.group.id, ctx.group_id
        );
    }

    let mut quality = DataQuality::default();

    let roster: HashMap<Uuid, &Student> = snapshot.students.iter().map(|s| (s.id, s)).collect();

    let mut enrolled: HashSet<Uuid> = HashSet::new();
    for enrollment in snapshot
        .enrollments
        .iter()
        .filter(|e| e.group_id == ctx.group_id)
    {
        if roster.contains_key(&enrollment.student_id) {
            enrolled.insert(enrollment.student_id);
        } else {
            quality.orphan_enrollments += 1;
        }
    }

    let activities: HashMap<Uuid, bool> = snapshot
        .activities
        .iter()
        .filter(|a| a.group_id == ctx.group_id)
        .map(|a| (a.id, a.state.is_open()))
        .collect();

    let mut accepted: HashMap<Uuid, &Submission> = HashMap::new();
    let mut submitted_pairs: HashSet<(Uuid, Uuid)> = HashSet::new();
    for submission in &snapshot.submissions {
        if !enrolled.contains(&submission.student_id) {
            quality.unknown_student_submissions += 1;
        } else if !activities.contains_key(&submission.activity_id) {
            quality.unknown_activity_submissions += 1;
        } else if accepted.contains_key(&submission.id)
            || submitted_pairs.contains(&(submission.student_id, submission.activity_id))
        {
            quality.duplicate_submissions += 1;
        } else {
            submitted_pairs.insert((submission.student_id, submission.activity_id));
            accepted.insert(submission.id, submission);
        }
    }

    let mut graded: Vec<(&Submission, f64)> = Vec::new();
    let mut graded_ids: HashSet<Uuid> = HashSet::new();
    for grade in &snapshot.grades {
        let Some(submission) = accepted.get(&grade.submission_id) else {
            quality.orphan_grades += 1;
            continue;
        };
        if !grade.score.is_finite() || !(0.0..=MAX_SCORE).contains(&grade.score) {
            quality.invalid_scores += 1;
        } else if !graded_ids.insert(grade.submission_id) {
            quality.duplicate_grades += 1;
        } else {
            graded.push((*submission, grade.score));
        }
    }

    if quality.excluded_total() > 0 {
        warn!(
            "Excluded {} malformed records from group {}: {:?}",
            quality.excluded_total(),
            ctx.group_id,
            quality
        );
    }

    let active_students_count = enrolled.len();
    let activities_count = activities.len();
    let open_activities: Vec<Uuid> = activities
        .iter()
        .filter(|(_, open)| **open)
        .map(|(id, _)| *id)
        .collect();

    let late_submissions = accepted.values().filter(|s| s.late).count();
    let general_average = mean(graded.iter().map(|(_, score)| *score));

    let pending_submissions: usize = open_activities
        .iter()
        .map(|activity_id| {
            enrolled
                .iter()
                .filter(|student_id| !submitted_pairs.contains(&(**student_id, *activity_id)))
                .count()
        })
        .sum();

    let (at_risk_students, at_risk_total) = rank_at_risk(
        &graded,
        &roster,
        general_average,
        thresholds.risk_floor,
        thresholds.at_risk_cap,
    );

    GroupStatistics {
        group_id: ctx.group_id,
        group_name: snapshot.group.name.clone(),
        active_students_count,
        activities_count,
        open_activities_count: open_activities.len(),
        submissions_count: accepted.len(),
        graded_count: graded.len(),
        ungraded_count: accepted.len() - graded.len(),
        late_submissions,
        on_time_submissions: accepted.len() - late_submissions,
        pending_submissions,
        general_average,
        submission_rate: submission_rate(accepted.len(), active_students_count, activities_count),
        weekly_progress: weekly_progress(&graded),
        grade_distribution: grade_distribution(graded.iter().map(|(_, score)| *score)),
        at_risk_students,
        at_risk_total,
        data_quality: quality,
    }
}

/// Percentage of possible (student, activity) submissions that exist, in `[0, 100]`.
pub fn submission_rate(submissions: usize, students: usize, activities: usize) -> f64 {
    let possible = students * activities;
    if possible == 0 {
        return 0.0;
    }
    (submissions as f64 / possible as f64 * 100.0).clamp(0.0, 100.0)
}

fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Mean score per ISO week of submission. Weeks without grades are not emitted.
fn weekly_progress(graded: &[(&Submission, f64)]) -> Vec<WeeklyPoint> {
    let mut weeks: BTreeMap<(i32, u32), (f64, usize)> = BTreeMap::new();
    for (submission, score) in graded {
        let week = submission.submitted_at.iso_week();
        let entry = weeks.entry((week.year(), week.week())).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    weeks
        .into_iter()
        .map(|((year, week), (sum, count))| WeeklyPoint {
            week: format!("{year}-W{week:02}"),
            average: sum / count as f64,
            graded_count: count,
        })
        .collect()
}

pub fn grade_distribution<I>(scores: I) -> GradeDistribution
where
    I: IntoIterator<Item = f64>,
{
    let mut distribution = GradeDistribution::default();
    for score in scores {
        if score >= EXCELLENT_MIN {
            distribution.excellent += 1;
        } else if score >= GOOD_MIN {
            distribution.good += 1;
        } else if score >= REGULAR_MIN {
            distribution.regular += 1;
        } else {
            distribution.deficient += 1;
        }
    }
    distribution
}

/// Students below both the group average and `floor`, lowest first, truncated to `cap`.
///
/// The cap throttles downstream alert generation; the second value is the
/// uncapped count.
fn rank_at_risk(
    graded: &[(&Submission, f64)],
    roster: &HashMap<Uuid, &Student>,
    general_average: f64,
    floor: f64,
    cap: usize,
) -> (Vec<AtRiskStudent>, usize) {
    let mut per_student: HashMap<Uuid, (f64, usize)> = HashMap::new();
    for (submission, score) in graded {
        let entry = per_student.entry(submission.student_id).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    let mut candidates: Vec<AtRiskStudent> = per_student
        .into_iter()
        .filter_map(|(student_id, (sum, count))| {
            let average = sum / count as f64;
            if average >= general_average || average >= floor {
                return None;
            }
            let student = roster.get(&student_id)?;
            Some(AtRiskStudent {
                student_id,
                full_name: student.full_name.clone(),
                email: student.email.clone(),
                average,
                graded_count: count,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.average
            .partial_cmp(&b.average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.full_name.cmp(&b.full_name))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });

    let total = candidates.len();
    candidates.truncate(cap);
    (candidates, total)
}
