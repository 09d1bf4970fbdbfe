use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{Dashboard, GradeDistribution};

pub fn build_report(dashboard: &Dashboard, generated_at: DateTime<Utc>) -> String {
    let stats = &dashboard.statistics;
    let mut output = String::new();

    let _ = writeln!(output, "# Group Performance Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}) on {}",
        stats.group_name,
        stats.group_id,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Active students: {}", stats.active_students_count);
    let _ = writeln!(
        output,
        "- Activities: {} ({} open)",
        stats.activities_count, stats.open_activities_count
    );
    let _ = writeln!(output, "- General average: {:.2} / 5.0", stats.general_average);
    let _ = writeln!(output, "- Submission rate: {:.0}%", stats.submission_rate);
    let _ = writeln!(
        output,
        "- Submissions: {} ({} graded, {} ungraded, {} late)",
        stats.submissions_count, stats.graded_count, stats.ungraded_count, stats.late_submissions
    );
    let _ = writeln!(output, "- Pending submissions: {}", stats.pending_submissions);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");
    if stats.grade_distribution.total() == 0 {
        let _ = writeln!(output, "No grades recorded yet.");
    } else {
        for (label, count) in distribution_rows(&stats.grade_distribution) {
            let _ = writeln!(output, "- {}: {}", label, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Progress");
    if stats.weekly_progress.is_empty() {
        let _ = writeln!(output, "No graded submissions yet.");
    } else {
        for point in &stats.weekly_progress {
            let _ = writeln!(
                output,
                "- {}: {:.2} across {} grades",
                point.week, point.average, point.graded_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students At Risk");
    if stats.at_risk_students.is_empty() {
        let _ = writeln!(output, "No students below both the group average and the risk floor.");
    } else {
        for student in &stats.at_risk_students {
            let _ = writeln!(
                output,
                "- {} ({}) average {:.2} across {} grades",
                student.full_name, student.email, student.average, student.graded_count
            );
        }
        if stats.at_risk_total > stats.at_risk_students.len() {
            let _ = writeln!(
                output,
                "- ... {} more students qualify; only the lowest {} are listed.",
                stats.at_risk_total - stats.at_risk_students.len(),
                stats.at_risk_students.len()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts");
    if dashboard.alerts.is_empty() {
        let _ = writeln!(output, "No alerts for this group.");
    } else {
        for alert in &dashboard.alerts {
            let _ = writeln!(output, "### [{}] {}", alert.severity, alert.title);
            let _ = writeln!(output, "{}", alert.description);
            let _ = writeln!(output);
            let _ = writeln!(output, "Suggested action: {}", alert.suggested_action);
            let _ = writeln!(output);
        }
    }

    let excluded = stats.data_quality.excluded_total();
    if excluded > 0 {
        let _ = writeln!(output, "## Data Quality");
        let _ = writeln!(
            output,
            "{} records were excluded from the statistics: {:?}",
            excluded, stats.data_quality
        );
    }

    output
}

/// Compact terminal summary printed by the `stats` command.
pub fn summary_lines(dashboard: &Dashboard) -> Vec<String> {
    let stats = &dashboard.statistics;
    let mut lines = vec![
        format!(
            "{}: {} students, {} activities",
            stats.group_name, stats.active_students_count, stats.activities_count
        ),
        format!(
            "Average {:.2} | submission rate {:.0}% | pending {} | late {}",
            stats.general_average,
            stats.submission_rate,
            stats.pending_submissions,
            stats.late_submissions
        ),
    ];

    for student in &stats.at_risk_students {
        lines.push(format!(
            "At risk: {} ({:.2})",
            student.full_name, student.average
        ));
    }
    for alert in &dashboard.alerts {
        lines.push(format!("[{}] {}: {}", alert.severity, alert.title, alert.description));
    }
    lines
}

fn distribution_rows(distribution: &GradeDistribution) -> [(&'static str, usize); 4] {
    [
        ("Excellent (>= 4.5)", distribution.excellent),
        ("Good (>= 3.5)", distribution.good),
        ("Regular (>= 3.0)", distribution.regular),
        ("Deficient (< 3.0)", distribution.deficient),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::compute_statistics;
    use crate::alerts::{evaluate, finalize_alerts};
    use crate::config::Thresholds;
    use crate::models::ActivityState;
    use crate::test_support::SnapshotBuilder;
    use chrono::TimeZone;

    fn dashboard(builder: &SnapshotBuilder) -> Dashboard {
        let thresholds = Thresholds::default();
        let statistics = compute_statistics(&builder.context(), &builder.build(), &thresholds);
        let alerts = finalize_alerts(evaluate(&statistics, &thresholds));
        Dashboard { statistics, alerts }
    }

    #[test]
    fn empty_group_report_has_placeholders() {
        let builder = SnapshotBuilder::new();
        let report = build_report(
            &dashboard(&builder),
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        );

        assert!(report.contains("Generated for Databases 1 - G01"));
        assert!(report.contains("2026-03-01 12:00 UTC"));
        assert!(report.contains("No grades recorded yet."));
        assert!(report.contains("No graded submissions yet."));
        assert!(report.contains("No alerts for this group."));
        assert!(!report.contains("## Data Quality"));
    }

    #[test]
    fn report_lists_capped_at_risk_students_and_alerts() {
        let mut builder = SnapshotBuilder::new();
        let essay = builder.activity("Essay", ActivityState::Active);
        for name in ["Top A", "Top B", "Top C", "Top D"] {
            let student = builder.student(name);
            builder.submit_graded(student, essay, 5.0);
        }
        for (name, score) in [("Low A", 1.0), ("Low B", 1.5), ("Low C", 2.0), ("Low D", 2.5)] {
            let student = builder.student(name);
            builder.submit_graded(student, essay, score);
        }

        let report = build_report(&dashboard(&builder), Utc::now());
        assert!(report.contains("- Low A (low.a@example.edu) average 1.00 across 1 grades"));
        assert!(!report.contains("- Low D ("));
        assert!(report.contains("1 more students qualify; only the lowest 3 are listed."));
        assert!(report.contains("### [Critical] Low A is at risk"));
        assert!(report.contains("- Excellent (>= 4.5): 4"));
    }

    #[test]
    fn summary_includes_alert_lines() {
        let mut builder = SnapshotBuilder::new();
        let essay = builder.activity("Essay", ActivityState::Active);
        let ana = builder.student("Ana");
        builder.submit_graded(ana, essay, 4.0);

        let lines = summary_lines(&dashboard(&builder));
        assert_eq!(lines[0], "Databases 1 - G01: 1 students, 1 activities");
        assert!(lines[1].starts_with("Average 4.00 | submission rate 100%"));
        assert!(lines.iter().any(|l| l.starts_with("[Info] Group performance")));
    }
}
