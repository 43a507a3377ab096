//! Plain-text rendering of a finished report.

use super::IncidentReport;
use std::fmt;

const GENERIC_SUGGESTIONS: [&str; 3] = [
    "Review logs for the affected service",
    "Check resource utilization",
    "Verify external dependencies are healthy",
];

/// Remediation hints: matched failure patterns first, then resolutions of
/// similar past incidents, then generic advice when neither exists.
pub fn suggestions(report: &IncidentReport) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cause in report.ranked_causes() {
        if let Some(r) = &cause.remediation {
            if !out.contains(r) {
                out.push(r.clone());
            }
        }
    }
    for similar in report.similar_incidents() {
        let hint = format!("Previously resolved by: {}", similar.resolution);
        if !similar.resolution.is_empty() && !out.contains(&hint) {
            out.push(hint);
        }
    }
    if out.is_empty() {
        out.extend(GENERIC_SUGGESTIONS.iter().map(|s| s.to_string()));
    }
    out
}

/// Displays a report as plain text.
pub struct Summary<'a>(pub &'a IncidentReport);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let range = report.time_range();
        writeln!(f, "Incident report {}", report.id())?;
        writeln!(f, "Query:  {}", report.query())?;
        writeln!(
            f,
            "Window: {} .. {}",
            range.start.format("%Y-%m-%d %H:%M:%S"),
            range.end.format("%Y-%m-%d %H:%M:%S")
        )?;
        if report.is_partial() {
            let stages: Vec<String> = report.incomplete_stages().iter().map(|s| s.to_string()).collect();
            writeln!(f, "Status: PARTIAL (incomplete: {})", stages.join(", "))?;
        }
        if let Some(explanation) = report.explanation() {
            writeln!(f, "\n{explanation}")?;
        }

        writeln!(f, "\nRoot cause")?;
        match report.root_cause() {
            Some(top) => {
                writeln!(
                    f,
                    "  {} [{}] at {} (score {:.2})",
                    top.event.service,
                    top.event.level,
                    top.event.timestamp.format("%H:%M:%S"),
                    top.score
                )?;
                writeln!(f, "  {}", top.event.message)?;
                for r in &top.rationale {
                    writeln!(f, "    {:<10} +{:.3}  {}", format!("{:?}", r.factor), r.contribution, r.detail)?;
                }
            }
            None => writeln!(f, "  undetermined")?,
        }
        if report.is_ambiguous() {
            writeln!(
                f,
                "  note: several correlation groups of comparable size were found; each is ranked separately"
            )?;
        }

        writeln!(f, "\nPropagation")?;
        let mut seen_groups: Vec<&str> = Vec::new();
        for cause in report.ranked_causes() {
            if seen_groups.contains(&cause.group_key.as_str()) {
                continue;
            }
            seen_groups.push(cause.group_key.as_str());
            if let Some(g) = report.correlation_groups().iter().find(|g| g.key() == cause.group_key) {
                writeln!(f, "  {} ({} events): {}", g.key(), g.len(), g.services().join(" -> "))?;
            }
        }
        if seen_groups.is_empty() {
            writeln!(f, "  none")?;
        }

        writeln!(f, "\nAnomalies")?;
        if report.anomalies().is_empty() {
            writeln!(f, "  none")?;
        }
        for a in report.anomalies() {
            writeln!(
                f,
                "  [{}] {} {}: {:.2}/min vs baseline {:.2}/min (x{:.1}, z {:.1})",
                a.severity, a.service, a.error_type, a.observed_rate, a.baseline.mean_rate, a.ratio, a.z_score
            )?;
        }

        writeln!(f, "\nSimilar incidents")?;
        if report.similar_incidents().is_empty() {
            writeln!(f, "  none")?;
        }
        for m in report.similar_incidents() {
            writeln!(f, "  {} ({:.0}%): {}", m.incident_id, m.similarity * 100.0, m.summary)?;
        }

        writeln!(f, "\nSuggested actions")?;
        for (i, hint) in suggestions(report).iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, hint)?;
        }
        Ok(())
    }
}

pub fn render(report: &IncidentReport) -> String {
    Summary(report).to_string()
}
