//! Formatted terminal output for runs and graphs.
//!
//! Formatting stays in one place so the scheduler and launcher never build
//! strings themselves, and so the output can be snapshot-tested.

use crate::domain::{NodeStatus, Payload};
use crate::error::AppError;
use crate::graph::RefinementGraph;
use crate::scheduler::RunReport;

/// Per-run summary: completion, per-node costs, stalled nodes.
pub fn format_run_summary(title: &str, report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== {title} ===\n"));
    out.push_str(&format!(
        "Nodes: {}/{} completed | wavefronts={} | elapsed={:.3}s\n",
        report.completed,
        report.total,
        report.iterations,
        report.elapsed.as_secs_f64()
    ));
    if let Some(node) = &report.stopped_before {
        out.push_str(&format!("Stopped before: {node}\n"));
    }
    if report.cap_exceeded {
        out.push_str("Iteration cap reached.\n");
    }
    if !report.stalled.is_empty() && report.stopped_before.is_none() {
        out.push_str(&format!("Stalled: {}\n", report.stalled.join(", ")));
    }

    if !report.steps.is_empty() {
        out.push('\n');
        push_row(
            &mut out,
            &format!(
                "{:<16} {:<20} {:>12} {:>12} {:>6}",
                "node", "freed", "cost_before", "cost_after", "iter"
            ),
        );
        push_row(
            &mut out,
            &format!("{:-<16} {:-<20} {:-<12} {:-<12} {:-<6}", "", "", "", "", ""),
        );
        for step in &report.steps {
            let freed = if step.freed.is_empty() {
                "-".to_string()
            } else {
                step.freed.join(",")
            };
            push_row(
                &mut out,
                &format!(
                    "{:<16} {:<20} {:>12.4e} {:>12.4e} {:>6}",
                    truncate(&step.node, 16),
                    truncate(&freed, 20),
                    step.cost_before,
                    step.cost_after,
                    step.iterations
                ),
            );
        }
    }

    out
}

/// Parameter table, one `name = value` per line in name order.
pub fn format_payload(payload: &Payload) -> String {
    let width = payload.keys().map(|k| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (name, value) in payload {
        out.push_str(&format!("{name:<width$} = {value:.6}\n"));
    }
    out
}

/// Topological listing with levels, sources and status.
pub fn format_graph(graph: &RefinementGraph) -> Result<String, AppError> {
    let order = graph.topological_order()?;
    let mut out = String::new();

    push_row(
        &mut out,
        &format!(
            "{:<16} {:<20} {:>5} {:<12} {:<12} {:<10}",
            "node", "action", "level", "input", "payload", "status"
        ),
    );
    push_row(
        &mut out,
        &format!("{:-<16} {:-<20} {:-<5} {:-<12} {:-<12} {:-<10}", "", "", "", "", "", ""),
    );
    for node in order {
        let id = node.id();
        let label = node.action().label();
        let level = graph
            .level(id)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".into());
        let input = graph.input_source(id).map(|n| n.name()).unwrap_or("-");
        let payload = graph.payload_source(id).map(|n| n.name()).unwrap_or("-");
        push_row(
            &mut out,
            &format!(
                "{:<16} {:<20} {:>5} {:<12} {:<12} {:<10}",
                truncate(node.name(), 16),
                truncate(if label.is_empty() { "-" } else { &label }, 20),
                level,
                truncate(input, 12),
                truncate(payload, 12),
                status_label(node.status())
            ),
        );
    }
    Ok(out)
}

fn status_label(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "pending",
        NodeStatus::HasPayload => "payload",
        NodeStatus::HasAdapter => "adapter",
        NodeStatus::Initialized => "ready",
        NodeStatus::Completed => "done",
        NodeStatus::Failed => "FAILED",
    }
}

fn push_row(out: &mut String, row: &str) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scheduler::StepRecord;

    #[test]
    fn summary_lists_steps_and_stalls() {
        let report = RunReport {
            iterations: 2,
            completed: 2,
            total: 3,
            stalled: vec!["all".into()],
            stopped_before: None,
            cap_exceeded: false,
            elapsed: Duration::from_millis(1500),
            steps: vec![
                StepRecord {
                    node: "start".into(),
                    action: String::new(),
                    freed: vec![],
                    cost_before: 2.0,
                    cost_after: 2.0,
                    iterations: 0,
                },
                StepRecord {
                    node: "a".into(),
                    action: "a".into(),
                    freed: vec!["a".into()],
                    cost_before: 2.0,
                    cost_after: 0.5,
                    iterations: 7,
                },
            ],
        };
        let text = format_run_summary("Ni_300K", &report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "=== Ni_300K ===");
        assert_eq!(lines[1], "Nodes: 2/3 completed | wavefronts=2 | elapsed=1.500s");
        assert_eq!(lines[2], "Stalled: all");
        assert!(lines[4].starts_with("node"));
        assert!(lines[6].starts_with("start            -"), "{}", lines[6]);
        assert!(lines[7].ends_with("      7"), "{}", lines[7]);
    }

    #[test]
    fn payload_table_aligns_names() {
        let payload = Payload::from([("a".into(), 3.52), ("scale".into(), 0.4)]);
        assert_eq!(format_payload(&payload), "a     = 3.520000\nscale = 0.400000\n");
    }

    #[test]
    fn graph_listing_follows_topological_order() {
        let graph = RefinementGraph::build_linear("a->scale").unwrap();
        let text = format_graph(&graph).unwrap();
        let names: Vec<&str> = text
            .lines()
            .skip(2)
            .map(|l| l.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(names, vec!["start", "a", "scale"]);
        assert!(text.lines().nth(3).unwrap().contains("pending"));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
