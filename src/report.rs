//! Diagnostic rendering for resolved orders, load reports and unit status.
//!
//! Everything here returns plain strings; the binary decides where they go.

use serde_json::json;
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::core::graph::{DependencyGraph, DependencyKind};
use crate::core::resolver::ResolvedOrder;
use crate::core::unit::UnitStatus;
use crate::error::Result;
use crate::orchestration::{ConcurrencyRecommendation, OrchestrationReport, ResourceSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    /// Indented dependency tree.
    Graph,
    List,
    Json,
    /// Graphviz.
    Dot,
}

pub fn render_resolved(
    order: &ResolvedOrder,
    graph: &DependencyGraph,
    format: OutputFormat,
) -> Result<String> {
    Ok(match format {
        OutputFormat::Table => resolved_table(order, graph),
        OutputFormat::Graph => resolved_tree(order, graph),
        OutputFormat::List => list(&order.load_order),
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "resolved": order,
            "graph": graph.to_view(),
        }))?,
        OutputFormat::Dot => dot(order, graph),
    })
}

fn list(names: &[String]) -> String {
    names.iter().map(|n| format!("{}\n", n)).collect()
}

fn resolved_table(order: &ResolvedOrder, graph: &DependencyGraph) -> String {
    let width = order
        .load_order
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("UNIT".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>3}  {:<width$}  {:>5}  {:<8}  DEPENDENCIES",
        "#", "UNIT", "DEPTH", "REQUIRED"
    );
    for (i, name) in order.load_order.iter().enumerate() {
        let required = graph.get_unit(name).map(|u| u.required).unwrap_or(false);
        let mut deps = graph.dependencies_of(name).join(", ");
        if order.circular.contains(name) {
            deps.push_str(" (cycle)");
        }
        let _ = writeln!(
            out,
            "{:>3}  {:<width$}  {:>5}  {:<8}  {}",
            i + 1,
            name,
            order.depth_of(name).unwrap_or(0),
            if required { "yes" } else { "no" },
            deps.trim()
        );
    }

    let groups = order.groups();
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} units in {} groups",
        order.len(),
        groups.len()
    );
    if order.has_cycles() {
        let members: Vec<&str> = order.circular.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Circular: {}", members.join(", "));
    }
    let phantoms = graph.phantom_edges();
    if !phantoms.is_empty() {
        let _ = writeln!(out, "Dropped phantom dependencies:");
        for p in phantoms {
            let _ = writeln!(out, "  {} -> {}", p.unit, p.missing);
        }
    }
    out
}

/// Top-level units (nothing in scope depends on them) with their
/// dependencies nested below. Units already expanded are marked `(*)`.
fn resolved_tree(order: &ResolvedOrder, graph: &DependencyGraph) -> String {
    let roots: Vec<&String> = order
        .load_order
        .iter()
        .filter(|name| {
            !graph
                .dependents_of(name)
                .iter()
                .any(|d| order.contains(d))
        })
        .collect();

    let mut out = String::new();
    let mut expanded = HashSet::new();
    for root in roots {
        tree_node(graph, root, "", "", "", &mut expanded, &mut Vec::new(), &mut out);
    }
    // Cycle members with no acyclic root would otherwise be missing.
    for name in &order.load_order {
        if !expanded.contains(name.as_str()) {
            tree_node(graph, name, "", "", "", &mut expanded, &mut Vec::new(), &mut out);
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn tree_node<'g>(
    graph: &'g DependencyGraph,
    name: &'g str,
    suffix: &str,
    prefix: &str,
    child_prefix: &str,
    expanded: &mut HashSet<&'g str>,
    stack: &mut Vec<&'g str>,
    out: &mut String,
) {
    if stack.contains(&name) {
        let _ = writeln!(out, "{}{}{} (cycle)", prefix, name, suffix);
        return;
    }
    if !expanded.insert(name) {
        let _ = writeln!(out, "{}{}{} (*)", prefix, name, suffix);
        return;
    }
    let _ = writeln!(out, "{}{}{}", prefix, name, suffix);

    stack.push(name);
    let deps = graph.dependencies_of(name);
    for (i, &dep) in deps.iter().enumerate() {
        let last = i + 1 == deps.len();
        let (branch, next) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let label = match graph.dependency_kind(dep, name) {
            Some(DependencyKind::Optional) => " [optional]",
            _ => "",
        };
        tree_node(
            graph,
            dep,
            label,
            &format!("{}{}", child_prefix, branch),
            &format!("{}{}", child_prefix, next),
            expanded,
            stack,
            out,
        );
    }
    stack.pop();
}

fn dot(order: &ResolvedOrder, graph: &DependencyGraph) -> String {
    let mut out = String::from("digraph units {\n    rankdir=LR;\n");
    for name in &order.load_order {
        let mut attrs = Vec::new();
        if graph.get_unit(name).is_some_and(|u| u.required) {
            attrs.push("shape=box".to_string());
        }
        if order.circular.contains(name) {
            attrs.push("color=red".to_string());
        }
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\\ndepth {}\"{}];",
            name,
            name,
            order.depth_of(name).unwrap_or(0),
            attrs.iter().map(|a| format!(", {}", a)).collect::<String>()
        );
    }
    for name in &order.load_order {
        for dep in graph.dependencies_of(name) {
            if !order.contains(dep) {
                continue;
            }
            let style = match graph.dependency_kind(dep, name) {
                Some(DependencyKind::Optional) => " [style=dashed]",
                _ => "",
            };
            let _ = writeln!(out, "    \"{}\" -> \"{}\"{};", dep, name, style);
        }
    }
    for p in graph.phantom_edges() {
        if order.contains(&p.unit) {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\" [style=dotted, color=gray];",
                p.missing, p.unit
            );
        }
    }
    out.push_str("}\n");
    out
}

pub fn render_report(report: &OrchestrationReport, json_output: bool) -> Result<String> {
    if json_output {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let width = report
        .details
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max("UNIT".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {} ({}{})",
        report.run_id,
        report.mode,
        if report.sequential { ", sequential" } else { "" }
    );
    let _ = writeln!(
        out,
        "{:<width$}  {:<16}  {:>8}  MESSAGE",
        "UNIT", "STATUS", "SECONDS"
    );
    for r in &report.details {
        let message = r.error_detail.as_deref().unwrap_or(&r.message);
        let _ = writeln!(
            out,
            "{:<width$}  {:<16}  {:>8.3}  {}",
            r.name,
            r.status.to_string(),
            r.duration_seconds,
            message
        );
    }
    let _ = writeln!(
        out,
        "\n{} imported, {} failed, {} skipped in {:.2}s",
        report.imported_count, report.failed_count, report.skipped_count, report.duration_seconds
    );
    Ok(out)
}

pub fn render_status(statuses: &[UnitStatus], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => return Ok(serde_json::to_string_pretty(statuses)?),
        OutputFormat::List => {
            let active: Vec<String> = statuses
                .iter()
                .filter(|s| s.active)
                .map(|s| s.name.clone())
                .collect();
            return Ok(list(&active));
        }
        _ => {}
    }

    let width = statuses
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max("UNIT".len());
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:<8}  {:<9}  {:<6}  ACTIVATED",
        "UNIT", "REQUIRED", "AVAILABLE", "ACTIVE"
    );
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    for s in statuses {
        let _ = writeln!(
            out,
            "{:<width$}  {:<8}  {:<9}  {:<6}  {}",
            s.name,
            yes_no(s.required),
            yes_no(s.available),
            yes_no(s.active),
            s.last_activated_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(out)
}

pub fn render_metrics(
    snapshot: &ResourceSnapshot,
    recommendations: &[ConcurrencyRecommendation],
    automated: bool,
) -> String {
    let mark = |heuristic: bool| if heuristic { " (heuristic)" } else { "" };
    let mut out = String::new();
    let _ = writeln!(out, "Logical cores:    {}", snapshot.logical_cores);
    let _ = writeln!(
        out,
        "CPU load:         {:.1}%{}",
        snapshot.cpu_load_percent,
        mark(snapshot.heuristic.cpu)
    );
    let _ = writeln!(
        out,
        "Memory pressure:  {:.1}%{}",
        snapshot.memory_pressure_percent,
        mark(snapshot.heuristic.memory)
    );
    let _ = writeln!(
        out,
        "I/O wait:         {:.1}%{}",
        snapshot.io_wait_percent,
        mark(snapshot.heuristic.io_wait)
    );
    if let Some(bytes) = snapshot.available_memory_bytes {
        let _ = writeln!(
            out,
            "Available memory: {:.1} GiB",
            bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        );
    }
    let _ = writeln!(
        out,
        "Environment:      {}",
        if automated { "automated" } else { "interactive" }
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<8}  {:>7}  {:>8}", "KIND", "OPTIMAL", "MAX SAFE");
    for rec in recommendations {
        let _ = writeln!(
            out,
            "{:<8}  {:>7}  {:>8}",
            rec.kind.to_string(),
            rec.optimal,
            rec.max_safe
        );
    }
    out
}
