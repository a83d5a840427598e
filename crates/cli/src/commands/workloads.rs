//! Workload analysis, submission and operation dispatch

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    AdaptationReport, ApiClient, OperationRequest, OperationResult, Recommendation,
    SwitchDecision, WorkloadAnalysis, WorkloadDescriptor,
};
use crate::output::{
    color_gain, color_status, format_gain, print_heading, print_json, print_rows, print_success,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Characteristic")]
    characteristic: String,
    #[tabled(rename = "Score")]
    score: String,
}

fn print_analysis(analysis: &WorkloadAnalysis) {
    println!(
        "Primary Reason:         {}",
        analysis.primary_reason.cyan()
    );
    println!("Confidence:             {:.2}", analysis.confidence);
    if analysis.sequential {
        println!("Sequential:             {}", "yes".yellow());
    }
    let rows: Vec<ScoreRow> = analysis
        .scores
        .iter()
        .map(|(characteristic, score)| ScoreRow {
            characteristic: characteristic.clone(),
            score: format!("{:.2}", score),
        })
        .collect();
    print_rows(rows, "No characteristics scored");
}

/// One-line summary of what the coordinator decided
pub fn describe_decision(decision: &SwitchDecision) -> String {
    match decision.status.as_str() {
        "unchanged" => "Recommendation matches the committed topology".to_string(),
        "skipped" => format!(
            "Switch skipped, predicted gain {} below threshold",
            format_gain(decision.predicted_gain.unwrap_or_default())
        ),
        "committed" | "rolled_back" => match &decision.record {
            Some(record) => format!(
                "{} -> {} {}, measured gain {}",
                record.from,
                record.to,
                record.outcome,
                record
                    .measured_gain
                    .map(format_gain)
                    .unwrap_or_else(|| "n/a".to_string())
            ),
            None => decision.status.clone(),
        },
        "failed" => format!(
            "Switch failed: {}",
            decision.error.as_deref().unwrap_or("unknown error")
        ),
        "rejected" => format!(
            "Switch rejected: {}",
            decision.reason.as_deref().unwrap_or("another switch in progress")
        ),
        other => other.to_string(),
    }
}

/// Analyse a workload without acting on it
pub async fn recommend(
    client: &ApiClient,
    descriptor: &WorkloadDescriptor,
    format: OutputFormat,
) -> Result<()> {
    let rec: Recommendation = client.post("api/v1/recommendations", descriptor).await?;

    if format == OutputFormat::Json {
        return print_json(&rec);
    }

    print_heading("Topology Recommendation", 50);
    println!("Current:                {}", rec.current);
    let recommended = if rec.selection.topology == rec.current {
        rec.selection.topology.normal()
    } else {
        rec.selection.topology.green().bold()
    };
    println!("Recommended:            {}", recommended);
    println!("Reason:                 {}", rec.selection.reason);
    if let Some(rule) = &rec.selection.rule {
        println!("Rule:                   {}", rule.dimmed());
    }
    println!();
    print_analysis(&rec.analysis);

    Ok(())
}

/// Submit a workload; the coordinator may switch topology
pub async fn submit(
    client: &ApiClient,
    descriptor: &WorkloadDescriptor,
    format: OutputFormat,
) -> Result<()> {
    let report: AdaptationReport = client.post("api/v1/workloads", descriptor).await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    print_heading("Workload Submitted", 50);
    println!("Recommended:            {}", report.selection.topology);
    println!("Reason:                 {}", report.selection.reason);
    println!(
        "Decision:               {}",
        color_status(&report.decision.status)
    );
    println!("Topology Now:           {}", report.topology.cyan().bold());
    println!();

    let summary = describe_decision(&report.decision);
    match report.decision.status.as_str() {
        "committed" => print_success(&summary),
        "unchanged" | "skipped" => println!("{}", summary),
        _ => print_warning(&summary),
    }
    if let Some(gain) = report
        .decision
        .record
        .as_ref()
        .and_then(|r| r.measured_gain)
    {
        println!("Measured Gain:          {}", color_gain(gain));
    }

    Ok(())
}

/// Parse a JSON payload given on the command line
pub fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("Payload is not valid JSON"),
        None => Ok(serde_json::Value::Null),
    }
}

/// Dispatch one operation through its domain pipeline
pub async fn dispatch(
    client: &ApiClient,
    request: &OperationRequest,
    format: OutputFormat,
) -> Result<()> {
    let result: OperationResult = client.post("api/v1/operations", request).await?;

    if format == OutputFormat::Json {
        return print_json(&result);
    }

    let route = if result.overridden {
        format!("{} (override)", result.topology)
    } else {
        result.topology.clone()
    };
    print_success(&format!(
        "Operation {} completed on {} in {}ms",
        result.operation_id, route, result.duration_ms
    ));
    println!("{}", serde_json::to_string_pretty(&result.output)?);

    Ok(())
}
