//! Read-only views of coordinator state

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    AgentHealth, ApiClient, Breaker, CoordinatorStatus, PerformanceReport, SwitchRecord,
};
use crate::output::{
    color_gain, color_status, format_gain, format_percent, format_timestamp, print_heading,
    print_info, print_json, print_rows, OutputFormat,
};

/// Row for switch history table
#[derive(Tabled)]
struct SwitchRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Predicted")]
    predicted: String,
    #[tabled(rename = "Measured")]
    measured: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Failure")]
    failure: String,
}

/// Row for performance snapshot table
#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Topology")]
    topology: String,
    #[tabled(rename = "Resp (ms)")]
    response_time: String,
    #[tabled(rename = "Throughput")]
    throughput: String,
    #[tabled(rename = "Errors")]
    error_rate: String,
    #[tabled(rename = "Util")]
    utilization: String,
}

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "Agent")]
    agent_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Workloads")]
    workloads: usize,
    #[tabled(rename = "Last Heartbeat")]
    last_heartbeat: String,
}

#[derive(Tabled)]
struct BreakerRow {
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Failures")]
    failures: String,
    #[tabled(rename = "Cooldown")]
    cooldown: String,
    #[tabled(rename = "Last Failure")]
    last_failure: String,
}

fn switch_row(record: &SwitchRecord) -> SwitchRow {
    SwitchRow {
        time: format_timestamp(record.timestamp),
        from: record.from.clone(),
        to: record.to.clone(),
        predicted: format_gain(record.predicted_gain),
        measured: record
            .measured_gain
            .map(color_gain)
            .unwrap_or_else(|| "-".to_string()),
        outcome: color_status(&record.outcome),
        failure: record.failure.clone().unwrap_or_default(),
    }
}

/// Show the committed topology and component summary
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: CoordinatorStatus = client.get("api/v1/status").await?;

    if format == OutputFormat::Json {
        return print_json(&status);
    }

    print_heading("Coordinator Status", 50);
    println!("Instance:               {}", status.instance.cyan());
    println!("Topology:               {}", status.topology.cyan().bold());
    let phase = if status.switch_in_progress {
        format!("{} (switch in progress)", color_status(&status.switch_phase))
    } else {
        color_status(&status.switch_phase)
    };
    println!("Switch Phase:           {}", phase);
    println!("Profiled Workloads:     {}", status.profile_size);
    println!();

    println!("{}", "Agents".bold());
    println!("{}", "-".repeat(50));
    let agents = format!("{} / {} healthy", status.healthy_agents, status.total_agents);
    if status.healthy_agents < status.total_agents {
        println!("Pool:                   {}", agents.yellow());
    } else {
        println!("Pool:                   {}", agents.green());
    }
    if status.open_breakers.is_empty() {
        println!("Open Breakers:          {}", "none".green());
    } else {
        println!(
            "Open Breakers:          {}",
            status.open_breakers.join(", ").red()
        );
    }
    println!();

    if let Some(snapshot) = &status.latest_snapshot {
        println!("{}", "Latest Sample".bold());
        println!("{}", "-".repeat(50));
        println!("Taken:                  {}", format_timestamp(snapshot.timestamp).dimmed());
        println!("Response Time:          {:.2}ms", snapshot.avg_response_time_ms);
        println!("Throughput:             {:.2}/s", snapshot.throughput);
        println!("Error Rate:             {}", format_percent(snapshot.error_rate));
        println!(
            "Utilization:            {}",
            format_percent(snapshot.resource_utilization)
        );
        println!();
    }

    match &status.last_switch {
        Some(record) => {
            println!("{}", "Last Switch".bold());
            println!("{}", "-".repeat(50));
            println!(
                "{} -> {}  {}  ({})",
                record.from,
                record.to,
                color_status(&record.outcome),
                format_timestamp(record.timestamp).dimmed()
            );
        }
        None => print_info("No topology switch attempted yet"),
    }

    Ok(())
}

/// Show switch history, newest last
pub async fn show_switches(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let mut records: Vec<SwitchRecord> = client.get("api/v1/switches").await?;
    if records.len() > limit {
        records.drain(..records.len() - limit);
    }

    if format == OutputFormat::Json {
        return print_json(&records);
    }

    let committed = records.iter().filter(|r| r.outcome == "committed").count();
    print_rows(
        records.iter().map(switch_row).collect::<Vec<_>>(),
        "No switches recorded",
    );
    if !records.is_empty() {
        println!(
            "\nTotal: {} switches, {} committed, {} rolled back",
            records.len(),
            committed,
            records.len() - committed
        );
    }

    Ok(())
}

/// Show performance summary and recent snapshots
pub async fn show_performance(
    client: &ApiClient,
    limit: usize,
    window: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut path = format!("api/v1/performance?limit={}", limit);
    if let Some(window) = window {
        path.push_str(&format!("&window={}", window));
    }
    let report: PerformanceReport = client.get(&path).await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    let Some(summary) = &report.summary else {
        print_info("No performance samples collected yet");
        return Ok(());
    };

    print_heading("Performance Summary", 50);
    println!("Samples:                {}", summary.samples);
    println!("Response Time:          {:.2}ms", summary.avg_response_time_ms);
    println!("Throughput:             {:.2}/s", summary.avg_throughput);
    println!("Error Rate:             {}", format_percent(summary.avg_error_rate));
    println!(
        "Utilization:            {}",
        format_percent(summary.avg_resource_utilization)
    );
    for (topology, count) in &summary.samples_per_topology {
        println!("  {:<22}{} samples", topology, count);
    }
    println!();

    let rows: Vec<SnapshotRow> = report
        .snapshots
        .iter()
        .map(|s| SnapshotRow {
            time: format_timestamp(s.timestamp),
            topology: s.topology.clone(),
            response_time: format!("{:.2}", s.avg_response_time_ms),
            throughput: format!("{:.2}", s.throughput),
            error_rate: format_percent(s.error_rate),
            utilization: format_percent(s.resource_utilization),
        })
        .collect();
    print_rows(rows, "No snapshots");

    Ok(())
}

/// Show agent health as tracked by the fault tolerance manager
pub async fn show_agents(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let agents: Vec<AgentHealth> = client.get("api/v1/agents").await?;

    if format == OutputFormat::Json {
        return print_json(&agents);
    }

    let healthy = agents.iter().filter(|a| a.alive).count();
    let total = agents.len();
    let rows: Vec<AgentRow> = agents
        .into_iter()
        .map(|a| AgentRow {
            status: color_status(if a.alive { "healthy" } else { "unhealthy" }),
            failures: a.consecutive_failures,
            workloads: a.workloads.len(),
            last_heartbeat: if a.last_heartbeat > 0 {
                format_timestamp(a.last_heartbeat)
            } else {
                "-".to_string()
            },
            agent_id: a.agent_id,
        })
        .collect();
    print_rows(rows, "No agents registered");
    if total > 0 {
        println!("\n{} of {} agents healthy", healthy, total);
    }

    Ok(())
}

/// Show circuit breaker state per dependency
pub async fn show_breakers(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let breakers: Vec<Breaker> = client.get("api/v1/breakers").await?;

    if format == OutputFormat::Json {
        return print_json(&breakers);
    }

    let rows: Vec<BreakerRow> = breakers
        .into_iter()
        .map(|b| BreakerRow {
            state: color_status(&b.state),
            failures: format!("{}/{}", b.consecutive_failures, b.threshold),
            cooldown: format!("{}s", b.cooldown_ms / 1000),
            last_failure: b
                .last_failure
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
            dependency: b.dependency,
        })
        .collect();
    print_rows(rows, "No dependency has been called yet");

    Ok(())
}
