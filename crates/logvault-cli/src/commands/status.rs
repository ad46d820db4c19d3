//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    uptime_seconds: u64,
    #[serde(default)]
    components: BTreeMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let base = url.trim_end_matches('/');
    let client = reqwest::Client::new();

    match client.get(format!("{}/health", base)).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the logvault server running?");
            println!("Start it with: logvault serve --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_url = format!("{}/metrics", base);
    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    println!("Uptime: {}s", health.uptime_seconds);
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let tag = status_tag(&status.status);
            match &status.reason {
                Some(reason) => println!("  {} {}: {} ({})", tag, name, status.status, reason),
                None => println!("  {} {}: {}", tag, name, status.status),
            }
        }
    }
}

/// Plain `name value` samples; labeled series and comments are dropped.
fn parse_samples(metrics_text: &str) -> HashMap<&str, f64> {
    metrics_text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let value = parts.next()?.parse::<f64>().ok()?;
            Some((name, value))
        })
        .collect()
}

fn print_metrics(metrics_text: &str) {
    let values = parse_samples(metrics_text);

    let rows = [
        ("logvault_entries_ingested_total", "Entries Ingested:  "),
        ("logvault_batches_rejected_total", "Batches Rejected:  "),
        ("logvault_entries_archived_total", "Entries Archived:  "),
        ("logvault_partitions_swept_total", "Partitions Swept:  "),
        ("logvault_hot_entries", "Hot Entries:       "),
        ("logvault_queries_total", "Queries:           "),
        ("logvault_archive_partitions_skipped_total", "Skipped Partitions:"),
        ("logvault_archive_malformed_lines_total", "Malformed Lines:   "),
    ];

    let mut shown = false;
    for (metric, label) in rows {
        if let Some(v) = values.get(metric) {
            println!("{} {}", label, format_number(*v as u64));
            shown = true;
        }
    }

    if !shown {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_samples() {
        let text = "# HELP logvault_queries_total Merged queries served\n\
                    # TYPE logvault_queries_total counter\n\
                    logvault_queries_total 12\n\
                    logvault_query_failures_total{type=\"timeout\"} 1\n\
                    logvault_hot_entries 4500\n";
        let values = parse_samples(text);
        assert_eq!(values.get("logvault_queries_total"), Some(&12.0));
        assert_eq!(values.get("logvault_hot_entries"), Some(&4500.0));
        assert!(!values.contains_key("logvault_query_failures_total"));
    }

    #[test]
    fn test_health_response_shape() {
        let body = r#"{"status":"degraded","uptime_seconds":42,
            "components":{"hot_store":{"status":"healthy"},
            "scheduler":{"status":"degraded","reason":"archive job failed"}}}"#;
        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, "degraded");
        assert_eq!(health.uptime_seconds, 42);
        assert_eq!(
            health.components["scheduler"].reason.as_deref(),
            Some("archive job failed")
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }
}
