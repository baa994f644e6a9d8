//! Status command: list the transfers of a running `loadify get`.

use anyhow::{Context, Result};
use loadify_core::config;
use serde_json::Value;

use crate::cli::control_socket;

pub async fn run_status(json: bool) -> Result<()> {
    let socket_path = config::control_socket_path()?;
    let replies = control_socket::request(&socket_path, "status").await?;
    if replies.is_empty() {
        println!("No transfers.");
        return Ok(());
    }
    if json {
        for line in replies {
            println!("{}", line);
        }
        return Ok(());
    }
    println!("{:<16}  {:<11}  {:>6}  {:>10}  {:>8}  FILE", "ID", "STATE", "DONE", "SPEED", "ETA");
    for line in replies {
        let item: Value = serde_json::from_str(&line).context("parse status reply")?;
        println!("{}", row(&item));
    }
    Ok(())
}

fn row(item: &Value) -> String {
    let text = |key: &str| item[key].as_str().unwrap_or("-").to_string();
    let number = |key: &str| item[key].as_f64().unwrap_or(0.0);
    let mut row = format!(
        "{:<16}  {:<11}  {:>5.1}%  {:>10}  {:>8}  {}",
        item["id"].as_u64().map(|n| format!("dl_{}", n)).unwrap_or_default(),
        text("state"),
        number("progress") * 100.0,
        format!("{}/s", crate::cli::display::human_bytes(number("speed"))),
        text("time_remaining"),
        text("filename"),
    );
    if let Some(msg) = item["error_message"].as_str().filter(|m| !m.is_empty()) {
        row.push_str(&format!("  ({})", msg));
    }
    row
}
