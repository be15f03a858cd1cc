use anyhow::{Context, Result};

use servbase::config::ServiceConfig;
use servbase::ServiceRuntime;

/// Print `count` ids from the continuous or a namespaced generator
pub async fn next_id(config: ServiceConfig, namespace: Option<String>, count: usize) -> Result<()> {
    let runtime = ServiceRuntime::builder(config)
        .build()
        .await
        .context("Failed to start service runtime")?;

    for _ in 0..count {
        let id = match &namespace {
            Some(ns) => runtime.next_slow_id(ns),
            None => runtime.next_id(),
        };
        println!("{id}");
    }

    runtime.stop().await;
    Ok(())
}
