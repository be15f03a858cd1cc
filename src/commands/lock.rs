use anyhow::{Context, Result};

use servbase::config::ServiceConfig;
use servbase::lock::{LockAcquire, LockScope};
use servbase::ServiceRuntime;

/// Take a lock once and hold it until ctrl-c
pub async fn hold_lock(config: ServiceConfig, name: String, global: bool) -> Result<()> {
    let scope = if global {
        LockScope::Global
    } else {
        LockScope::Local
    };

    let runtime = ServiceRuntime::builder(config)
        .build()
        .await
        .context("Failed to start service runtime")?;

    match runtime.lock(&name, scope).await? {
        LockAcquire::Acquired(handle) => {
            println!("Acquired {} ({scope})", handle.key());
            println!("Press ctrl-c to release");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;

            if handle.is_lost() {
                println!("Lock was lost while held");
            }
            runtime.unlock(handle).await;
        }
        LockAcquire::Held => {
            println!("Lock '{name}' ({scope}) is held by another owner");
        }
    }

    runtime.stop().await;
    Ok(())
}
