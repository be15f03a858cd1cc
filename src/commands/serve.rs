use anyhow::{Context, Result};
use std::path::PathBuf;

use servbase::config::ServiceConfig;
use servbase::registry::{RegistrationKind, ServMap};
use servbase::ServiceRuntime;

/// Register the handler map and keep it alive until ctrl-c
pub async fn serve(config: ServiceConfig, servs: PathBuf, cross_dc: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(&servs)
        .await
        .with_context(|| format!("Failed to read {}", servs.display()))?;
    let servs: ServMap = serde_json::from_str(&raw).context("Invalid handler map")?;

    let runtime = ServiceRuntime::builder(config)
        .build()
        .await
        .context("Failed to start service runtime")?;

    runtime.register_service(&servs).await?;
    if cross_dc {
        runtime
            .register_service_v2(&servs, RegistrationKind::Server, true)
            .await?;
    }

    println!("Registered {} as {}", runtime.servname(), runtime.copyname());
    println!("  ip: {}", runtime.serv_ip());
    for path in runtime.reg_infos().await.keys() {
        println!("  {path}");
    }
    println!("Press ctrl-c to deregister and exit");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    runtime.stop().await;
    Ok(())
}
