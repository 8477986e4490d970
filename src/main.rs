use clap::Parser;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::Client;
use rollouts_controller::config::Args;
use rollouts_controller::controller::{Informers, Manager, Reconcilers};
use rollouts_controller::server::{shutdown_channel, wait_for_signal, ShutdownController};
use tracing::{error, info, warn};

/// Build the client configuration from `--kubeconfig` and the override flags
///
/// Without any of them the usual inference applies (in-cluster, then
/// `$KUBECONFIG` / `~/.kube/config`).
async fn client_config(args: &Args) -> anyhow::Result<Config> {
    let options = args.kubeconfig_options();
    let config = match &args.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        None if has_overrides(&options) => Config::from_kubeconfig(&options).await?,
        None => Config::infer().await?,
    };
    Ok(config)
}

fn has_overrides(options: &KubeConfigOptions) -> bool {
    options.context.is_some() || options.cluster.is_some() || options.user.is_some()
}

/// First signal drains, any further signal forces
fn on_signal(controller: &ShutdownController, received: usize) {
    if received == 1 {
        controller.shutdown();
    } else {
        warn!("Second signal received, forcing shutdown");
        controller.force();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.env_filter())
        .init();

    info!("Starting rollouts controller");

    let config = match client_config(&args).await {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load Kubernetes configuration");
            return Err(e);
        }
    };
    let client = match Client::try_from(config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };

    let informers = Informers::new(args.resync());
    let reconcilers = Reconcilers::from_client(client.clone(), &informers);
    let manager = Manager::new(args.manager_config(), informers, reconcilers)?.with_client(client);

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    tokio::spawn(async move {
        let mut received = 0;
        loop {
            match wait_for_signal().await {
                Ok(_) => {
                    received += 1;
                    on_signal(&shutdown_controller, received);
                }
                Err(e) => {
                    error!(error = %e, "Cannot listen for termination signals");
                    // Keep the controller alive; dropping it would force a shutdown
                    std::future::pending::<()>().await;
                }
            }
        }
    });

    if let Err(e) = manager.run(args.worker_counts(), shutdown_signal).await {
        error!(error = %e, "Controller manager failed");
        return Err(e.into());
    }

    info!("Rollouts controller shut down");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
