//! # CPCTL CLI
//!
//! Command-line interface for inspecting and steering ComponentPlans.
//!
//! ## Usage
//!
//! ```bash
//! # List ComponentPlans with their derived phase
//! cpctl list --namespace default
//!
//! # Approve a plan for installation
//! cpctl approve --namespace default --name my-nginx-1.2.0
//!
//! # Roll a plan's release back to its installed revision
//! cpctl rollback --namespace default --name my-nginx-1.2.0
//!
//! # Show status of a plan
//! cpctl status --namespace default --name my-nginx-1.2.0
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use component_controller::config::ControllerConfig;
use component_controller::constants;
use component_controller::controller::annotations::retry_count;
use component_controller::controller::plan::derive_phase;
use component_controller::crd::ComponentPlan;
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client, ResourceExt,
};
use serde_json::json;

/// Component Controller CLI
#[derive(Parser)]
#[command(name = "cpctl")]
#[command(about = "Component Controller CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to current context namespace)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List ComponentPlans
    List {
        /// Namespace to list resources in (defaults to all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Approve a ComponentPlan
    Approve {
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Request a rollback to the plan's installed revision
    Rollback {
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Show status of a ComponentPlan
    Status {
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cpctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::List { namespace } => list_command(client, namespace.or(cli.namespace)).await,
        Commands::Approve { name, namespace } => {
            approve_command(client, name, namespace.or(cli.namespace)).await
        }
        Commands::Rollback { name, namespace } => {
            rollback_command(client, name, namespace.or(cli.namespace)).await
        }
        Commands::Status { name, namespace } => {
            status_command(client, name, namespace.or(cli.namespace)).await
        }
    }
}

fn phase_of(plan: &ComponentPlan, config: &ControllerConfig) -> String {
    derive_phase(
        plan,
        retry_count(plan),
        config.max_retry(plan.spec.config.max_retry),
    )
    .to_string()
}

async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<ComponentPlan> = if let Some(ns) = namespace {
        Api::namespaced(client, &ns)
    } else {
        Api::all(client)
    };

    let plans = api
        .list(&ListParams::default())
        .await
        .context("Failed to list ComponentPlan resources")?;

    if plans.items.is_empty() {
        println!("No ComponentPlan resources found.");
        return Ok(());
    }

    let config = ControllerConfig::from_env();
    println!(
        "{:<36} {:<16} {:<20} {:<12} {:<20} {:<8}",
        "NAME", "NAMESPACE", "RELEASE", "VERSION", "PHASE", "LATEST"
    );
    println!("{}", "-".repeat(116));
    for plan in &plans.items {
        let latest = plan
            .status
            .as_ref()
            .and_then(|s| s.latest)
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        println!(
            "{:<36} {:<16} {:<20} {:<12} {:<20} {:<8}",
            plan.name_any(),
            plan.namespace_or_default(),
            plan.spec.name,
            plan.spec.install_version,
            phase_of(plan, &config),
            latest
        );
    }

    Ok(())
}

async fn approve_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<ComponentPlan> = Api::namespaced(client, ns);
    api.patch(
        &name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "spec": { "approved": true } })),
    )
    .await
    .with_context(|| format!("Failed to approve ComponentPlan '{ns}/{name}'"))?;

    println!("✅ ComponentPlan {ns}/{name} approved");
    Ok(())
}

async fn rollback_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<ComponentPlan> = Api::namespaced(client, ns);
    let plan = api
        .get(&name)
        .await
        .with_context(|| format!("Failed to get ComponentPlan '{ns}/{name}'"))?;
    if plan.installed_revision() == 0 {
        anyhow::bail!("ComponentPlan '{ns}/{name}' has no installed revision to roll back to");
    }

    let patch = json!({
        "metadata": { "annotations": { constants::ROLLBACK_ANNOTATION: "true" } }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to request rollback for '{ns}/{name}'"))?;

    println!(
        "✅ Rollback of {ns}/{name} to revision {} requested",
        plan.installed_revision()
    );
    Ok(())
}

async fn status_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<ComponentPlan> = Api::namespaced(client, ns);
    let plan = api
        .get(&name)
        .await
        .with_context(|| format!("Failed to get ComponentPlan '{ns}/{name}'"))?;
    let config = ControllerConfig::from_env();

    println!("Status for ComponentPlan '{ns}/{name}':\n");
    println!("Spec:");
    let component = &plan.spec.component_ref;
    println!(
        "  Component: {}/{}",
        component.namespace.as_deref().unwrap_or(ns),
        component.name
    );
    println!("  Version: {}", plan.spec.install_version);
    println!("  Release: {}", plan.spec.name);
    println!("  Approved: {}", plan.spec.approved);

    println!("\nPhase: {}", phase_of(&plan, &config));
    println!("Retries: {}", retry_count(&plan));

    let Some(status) = &plan.status else {
        println!("\nStatus: No status available (resource may not have been reconciled yet)");
        return Ok(());
    };
    println!("Installed Revision: {}", status.installed_revision);
    if let Some(generation) = status.observed_generation {
        println!("Observed Generation: {generation}");
    }
    if !status.images.is_empty() {
        println!("Images: {}", status.images.join(", "));
    }
    if !status.conditions.is_empty() {
        println!("\nConditions:");
        for condition in &status.conditions.conditions {
            println!("  {}: {:?}", condition.r#type.as_str(), condition.status);
            println!("    Reason: {}", condition.reason);
            if !condition.message.is_empty() {
                println!("    Message: {}", condition.message);
            }
            if let Some(time) = &condition.last_transition_time {
                println!("    Last Transition: {time}");
            }
        }
    }

    Ok(())
}
