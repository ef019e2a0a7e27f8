use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "depctl", about = "Operator CLI for the deployment execution engine", version)]
pub struct Cli {
    /// Print machine-readable JSON instead of human-formatted text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save an API token for subsequent commands.
    Login {
        token: String,
    },
    /// Forget the saved API token.
    Logout,
    /// Print the identity associated with the saved token.
    Whoami,

    /// Manage deployments.
    Deployments {
        #[command(subcommand)]
        command: DeploymentsCommand,
    },

    /// Operate on EC2 instances backing a deployment's infrastructure.
    Ec2 {
        #[command(subcommand)]
        command: Ec2Command,
    },
}

#[derive(Debug, Subcommand)]
pub enum DeploymentsCommand {
    /// List all deployments.
    List,
    /// Show one deployment.
    Get { deployment_id: String },
    /// Create a new deployment and enter its first stage.
    Create {
        name: String,
        #[arg(long, default_value = "dev")]
        environment: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        #[arg(long)]
        repository_url: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Approve a deployment awaiting approval.
    Approve { deployment_id: String },
    /// Cancel a deployment.
    Cancel {
        deployment_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Roll back a deployed deployment.
    Rollback { deployment_id: String },
    /// Confirm a command awaiting confirmation before it can run.
    ConfirmCommand { deployment_id: String, command_id: String },
    /// Run `terraform plan` against the deployment's working tree.
    Plan {
        deployment_id: String,
        #[arg(long)]
        var_file: Option<String>,
    },
    /// Run `terraform apply` and, on success, commit the new source version.
    Apply {
        deployment_id: String,
        #[arg(long)]
        auto_approve: bool,
    },
    /// Run `terraform destroy` against the deployment's working tree.
    Destroy {
        deployment_id: String,
        #[arg(long)]
        auto_approve: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum Ec2Command {
    List,
    Describe { instance_id: String },
    Start { instance_id: String },
    Stop { instance_id: String },
    Reboot { instance_id: String },
}
