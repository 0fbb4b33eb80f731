use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flownet")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Resolve robot dataflow networks and keep live connections converged", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load and validate a system description
    Validate(SystemArgs),

    /// Resolve the desired network of a system
    Resolve(ResolveArgs),

    /// Show the connection changes the first reconciliation cycle computes
    Diff(SystemArgs),

    /// Simulate the system against in-memory processes
    Run(RunArgs),

    /// Show the snapshot of the last run
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct SystemArgs {
    /// System description (default: ~/.config/flownet/system.toml)
    #[arg(env = "FLOWNET_SYSTEM")]
    pub system: Option<PathBuf>,
}

#[derive(Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub system: SystemArgs,

    /// Print the network as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub system: SystemArgs,

    /// Number of ticks (default: from the system description)
    #[arg(short, long)]
    pub ticks: Option<u32>,

    /// Make a live task lack a port, as TASK.PORT (repeatable)
    #[arg(long = "fail-port", value_name = "TASK.PORT")]
    pub fail_ports: Vec<String>,

    /// Do not save a snapshot of the run
    #[arg(long)]
    pub no_save: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "flownet",
            "-vv",
            "run",
            "rover.toml",
            "--ticks",
            "5",
            "--fail-port",
            "detector.image",
            "--fail-port",
            "camera.frame",
            "--no-save",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.system.system, Some(PathBuf::from("rover.toml")));
        assert_eq!(args.ticks, Some(5));
        assert_eq!(args.fail_ports, vec!["detector.image", "camera.frame"]);
        assert!(args.no_save);
    }

    #[test]
    fn test_parse_resolve_json() {
        let cli = Cli::parse_from(["flownet", "resolve", "--json", "-q"]);
        assert!(cli.quiet);
        let Command::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert!(args.json);
    }
}
