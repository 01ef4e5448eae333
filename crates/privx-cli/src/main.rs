use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "privx",
    about = "PrivX: synthesize AWS deployment plans",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Deployment config file (default: ./privx.toml when present)
    #[arg(long, global = true)]
    config: Option<String>,
    /// Context override as key=value, e.g. -c snapG=default. Repeatable.
    #[arg(short = 'c', long = "context", global = true)]
    context: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StackKind {
    /// The full PrivX service
    Service,
    /// Key, secret and network shared in a region
    #[value(alias = "services")]
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the template of a stack as JSON
    Synth {
        #[arg(short, long, value_enum, default_value = "service")]
        stack: StackKind,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<String>,
    },
    /// Show resource counts, subnets, databases and deploy order
    Plan {
        #[arg(short, long, value_enum, default_value = "service")]
        stack: StackKind,
        #[arg(short, long, value_enum, default_value = "text")]
        format: ReportFormat,
    },
    /// Print the node bootstrap script
    UserData,
    /// Generate a privx.toml scaffold
    Init {
        #[arg(short, long, default_value = ".")]
        path: String,
        #[arg(long, default_value = "privx")]
        subdomain: String,
        #[arg(long, default_value = "example.com")]
        domain: String,
        #[arg(long, default_value = "ops@example.com")]
        email: String,
        /// Overwrite an existing privx.toml
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("privx=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Synth { stack, out } => {
            let config = commands::load_config(cli.config.as_deref(), &cli.context)?;
            commands::synth::synth(&config, stack, out.as_deref())
        }
        Commands::Plan { stack, format } => {
            let config = commands::load_config(cli.config.as_deref(), &cli.context)?;
            commands::synth::plan(&config, stack, format)
        }
        Commands::UserData => {
            let config = commands::load_config(cli.config.as_deref(), &cli.context)?;
            commands::synth::user_data(&config)
        }
        Commands::Init { path, subdomain, domain, email, force } => {
            commands::init::init(&path, &subdomain, &domain, &email, force)
        }
    }
}
