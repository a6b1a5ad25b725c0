use clap::Parser;

#[derive(Parser)]
#[command(name = "island", about = "Ephemeral code-addressed P2P chat")]
struct Cli {
    /// Join this room code immediately
    #[arg(long)]
    join: Option<String>,

    /// URL of the room rules document (rules.json)
    #[arg(long)]
    rules_url: Option<String>,

    /// Custom data directory
    #[arg(long)]
    data_dir: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    rt.block_on(island_lib::run_interactive(
        cli.data_dir.as_deref(),
        cli.rules_url,
        cli.join,
    ));
}
