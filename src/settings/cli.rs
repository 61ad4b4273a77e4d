use super::Parser;

#[derive(Parser, Debug)]
#[command(name = "brokerlink", version)]
pub struct Cli {
    /// Settings file; defaults to settings/dev.toml in debug builds and
    /// settings/release.toml otherwise.
    #[arg(long)]
    pub settings: Option<String>,

    /// Overrides the log filter from the settings file.
    #[arg(long)]
    pub log_filter: Option<String>,
}
