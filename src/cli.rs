use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediagate")]
#[command(author, version, about = "Signed-URL media streaming backend")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(required = true)]
    pub config: PathBuf,
}
