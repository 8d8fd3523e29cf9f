use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sftpgate", version, about = "SFTP gateway over an S3-compatible object store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway; configuration comes from the environment
    Serve,
}
