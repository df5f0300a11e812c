use clap::Parser;
use client::commands::{self, ClientError};
use client::config::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let opts = cli.backend.options();

    match cli.command {
        Command::View(args) => {
            let report = commands::view(&opts, &args).await?;
            println!(
                "frames={} renders={} chunks={} notes={} stamps={} cursors={}",
                report.frames, report.renders, report.subscribed_chunks, report.notes, report.stamps, report.cursors
            );
        }
        Command::Note(args) => {
            let note = commands::note(&opts, &args).await?;
            println!("note created at ({:.0}, {:.0}): {}", note.x, note.y, note.text);
        }
        Command::Stamp(args) => {
            let stamp = commands::stamp(&opts, &args).await?;
            println!("{} dropped at ({:.0}, {:.0})", stamp.emoji, stamp.x, stamp.y);
        }
        Command::Ping => {
            commands::ping(&cli.backend.server_url).await?;
            println!("ok");
        }
        Command::Chunk { namespace, key } => {
            let value = commands::chunk(&cli.backend.server_url, &namespace, &key).await?;
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{value}"),
            }
        }
    }
    Ok(())
}
