mod receiver;

use std::path::Path;

use anyhow::Context;
use clap::{Arg, Command};

use crate::receiver::{EmailReceiver, FetchRequest};

fn setup_logging() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging().context("cannot initialize logging")?;

    let matches = Command::new("email-receiver")
        .about("Fetch unseen messages from an IMAP mailbox and print them as JSON")
        .arg(
            Arg::new("settings")
                .short('s')
                .long("settings")
                .value_name("FILE")
                .default_value("settings.yaml"),
        )
        .arg(
            Arg::new("max-results")
                .short('n')
                .long("max-results")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(u32)),
        )
        .get_matches();

    let settings_path = matches
        .get_one::<String>("settings")
        .cloned()
        .unwrap_or_else(|| "settings.yaml".to_string());
    let config = receiver::settings::load_settings(Path::new(&settings_path))
        .with_context(|| format!("cannot load settings from {}", settings_path))?;

    // CLI override wins over the settings file.
    let max_results = matches
        .get_one::<u32>("max-results")
        .copied()
        .or(config.receiver.max_results);

    let mut email_receiver = EmailReceiver::new();
    email_receiver.initialize(config.imap)?;

    let result = email_receiver.execute(&FetchRequest { max_results }).await?;
    receiver::display::display_result(&result);
    Ok(())
}
