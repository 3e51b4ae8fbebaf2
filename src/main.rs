/*
 * Parseable Server (C) 2022 - 2024 Parseable, Inc.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 */

use clap::{CommandFactory, FromArgMatches};
use target_s3_parquet::{
    cli::Cli,
    handlers::singer::Dispatcher,
    storage::ObjectStorageProvider,
    Sink,
};
use tokio::io::{stdin, stdout, BufReader};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LevelFilter::INFO);

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    let config = cli.resolve(&matches)?;

    let storage = config.storage.construct_client()?;
    info!(
        "Writing to {} storage at {}",
        config.storage.name(),
        config.storage.get_endpoint()
    );
    if let Err(err) = storage.check().await {
        warn!("Storage check failed, uploads will be retried: {err}");
    }

    let sink = Sink::new(config.options.clone(), storage)?;
    let mut dispatcher = Dispatcher::new(&sink);
    dispatcher
        .run(BufReader::new(stdin()), &mut stdout())
        .await?;

    Ok(())
}

// stdout carries Singer STATE messages, logs go to stderr
pub fn init_logger(default_level: LevelFilter) {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .compact();

    Registry::default()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
