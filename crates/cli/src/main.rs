// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::{error, info};

use tether::announce::{annotate, Annotation};
use tether::config::Config;
use tether::error::TetherError;
use tether::run::run;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    match run(config).await {
        Ok(outcome) => {
            info!(?outcome, "done");
            if let Some(report) = outcome.failure_report() {
                println!("{report}");
            }
            std::process::exit(outcome.exit_code());
        }
        Err(e) => {
            let kind = e.downcast_ref::<TetherError>().map(TetherError::kind).unwrap_or("internal");
            error!(kind, "fatal: {e:#}");
            println!("{}", annotate(Annotation::Error, &format!("{e:#}")));
            std::process::exit(1);
        }
    }
}
