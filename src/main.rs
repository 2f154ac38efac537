use std::{path::PathBuf, process, sync::Arc};

use clap::Parser;
use log::{error, info, LevelFilter};

use mailsync::{Config, Syncgroup};

#[derive(Debug, Parser)]
#[command(name = "mailsync", version, about)]
struct Opts {
    /// Config file location. Defaults to ~/.mailsyncrc.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Enable full debug logs, overriding the configured log level.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Do not execute sync actions, just log what would be done.
    #[arg(short = 'n', long = "dryrun")]
    dryrun: bool,

    /// List stores and folders, then exit.
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Limit the syncgroups to the given ones. Repeat the option to
    /// select multiple syncgroups.
    #[arg(short = 's', long = "syncgroup")]
    syncgroups: Vec<String>,
}

fn default_config_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mailsyncrc")
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    let configfile = opts.config.clone().unwrap_or_else(default_config_file);
    let config = match Config::load(&configfile).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error parsing config file: {err}");
            process::exit(1);
        }
    };

    let level = if opts.debug {
        LevelFilter::Trace
    } else {
        match config.loglevel.as_str() {
            "error" => LevelFilter::Error,
            "debug" => LevelFilter::Debug,
            _ => LevelFilter::Info,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(err) = std::fs::create_dir_all(&config.metadatadir) {
        error!(
            "cannot create metadata directory {}: {err}",
            config.metadatadir.display()
        );
        process::exit(1);
    }

    let mut failures = 0;
    let mut handles = Vec::new();

    for syncgroupconf in &config.syncgroups {
        if !opts.syncgroups.is_empty() && !opts.syncgroups.contains(&syncgroupconf.name) {
            continue;
        }

        let syncgroup = match Syncgroup::new(&config, syncgroupconf, opts.dryrun).await {
            Ok(syncgroup) => Arc::new(syncgroup),
            Err(err) => {
                error!("cannot create syncgroup {:?}: {err}", syncgroupconf.name);
                failures += 1;
                continue;
            }
        };

        if opts.list {
            syncgroup.list();
        } else {
            let name = syncgroup.name().to_owned();
            handles.push((name, tokio::spawn(syncgroup.sync(None))));
        }
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(())) => info!("sync of syncgroup {name:?} exited"),
            Ok(Err(err)) => {
                error!("sync of syncgroup {name:?} exited with error: {err}");
                failures += 1;
            }
            Err(err) => {
                error!("sync task of syncgroup {name:?} panicked: {err}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        process::exit(1);
    }
}
