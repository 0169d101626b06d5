use {
    std::path::PathBuf,
    futures::future::FutureExt as _,
    sqlx::{
        ConnectOptions as _,
        postgres::{
            PgConnectOptions,
            PgPoolOptions,
        },
    },
    crate::{
        ledger::PgLedger,
        mirror::{
            MirrorQueue,
            SheetMirror,
        },
        mvp::{
            MvpBallot,
            MvpVoting,
        },
        prelude::*,
        results::MatchResults,
        sheets::GoogleSheets,
    },
};

mod config;
mod discord_bot;
mod ledger;
mod mirror;
mod mvp;
mod prelude;
mod reconcile;
mod results;
mod sheets;

#[allow(unused)] // variants only constructed under conditional compilation
#[derive(Default, Clone, Copy)]
enum Environment {
    #[cfg_attr(any(feature = "production", not(any(feature = "dev", debug_assertions))), default)]
    Production,
    #[cfg_attr(any(feature = "dev", all(debug_assertions, not(feature = "production"))), default)]
    Dev,
}

impl Environment {
    fn is_dev(&self) -> bool {
        match self {
            Self::Production => false,
            Self::Dev => true,
        }
    }
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Records a match result without going through Discord, then exits.
    Record {
        match_id: MatchId,
        /// 1 or 2
        winning_team: i64,
    },
}

#[derive(clap::Parser)]
#[clap(version)]
struct Args {
    /// Use this config file instead of searching the XDG config directories.
    #[clap(long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    subcommand: Option<Subcommand>,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)] Config(#[from] config::Error),
    #[error(transparent)] Reqwest(#[from] reqwest::Error),
    #[error(transparent)] Results(#[from] results::Error),
    #[error(transparent)] Serenity(#[from] serenity::Error),
    #[error(transparent)] Sql(#[from] sqlx::Error),
    #[error(transparent)] Task(#[from] tokio::task::JoinError),
}

async fn connect(config: &Config) -> sqlx::Result<PgPool> {
    let mut db_options = PgConnectOptions::default()
        .username("match_results")
        .database(if Environment::default().is_dev() { "match_results_dev" } else { "match_results" })
        .application_name("match-results")
        .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(10));
    if let Some(ref db_config) = config.database {
        if let Some(ref host) = db_config.host {
            db_options = db_options.host(host);
        }
        if let Some(port) = db_config.port {
            db_options = db_options.port(port);
        }
        if let Some(ref username) = db_config.username {
            db_options = db_options.username(username);
        }
        if let Some(ref password) = db_config.password {
            db_options = db_options.password(password);
        }
        if let Some(ref database) = db_config.database {
            db_options = db_options.database(database);
        }
    }
    PgPoolOptions::default()
        .max_connections(16)
        .connect_with(db_options)
        .await
}

#[wheel::main]
async fn main(Args { config, subcommand }: Args) -> Result<(), Error> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let config = Config::load(config.as_deref()).await?;
    let http_client = reqwest::Client::builder()
        .user_agent(concat!("match-results/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .use_rustls_tls()
        .hickory_dns(true)
        .https_only(true)
        .build()?;
    let db_pool = connect(&config).await?;
    let (mirror, mirror_task) = if let Some(ref sheets) = config.sheets {
        let backend = GoogleSheets::new(http_client, sheets.spreadsheet_id.clone(), sheets.service_account_key.clone());
        let (queue, task) = MirrorQueue::spawn(SheetMirror::new(backend, sheets.players_tab.clone(), sheets.matches_tab.clone(), sheets.cache_ttl()));
        (Some(queue), Some(task))
    } else {
        log::info!("no sheets config, spreadsheet mirror disabled");
        (None, None)
    };
    let match_results = MatchResults::new(mirror);
    match subcommand {
        Some(Subcommand::Record { match_id, winning_team }) => {
            let mut ledger = PgLedger::new(db_pool);
            let reconciliation = match_results.record(&mut ledger, [(match_id.clone(), winning_team)]).await?;
            println!("Match {match_id} result recorded: Team {winning_team} wins! Updated stats for {} players.", reconciliation.players_updated);
            // closes the queue so the mirror task exits once the pending sync is done
            drop(match_results);
            if let Some(mirror_task) = mirror_task {
                mirror_task.await?;
            }
        }
        None => {
            let default_panic_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                log::error!("Thread panic: {:?}", info);
                default_panic_hook(info)
            }));
            let mvp_voting = Arc::new(MvpBallot::new(db_pool.clone())) as Arc<dyn MvpVoting>;
            let discord_builder = serenity_utils::builder(config.discord.bot_token.clone()).await?;
            let discord_builder = discord_bot::configure_builder(discord_builder, db_pool, match_results, Some(mvp_voting), config.discord.admin_user);
            let discord_task = tokio::spawn(discord_builder.run()).map(|res| match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::from(e)),
                Err(e) => Err(Error::from(e)),
            });
            discord_task.await?;
        }
    }
    Ok(())
}
