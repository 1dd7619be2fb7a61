use {
    std::{
        path::PathBuf,
        time::Duration,
    },
    clap::Parser as _,
    sqlx::{
        ConnectOptions as _,
        postgres::{
            PgConnectOptions,
            PgPoolOptions,
        },
    },
    crate::config::Config,
};

mod admin;
mod api;
mod audit;
mod auth;
mod config;
mod http;
mod matchup;
mod pick;
mod scoring;
mod settle;
mod standings;
mod team;
mod user;

fn parse_port(arg: &str) -> Result<u16, std::num::ParseIntError> {
    match arg {
        "production" => Ok(3000),
        "dev" => Ok(3001),
        _ => arg.parse(),
    }
}

#[derive(clap::Parser)]
#[clap(version)]
struct Args {
    #[clap(long, value_parser = parse_port)]
    port: Option<u16>,
    #[clap(long, default_value = "assets/config.json")]
    config: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)] Config(#[from] config::Error),
    #[error(transparent)] Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)] Rocket(#[from] rocket::Error),
    #[error(transparent)] Sql(#[from] sqlx::Error),
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let Args { port, config } = Args::parse();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let default_panic_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("thread panic: {info:?}");
        default_panic_hook(info)
    }));
    let config = Config::load(&config).await?;
    let mut db_options = PgConnectOptions::default()
        .username("pickem")
        .database("pickem")
        .application_name("gridiron-pickem")
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
    let db_pool = PgPoolOptions::default()
        .max_connections(16)
        .connect_with(db_options)
        .await?;
    sqlx::migrate!().run(&db_pool).await?;
    let rocket = http::rocket(db_pool, port.unwrap_or(3000)).await?;
    rocket.launch().await?;
    Ok(())
}
