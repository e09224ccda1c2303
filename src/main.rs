use campaign_backend::{
    config::Config,
    model::{db::campaign::Campaign, mongodb::Coll},
};
use log::{error, info, LevelFilter};
use mongodb::{bson::doc, error::Error as DbError, Database};
use rocket::{Error as RocketError, Ignite, Rocket};
use thiserror::Error;

/// Errors that are critical to the entire server.
#[derive(Debug, Error)]
enum Error {
    #[error("Failed to contact database during launch: {0}")]
    DbLaunchError(#[from] DbError),
    #[error(transparent)]
    RocketError(#[from] RocketError),
}

/// Check the ignited server can reach its database and report what it will serve.
async fn preflight(rocket: &Rocket<Ignite>) -> Result<(), Error> {
    if let Some(db) = rocket.state::<Database>() {
        db.run_command(doc! { "ping": 1 }, None).await?;
        let campaigns = Coll::<Campaign>::from_db(db)
            .estimated_document_count(None)
            .await?;
        info!("Database `{}` holds {campaigns} campaign(s)", db.name());
    }
    if let Some(config) = rocket.state::<Config>() {
        info!(
            "Membership lookups time out after {:?}, statistics after {:?}",
            config.directory_timeout(),
            config.statistics_timeout()
        );
    }
    Ok(())
}

async fn run() -> Result<(), Error> {
    info!("Configuring server...");
    let rocket = campaign_backend::build().ignite().await?;
    preflight(&rocket).await?;
    info!("...server configured!");
    // Disable rocket logging from now on.
    log4rs_dynamic_filters::DynamicLevelFilter::set("rocket", LevelFilter::Off);
    let _ = rocket.launch().await?;
    Ok(())
}

#[rocket::main]
async fn main() {
    // Set up logging.
    log4rs::init_file("log4rs.yaml", log4rs_dynamic_filters::default_deserializers())
        .expect("Failed to initialise logging");
    info!("Initialised logging");

    // Launch server.
    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
