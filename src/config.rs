use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sns::{
    config::{Credentials, Region},
    Client as SnsClient,
};
use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::collaborators::{
    DocumentStorage, GridFsStorage, MembershipDirectory, MongoDirectory, Notifier, SnsNotifier,
};
use crate::model::mongodb::ensure_indexes_exist;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "defaults::nomination_grace_minutes")]
    nomination_grace_minutes: u32,
    #[serde(default = "defaults::min_enrollment_days")]
    min_enrollment_days: u32,
    #[serde(default = "defaults::short_masters_max_days")]
    short_masters_max_days: u32,
    #[serde(default = "defaults::directory_timeout_ms")]
    directory_timeout_ms: u64,
    #[serde(default = "defaults::statistics_timeout_secs")]
    statistics_timeout_secs: u64,
    // secrets
    jwt_secret: String,
}

mod defaults {
    pub fn nomination_grace_minutes() -> u32 {
        60
    }

    pub fn min_enrollment_days() -> u32 {
        180
    }

    pub fn short_masters_max_days() -> u32 {
        365
    }

    pub fn directory_timeout_ms() -> u64 {
        2000
    }

    pub fn statistics_timeout_secs() -> u64 {
        30
    }
}

impl Config {
    /// Minimum gap between the close of nominations and the first round.
    pub fn nomination_grace(&self) -> Duration {
        Duration::minutes(self.nomination_grace_minutes.into())
    }

    /// Minimum programme length for a member to vote.
    pub fn min_enrollment(&self) -> Duration {
        Duration::days(self.min_enrollment_days.into())
    }

    /// Master's programmes up to this length are subject to the start-date cutoff.
    pub fn short_masters_max(&self) -> Duration {
        Duration::days(self.short_masters_max_days.into())
    }

    /// How long to wait for a single membership lookup.
    pub fn directory_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.directory_timeout_ms)
    }

    /// How long voter roll enumeration may run for a statistics request.
    pub fn statistics_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.statistics_timeout_secs)
    }

    /// Secret key used to verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places the `Client`, the `Database`
/// and the database-backed collaborators into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        let directory: Arc<dyn MembershipDirectory> = Arc::new(MongoDirectory::new(&db));
        let storage: Arc<dyn DocumentStorage> = Arc::new(GridFsStorage::new(&db));
        rocket = rocket
            .manage(client)
            .manage(db)
            .manage(directory)
            .manage(storage);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "campaigns".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// Configuration for the AWS connection.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: String,
    aws_access_key_id: String,
    notification_topic_arn: String,
    // secrets
    aws_secret_access_key: String,
}

/// A fairing that loads the AWS config and places an SNS-backed `Notifier`
/// into managed state.
pub struct NotifierFairing;

#[rocket::async_trait]
impl Fairing for NotifierFairing {
    fn info(&self) -> Info {
        Info {
            name: "AWS SNS",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<AwsConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load AWS config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        // Construct the connection.
        let aws_config = SdkConfig::builder()
            .region(Region::new(config.aws_region))
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.aws_access_key_id,
                config.aws_secret_access_key,
                None,
                None,
                "rocket config",
            )))
            .behavior_version(BehaviorVersion::latest())
            .build();
        let client = SnsClient::new(&aws_config);
        info!("Loaded Amazon SNS config");

        // Manage the state.
        let notifier: Arc<dyn Notifier> =
            Arc::new(SnsNotifier::new(client, config.notification_topic_arn));
        rocket = rocket.manage(notifier);
        Ok(rocket)
    }
}
