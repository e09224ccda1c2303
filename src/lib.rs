#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use config::{ConfigFairing, DatabaseFairing, NotifierFairing};
use logging::LoggerFairing;

pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod voting;

/// Assemble the server. Connections to the database and to Amazon SNS are
/// made by fairings when the server is ignited.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(NotifierFairing)
}

/// Connect to the database named in the test configuration.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .unwrap();
    mongodb::Client::with_uri_str(db_uri).await.unwrap()
}

/// A fresh database name for a single test.
#[cfg(test)]
pub(crate) fn database() -> String {
    config::get_database_name()
}

/// Assemble a server against the given database, sending notifications to
/// the given notifier instead of Amazon SNS.
#[cfg(test)]
pub(crate) async fn rocket_for_db_and_notifier(
    client: mongodb::Client,
    db_name: &str,
    notifier: std::sync::Arc<dyn collaborators::Notifier>,
) -> Rocket<Build> {
    use std::sync::Arc;

    use collaborators::{DocumentStorage, GridFsStorage, MembershipDirectory, MongoDirectory};

    let db = client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db).await.unwrap();
    let directory: Arc<dyn MembershipDirectory> = Arc::new(MongoDirectory::new(&db));
    let storage: Arc<dyn DocumentStorage> = Arc::new(GridFsStorage::new(&db));

    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .manage(client)
        .manage(db)
        .manage(directory)
        .manage(storage)
        .manage(notifier)
}
