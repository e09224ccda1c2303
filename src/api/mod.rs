use rocket::Route;

mod campaigns;
mod common;
mod nominations;
mod statistics;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(campaigns::routes());
    routes.extend(nominations::routes());
    routes.extend(voting::routes());
    routes.extend(statistics::routes());
    routes
}
