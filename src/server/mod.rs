mod middleware;
mod routes;

pub(crate) use routes::router;
pub(crate) use routes::AppState;
