mod handlers;
mod server;
#[cfg(test)]
mod tests;

pub use server::{BoundCatalogServer, CatalogServer, ServerState};
