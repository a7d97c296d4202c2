pub mod cancel;
pub mod config;
pub mod corpus;
pub mod io;
pub mod ledger;
pub mod model;
