// HTTP module: outbound client construction.

pub mod client;
