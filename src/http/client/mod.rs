mod hyper_client;

pub use hyper_client::{create_client, HyperClient, CONNECT_TIMEOUT, CONNS_PER_HOST, MAX_IDLE_CONN_DURATION};
