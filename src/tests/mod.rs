//! Integration tests for the client.
//!
//! Every case drives the real hyper transport against an in-process
//! coordinator/site server.


pub mod support;
