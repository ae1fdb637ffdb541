//! Driving adapters: the REST surface.

pub mod http;
