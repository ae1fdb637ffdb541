//! Actix middleware shared by every route.

pub mod trace;
