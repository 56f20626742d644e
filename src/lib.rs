//! matchroom — questionnaire sessions in private chat rooms, with
//! compatibility ranking across finished users.

pub mod catalog;
pub mod channels;
pub mod config;
pub mod error;
pub mod matching;
pub mod routes;
pub mod session;
pub mod store;
