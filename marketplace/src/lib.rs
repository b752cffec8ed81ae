//! Analog Society
//!
//! A community marketplace for analog goods: members document the items
//! they own, lend or trade them through a request/exchange lifecycle, and
//! get analytics on their collection and its impact.
//!
//! ## Architecture
//!
//! - **Accounts**: registration, argon2 password hashes, cookie sessions
//! - **Catalog**: owner-scoped items with images and view counting
//! - **Lifecycle**: requests and exchanges; the only writer of item availability
//! - **Analytics**: benefits, inventory insights and export
//! - **Spheres**: named groups of members
//!
//! Pages are rendered with askama under `web`; the JSON API lives in `api`.

pub mod analytics;
pub mod api;
pub mod auth;
pub mod benefits;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod models;
pub mod server;
pub mod spheres;
pub mod uploads;
pub mod validation;
pub mod web;

pub use config::Config;
pub use database::Database;
pub use error::AppError;
pub use server::{AppState, ServeError, app, serve};
