//! Persistence layer: PostgreSQL cluster, migrations and query execution.
//!
//! [`cluster::Cluster`] owns the pools, [`repository::Repository`] composes
//! the cluster with the prepared queries and the migration manager, and
//! hands out [`batch::Batch`] and [`analytics::Analytics`] views.

pub mod analytics;
pub mod batch;
pub mod cluster;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod repository;
pub mod schema;
