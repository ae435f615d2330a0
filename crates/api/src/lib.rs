//! `folio-api` — HTTP surface for the moderation retry pipeline.

pub mod app;
