//! `SeaORM` entities backing the relational store.

pub mod attachments;
pub mod audit_logs;
pub mod feature_flags;
pub mod flag_rules;
pub mod incidents;
pub mod jobs;
pub mod memberships;
pub mod saved_views;
pub mod tenants;
pub mod timeline_events;
pub mod users;
