// Vigil - a multi-tenant incident management and feature flag control plane.
// The library exposes the domain engine; the binary wires it to HTTP.

pub mod api; // HTTP handlers, DTOs and the route table
pub mod entity; // Database entities
pub mod error; // Error types and response mapping
pub mod middleware; // Authentication, CSRF and rate limiting
pub mod model; // Domain types: enums, contexts, rule grammar
pub mod service; // Business services over the relational store
