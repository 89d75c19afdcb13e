// HTTP API
pub mod api;

// Configuration (TOML + environment secrets)
pub mod config;

// Credential records, encryption and storage
pub mod credentials;

// Auth-service user directory
pub mod directory;

// Domain events and the publisher seam
pub mod events;

// NATS client integration
pub mod nats;

// Linking, revocation and sync operations
pub mod orchestrator;

// Provider API client
pub mod provider;

// Data categories and OAuth scopes
pub mod scopes;

// Provider notification subscriptions
pub mod subscription;

// Data synchronization
pub mod sync;
