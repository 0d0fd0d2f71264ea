//! Rule engine
//!
//! The engine executes user-defined rules composed of triggers, conditions,
//! and actions. Rules are registered declaratively; the engine binds each
//! rule's modules to handler implementations discovered through the
//! [`ra_registries::HandlerFactoryRegistry`], tracks readiness as factories
//! and module-type definitions come and go, evaluates rules when triggers
//! fire, and reports status changes to an attached
//! [`ra_core::StatusListener`].
//!
//! # Lifecycle of a rule
//!
//! ```text
//! add → NOT_INITIALIZED → (template expansion) → handler binding → IDLE
//!                  ↑                                                │ trigger fires
//!                  └── factory / type / template disappears     RUNNING
//!                                                                   │ done
//!                                                                 IDLE
//! ```
//!
//! A rule that cannot be bound stays `NOT_INITIALIZED` with a status detail
//! describing what is missing; registry events re-drive binding without
//! caller involvement.

mod binder;
mod callback;
mod composite;
mod connection;
mod engine;
mod error;
mod executor;
mod runtime;
mod template;
mod watcher;

pub use engine::RuleEngine;
pub use error::EngineError;
