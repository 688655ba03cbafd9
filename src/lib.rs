//! Floodgate - Distributed Rate Limiting
//!
//! This crate implements a family of rate limiters that coordinate
//! admission decisions across many concurrent clients through a shared
//! Redis instance. Every read-modify-write runs as one atomic Lua script on
//! the coordinator, so concurrent clients cannot race each other and no
//! client-side locking exists. The limiter objects themselves are immutable
//! configuration bound to a connection handle; all mutable state lives on
//! the coordinator and expires on its own once a resource goes idle.

pub mod config;
pub mod error;
pub mod limiters;
