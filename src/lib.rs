//! Progressive-delivery controller manager
//!
//! Runs independent, bounded worker pools for Rollouts, Experiments and
//! Services against a shared informer cache, and resolves which Services a
//! Rollout routes traffic through.

pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
