//! Entities, value objects and the ports the engine depends on.

pub mod gateway;
pub mod money;
pub mod order;
pub mod plan;
pub mod ports;
pub mod subscription;
