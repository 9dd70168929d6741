//! Domain types shared by every relay component.
//!
//! This crate contains only pure types with no storage or runtime dependencies.
//! Import in `usecase/` and `domain/` layers; never in `infra/`.

pub mod envelope;
pub mod event;
pub mod id;
pub mod message;
pub mod status;
