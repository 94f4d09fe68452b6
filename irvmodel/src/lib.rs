//! Design-hierarchy model of a chip floorplan.
//!
//! The crate rebuilds the module/instance graph of a hardware design from its
//! source text, binds instances to modules or library macros, attaches typed
//! placement constraints to modules and checks their rectangles against the
//! routing grid of a technology stackup. Partial data is a normal state:
//! whatever cannot be bound yet stays pending until the next resolution pass.
//!
//! Most consumers start from [`hierarchy::Hierarchy`] and
//! [`constraints::manager::PlacementConstraintManager`].

pub mod constraints;
pub mod geometry;
pub mod hierarchy;
pub mod macros;
pub mod scanner;
pub mod tech;
#[cfg(any(test, feature = "test-utils"))]
pub mod tests_utils;
pub mod utils;
