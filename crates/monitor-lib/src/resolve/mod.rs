//! Resolution of VM metadata from partial provider data
//!
//! Every resolver is total: provider failures degrade to an absent value or
//! a placeholder and never abort the VM being reconciled.

mod flavor;
mod image;
mod owner;

pub use flavor::resolve_flavor;
pub use image::{resolve_image, IMAGE_NOT_FOUND};
pub use owner::{owner_facts, resolve_email, resolve_owner};
