//! Mapping between cell values and the dense global ids chunk volumes store.

mod lookup;
pub use lookup::*;
