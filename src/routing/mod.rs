//! Topic dispatch: wildcard matching and the handler router built on top of
//! it.

pub mod router;
pub mod wildcard;

pub use router::{Handler, Router};
pub use wildcard::{is_wildcard_pattern, topic_matches};
