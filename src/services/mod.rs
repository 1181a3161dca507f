//! Business logic services.

mod backend_factory;
mod likes;

pub use backend_factory::BackendFactory;
pub use likes::{LikesService, MUTATION_FAILED_MESSAGE};
