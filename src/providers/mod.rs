mod error;
mod mistral;

pub use error::{ProviderError, ProviderErrorKind};
pub use mistral::MistralProvider;
