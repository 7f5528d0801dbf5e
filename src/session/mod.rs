mod builder;
mod cipher;

pub use builder::SessionBuilder;
pub use cipher::SessionCipher;
