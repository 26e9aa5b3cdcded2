pub mod deploy;
pub mod validate;
