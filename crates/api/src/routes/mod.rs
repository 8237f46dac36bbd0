pub mod orders;
pub mod system;
pub mod webhook;
