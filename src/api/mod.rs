mod server;
mod token;

pub use server::{router, ApiState};
pub use token::create_token;
