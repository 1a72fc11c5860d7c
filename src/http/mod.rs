mod client;
mod gate;

pub use client::{HttpClient, ProbeRequest};
pub use gate::RequestGate;
