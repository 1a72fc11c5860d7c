mod discoverer;
mod openapi;
mod soft404;
pub mod wordlist;

pub use discoverer::{Candidate, Discoverer, Discovery, ProbePlan};
pub use openapi::OpenApiParser;
pub use soft404::Soft404;
