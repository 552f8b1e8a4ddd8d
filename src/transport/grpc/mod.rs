mod client;
mod convert;
mod service;

pub use client::GrpcTransport;
