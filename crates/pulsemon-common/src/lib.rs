//! Shared metric model, wire codec, and integrity signing for the pulsemon
//! agent and server.

pub mod convert;
pub mod error;
pub mod sign;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("pulsemon");
}
