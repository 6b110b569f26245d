//! # natter-proto
//!
//! Wire protocol definitions for the natterd chat server, generated from
//! `proto/natter/v1/natter.proto` by `tonic-build`.
//!
//! Three gRPC services are exposed:
//!
//! - `Chat`: bidirectional message streaming plus unary history reads
//! - `Admin`: the administrative control plane
//! - `Auth`: credential checks, registration and presence tracking

#![allow(clippy::all)]

/// Generated types and service stubs for the `natter.v1` protocol package.
pub mod v1 {
    tonic::include_proto!("natter.v1");
}
