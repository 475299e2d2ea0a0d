//! Generated gRPC types for `proto/insectifica.proto`.

tonic::include_proto!("insectifica");
