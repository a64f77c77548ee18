//! Generated wire types and the tonic service definitions for the
//! log-forwarding proxy's gRPC ingress.

tonic::include_proto!("otaclient_iot_logging_server");
