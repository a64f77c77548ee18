//! The gRPC ingress. Two RPCs, `Check` and `PutLog`.

use crate::queue::QueueSender;
use otaclient_iot_logging_core::identity::AllowedEcus;
use otaclient_iot_logging_core::{GroupType, LogMessage, QueueRecord};
use otaclient_iot_logging_proto::ota_client_iot_logging_service_server::OtaClientIotLoggingService;
use otaclient_iot_logging_proto::{
    ErrorCode, HealthCheckRequest, HealthCheckResponse, LogType, PutLogRequest, PutLogResponse,
    ServiceStatus,
};
use tonic::{Request, Response, Status};

pub struct GrpcService {
    queue: QueueSender,
    allowed_ecus: AllowedEcus,
}

impl GrpcService {
    pub fn new(queue: QueueSender, allowed_ecus: AllowedEcus) -> Self {
        Self { queue, allowed_ecus }
    }
}

#[tonic::async_trait]
impl OtaClientIotLoggingService for GrpcService {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            status: ServiceStatus::Serving as i32,
        }))
    }

    async fn put_log(
        &self,
        request: Request<PutLogRequest>,
    ) -> Result<Response<PutLogResponse>, Status> {
        let request = request.into_inner();

        let code = if request.message.is_empty() {
            ErrorCode::NoMessage
        } else if !self.allowed_ecus.is_allowed(&request.ecu_id) {
            ErrorCode::NotAllowedEcuId
        } else {
            let timestamp_ms = if request.timestamp == 0 {
                LogMessage::now_ms()
            } else {
                request.timestamp
            };
            let group_type = match request.log_type() {
                LogType::Log => GroupType::Log,
                LogType::Metrics => GroupType::Metrics,
            };
            let record = QueueRecord::new(
                group_type,
                request.ecu_id,
                LogMessage::with_level(timestamp_ms, request.level, request.message),
            );
            match self.queue.try_enqueue(record) {
                Ok(()) => ErrorCode::NoFailure,
                Err(_) => ErrorCode::ServerQueueFull,
            }
        };

        Ok(Response::new(PutLogResponse { code: code as i32 }))
    }
}
