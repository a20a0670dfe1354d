use crate::election::LeaderElection;
use crate::models::{ApiResponse, Lease, LeaderStatus, Role};
use actix_web::{web, HttpResponse};
use log::error;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(leader_status),
    components(
        schemas(
            Lease,
            Role,
            LeaderStatus,
            ApiResponse<LeaderStatus>,
        )
    ),
    tags(
        (name = "leader", description = "定时任务领导者选举")
    ),
    info(
        title = "cron-leader API",
        version = "0.1.0",
        description = "查询当前实例的选举状态与租约信息",
    )
)]
pub struct ApiDoc;

/// 领导者状态接口
#[utoipa::path(
    get,
    path = "/api/leader",
    tag = "leader",
    responses(
        (status = 200, description = "当前选举状态", body = ApiResponse<LeaderStatus>),
        (status = 200, description = "租约读取失败", body = ApiResponse<LeaderStatus>)
    )
)]
pub async fn leader_status(election: web::Data<LeaderElection>) -> HttpResponse {
    match election.current_lease().await {
        Ok(lease) => HttpResponse::Ok().json(ApiResponse::success(LeaderStatus {
            instance_id: election.instance_id().to_string(),
            lock_name: election.lock_name().to_string(),
            role: election.role(),
            is_leader: election.is_leader(),
            lease,
        })),
        Err(e) => {
            error!("[STATUS] Failed to read lease: {}", e);
            HttpResponse::Ok().json(ApiResponse::<LeaderStatus>::error(
                4001,
                format!("Failed to read lease: {}", e),
            ))
        }
    }
}
