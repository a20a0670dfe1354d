use actix_web::{middleware::Logger, web, App, HttpServer};
use cron_leader::config::Config;
use cron_leader::{handlers, storage};
use cron_leader::{JobScheduler, LeaderElection};
use log::{error, info};
use std::time::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 只有配置错误会终止进程；数据存储不可达时以跟随者身份运行
    let config = Config::from_env()?;
    info!("Starting cron-leader with config: {:?}", config);

    let store = storage::from_config(&config)?;
    let election = LeaderElection::new(config.election.clone(), store)?;
    info!("Instance id: {}", election.instance_id());

    election.start();

    // 只在领导者上执行的周期任务
    let mut jobs = JobScheduler::new(election.guard());
    let report_election = election.clone();
    jobs.every("lease_report", Duration::from_secs(60), move || {
        let election = report_election.clone();
        async move {
            let lease = election.current_lease().await?;
            if let Some(lease) = lease {
                info!(
                    "[JOB] lease_report - lock_name: {}, holder_id: {}, acquired_at: {}, expires_at: {}",
                    lease.lock_name, lease.holder_id, lease.acquired_at, lease.expires_at
                );
            }
            Ok(())
        }
    });

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Server starting on http://{}", bind_addr);
    info!("Swagger UI available at http://{}/swagger-ui/", bind_addr);

    // 启动 HTTP 服务；收到 SIGINT/SIGTERM 后 run() 返回
    let server_election = election.clone();
    let served = HttpServer::new(move || {
        let openapi = handlers::ApiDoc::openapi();

        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(server_election.clone()))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
            .route("/api/leader", web::get().to(handlers::leader_status))
    })
    .bind(&bind_addr)?
    .run()
    .await;

    if let Err(e) = &served {
        error!("HTTP server stopped with error: {}", e);
    }

    // 停止任务并释放租约，让其他实例立即接管
    info!("Shutting down, releasing leader lease");
    jobs.shutdown();
    election.stop().await;

    served?;
    Ok(())
}
