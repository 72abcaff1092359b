use actix_multipart::form::tempfile::TempFileConfig;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::io;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

mod api;
mod config;
mod jobs;
mod logging;
mod media;
mod pipeline;
mod shutdown;
#[cfg(test)]
mod test_support;
mod worker;

use crate::api::{
    auth::BearerAuth,
    health::health_config,
    job::{handlers::job_config, JobService},
    validation,
};
use crate::jobs::JobRegistry;
use crate::pipeline::{ClamdScanner, DisabledScanner, MalwareScanner, TrustPipeline};
use crate::shutdown::ShutdownCoordinator;
use crate::worker::{ConversionExecutor, ConversionQueue, FfmpegTranscoder, JobWorker};

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = config::Cli::parse();

    // Load configuration from environment, command line wins
    let config::Config {
        api_key,
        host,
        port,
        upload_dir,
        output_dir,
        ffmpeg_path,
        conversion_timeout,
        clamav,
        max_payload_size,
        max_concurrent_jobs,
        num_workers,
        log_dir,
    } = config::Config::from_env(cli.env_file.as_deref())
        .map_err(io::Error::other)?
        .apply_cli(&cli);

    // Create storage and logs directories if they don't exist
    std::fs::create_dir_all(&log_dir)?;
    std::fs::create_dir_all(&upload_dir)?;
    std::fs::create_dir_all(&output_dir)?;
    let multipart_tmp_dir = upload_dir.join("tmp");
    std::fs::create_dir_all(&multipart_tmp_dir)?;

    logging::init(&log_dir).map_err(io::Error::other)?;

    info!("Starting media-converter");
    info!("Configuration loaded successfully:");
    info!("  - Upload directory: {}", upload_dir.display());
    info!("  - Output directory: {}", output_dir.display());
    info!("  - Transcoder: {}", ffmpeg_path.display());
    info!("  - Max payload size: {} bytes", max_payload_size);
    info!("  - Max concurrent jobs: {}", max_concurrent_jobs);
    info!("  - Number of workers: {}", num_workers);

    let scanner: Arc<dyn MalwareScanner> = if clamav.enabled {
        info!("  - Antivirus: clamd at {:?}", clamav.address);
        Arc::new(ClamdScanner::new(clamav.address, clamav.timeout))
    } else {
        warn!("Antivirus scanning is DISABLED; uploads are not checked for malware");
        Arc::new(DisabledScanner)
    };

    let registry = Arc::new(JobRegistry::new());
    let transcoder = Arc::new(FfmpegTranscoder::new(ffmpeg_path, conversion_timeout));
    let executor = Arc::new(ConversionExecutor::new(registry.clone(), transcoder));
    let (queue, receiver) = ConversionQueue::new();

    // Create shutdown channel for graceful shutdown
    // watch channel allows multiple receivers to get the same value
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Spawn background workers with semaphore-based bounded concurrency
    let semaphore = Arc::new(Semaphore::new(max_concurrent_jobs));
    let mut worker_handles = Vec::new();

    for worker_id in 1..=num_workers {
        let job_worker = JobWorker::new(executor.clone(), receiver.clone());
        let worker_semaphore = semaphore.clone();
        let worker_shutdown_rx = shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            job_worker.run(worker_id, worker_semaphore, worker_shutdown_rx).await;
        });

        worker_handles.push(handle);
        info!("Spawned worker {}", worker_id);
    }

    let job_service = web::Data::new(JobService::new(
        registry.clone(),
        TrustPipeline::new(&upload_dir, scanner),
        queue,
        &output_dir,
    ));
    let auth = BearerAuth::new(api_key);

    let server = HttpServer::new(move || {
        // Configure payload size limits globally
        let payload_config = web::PayloadConfig::default().limit(max_payload_size);
        let auth = auth.clone();

        App::new()
            .app_data(job_service.clone())
            .app_data(payload_config)
            .app_data(validation::multipart_config(max_payload_size))
            .app_data(TempFileConfig::default().directory(&multipart_tmp_dir))
            .app_data(validation::path_config())
            .configure(health_config)
            .configure(|cfg| job_config(cfg, auth))
    });

    info!("Server starting on http://{}:{}", host, port);

    let server = server.bind((host.as_str(), port))?.run();

    // Get server handle for graceful shutdown
    let server_handle = server.handle();

    // Spawn server in background
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(
        server_handle,
        server_task,
        worker_handles,
        shutdown_tx,
        registry,
    );

    coordinator.wait_for_shutdown().await
}
