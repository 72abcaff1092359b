use actix_multipart::form::MultipartForm;
use actix_web::{
    delete, get,
    http::header::{ContentDisposition, DispositionParam, DispositionType},
    post,
    web::{Bytes, Data, Path, ServiceConfig, scope},
    HttpResponse,
};
use futures_util::{stream, Stream};
use std::io;
use tokio::io::AsyncReadExt;
use tracing::info;

use super::models::{ConversionRequest, ConvertForm};
use super::service::{JobService, ServiceError};
use crate::api::auth::BearerAuth;
use crate::jobs::JobId;
use crate::pipeline::Upload;

/// Accept an upload for conversion
///
/// Responds 202 as soon as the file passed the trust pipeline; the
/// conversion itself runs in the background.
#[post("")]
async fn submit_conversion(
    service: Data<JobService>,
    form: MultipartForm<ConvertForm>,
) -> Result<HttpResponse, ServiceError> {
    let ConvertForm {
        file,
        output_format,
    } = form.into_inner();

    let upload = Upload {
        reader: file.file,
        file_name: file.file_name.unwrap_or_default(),
        content_type: file.content_type.map(|mime| mime.essence_str().to_string()),
    };
    let request = ConversionRequest::new(&output_format.0);

    let response = service.submit(upload, request).await?;
    Ok(HttpResponse::Accepted().json(response))
}

#[get("/status/{job_id}")]
async fn job_status(
    service: Data<JobService>,
    job_id: Path<JobId>,
) -> Result<HttpResponse, ServiceError> {
    let response = service.status(&job_id)?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/download/{job_id}")]
async fn download_output(
    service: Data<JobService>,
    job_id: Path<JobId>,
) -> Result<HttpResponse, ServiceError> {
    let file = service.download(&job_id).await?;
    info!("Serving output of job {} ({} bytes)", job_id, file.len);

    Ok(HttpResponse::Ok()
        .content_type(file.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(file.file_name)],
        })
        .no_chunking(file.len)
        .streaming(read_chunks(file.file)))
}

const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Read a file as a stream of chunks
fn read_chunks(file: tokio::fs::File) -> impl Stream<Item = io::Result<Bytes>> {
    stream::try_unfold(file, |mut file| async move {
        let mut chunk = vec![0u8; DOWNLOAD_CHUNK];
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            return Ok::<_, io::Error>(None);
        }
        chunk.truncate(read);
        Ok(Some((Bytes::from(chunk), file)))
    })
}

#[delete("/{job_id}")]
async fn cleanup_job(
    service: Data<JobService>,
    job_id: Path<JobId>,
) -> Result<HttpResponse, ServiceError> {
    let response = service.cleanup(&job_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Mounts the conversion endpoints under `/convert`, all behind `auth`
pub fn job_config(config: &mut ServiceConfig, auth: BearerAuth) {
    config.service(
        scope("/convert")
            .wrap(auth)
            .service(submit_conversion)
            .service(job_status)
            .service(download_output)
            .service(cleanup_job),
    );
}
