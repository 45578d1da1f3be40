use crate::{
    api_client::{MultipartInfo, UploadApi, UploadBody, UploadRequest, UploadResponse, UploadType},
    error::UploadError,
    progress::{NoopReporter, PartProgress, ProgressReader, ProgressReporter, ProgressTracker},
};
use serde::Serialize;
use std::{io::SeekFrom, sync::Arc};
use tokio::{
    fs::File,
    io::{self, AsyncReadExt, AsyncSeekExt, Take},
};
use tracing::{debug, info, warn};

/// One contiguous byte range of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

/// How a file of a given size is split into parts of a server-chosen size.
///
/// Every part is `part_size` bytes long except the last, which holds the
/// remaining `1..=part_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    total_size: u64,
    part_size: u64,
    part_count: u32,
}

impl TransferPlan {
    /// Validate a server declared plan against the local file size.
    pub fn new(
        total_size: u64,
        part_size: u64,
        declared_part_count: u32,
    ) -> Result<Self, UploadError> {
        if total_size == 0 {
            return Err(UploadError::InvalidPlan(
                "an empty file cannot be split into parts".into(),
            ));
        }
        if part_size == 0 {
            return Err(UploadError::InvalidPlan("part size must not be zero".into()));
        }
        let expected = total_size.div_ceil(part_size);
        if u64::from(declared_part_count) != expected {
            return Err(UploadError::InvalidPlan(format!(
                "{declared_part_count} parts of {part_size} bytes declared for a {total_size} byte file, expected {expected}"
            )));
        }
        Ok(Self {
            total_size,
            part_size,
            part_count: declared_part_count,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    pub fn part(&self, number: u32) -> Option<PartRange> {
        if number == 0 || number > self.part_count {
            return None;
        }
        let offset = u64::from(number - 1) * self.part_size;
        Some(PartRange {
            number,
            offset,
            length: self.part_size.min(self.total_size - offset),
        })
    }

    /// Parts in upload order.
    pub fn parts(self) -> impl Iterator<Item = PartRange> {
        (1..=self.part_count).filter_map(move |number| self.part(number))
    }
}

/// A successfully stored part, as sent to the completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub upload_type: UploadType,
    pub expires_in_seconds: Option<u64>,
    pub max_downloads: Option<u32>,
}

impl UploadOptions {
    /// Expiry and download limits only apply to private uploads and are dropped when zero.
    fn request_for(&self, source: &UploadSource) -> UploadRequest {
        let private = self.upload_type == UploadType::Private;
        UploadRequest {
            file_name: source.file_name.clone(),
            file_type: source.content_type.clone(),
            file_size: source.size,
            upload_type: self.upload_type,
            expires_in_seconds: self.expires_in_seconds.filter(|secs| private && *secs > 0),
            max_downloads: self.max_downloads.filter(|max| private && *max > 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    SingleShot,
    Multipart { parts: u32 },
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub file_id: String,
    pub cdn_url: Option<String>,
    pub expires_at: Option<String>,
    pub max_downloads: Option<u32>,
    pub strategy: UploadStrategy,
}

/// Drives a file upload through either the single-shot or the chunked path.
///
/// Parts are sent strictly in order, one at a time. A failed chunked upload is
/// aborted server-side and has to be restarted from the first part.
pub struct Uploader<'a, A> {
    api: &'a A,
    reporter: Arc<dyn ProgressReporter>,
}

impl<'a, A: UploadApi> Uploader<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub async fn upload(
        &self,
        file: &File,
        source: &UploadSource,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, UploadError> {
        // Opened up front so a local read failure never leaves a pending record behind.
        let whole_file = open_range(file, 0, source.size).await?;
        let response = self
            .api
            .initiate_upload(&options.request_for(source))
            .await
            .map_err(UploadError::Initiate)?;
        let tracker = Arc::new(ProgressTracker::new(
            source.size,
            Arc::clone(&self.reporter),
        ));

        let strategy = match &response.multipart {
            Some(multipart) => {
                info!(
                    "using multipart upload for '{}' ({} parts of {} bytes, upload id: '{}')",
                    source.file_name, multipart.part_count, multipart.part_size, multipart.upload_id
                );
                let parts = self
                    .upload_multipart(file, source, &response, multipart, &tracker)
                    .await?;
                UploadStrategy::Multipart { parts }
            }
            None => {
                info!("using single-shot upload for '{}'", source.file_name);
                self.upload_single(whole_file, source, &response, &tracker)
                    .await?;
                UploadStrategy::SingleShot
            }
        };
        debug!("sent {} of {} bytes", tracker.uploaded(), source.size);

        Ok(UploadReceipt {
            file_id: response.file_id,
            cdn_url: response.cdn_url,
            expires_at: response.expires_at,
            max_downloads: response.max_downloads,
            strategy,
        })
    }

    async fn upload_single(
        &self,
        reader: Take<File>,
        source: &UploadSource,
        response: &UploadResponse,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<(), UploadError> {
        let body = UploadBody::new(
            ProgressReader::new(reader, Arc::clone(tracker), None),
            source.size,
        );
        self.api
            .put_object(&response.upload_url, Some(&source.content_type), body)
            .await
            .map_err(UploadError::Transfer)?;
        self.api
            .confirm_upload(&response.file_id)
            .await
            .map_err(UploadError::Confirm)
    }

    async fn upload_multipart(
        &self,
        file: &File,
        source: &UploadSource,
        response: &UploadResponse,
        multipart: &MultipartInfo,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<u32, UploadError> {
        let file_id = &response.file_id;
        let committed = async {
            let plan = TransferPlan::new(source.size, multipart.part_size, multipart.part_count)?;
            let parts = self.upload_parts(file, file_id, plan, tracker).await?;
            self.api
                .complete_multipart(file_id, &parts)
                .await
                .map_err(UploadError::Complete)
        }
        .await;

        if let Err(err) = committed {
            // The upload error is what the caller needs; a failed abort only leaves
            // an incomplete upload behind for the server to expire.
            if let Err(abort_err) = self.api.abort_multipart(file_id).await {
                warn!(error = ?abort_err, "failed to abort multipart upload (file id: '{file_id}')");
            }
            return Err(err);
        }
        Ok(multipart.part_count)
    }

    async fn upload_parts(
        &self,
        file: &File,
        file_id: &str,
        plan: TransferPlan,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<Vec<PartResult>, UploadError> {
        debug!(
            "splitting {} bytes into {} part(s) of {} bytes",
            plan.total_size(),
            plan.part_count(),
            plan.part_size()
        );
        let mut results = Vec::with_capacity(plan.part_count() as usize);
        for range in plan.parts() {
            debug!(
                "uploading part {}/{} (offset: {}, length: {})",
                range.number,
                plan.part_count(),
                range.offset,
                range.length
            );
            let part_url = self
                .api
                .part_upload_url(file_id, range.number)
                .await
                .map_err(|source| UploadError::PartUrl {
                    part_number: range.number,
                    source,
                })?;
            let reader = open_range(file, range.offset, range.length)
                .await
                .map_err(|source| UploadError::PartIo {
                    part_number: range.number,
                    source,
                })?;
            let progress = PartProgress {
                number: range.number,
                count: plan.part_count(),
            };
            let body = UploadBody::new(
                ProgressReader::new(reader, Arc::clone(tracker), Some(progress)),
                range.length,
            );
            let etag = self
                .api
                .put_object(&part_url.upload_url, None, body)
                .await
                .map_err(|source| UploadError::Part {
                    part_number: range.number,
                    source,
                })?;
            if etag.is_none() {
                warn!("storage returned no ETag for part {}", range.number);
            }
            results.push(PartResult {
                part_number: range.number,
                etag: etag.unwrap_or_default(),
            });
        }
        Ok(results)
    }
}

/// An independent reader over `length` bytes of `file` starting at `offset`.
async fn open_range(file: &File, offset: u64, length: u64) -> io::Result<Take<File>> {
    let mut reader = file.try_clone().await?;
    reader.seek(SeekFrom::Start(offset)).await?;
    Ok(reader.take(length))
}
