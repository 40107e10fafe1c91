//! # Transfer Engine
//!
//! Streamed file downloads and uploads with progress reporting.
//!
//! ## Overview
//!
//! Downloads stream into `<name>.part` next to the destination and are
//! renamed into place once the whole body has arrived; the partial file is
//! removed on any failure, including cancellation of a pooled download.
//! Uploads check the source file before any request is made and reopen it
//! for every attempt.
//!
//! Establishing the transfer is retried like any other request. A body that
//! breaks off midway is not.

use crate::connection::{decode_body, Connection, ConnectionCore, DriveTask, Failure, Outcome};
use crate::error::{DriveError, Result};
use crate::progress::{ProgressBody, ProgressListener, ProgressReporter};
use crate::request::ApiRequest;
use core_async::fs;
use core_async::io::{AsyncWriteExt, BufWriter, ReaderStream};
use core_runtime::logging::strip_path;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const PARTIAL_SUFFIX: &str = ".part";

/// Removes a partial download unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(error = %e, "Failed to remove partial download");
                }
            }
        }
    }
}

fn check_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(DriveError::InvalidRequest(format!(
            "'{}' is not a plain file name",
            name
        )));
    }
    Ok(())
}

/// Size of a readable, non-empty regular file.
async fn check_source(source: &Path) -> Result<u64> {
    let invalid = |reason: &str| {
        DriveError::transfer_io(
            source,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, reason.to_string()),
        )
    };

    let metadata = fs::metadata(source)
        .await
        .map_err(|e| DriveError::transfer_io(source, e))?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(invalid("file is empty"));
    }

    fs::File::open(source)
        .await
        .map_err(|e| DriveError::transfer_io(source, e))?;

    Ok(metadata.len())
}

impl ConnectionCore {
    #[instrument(skip(self, request, destination, reporter), fields(path = %request.target))]
    pub(crate) async fn download(
        &self,
        request: &ApiRequest,
        destination: &Path,
        expected_name: &str,
        expected_size: Option<u64>,
        reporter: &ProgressReporter,
    ) -> Result<PathBuf> {
        let result = self
            .download_to(request, destination, expected_name, expected_size, reporter)
            .await;
        if let Err(error) = &result {
            reporter.fail(error);
        }
        result
    }

    async fn download_to(
        &self,
        request: &ApiRequest,
        destination: &Path,
        expected_name: &str,
        expected_size: Option<u64>,
        reporter: &ProgressReporter,
    ) -> Result<PathBuf> {
        check_file_name(expected_name)?;
        fs::create_dir_all(destination)
            .await
            .map_err(|e| DriveError::transfer_io(destination, e))?;

        let target = destination.join(expected_name);
        let partial_path = destination.join(format!("{}{}", expected_name, PARTIAL_SUFFIX));

        let http = &self.http;
        let response = self
            .dispatch(request, false, |signed| async move {
                match http.execute_stream(signed).await {
                    Ok(response) if (200..300).contains(&response.status) => {
                        Outcome::Success(response)
                    }
                    Ok(response) => match response.into_buffered().await {
                        Ok(buffered) => Outcome::Failed(Failure::Status(buffered)),
                        Err(error) => Outcome::Failed(Failure::Transport(error)),
                    },
                    Err(error) => Outcome::Failed(Failure::Transport(error)),
                }
            })
            .await?;

        let status = response.status;
        if let Some(length) = response.content_length() {
            reporter.expect(length);
        }

        let mut partial = PartialFile::new(partial_path.clone());
        let file = fs::File::create(&partial_path)
            .await
            .map_err(|e| DriveError::transfer_io(&partial_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut body = response.body;
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                DriveError::response(Some(status), "Download interrupted", e)
            })?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DriveError::transfer_io(&partial_path, e))?;
            written += chunk.len() as u64;
            reporter.update(written);
        }

        writer
            .flush()
            .await
            .map_err(|e| DriveError::transfer_io(&partial_path, e))?;
        drop(writer);

        if let Some(expected) = expected_size {
            if written != expected {
                return Err(DriveError::Response {
                    status: Some(status),
                    code: None,
                    message: format!("Expected {} bytes, received {}", expected, written),
                    body: String::new(),
                    source: None,
                });
            }
        }

        fs::rename(&partial_path, &target)
            .await
            .map_err(|e| DriveError::transfer_io(&target, e))?;
        partial.disarm();

        reporter.complete(written);
        info!(
            bytes = written,
            file = %strip_path(&target.to_string_lossy()),
            "Download complete"
        );
        Ok(target)
    }

    #[instrument(skip(self, request, source, reporter), fields(path = %request.target))]
    pub(crate) async fn upload<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        source: &Path,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<T> {
        let result = self.upload_from(request, source, reporter).await;
        if let Err(error) = &result {
            reporter.fail(error);
        }
        result
    }

    async fn upload_from<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        source: &Path,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<T> {
        let length = check_source(source).await?;
        reporter.expect(length);

        let has_content_type = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("Content-Type"));
        let request = if has_content_type {
            request.clone()
        } else {
            let content_type = mime_guess::from_path(source).first_or_octet_stream();
            request
                .clone()
                .with_header("Content-Type", content_type.essence_str())
        };

        let http = &self.http;
        let response = self
            .dispatch(&request, true, |signed| async move {
                let file = match fs::File::open(source).await {
                    Ok(file) => file,
                    Err(e) => return Outcome::Abort(DriveError::transfer_io(source, e)),
                };
                let body = ProgressBody::new(ReaderStream::new(file), Arc::clone(reporter));
                Outcome::from_reply(http.send_stream(signed, Box::pin(body), length).await)
            })
            .await?;

        let response = decode_body(response)?;
        let item = serde_json::from_slice(&response.body).map_err(|e| {
            DriveError::response(Some(response.status), "Failed to parse upload reply", e)
        })?;

        reporter.complete(length);
        info!(
            bytes = length,
            file = %strip_path(&source.to_string_lossy()),
            "Upload complete"
        );
        Ok(item)
    }
}

impl Connection {
    /// Download the body of `request` to `destination/expected_name`.
    ///
    /// `destination` is created when missing. With `expected_size` set, a
    /// body of any other length fails the download.
    ///
    /// # Errors
    ///
    /// Request and response failures as for [`Connection::execute`],
    /// [`DriveError::TransferIo`] when the file cannot be written. The
    /// listener's `on_failure` has been called by the time this returns.
    pub fn download(
        &self,
        request: ApiRequest,
        destination: impl AsRef<Path>,
        expected_name: &str,
        expected_size: Option<u64>,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<PathBuf> {
        let reporter = ProgressReporter::new(listener, expected_size);
        self.run_reported(
            self.core.download(
                &request,
                destination.as_ref(),
                expected_name,
                expected_size,
                &reporter,
            ),
            &reporter,
        )
    }

    /// Pooled form of [`Connection::download`].
    pub fn download_async(
        &self,
        request: ApiRequest,
        destination: PathBuf,
        expected_name: String,
        expected_size: Option<u64>,
        listener: Arc<dyn ProgressListener>,
    ) -> DriveTask<PathBuf> {
        let reporter = Arc::new(ProgressReporter::new(listener, expected_size));
        let core = Arc::clone(&self.core);
        let task_reporter = Arc::clone(&reporter);

        self.submit(
            async move {
                core.download(
                    &request,
                    &destination,
                    &expected_name,
                    expected_size,
                    &task_reporter,
                )
                .await
            },
            Some(reporter),
        )
    }

    /// Upload `source` as the body of `request` and parse the JSON reply,
    /// typically the created item.
    ///
    /// # Errors
    ///
    /// [`DriveError::TransferIo`] before any request when `source` is
    /// missing, unreadable, not a regular file, or empty.
    pub fn upload<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        source: impl AsRef<Path>,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<T> {
        let reporter = Arc::new(ProgressReporter::new(listener, None));
        self.run_reported(
            self.core.upload(&request, source.as_ref(), &reporter),
            &reporter,
        )
    }

    /// Pooled form of [`Connection::upload`].
    pub fn upload_async<T>(
        &self,
        request: ApiRequest,
        source: PathBuf,
        listener: Arc<dyn ProgressListener>,
    ) -> DriveTask<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let reporter = Arc::new(ProgressReporter::new(listener, None));
        let core = Arc::clone(&self.core);
        let task_reporter = Arc::clone(&reporter);

        self.submit(
            async move { core.upload(&request, &source, &task_reporter).await },
            Some(reporter),
        )
    }
}
