//! S3 protocol limits and error normalization
//!
//! S3-compatible services all share the multipart limits below and report
//! failures through error codes. This module turns both into what the core
//! expects: [`DriverCapabilities`] and the unified [`Error`] taxonomy.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use objio_core::{DriverCapabilities, Error};

/// Minimum part size: 5 MiB (S3 requirement, except for the last part)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: i32 = 10_000;

/// Read window that amortizes request latency
pub const PREFERRED_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// What every S3-compatible backend supports
pub fn s3_capabilities() -> DriverCapabilities {
    DriverCapabilities {
        multipart: true,
        append: false,
        min_part_size: MIN_PART_SIZE,
        preferred_buffer_size: Some(PREFERRED_BUFFER_SIZE),
    }
}

/// Reject part numbers and sizes S3 would refuse
pub fn check_part(part_number: i32, size: usize) -> objio_core::Result<()> {
    if !(1..=MAX_PARTS).contains(&part_number) {
        return Err(Error::UnsupportedMode(format!(
            "part {part_number} is outside 1..={MAX_PARTS}; use a larger part size"
        )));
    }
    if size as u64 > MAX_PART_SIZE {
        return Err(Error::UnsupportedMode(format!(
            "part of {size} bytes exceeds the {MAX_PART_SIZE} byte limit"
        )));
    }
    Ok(())
}

/// Error codes that map onto the unified taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    NotFound,
    Denied,
    Precondition,
    Transient,
    Other,
}

pub(crate) fn classify(code: Option<&str>) -> ErrorClass {
    match code {
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket" | "NoSuchUpload") => ErrorClass::NotFound,
        Some(
            "AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
            | "AllAccessDisabled",
        ) => ErrorClass::Denied,
        Some("PreconditionFailed") => ErrorClass::Precondition,
        Some(
            "InternalError" | "ServiceUnavailable" | "SlowDown" | "RequestTimeout"
            | "RequestTimeTooSkewed",
        )
        | None => ErrorClass::Transient,
        Some(_) => ErrorClass::Other,
    }
}

/// Normalize an SDK failure for the object `target`
pub(crate) fn map_sdk_error<E, R>(err: SdkError<E, R>, target: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();

    if matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) {
        return Error::BackendUnavailable(format!("{target}: {detail}"));
    }

    match classify(err.code()) {
        ErrorClass::NotFound => Error::NotFound(target.to_string()),
        ErrorClass::Denied => Error::PermissionDenied(format!("{target}: {detail}")),
        ErrorClass::Precondition => Error::StaleRead(format!("{target} changed during read")),
        ErrorClass::Transient => Error::BackendUnavailable(format!("{target}: {detail}")),
        ErrorClass::Other => Error::General(format!("{target}: {detail}")),
    }
}
