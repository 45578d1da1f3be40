use reqwest::StatusCode;

/// Failure of a single call against the DataDrop API or a storage write location.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{operation} request failed before response")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned status code {status} from {operation} request. {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("failed to decode {operation} response")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid request url")]
    Url(#[from] url::ParseError),
}

/// Errors produced while uploading a file.
///
/// Every variant is terminal: an upload either commits a remote object or
/// fails with one of these.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read local file")]
    Io(#[from] std::io::Error),

    #[error("failed to get upload URL")]
    Initiate(#[source] ApiError),

    #[error("server declared an unusable multipart plan: {0}")]
    InvalidPlan(String),

    #[error("upload failed")]
    Transfer(#[source] ApiError),

    #[error("failed to confirm upload")]
    Confirm(#[source] ApiError),

    #[error("failed to get part {part_number} URL")]
    PartUrl {
        part_number: u32,
        #[source]
        source: ApiError,
    },

    #[error("failed to upload part {part_number}")]
    Part {
        part_number: u32,
        #[source]
        source: ApiError,
    },

    #[error("failed to read part {part_number} from local file")]
    PartIo {
        part_number: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to complete multipart upload")]
    Complete(#[source] ApiError),
}

/// Errors produced by the device authorization flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to initiate login")]
    Initiate(#[source] ApiError),

    #[error("authorization failed: {0}")]
    Denied(String),

    #[error("authorization timeout - please try again")]
    Expired,

    #[error("login cancelled")]
    Cancelled,

    #[error("server returned an unusable credential: {0}")]
    MalformedCredential(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn causes_are_reported_once_in_the_chain() {
        let err = UploadError::Part {
            part_number: 2,
            source: ApiError::Status {
                operation: "storage upload",
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "slow down".into(),
            },
        };
        assert_eq!(err.to_string(), "failed to upload part 2");
        assert!(err.source().is_some());

        let rendered = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(rendered.matches("slow down").count(), 1);
        assert!(rendered.starts_with("failed to upload part 2: server returned status code 500"));
    }

    #[test]
    fn io_errors_keep_their_cause_out_of_the_message() {
        let err = UploadError::from(std::io::Error::other("disk gone"));
        assert_eq!(err.to_string(), "failed to read local file");
        assert_eq!(format!("{:#}", anyhow::Error::new(err)).matches("disk gone").count(), 1);
    }
}
